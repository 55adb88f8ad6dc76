mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{model, seeded_store};
use resource_controller::{common_routes_with_ready, model_routes, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let m = model();
    let store = seeded_store(&m);
    let state = AppState { store: store.clone(), model: m.clone() };
    model_routes(store, m, |_, options| options)
        .unwrap()
        .merge(common_routes_with_ready(state))
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).header("x-tenant-id", "acme").body(Body::empty()).unwrap()
}

#[tokio::test]
async fn create_returns_201_with_envelope() {
    let req = Request::post("/orders")
        .header("x-tenant-id", "acme")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "customer": "gil", "lines": [{ "sku": "z", "qty": 4 }] }).to_string()))
        .unwrap();
    let (status, body) = send(app(), req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["tenant"], json!("acme"));
    assert_eq!(body["data"]["lines"][0]["order_id"], body["data"]["id"]);
}

#[tokio::test]
async fn list_carries_count_meta() {
    let (status, body) = send(app(), get("/orders?order=customer%20desc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], json!(2));
    assert_eq!(body["data"][0]["customer"], json!("bob"));
}

#[tokio::test]
async fn get_one_populates_default_relations() {
    let (status, body) = send(app(), get("/orders/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["lines"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn composite_key_route_resolves() {
    let (status, body) = send(app(), get("/order-lines/1/b")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["qty"], json!(2));
}

#[tokio::test]
async fn errors_map_to_status_and_code() {
    let (status, body) = send(app(), get("/orders/99")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("RES-001 RESOURCE_NOT_FOUND"));
    assert_eq!(body["error"]["details"]["resource"], json!("orders"));

    let (status, body) = send(app(), get("/orders?order=id%20sideways")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("RES-004 QUERY_MALFORM"));

    let req = Request::post("/orders/1")
        .header("x-tenant-id", "acme")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(app(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("RES-006 UPDATE_MALFORM"));
}

#[tokio::test]
async fn update_then_delete() {
    let app = app();
    let req = Request::post("/orders/2")
        .header("x-tenant-id", "acme")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "note": "slow" }).to_string()))
        .unwrap();
    let (status, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["note"], json!("slow"));

    let req = Request::delete("/orders/2").header("x-tenant-id", "acme").body(Body::empty()).unwrap();
    let (status, body) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(app, get("/orders/2")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn other_tenant_cannot_see_rows() {
    let req = Request::get("/orders/1").header("x-tenant-id", "globex").body(Body::empty()).unwrap();
    let (status, _) = send(app(), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_ready() {
    let (status, body) = send(app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_object());
    let (status, _) = send(app(), get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn resource_catalogue_lists_mounts() {
    let (status, body) = send(app(), get("/resources")).await;
    assert_eq!(status, StatusCode::OK);
    let mounts: Vec<&str> = body["data"].as_array().unwrap().iter().map(|r| r["mount"].as_str().unwrap()).collect();
    assert_eq!(mounts, vec!["/orders", "/order-lines/"]);
    assert_eq!(body["data"][0]["key_path"], json!(":id"));
}
