//! The five conventional routes of a resource, and a router for every resource in a model.

use crate::config::{ResolvedModel, ResourceConfig};
use crate::controller::{CrudController, ResourceOptions};
use crate::error::CrudError;
use crate::handlers::resource::{create_one, delete_one, get_one, index, update_one};
use crate::store::Store;
use axum::{routing::get, Router};
use std::sync::Arc;

/// `GET /` list, `POST /` create, and `GET`/`POST`/`DELETE` on the key path.
pub fn resource_routes(controller: Arc<CrudController>) -> Router {
    let key_route = controller.key_path().axum_path();
    tracing::debug!(resource = %controller.resource(), key_route = %key_route, "mounting resource");
    Router::new()
        .route("/", get(index).post(create_one))
        .route(&key_route, get(get_one).post(update_one).delete(delete_one))
        .with_state(controller)
}

/// Mount every resource of the model at its path. `customize` receives the options
/// built from each resource entry and may add hooks before the controller is built.
pub fn model_routes(
    store: Arc<dyn Store>,
    model: Arc<ResolvedModel>,
    customize: impl Fn(&ResourceConfig, ResourceOptions) -> ResourceOptions,
) -> Result<Router, CrudError> {
    let mut router = Router::new();
    for resource in &model.resources {
        let options = customize(resource, ResourceOptions::from_config(resource));
        let controller = CrudController::new(store.clone(), model.clone(), &resource.name, &resource.entity, options)?;
        let routes = resource_routes(Arc::new(controller));
        let mount = format!("/{}", resource.mount.trim_matches('/'));
        router = if mount == "/" {
            router.merge(routes)
        } else {
            router.nest(&mount, routes)
        };
        tracing::info!(resource = %resource.name, mount = %mount, "resource mounted");
    }
    Ok(router)
}
