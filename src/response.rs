//! Response envelopes: `{"data": ..}` for one instance, `{"data": [..], "meta": {"count"}}` for a page.

use crate::config::Record;
use crate::controller::ListResult;
use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: MetaCount,
}

/// Total number of matches, not the page length.
#[derive(Serialize)]
pub struct MetaCount {
    pub count: u64,
}

/// A freshly created instance (201).
pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::CREATED, Json(SuccessOne { data }))
}

pub fn success_one_ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data }))
}

pub fn success_page(page: ListResult) -> (StatusCode, Json<SuccessMany<Record>>) {
    let ListResult { count, items } = page;
    (StatusCode::OK, Json(SuccessMany { data: items, meta: MetaCount { count } }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_meta_counts_all_matches() {
        let page = ListResult {
            count: 7,
            items: vec![json!({ "id": 1 }).as_object().cloned().unwrap()],
        };
        let (status, Json(body)) = success_page(page);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({ "data": [{ "id": 1 }], "meta": { "count": 7 } })
        );
    }
}
