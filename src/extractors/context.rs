//! Build a [`RequestContext`] from an axum request.

use crate::controller::RequestContext;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;

#[async_trait]
impl<S> FromRequest<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        // Routes without parameters (list, create) have no path captures.
        let params = Option::<Path<HashMap<String, String>>>::from_request_parts(&mut parts, state)
            .await
            .map_err(|never| match never {})?
            .map(|Path(p)| p)
            .unwrap_or_default();
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri).map_err(IntoResponse::into_response)?;
        let headers = parts.headers.clone();
        let bytes = Bytes::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(IntoResponse::into_response)?;

        Ok(RequestContext {
            params,
            query: RequestContext::query_from_pairs(pairs),
            headers,
            body: RequestContext::body_from_bytes(&bytes),
        })
    }
}
