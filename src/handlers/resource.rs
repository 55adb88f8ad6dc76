//! Resource handlers: one per conventional route, each delegating to its controller.

use crate::controller::{CrudController, RequestContext};
use crate::error::CrudError;
use crate::response::{success_one, success_one_ok, success_page};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::sync::Arc;

pub async fn index(
    State(controller): State<Arc<CrudController>>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, CrudError> {
    let page = controller.index(&ctx).await?;
    Ok(success_page(page))
}

pub async fn create_one(
    State(controller): State<Arc<CrudController>>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, CrudError> {
    let record = controller.create_one(&ctx).await?;
    Ok(success_one(record))
}

pub async fn get_one(
    State(controller): State<Arc<CrudController>>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, CrudError> {
    let record = controller.get_one(&ctx).await?;
    Ok(success_one_ok(record))
}

pub async fn update_one(
    State(controller): State<Arc<CrudController>>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, CrudError> {
    let record = controller.update_one(&ctx).await?;
    Ok(success_one_ok(record))
}

pub async fn delete_one(
    State(controller): State<Arc<CrudController>>,
    ctx: RequestContext,
) -> Result<StatusCode, CrudError> {
    controller.delete_one(&ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}
