//! Router builders.

mod common;
mod resource;

pub use common::{common_routes, common_routes_with_ready};
pub use resource::{model_routes, resource_routes};
