//! Resource controller: declaratively configured REST resources over a transactional store.

pub mod config;
pub mod controller;
pub mod error;
mod extractors;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_file, resolve, validate, ModelConfig, Record, ResolvedModel, Settings};
pub use controller::{CrudController, ListResult, RequestContext, ResourceOptions};
pub use error::{ConfigError, CrudError, StoreError};
pub use response::{success_one, success_one_ok, success_page};
pub use routes::{common_routes, common_routes_with_ready, model_routes, resource_routes};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Store, Transaction, WriteMode};
