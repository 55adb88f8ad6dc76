//! Shared application state for the common routes.

use crate::config::ResolvedModel;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub model: Arc<ResolvedModel>,
}
