//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Declarative configuration and process settings failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: entity {entity} column {column}")]
    InvalidPrimaryKey { entity: String, column: String },
    #[error("duplicate mount path: {0}")]
    DuplicateMount(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Failures reported by the persistence collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("missing row: {0}")]
    Missing(String),
    /// A value the backend cannot read as the column's type (SQLSTATE class 22).
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("backend: {0}")]
    Backend(String),
}

/// Failures surfaced by a resource controller. Every variant names the resource.
#[derive(Error, Debug)]
pub enum CrudError {
    #[error("RES-001 RESOURCE_NOT_FOUND: {resource}: {detail}")]
    ResourceNotFound { resource: String, detail: String },
    #[error("RES-002 RESOURCE_ALREADY_EXISTS: {resource}: {detail}")]
    ResourceAlreadyExists { resource: String, detail: String },
    #[error("RES-003 INVALID_RESOURCE_SCOPE: {resource}: {detail}")]
    InvalidResourceScope { resource: String, detail: String },
    #[error("RES-004 QUERY_MALFORM: {resource}: {detail}")]
    QueryMalformed { resource: String, detail: String },
    #[error("RES-005 BAD_CONTROLLER_CONFIGURATION: {resource}: {detail}")]
    BadControllerConfiguration { resource: String, detail: String },
    #[error("RES-006 UPDATE_MALFORM: {resource}: {detail}")]
    UpdateMalformed { resource: String, detail: String },
    #[error("RES-010 VALIDATION_FAILED: {resource}: {detail}")]
    Validation { resource: String, detail: String },
    #[error("RES-500 STORE_FAILURE: {resource}: {source}")]
    Store {
        resource: String,
        #[source]
        source: StoreError,
    },
}

impl CrudError {
    pub fn not_found(resource: &str, detail: impl Into<String>) -> Self {
        CrudError::ResourceNotFound { resource: resource.to_string(), detail: detail.into() }
    }

    pub fn query_malformed(resource: &str, detail: impl Into<String>) -> Self {
        CrudError::QueryMalformed { resource: resource.to_string(), detail: detail.into() }
    }

    pub fn bad_configuration(resource: &str, detail: impl Into<String>) -> Self {
        CrudError::BadControllerConfiguration { resource: resource.to_string(), detail: detail.into() }
    }

    pub fn update_malformed(resource: &str, detail: impl Into<String>) -> Self {
        CrudError::UpdateMalformed { resource: resource.to_string(), detail: detail.into() }
    }

    pub fn validation(resource: &str, detail: impl Into<String>) -> Self {
        CrudError::Validation { resource: resource.to_string(), detail: detail.into() }
    }

    /// Wrap a collaborator failure. Uniqueness conflicts become `ResourceAlreadyExists`
    /// and unreadable written values `UpdateMalformed`.
    pub fn from_store(resource: &str, source: StoreError) -> Self {
        match source {
            StoreError::Conflict(detail) => CrudError::ResourceAlreadyExists {
                resource: resource.to_string(),
                detail,
            },
            StoreError::InvalidValue(detail) => CrudError::update_malformed(resource, detail),
            source => CrudError::Store { resource: resource.to_string(), source },
        }
    }

    /// Stable code string, e.g. `RES-001 RESOURCE_NOT_FOUND`.
    pub fn code(&self) -> &'static str {
        match self {
            CrudError::ResourceNotFound { .. } => "RES-001 RESOURCE_NOT_FOUND",
            CrudError::ResourceAlreadyExists { .. } => "RES-002 RESOURCE_ALREADY_EXISTS",
            CrudError::InvalidResourceScope { .. } => "RES-003 INVALID_RESOURCE_SCOPE",
            CrudError::QueryMalformed { .. } => "RES-004 QUERY_MALFORM",
            CrudError::BadControllerConfiguration { .. } => "RES-005 BAD_CONTROLLER_CONFIGURATION",
            CrudError::UpdateMalformed { .. } => "RES-006 UPDATE_MALFORM",
            CrudError::Validation { .. } => "RES-010 VALIDATION_FAILED",
            CrudError::Store { .. } => "RES-500 STORE_FAILURE",
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            CrudError::ResourceNotFound { resource, .. }
            | CrudError::ResourceAlreadyExists { resource, .. }
            | CrudError::InvalidResourceScope { resource, .. }
            | CrudError::QueryMalformed { resource, .. }
            | CrudError::BadControllerConfiguration { resource, .. }
            | CrudError::UpdateMalformed { resource, .. }
            | CrudError::Validation { resource, .. }
            | CrudError::Store { resource, .. } => resource,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CrudError::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            CrudError::ResourceAlreadyExists { .. } => StatusCode::CONFLICT,
            CrudError::InvalidResourceScope { .. }
            | CrudError::QueryMalformed { .. }
            | CrudError::UpdateMalformed { .. } => StatusCode::BAD_REQUEST,
            CrudError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CrudError::BadControllerConfiguration { .. } | CrudError::Store { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for CrudError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            CrudError::Store { resource, source } => {
                tracing::error!(resource = %resource, error = %source, "store failure");
                format!("{}: {}: store failure", self.code(), resource)
            }
            _ => self.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                details: Some(serde_json::json!({ "resource": self.resource() })),
            },
        };
        (status, Json(body)).into_response()
    }
}
