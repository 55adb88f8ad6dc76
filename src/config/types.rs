//! Raw config types matching the JSON model file (entities + resources).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKeyConfig {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKeyConfig {
    pub fn columns(&self) -> Vec<String> {
        match self {
            PrimaryKeyConfig::Single(s) => vec![s.clone()],
            PrimaryKeyConfig::Composite(v) => v.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    /// PostgreSQL type name, e.g. `bigserial`, `text`, `timestamptz`.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the database supplies a value when the column is omitted.
    #[serde(default)]
    pub has_default: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKindConfig {
    ToOne,
    ToMany,
}

/// A relation declared on an entity. For `to_many` the remote column is the child's
/// foreign key pointing at `local_column`; for `to_one` the local column holds the key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    pub name: String,
    pub kind: RelationKindConfig,
    /// Name of the target entity.
    pub target: String,
    pub local_column: String,
    pub remote_column: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub primary_key: PrimaryKeyConfig,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
    /// Static validator rules run on the merged instance before create.
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PopulateConfig {
    #[serde(default)]
    pub one: Vec<String>,
    #[serde(default)]
    pub many: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource name used in error codes and logs.
    pub name: String,
    pub entity: String,
    /// Mount path for the five conventional routes, e.g. `/todos`.
    pub mount: String,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub searchable_fields: Vec<String>,
    /// Default order in the `order` query syntax, e.g. `updated_at desc,id`.
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub default_populate: PopulateConfig,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub replace_underscore_with_empty: bool,
    /// Scoping fields taken from request headers: field name -> header name.
    #[serde(default)]
    pub scope_headers: HashMap<String, String>,
}

/// Whole model file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}
