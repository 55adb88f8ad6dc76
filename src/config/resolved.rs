//! Resolved entity model: config validated and flattened for runtime use.

use crate::config::{ResourceConfig, ValidationRule};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A stored instance as seen by the controller: field name -> JSON value.
/// To-many relations appear as arrays of child records once populated.
pub type Record = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    ToOne,
    ToMany,
}

/// Declared relationship descriptor; replaces runtime inspection of a live object graph.
#[derive(Clone, Debug)]
pub struct RelationMeta {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    /// Our column used in the join (our FK for to_one; our key for to_many).
    pub local_column: String,
    /// Their column used in the join (their key for to_one; their FK for to_many).
    pub remote_column: String,
}

/// Primary key type, used to generate keys for new rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub pk_type: Option<PkType>,
    pub nullable: bool,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), NOW()).
    pub has_default: bool,
    /// PostgreSQL type name used for parameter casts.
    pub pg_type: String,
}

/// Hashable identity of an instance: its primary key values in declaration order.
/// Numbers and strings with the same text compare equal, so `"7"` in a payload
/// matches a stored `7`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompositeKey(pub Vec<String>);

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}

fn key_part(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

#[derive(Clone, Debug)]
pub struct EntityMeta {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub pk_columns: Vec<String>,
    pub columns: Vec<ColumnInfo>,
    pub relations: Vec<RelationMeta>,
    pub validation: HashMap<String, ValidationRule>,
}

impl EntityMeta {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn relation(&self, name: &str) -> Option<&RelationMeta> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Composite key of a record, or `None` when any key field is absent or null.
    pub fn composite_key(&self, record: &Record) -> Option<CompositeKey> {
        if self.pk_columns.is_empty() {
            return None;
        }
        self.pk_columns
            .iter()
            .map(|c| record.get(c).and_then(key_part))
            .collect::<Option<Vec<_>>>()
            .map(CompositeKey)
    }

    /// Equality map on the primary key columns, for single-row writes.
    pub fn key_fields(&self, record: &Record) -> Record {
        self.pk_columns
            .iter()
            .filter_map(|c| record.get(c).map(|v| (c.clone(), v.clone())))
            .collect()
    }

    /// Only the fields that are stored columns of this entity.
    pub fn column_fields(&self, record: &Record) -> Record {
        record
            .iter()
            .filter(|(k, _)| self.has_column(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Single generated primary key column, when the key can be produced by the store.
    pub fn generated_pk(&self) -> Option<&ColumnInfo> {
        if self.pk_columns.len() != 1 {
            return None;
        }
        self.column(&self.pk_columns[0]).filter(|c| c.has_default)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub entities: HashMap<String, Arc<EntityMeta>>,
    pub resources: Vec<ResourceConfig>,
}

impl ResolvedModel {
    pub fn entity(&self, name: &str) -> Option<&Arc<EntityMeta>> {
        self.entities.get(name)
    }

    pub fn insert(&mut self, entity: EntityMeta) {
        self.entities.insert(entity.name.clone(), Arc::new(entity));
    }
}
