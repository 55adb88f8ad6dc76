//! Load the model file and resolve it into runtime metadata.

use crate::config::resolved::{ColumnInfo, EntityMeta, PkType, RelationKind, RelationMeta, ResolvedModel};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use std::path::Path;

const DEFAULT_SCHEMA: &str = "public";

/// Read and parse a JSON model file.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<ModelConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let config: ModelConfig =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    tracing::debug!(
        path = %path.display(),
        entities = config.entities.len(),
        resources = config.resources.len(),
        "model file loaded"
    );
    Ok(config)
}

/// Build resolved model from config (validates first).
pub fn resolve(config: &ModelConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;

    let mut model = ResolvedModel {
        resources: config.resources.clone(),
        ..ResolvedModel::default()
    };
    for e in &config.entities {
        model.insert(resolve_entity(e));
    }
    Ok(model)
}

fn resolve_entity(e: &EntityConfig) -> EntityMeta {
    let pk_names = e.primary_key.columns();
    let columns: Vec<ColumnInfo> = e
        .columns
        .iter()
        .map(|c| {
            let pg_type = normalize_pg_type(&c.type_);
            let is_pk = pk_names.contains(&c.name);
            ColumnInfo {
                name: c.name.clone(),
                pk_type: if is_pk { Some(infer_pk_type(&c.type_)) } else { None },
                nullable: c.nullable && !is_pk,
                has_default: c.has_default || is_serial(&c.type_),
                pg_type,
            }
        })
        .collect();

    let relations = e
        .relations
        .iter()
        .map(|r| RelationMeta {
            name: r.name.clone(),
            kind: match r.kind {
                RelationKindConfig::ToOne => RelationKind::ToOne,
                RelationKindConfig::ToMany => RelationKind::ToMany,
            },
            target: r.target.clone(),
            local_column: r.local_column.clone(),
            remote_column: r.remote_column.clone(),
        })
        .collect();

    EntityMeta {
        name: e.name.clone(),
        schema_name: e.schema.clone().unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
        table_name: e.table.clone(),
        pk_columns: pk_names,
        columns,
        relations,
        validation: e.validation.clone(),
    }
}

fn is_serial(type_: &str) -> bool {
    type_.to_lowercase().contains("serial")
}

/// Casts use the underlying type: serial columns are integers.
fn normalize_pg_type(type_: &str) -> String {
    let lower = type_.trim().to_lowercase();
    match lower.as_str() {
        "bigserial" | "serial8" => "bigint".into(),
        "serial" | "serial4" => "integer".into(),
        "smallserial" | "serial2" => "smallint".into(),
        "timestamp with time zone" => "timestamptz".into(),
        _ if type_.contains('.') => type_.to_string(),
        _ => lower,
    }
}

fn infer_pk_type(type_: &str) -> PkType {
    let type_lower = type_.to_lowercase();
    if type_lower.contains("uuid") {
        PkType::Uuid
    } else if type_lower.contains("bigserial") || type_lower.contains("bigint") {
        PkType::BigInt
    } else if type_lower.contains("serial") || type_lower.contains("int") {
        PkType::Int
    } else {
        PkType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo_config() -> ModelConfig {
        serde_json::from_value(serde_json::json!({
            "entities": [{
                "name": "todo",
                "table": "todos",
                "primary_key": "id",
                "columns": [
                    { "name": "id", "type": "bigserial" },
                    { "name": "title", "type": "varchar" },
                    { "name": "created_at", "type": "timestamp with time zone", "has_default": true }
                ]
            }],
            "resources": [{ "name": "todo", "entity": "todo", "mount": "/todos" }]
        }))
        .unwrap()
    }

    #[test]
    fn resolves_serial_primary_key_as_generated_bigint() {
        let model = resolve(&todo_config()).unwrap();
        let todo = model.entity("todo").unwrap();
        let id = todo.column("id").unwrap();
        assert_eq!(id.pk_type, Some(PkType::BigInt));
        assert_eq!(id.pg_type, "bigint");
        assert!(todo.generated_pk().is_some());
        assert_eq!(todo.schema_name, "public");
        assert_eq!(todo.column("created_at").unwrap().pg_type, "timestamptz");
    }

    #[test]
    fn missing_primary_key_column_is_rejected() {
        let mut config = todo_config();
        config.entities[0].primary_key = PrimaryKeyConfig::Single("uid".into());
        assert!(matches!(resolve(&config), Err(ConfigError::InvalidPrimaryKey { .. })));
    }
}
