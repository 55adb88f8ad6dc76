//! Config validation: referential integrity and resource consistency.

use crate::config::ModelConfig;
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

pub fn validate(config: &ModelConfig) -> Result<(), ConfigError> {
    let mut entity_columns: HashMap<&str, HashSet<&str>> = HashMap::new();
    for e in &config.entities {
        let cols: HashSet<&str> = e.columns.iter().map(|c| c.name.as_str()).collect();
        if entity_columns.insert(e.name.as_str(), cols).is_some() {
            return Err(ConfigError::Validation(format!("duplicate entity name: {}", e.name)));
        }
    }

    for e in &config.entities {
        let own = &entity_columns[e.name.as_str()];
        for pk in e.primary_key.columns() {
            if !own.contains(pk.as_str()) {
                return Err(ConfigError::InvalidPrimaryKey {
                    entity: e.name.clone(),
                    column: pk,
                });
            }
        }
        for r in &e.relations {
            let target = entity_columns
                .get(r.target.as_str())
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "entity",
                    id: r.target.clone(),
                })?;
            if !own.contains(r.local_column.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", e.name, r.local_column),
                });
            }
            if !target.contains(r.remote_column.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", r.target, r.remote_column),
                });
            }
            if own.contains(r.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "relation {}.{} shadows a column",
                    e.name, r.name
                )));
            }
        }
    }

    let mut mounts = HashSet::new();
    for res in &config.resources {
        let cols = entity_columns
            .get(res.entity.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "entity",
                id: res.entity.clone(),
            })?;
        let mount = res.mount.trim_end_matches('/');
        if !mounts.insert(mount.to_string()) {
            return Err(ConfigError::DuplicateMount(res.mount.clone()));
        }
        for f in res.searchable_fields.iter().chain(res.scope_headers.keys()) {
            if !cols.contains(f.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", res.entity, f),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: serde_json::Value) -> ModelConfig {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "entities": [
                { "name": "order", "table": "orders", "primary_key": "id",
                  "columns": [{ "name": "id", "type": "bigserial" }, { "name": "status", "type": "int" }],
                  "relations": [{ "name": "lines", "kind": "to_many", "target": "line",
                                  "local_column": "id", "remote_column": "order_id" }] },
                { "name": "line", "table": "order_lines", "primary_key": ["order_id", "sku"],
                  "columns": [{ "name": "order_id", "type": "bigint" }, { "name": "sku", "type": "text" }] }
            ],
            "resources": [{ "name": "order", "entity": "order", "mount": "/orders", "searchable_fields": ["status"] }]
        })
    }

    #[test]
    fn accepts_consistent_model() {
        validate(&config(base())).unwrap();
    }

    #[test]
    fn rejects_relation_to_unknown_column() {
        let mut v = base();
        v["entities"][0]["relations"][0]["remote_column"] = json!("parent_id");
        let err = validate(&config(v)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReference { kind: "column", .. }));
    }

    #[test]
    fn rejects_unknown_searchable_field() {
        let mut v = base();
        v["resources"][0]["searchable_fields"] = json!(["nope"]);
        assert!(validate(&config(v)).is_err());
    }

    #[test]
    fn rejects_duplicate_mount() {
        let mut v = base();
        v["resources"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "name": "order2", "entity": "order", "mount": "/orders/" }));
        assert!(matches!(validate(&config(v)), Err(ConfigError::DuplicateMount(_))));
    }
}
