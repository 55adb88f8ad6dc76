#![allow(dead_code)]

use resource_controller::{resolve, MemoryStore, ModelConfig, Record, RequestContext, ResolvedModel};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn model() -> Arc<ResolvedModel> {
    let config: ModelConfig = serde_json::from_value(json!({
        "entities": [
            {
                "name": "items",
                "table": "items",
                "primary_key": "id",
                "columns": [
                    { "name": "id", "type": "bigserial", "nullable": false },
                    { "name": "tenant", "type": "text", "nullable": false },
                    { "name": "name", "type": "text" },
                    { "name": "status", "type": "integer" },
                    { "name": "code", "type": "text" },
                    { "name": "updated_at", "type": "timestamptz", "has_default": true }
                ]
            },
            {
                "name": "docs",
                "table": "docs",
                "primary_key": "id",
                "columns": [
                    { "name": "id", "type": "uuid", "nullable": false, "has_default": true },
                    { "name": "title", "type": "text" }
                ]
            },
            {
                "name": "orders",
                "table": "orders",
                "primary_key": "id",
                "columns": [
                    { "name": "id", "type": "bigserial", "nullable": false },
                    { "name": "tenant", "type": "text", "nullable": false },
                    { "name": "customer", "type": "text", "nullable": false },
                    { "name": "note", "type": "text" }
                ],
                "relations": [
                    { "name": "lines", "kind": "to_many", "target": "order_lines", "local_column": "id", "remote_column": "order_id" }
                ],
                "validation": { "customer": { "required": true, "min_length": 1 } }
            },
            {
                "name": "order_lines",
                "table": "order_lines",
                "primary_key": ["order_id", "sku"],
                "columns": [
                    { "name": "order_id", "type": "bigint", "nullable": false },
                    { "name": "sku", "type": "text", "nullable": false },
                    { "name": "qty", "type": "integer" }
                ],
                "validation": { "qty": { "minimum": 1 } }
            }
        ],
        "resources": [
            {
                "name": "orders",
                "entity": "orders",
                "mount": "/orders",
                "searchable_fields": ["customer", "note"],
                "order_by": "id asc",
                "default_populate": { "one": ["lines"] },
                "scope_headers": { "tenant": "X-Tenant-ID" }
            },
            {
                "name": "order-lines",
                "entity": "order_lines",
                "mount": "/order-lines/",
                "key_path": ":order<order_id>/:sku",
                "searchable_fields": ["qty"],
                "order_by": "sku asc"
            }
        ]
    }))
    .expect("test model");
    Arc::new(resolve(&config).expect("resolvable test model"))
}

pub fn rec(v: Value) -> Record {
    match v {
        Value::Object(m) => m,
        other => panic!("expected an object, got {}", other),
    }
}

pub fn tenant_scope(ctx: &RequestContext) -> Record {
    let mut scope = Record::new();
    scope.insert("tenant".into(), json!(ctx.header("x-tenant-id").unwrap_or("acme")));
    scope
}

/// Two orders for `acme` (lines a, b on order 1) and one for `globex`.
pub fn seeded_store(model: &Arc<ResolvedModel>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(model.clone()));
    store
        .seed(
            "orders",
            vec![
                rec(json!({ "id": 1, "tenant": "acme", "customer": "ann", "note": null })),
                rec(json!({ "id": 2, "tenant": "acme", "customer": "bob", "note": "rush" })),
                rec(json!({ "id": 3, "tenant": "globex", "customer": "cid", "note": null })),
            ],
        )
        .unwrap();
    store
        .seed(
            "order_lines",
            vec![
                rec(json!({ "order_id": 1, "sku": "a", "qty": 1 })),
                rec(json!({ "order_id": 1, "sku": "b", "qty": 2 })),
            ],
        )
        .unwrap();
    store
}
