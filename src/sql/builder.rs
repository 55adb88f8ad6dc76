//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from resolved entity metadata.

use crate::config::{EntityMeta, Record, RelationKind, RelationMeta};
use crate::controller::query::{Condition, SortDirection, SortField, WhereClause};
use serde_json::Value;

const MAIN_ALIAS: &str = "main";

/// One populated relation: the descriptor and the target entity it joins to.
pub struct IncludeSelect<'a> {
    pub relation: &'a RelationMeta,
    pub related: &'a EntityMeta,
}

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// Resolve schema: override if present, else entity's schema.
fn resolve_schema<'a>(entity: &'a EntityMeta, schema_override: Option<&'a str>) -> &'a str {
    schema_override.unwrap_or(&entity.schema_name)
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Placeholder for `v` cast to the column's type so text-bound values coerce.
    fn placeholder(&mut self, entity: &EntityMeta, column: &str, v: Value) -> String {
        let n = self.push_param(v);
        match entity.column(column) {
            Some(c) if !c.pg_type.is_empty() => format!("${}::{}", n, c.pg_type),
            _ => format!("${}", n),
        }
    }
}

/// SELECT list: each column as-is, except custom enum (schema.typename) and numeric as text.
fn select_column_list(entity: &EntityMeta) -> String {
    entity
        .columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            if c.pg_type.contains('.') || c.pg_type == "numeric" {
                format!("{}::text AS {}", q, q)
            } else {
                q
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn condition_sql(q: &mut QueryBuf, entity: &EntityMeta, column: &str, condition: &Condition) -> String {
    let col = format!("{}.{}", MAIN_ALIAS, quoted(column));
    match condition {
        Condition::Eq(Value::Null) => format!("{} IS NULL", col),
        Condition::Ne(Value::Null) => format!("{} IS NOT NULL", col),
        Condition::Eq(v) => format!("{} = {}", col, q.placeholder(entity, column, v.clone())),
        Condition::Ne(v) => format!("{} <> {}", col, q.placeholder(entity, column, v.clone())),
        Condition::Gt(v) => format!("{} > {}", col, q.placeholder(entity, column, v.clone())),
        Condition::Lt(v) => format!("{} < {}", col, q.placeholder(entity, column, v.clone())),
        Condition::Range { gte, lte } => {
            let lo = q.placeholder(entity, column, gte.clone());
            let hi = q.placeholder(entity, column, lte.clone());
            format!("({} >= {} AND {} <= {})", col, lo, col, hi)
        }
        Condition::Like(pattern) => {
            let n = q.push_param(Value::String(pattern.clone()));
            format!("{}::text LIKE ${}", col, n)
        }
        Condition::In(items) => {
            let phs: Vec<String> = items
                .iter()
                .map(|v| q.placeholder(entity, column, v.clone()))
                .collect();
            format!("{} IN ({})", col, phs.join(", "))
        }
    }
}

/// ` WHERE ...` over the `main` alias, or empty.
fn where_sql(q: &mut QueryBuf, entity: &EntityMeta, filter: &WhereClause) -> String {
    let mut parts = Vec::new();
    for (field, value) in &filter.fields {
        parts.push(condition_sql(q, entity, field, &Condition::Eq(value.clone())));
    }
    for (field, condition) in &filter.and {
        parts.push(condition_sql(q, entity, field, condition));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// Filtered base rows as a derived table aliased `main`.
fn filtered_source(
    q: &mut QueryBuf,
    entity: &EntityMeta,
    filter: &WhereClause,
    distinct: bool,
    schema_override: Option<&str>,
) -> String {
    let table = qualified_table(resolve_schema(entity, schema_override), &entity.table_name);
    let where_clause = where_sql(q, entity, filter);
    format!(
        "(SELECT {}{} FROM {} {}{}) {}",
        if distinct { "DISTINCT " } else { "" },
        select_column_list(entity),
        table,
        MAIN_ALIAS,
        where_clause,
        MAIN_ALIAS
    )
}

/// Scalar subquery per include: json_agg for to_many, row_to_json for to_one.
fn include_columns(includes: &[IncludeSelect<'_>], schema_override: Option<&str>) -> Vec<String> {
    includes
        .iter()
        .map(|inc| {
            let rel_table = qualified_table(resolve_schema(inc.related, schema_override), &inc.related.table_name);
            let sub_from = format!(
                "{} WHERE {} = {}.{}",
                rel_table,
                quoted(&inc.relation.remote_column),
                MAIN_ALIAS,
                quoted(&inc.relation.local_column)
            );
            let rel_cols = select_column_list(inc.related);
            let subquery = match inc.relation.kind {
                RelationKind::ToOne => format!(
                    "(SELECT row_to_json(sub) FROM (SELECT {} FROM {} LIMIT 1) sub)",
                    rel_cols, sub_from
                ),
                RelationKind::ToMany => format!(
                    "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT {} FROM {}) sub)",
                    rel_cols, sub_from
                ),
            };
            format!("{} AS {}", subquery, quoted(&inc.relation.name))
        })
        .collect()
}

/// One page of filtered rows with includes in a single query.
pub fn select_page(
    entity: &EntityMeta,
    filter: &WhereClause,
    sort: &[SortField],
    limit: Option<u64>,
    offset: u64,
    distinct: bool,
    includes: &[IncludeSelect<'_>],
    schema_override: Option<&str>,
) -> QueryBuf {
    let mut q = QueryBuf::default();
    let source = filtered_source(&mut q, entity, filter, distinct, schema_override);
    let mut select_parts = vec![format!("{}.*", MAIN_ALIAS)];
    select_parts.extend(include_columns(includes, schema_override));

    let order_clause = if sort.is_empty() {
        String::new()
    } else {
        let keys: Vec<String> = sort
            .iter()
            .map(|s| {
                let dir = match s.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{}.{} {}", MAIN_ALIAS, quoted(&s.field), dir)
            })
            .collect();
        format!(" ORDER BY {}", keys.join(", "))
    };
    let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = if offset > 0 { format!(" OFFSET {}", offset) } else { String::new() };

    q.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        select_parts.join(", "),
        source,
        order_clause,
        limit_clause,
        offset_clause
    );
    q
}

/// Total number of filtered rows, ignoring pagination.
pub fn count(entity: &EntityMeta, filter: &WhereClause, distinct: bool, schema_override: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::default();
    let source = filtered_source(&mut q, entity, filter, distinct, schema_override);
    q.sql = format!("SELECT COUNT(*) AS \"count\" FROM {}", source);
    q
}

/// ` WHERE pk1 = $a AND pk2 = $b` against the bare table.
fn key_predicate(q: &mut QueryBuf, entity: &EntityMeta, record: &Record) -> String {
    entity
        .pk_columns
        .iter()
        .map(|c| {
            let v = record.get(c).cloned().unwrap_or(Value::Null);
            format!("{} = {}", quoted(c), q.placeholder(entity, c, v))
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// INSERT: columns and placeholders from entity; values from the record.
/// Omits columns with DB default when the record does not provide a value (so DB uses default).
pub fn insert(entity: &EntityMeta, record: &Record, schema_override: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::default();
    let table = qualified_table(resolve_schema(entity, schema_override), &entity.table_name);
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &entity.columns {
        let val = match record.get(&c.name) {
            Some(Value::Null) | None if c.has_default => continue,
            Some(v) => v.clone(),
            None => Value::Null,
        };
        placeholders.push(q.placeholder(entity, &c.name, val));
        cols.push(quoted(&c.name));
    }
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, select_column_list(entity))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            select_column_list(entity)
        )
    };
    q
}

/// UPDATE by composite key: SET only non-key columns present in the record.
/// `updated_at` is refreshed when the entity has it and the record does not set it.
pub fn update(entity: &EntityMeta, record: &Record, schema_override: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::default();
    let table = qualified_table(resolve_schema(entity, schema_override), &entity.table_name);
    let mut sets = Vec::new();
    for c in &entity.columns {
        if entity.pk_columns.contains(&c.name) {
            continue;
        }
        let Some(v) = record.get(&c.name) else { continue };
        let rhs = q.placeholder(entity, &c.name, v.clone());
        sets.push(format!("{} = {}", quoted(&c.name), rhs));
    }
    if entity.has_column("updated_at") && !record.contains_key("updated_at") {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    let predicate = key_predicate(&mut q, entity, record);
    let returning = select_column_list(entity);
    q.sql = if sets.is_empty() {
        format!("SELECT {} FROM {} WHERE {}", returning, table, predicate)
    } else {
        format!(
            "UPDATE {} SET {} WHERE {} RETURNING {}",
            table,
            sets.join(", "),
            predicate,
            returning
        )
    };
    q
}

/// DELETE by composite key.
pub fn delete(entity: &EntityMeta, record: &Record, schema_override: Option<&str>) -> QueryBuf {
    let mut q = QueryBuf::default();
    let table = qualified_table(resolve_schema(entity, schema_override), &entity.table_name);
    let predicate = key_predicate(&mut q, entity, record);
    q.sql = format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        table,
        predicate,
        select_column_list(entity)
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnInfo, PkType};
    use serde_json::json;
    use std::collections::HashMap;

    fn col(name: &str, pk: Option<PkType>, has_default: bool, pg: &str) -> ColumnInfo {
        let nullable = pk.is_none();
        ColumnInfo {
            name: name.into(),
            pk_type: pk,
            nullable,
            has_default,
            pg_type: pg.into(),
        }
    }

    fn order_lines() -> EntityMeta {
        EntityMeta {
            name: "order_lines".into(),
            schema_name: "shop".into(),
            table_name: "order_lines".into(),
            pk_columns: vec!["order_id".into(), "sku".into()],
            columns: vec![
                col("order_id", Some(PkType::BigInt), false, "bigint"),
                col("sku", Some(PkType::Text), false, "text"),
                col("qty", None, false, "integer"),
                col("price", None, false, "numeric"),
                col("updated_at", None, true, "timestamptz"),
            ],
            relations: vec![],
            validation: HashMap::new(),
        }
    }

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn page_query_filters_sorts_and_paginates() {
        let e = order_lines();
        let mut filter = WhereClause::from_fields(rec(json!({ "order_id": "7" })));
        filter.push("qty", Condition::Range { gte: json!(1), lte: json!(5) });
        filter.push("sku", Condition::Like("a%".into()));
        let q = select_page(
            &e,
            &filter,
            &[SortField::new("sku", SortDirection::Asc)],
            Some(20),
            40,
            false,
            &[],
            None,
        );
        assert_eq!(
            q.sql,
            "SELECT main.* FROM (SELECT \"order_id\", \"sku\", \"qty\", \"price\"::text AS \"price\", \"updated_at\" \
             FROM \"shop\".\"order_lines\" main WHERE main.\"order_id\" = $1::bigint \
             AND (main.\"qty\" >= $2::integer AND main.\"qty\" <= $3::integer) AND main.\"sku\"::text LIKE $4) main \
             ORDER BY main.\"sku\" ASC LIMIT 20 OFFSET 40"
        );
        assert_eq!(q.params, vec![json!("7"), json!(1), json!(5), json!("a%")]);
    }

    #[test]
    fn null_checks_bind_nothing() {
        let e = order_lines();
        let mut filter = WhereClause::default();
        filter.push("qty", Condition::Eq(Value::Null));
        filter.push("price", Condition::Ne(Value::Null));
        let q = count(&e, &filter, true, Some("tenant_a"));
        assert!(q.sql.starts_with("SELECT COUNT(*) AS \"count\" FROM (SELECT DISTINCT "));
        assert!(q.sql.contains("FROM \"tenant_a\".\"order_lines\" main"));
        assert!(q.sql.contains("main.\"qty\" IS NULL AND main.\"price\" IS NOT NULL"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn insert_skips_defaulted_columns() {
        let e = order_lines();
        let q = insert(&e, &rec(json!({ "order_id": 1, "sku": "a" })), None);
        assert!(q.sql.starts_with(
            "INSERT INTO \"shop\".\"order_lines\" (\"order_id\", \"sku\", \"qty\", \"price\") \
             VALUES ($1::bigint, $2::text, $3::integer, $4::numeric) RETURNING "
        ));
        assert_eq!(q.params, vec![json!(1), json!("a"), Value::Null, Value::Null]);
    }

    #[test]
    fn update_targets_composite_key_and_touches_updated_at() {
        let e = order_lines();
        let q = update(&e, &rec(json!({ "order_id": 1, "sku": "a", "qty": 3 })), None);
        assert!(q.sql.starts_with(
            "UPDATE \"shop\".\"order_lines\" SET \"qty\" = $1::integer, \"updated_at\" = NOW() \
             WHERE \"order_id\" = $2::bigint AND \"sku\" = $3::text RETURNING "
        ));
        assert_eq!(q.params, vec![json!(3), json!(1), json!("a")]);
    }

    #[test]
    fn includes_become_scalar_subqueries() {
        let lines = order_lines();
        let rel = RelationMeta {
            name: "lines".into(),
            kind: RelationKind::ToMany,
            target: "order_lines".into(),
            local_column: "id".into(),
            remote_column: "order_id".into(),
        };
        let mut orders = order_lines();
        orders.name = "orders".into();
        orders.table_name = "orders".into();
        let q = select_page(
            &orders,
            &WhereClause::default(),
            &[],
            Some(1),
            0,
            false,
            &[IncludeSelect { relation: &rel, related: &lines }],
            None,
        );
        assert!(q.sql.contains("COALESCE(json_agg(row_to_json(sub)), '[]'::json)"));
        assert!(q.sql.contains("WHERE \"order_id\" = main.\"id\") sub) AS \"lines\""));
        assert!(q.sql.ends_with(" LIMIT 1"));
    }
}
