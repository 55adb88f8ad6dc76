//! Transactional in-memory store.
//!
//! Each transaction works on a snapshot. `persist`/`remove` stage writes, `flush`
//! applies them to the snapshot (key conflicts surface there) and `commit`
//! replays the flushed log onto the shared tables in one step.

use crate::config::{CompositeKey, EntityMeta, PkType, Record, RelationKind, ResolvedModel};
use crate::controller::query::{Condition, FindOneOptions, FindOptions, SortDirection, SortField, WhereClause};
use crate::error::StoreError;
use crate::store::{Store, Transaction, WriteMode};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Rows per entity name, in insertion order.
type Tables = HashMap<String, Vec<Record>>;

#[derive(Clone)]
pub struct MemoryStore {
    model: Arc<ResolvedModel>,
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new(model: Arc<ResolvedModel>) -> Self {
        MemoryStore {
            model,
            tables: Arc::new(Mutex::new(Tables::new())),
        }
    }

    /// Insert rows directly, outside any controller lifecycle.
    pub fn seed(&self, entity: &str, rows: Vec<Record>) -> Result<(), StoreError> {
        let meta = entity_meta(&self.model, entity)?;
        let mut tables = lock(&self.tables)?;
        for row in rows {
            let key = meta
                .composite_key(&row)
                .ok_or_else(|| StoreError::Backend(format!("seed row for {} has no key", entity)))?;
            apply(
                &self.model,
                &mut tables,
                Write::Insert {
                    entity: entity.to_string(),
                    key,
                    row,
                },
            )?;
        }
        Ok(())
    }

    /// Committed rows of one entity.
    pub fn rows(&self, entity: &str) -> Vec<Record> {
        lock(&self.tables)
            .map(|t| t.get(entity).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

fn lock(tables: &Mutex<Tables>) -> Result<MutexGuard<'_, Tables>, StoreError> {
    tables
        .lock()
        .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
}

fn entity_meta<'a>(model: &'a ResolvedModel, name: &str) -> Result<&'a Arc<EntityMeta>, StoreError> {
    model
        .entity(name)
        .ok_or_else(|| StoreError::UnknownEntity(name.to_string()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let snapshot = lock(&self.tables)?.clone();
        Ok(Box::new(MemoryTransaction {
            model: self.model.clone(),
            shared: self.tables.clone(),
            working: snapshot,
            staged: Vec::new(),
            flushed: Vec::new(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        lock(&self.tables).map(|_| ())
    }
}

#[derive(Clone, Debug)]
enum Write {
    Insert { entity: String, key: CompositeKey, row: Record },
    Update { entity: String, key: CompositeKey, row: Record },
    Remove { entity: String, key: CompositeKey },
}

impl Write {
    fn targets(&self, entity: &str, key: &CompositeKey) -> bool {
        match self {
            Write::Insert { entity: e, key: k, .. }
            | Write::Update { entity: e, key: k, .. }
            | Write::Remove { entity: e, key: k } => e == entity && k == key,
        }
    }
}

fn find_row(meta: &EntityMeta, rows: &[Record], key: &CompositeKey) -> Option<usize> {
    rows.iter()
        .position(|r| meta.composite_key(r).as_ref() == Some(key))
}

fn apply(model: &ResolvedModel, tables: &mut Tables, write: Write) -> Result<(), StoreError> {
    match write {
        Write::Insert { entity, key, row } => {
            let meta = entity_meta(model, &entity)?;
            let rows = tables.entry(entity.clone()).or_default();
            if find_row(meta, rows, &key).is_some() {
                return Err(StoreError::Conflict(format!("{} {} already exists", entity, key)));
            }
            rows.push(row);
        }
        Write::Update { entity, key, row } => {
            let meta = entity_meta(model, &entity)?;
            let rows = tables.entry(entity.clone()).or_default();
            let i = find_row(meta, rows, &key).ok_or_else(|| StoreError::Missing(format!("{} {}", entity, key)))?;
            rows[i] = row;
        }
        Write::Remove { entity, key } => {
            let meta = entity_meta(model, &entity)?;
            let rows = tables.entry(entity.clone()).or_default();
            let i = find_row(meta, rows, &key).ok_or_else(|| StoreError::Missing(format!("{} {}", entity, key)))?;
            rows.remove(i);
        }
    }
    Ok(())
}

struct MemoryTransaction {
    model: Arc<ResolvedModel>,
    shared: Arc<Mutex<Tables>>,
    working: Tables,
    staged: Vec<Write>,
    flushed: Vec<Write>,
}

impl MemoryTransaction {
    fn table(&self, entity: &str) -> &[Record] {
        self.working.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Current row for `key`, looking through staged writes before the snapshot.
    fn current(&self, meta: &EntityMeta, key: &CompositeKey) -> Option<Record> {
        if let Some(w) = self.staged.iter().rev().find(|w| w.targets(&meta.name, key)) {
            return match w {
                Write::Insert { row, .. } | Write::Update { row, .. } => Some(row.clone()),
                Write::Remove { .. } => None,
            };
        }
        let rows = self.table(&meta.name);
        find_row(meta, rows, key).map(|i| rows[i].clone())
    }

    fn next_serial(&self, meta: &EntityMeta, column: &str) -> i64 {
        let staged = self.staged.iter().filter_map(|w| match w {
            Write::Insert { entity, row, .. } if *entity == meta.name => row.get(column),
            _ => None,
        });
        self.table(&meta.name)
            .iter()
            .filter_map(|r| r.get(column))
            .chain(staged)
            .filter_map(as_number)
            .fold(0i64, |max, n| max.max(n as i64))
            + 1
    }

    fn fill_defaults(&self, meta: &EntityMeta, row: &mut Record) -> Result<(), StoreError> {
        if let Some(pk) = meta.generated_pk() {
            if row.get(&pk.name).map_or(true, Value::is_null) {
                let value = match pk.pk_type {
                    Some(PkType::Uuid) => Value::String(uuid::Uuid::new_v4().to_string()),
                    Some(PkType::Int) | Some(PkType::BigInt) => Value::from(self.next_serial(meta, &pk.name)),
                    _ => {
                        return Err(StoreError::Backend(format!(
                            "{}: cannot generate key for column {}",
                            meta.name, pk.name
                        )))
                    }
                };
                row.insert(pk.name.clone(), value);
            }
        }
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        for c in meta.columns.iter().filter(|c| c.has_default && c.pk_type.is_none()) {
            if !row.contains_key(&c.name) && c.pg_type.starts_with("timestamp") {
                row.insert(c.name.clone(), Value::String(now.clone()));
            }
        }
        for c in meta.columns.iter().filter(|c| !c.nullable && !c.has_default) {
            if row.get(&c.name).map_or(true, Value::is_null) {
                return Err(StoreError::Backend(format!(
                    "null value in column {} of {} violates not-null constraint",
                    c.name, meta.name
                )));
            }
        }
        Ok(())
    }

    fn populate(&self, meta: &EntityMeta, rows: &mut [Record], names: &[String]) -> Result<(), StoreError> {
        for name in names {
            let rel = meta
                .relation(name)
                .ok_or_else(|| StoreError::Backend(format!("{} has no relation {}", meta.name, name)))?;
            let targets = self.table(&rel.target);
            for row in rows.iter_mut() {
                let local = row.get(&rel.local_column).cloned().unwrap_or(Value::Null);
                let mut hits = targets.iter().filter(|t| {
                    !local.is_null() && t.get(&rel.remote_column).map_or(false, |v| loose_eq(v, &local))
                });
                let value = match rel.kind {
                    RelationKind::ToMany => Value::Array(hits.map(|t| Value::Object(t.clone())).collect()),
                    RelationKind::ToOne => hits.next().map(|t| Value::Object(t.clone())).unwrap_or(Value::Null),
                };
                row.insert(rel.name.clone(), value);
            }
        }
        Ok(())
    }

    fn matching(&self, meta: &EntityMeta, filter: &WhereClause) -> Result<Vec<Record>, StoreError> {
        let mut out = Vec::new();
        for row in self.table(&meta.name) {
            if matches(row, filter)? {
                out.push(row.clone());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find_one(
        &mut self,
        entity: &EntityMeta,
        filter: &WhereClause,
        options: &FindOneOptions,
    ) -> Result<Option<Record>, StoreError> {
        let mut rows = self.matching(entity, filter)?;
        rows.truncate(1);
        self.populate(entity, &mut rows, &options.populate)?;
        Ok(rows.pop())
    }

    async fn find_and_count(
        &mut self,
        entity: &EntityMeta,
        filter: &WhereClause,
        options: &FindOptions,
    ) -> Result<(Vec<Record>, u64), StoreError> {
        let mut rows = self.matching(entity, filter)?;
        if options.distinct {
            let mut seen = Vec::new();
            rows.retain(|r| {
                if seen.contains(r) {
                    false
                } else {
                    seen.push(r.clone());
                    true
                }
            });
        }
        let count = rows.len() as u64;
        rows.sort_by(|a, b| sort_order(a, b, &options.sort));
        let mut page: Vec<Record> = rows
            .into_iter()
            .skip(options.offset as usize)
            .take(options.limit as usize)
            .collect();
        self.populate(entity, &mut page, &options.populate)?;
        Ok((page, count))
    }

    async fn persist(&mut self, entity: &EntityMeta, record: Record, mode: WriteMode) -> Result<Record, StoreError> {
        let mut row = entity.column_fields(&record);
        match mode {
            WriteMode::Insert => {
                self.fill_defaults(entity, &mut row)?;
                let key = entity
                    .composite_key(&row)
                    .ok_or_else(|| StoreError::Backend(format!("{}: primary key is incomplete", entity.name)))?;
                self.staged.push(Write::Insert {
                    entity: entity.name.clone(),
                    key,
                    row: row.clone(),
                });
                Ok(row)
            }
            WriteMode::Update => {
                let key = entity
                    .composite_key(&row)
                    .ok_or_else(|| StoreError::Missing(format!("{}: primary key is incomplete", entity.name)))?;
                let mut merged = self
                    .current(entity, &key)
                    .ok_or_else(|| StoreError::Missing(format!("{} {}", entity.name, key)))?;
                merged.extend(row);
                if entity.has_column("updated_at") {
                    merged.insert(
                        "updated_at".into(),
                        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
                    );
                }
                self.staged.push(Write::Update {
                    entity: entity.name.clone(),
                    key,
                    row: merged.clone(),
                });
                Ok(merged)
            }
        }
    }

    async fn remove(&mut self, entity: &EntityMeta, record: &Record) -> Result<(), StoreError> {
        let key = entity
            .composite_key(record)
            .ok_or_else(|| StoreError::Missing(format!("{}: primary key is incomplete", entity.name)))?;
        self.staged.push(Write::Remove {
            entity: entity.name.clone(),
            key,
        });
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        for write in std::mem::take(&mut self.staged) {
            apply(&self.model, &mut self.working, write.clone())?;
            self.flushed.push(write);
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.flush().await?;
        let mut shared = lock(&self.shared)?;
        let mut next = shared.clone();
        for write in std::mem::take(&mut self.flushed) {
            apply(&self.model, &mut next, write)?;
        }
        *shared = next;
        tracing::trace!("memory transaction committed");
        Ok(())
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "t" => Some(true),
            "false" | "0" | "f" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Equality with the coercions a typed column would apply: `"7" == 7`, `true == 1`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(x), other) | (other, Value::Bool(x)) => as_bool(other) == Some(*x),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => as_text(a) == as_text(b),
        },
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(as_text(a).cmp(&as_text(b))),
    }
}

fn like_regex(pattern: &str) -> Result<Regex, StoreError> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| StoreError::Backend(format!("like pattern: {}", e)))
}

fn holds(value: &Value, condition: &Condition) -> Result<bool, StoreError> {
    Ok(match condition {
        Condition::Eq(Value::Null) => value.is_null(),
        Condition::Ne(Value::Null) => !value.is_null(),
        Condition::Eq(x) => loose_eq(value, x),
        Condition::Ne(x) => !value.is_null() && !loose_eq(value, x),
        Condition::Gt(x) => compare(value, x) == Some(Ordering::Greater),
        Condition::Lt(x) => compare(value, x) == Some(Ordering::Less),
        Condition::Range { gte, lte } => {
            matches!(compare(value, gte), Some(Ordering::Greater | Ordering::Equal))
                && matches!(compare(value, lte), Some(Ordering::Less | Ordering::Equal))
        }
        Condition::Like(p) => !value.is_null() && like_regex(p)?.is_match(&as_text(value)),
        Condition::In(items) => items.iter().any(|i| loose_eq(value, i)),
    })
}

fn matches(row: &Record, filter: &WhereClause) -> Result<bool, StoreError> {
    let null = Value::Null;
    for (field, expected) in &filter.fields {
        if !loose_eq(row.get(field).unwrap_or(&null), expected) {
            return Ok(false);
        }
    }
    for (field, condition) in &filter.and {
        if !holds(row.get(field).unwrap_or(&null), condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Nulls sort last ascending and first descending.
fn sort_order(a: &Record, b: &Record, sort: &[SortField]) -> Ordering {
    let null = Value::Null;
    for s in sort {
        let (x, y) = (a.get(&s.field).unwrap_or(&null), b.get(&s.field).unwrap_or(&null));
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare(x, y).unwrap_or(Ordering::Equal),
        };
        let ord = match s.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
