//! PostgreSQL store: one sqlx transaction per unit of work.
//!
//! Statements run eagerly, so constraint violations surface at `persist`/`remove`
//! and `flush` is only a sync point.

use crate::config::{EntityMeta, Record, ResolvedModel};
use crate::controller::query::{FindOneOptions, FindOptions, WhereClause};
use crate::error::StoreError;
use crate::sql::{self, IncludeSelect, PgBindValue, QueryBuf};
use crate::store::{Store, Transaction, WriteMode};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;

const DATA_EXCEPTION_CLASS: &str = "22";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    model: Arc<ResolvedModel>,
    schema_override: Option<String>,
}

impl PgStore {
    pub fn new(pool: PgPool, model: Arc<ResolvedModel>, schema_override: Option<String>) -> Self {
        PgStore {
            pool,
            model,
            schema_override,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            tx,
            model: self.model.clone(),
            schema_override: self.schema_override.clone(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    model: Arc<ResolvedModel>,
    schema_override: Option<String>,
}

impl PgTransaction {
    fn includes<'a>(&'a self, entity: &'a EntityMeta, names: &[String]) -> Result<Vec<IncludeSelect<'a>>, StoreError> {
        names
            .iter()
            .map(|name| {
                let relation = entity
                    .relation(name)
                    .ok_or_else(|| StoreError::Backend(format!("{} has no relation {}", entity.name, name)))?;
                let related = self
                    .model
                    .entity(&relation.target)
                    .ok_or_else(|| StoreError::UnknownEntity(relation.target.clone()))?;
                Ok(IncludeSelect {
                    relation,
                    related: related.as_ref(),
                })
            })
            .collect()
    }

    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let rows = query.fetch_all(&mut *self.tx).await.map_err(map_db_error)?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn fetch_optional(&mut self, q: &QueryBuf) -> Result<Option<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let row = query.fetch_optional(&mut *self.tx).await.map_err(map_db_error)?;
        Ok(row.as_ref().map(row_to_record))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn find_one(
        &mut self,
        entity: &EntityMeta,
        filter: &WhereClause,
        options: &FindOneOptions,
    ) -> Result<Option<Record>, StoreError> {
        let q = {
            let includes = self.includes(entity, &options.populate)?;
            sql::select_page(entity, filter, &[], Some(1), 0, false, &includes, self.schema_override.as_deref())
        };
        self.fetch_optional(&q).await
    }

    async fn find_and_count(
        &mut self,
        entity: &EntityMeta,
        filter: &WhereClause,
        options: &FindOptions,
    ) -> Result<(Vec<Record>, u64), StoreError> {
        let schema = self.schema_override.clone();
        let page = {
            let includes = self.includes(entity, &options.populate)?;
            sql::select_page(
                entity,
                filter,
                &options.sort,
                Some(options.limit),
                options.offset,
                options.distinct,
                &includes,
                schema.as_deref(),
            )
        };
        let rows = self.fetch_all(&page).await?;
        let total = sql::count(entity, filter, options.distinct, schema.as_deref());
        let count = self
            .fetch_optional(&total)
            .await?
            .and_then(|r| r.get("count").and_then(Value::as_u64))
            .unwrap_or(0);
        Ok((rows, count))
    }

    async fn persist(&mut self, entity: &EntityMeta, record: Record, mode: WriteMode) -> Result<Record, StoreError> {
        let row = entity.column_fields(&record);
        let q = match mode {
            WriteMode::Insert => sql::insert(entity, &row, self.schema_override.as_deref()),
            WriteMode::Update => sql::update(entity, &row, self.schema_override.as_deref()),
        };
        self.fetch_optional(&q)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("{} {}", entity.name, Value::Object(entity.key_fields(&row)))))
    }

    async fn remove(&mut self, entity: &EntityMeta, record: &Record) -> Result<(), StoreError> {
        let q = sql::delete(entity, record, self.schema_override.as_deref());
        match self.fetch_optional(&q).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::Missing(format!(
                "{} {}",
                entity.name,
                Value::Object(entity.key_fields(record))
            ))),
        }
    }

    async fn flush(&mut self) -> Result<(), StoreError> {
        tracing::trace!("flush: statements already executed");
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await.map_err(map_db_error)
    }
}

fn map_db_error(e: sqlx::Error) -> StoreError {
    let classified = match &e {
        sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref(), db.message()),
        _ => None,
    };
    classified.unwrap_or(StoreError::Database(e))
}

/// Uniqueness violations and data exceptions (class 22, e.g. `abc` cast to bigint)
/// are caller errors; everything else stays a database failure.
fn classify_sqlstate(code: Option<&str>, message: &str) -> Option<StoreError> {
    match code? {
        UNIQUE_VIOLATION => Some(StoreError::Conflict(message.to_string())),
        c if c.starts_with(DATA_EXCEPTION_CLASS) => Some(StoreError::InvalidValue(message.to_string())),
        _ => None,
    }
}

fn row_to_record(row: &PgRow) -> Record {
    use sqlx::{Column, Row};
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), cell_to_value(row, col.name())))
        .collect()
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_classified_by_sqlstate() {
        assert!(matches!(
            classify_sqlstate(Some("23505"), "duplicate key"),
            Some(StoreError::Conflict(_))
        ));
        assert!(matches!(
            classify_sqlstate(Some("22P02"), "invalid input syntax for type bigint: \"abc\""),
            Some(StoreError::InvalidValue(_))
        ));
        assert!(matches!(classify_sqlstate(Some("22003"), "out of range"), Some(StoreError::InvalidValue(_))));
        assert!(classify_sqlstate(Some("40001"), "serialization failure").is_none());
        assert!(classify_sqlstate(None, "io").is_none());
    }
}
