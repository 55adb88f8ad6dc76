//! Persistence collaborator: transactional access to entity instances.
//!
//! A [`Transaction`] is the unit of work for one request. Dropping it without
//! [`Transaction::commit`] rolls every write back.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::{EntityMeta, Record};
use crate::controller::query::{FindOneOptions, FindOptions, WhereClause};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;

/// How [`Transaction::persist`] writes an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// New row; a key collision is a conflict.
    Insert,
    /// Existing row addressed by its primary key.
    Update,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn find_one(
        &mut self,
        entity: &EntityMeta,
        filter: &WhereClause,
        options: &FindOneOptions,
    ) -> Result<Option<Record>, StoreError>;

    /// One page of matches plus the total match count.
    async fn find_and_count(
        &mut self,
        entity: &EntityMeta,
        filter: &WhereClause,
        options: &FindOptions,
    ) -> Result<(Vec<Record>, u64), StoreError>;

    /// Blank instance carrying `fields`; nullable columns without a default start as null.
    fn create(&self, entity: &EntityMeta, fields: Record) -> Record {
        let mut record: Record = entity
            .columns
            .iter()
            .filter(|c| c.nullable && !c.has_default)
            .map(|c| (c.name.clone(), Value::Null))
            .collect();
        record.extend(fields);
        record
    }

    /// Write the column fields of `record`; returns the row as stored (generated keys filled).
    async fn persist(&mut self, entity: &EntityMeta, record: Record, mode: WriteMode) -> Result<Record, StoreError>;

    async fn remove(&mut self, entity: &EntityMeta, record: &Record) -> Result<(), StoreError>;

    /// Push pending writes to the backend; constraint violations surface here.
    async fn flush(&mut self) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
