//! Resource controller: the CRUD lifecycle of one resource over a [`Store`].

use crate::config::{EntityMeta, Record, RelationKind, RelationMeta, ResolvedModel};
use crate::controller::context::RequestContext;
use crate::controller::filter;
use crate::controller::keypath::KeyPath;
use crate::controller::options::ResourceOptions;
use crate::controller::query::{
    parse_order, FindOneOptions, FindOptions, SortDirection, SortField, WhereClause, DEFAULT_PAGE_SIZE,
};
use crate::controller::reconcile::{reconcile, DuplicateKey};
use crate::error::{CrudError, StoreError};
use crate::service::RequestValidator;
use crate::store::{Store, Transaction, WriteMode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// One page of a list plus the total match count.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ListResult {
    pub count: u64,
    pub items: Vec<Record>,
}

/// Child writes computed for one to-many field.
struct ChildPlan {
    relation: RelationMeta,
    target: Arc<EntityMeta>,
    to_update: Vec<(Record, Record)>,
    to_create: Vec<Record>,
    to_remove: Vec<Record>,
}

impl ChildPlan {
    /// The collection as it will read after the writes.
    fn resulting(&self) -> Value {
        let updated = self.to_update.iter().map(|(existing, patch)| {
            let mut row = existing.clone();
            row.extend(patch.clone());
            Value::Object(row)
        });
        let created = self.to_create.iter().cloned().map(Value::Object);
        Value::Array(updated.chain(created).collect())
    }
}

pub struct CrudController {
    store: Arc<dyn Store>,
    model: Arc<ResolvedModel>,
    entity: Arc<EntityMeta>,
    resource: String,
    key_path: KeyPath,
    default_sort: Vec<SortField>,
    options: ResourceOptions,
}

impl CrudController {
    /// Resolve the key path and check every configured field against the entity.
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<ResolvedModel>,
        resource: &str,
        entity: &str,
        options: ResourceOptions,
    ) -> Result<Self, CrudError> {
        let entity = model
            .entity(entity)
            .cloned()
            .ok_or_else(|| CrudError::bad_configuration(resource, format!("unknown entity '{}'", entity)))?;

        let key_path = KeyPath::parse(resource, &options.key_path)?;
        if key_path.entries().is_empty() {
            return Err(CrudError::bad_configuration(
                resource,
                format!("key path '{}' names no parameter", options.key_path),
            ));
        }
        for e in key_path.entries() {
            if !entity.has_column(&e.column_name) {
                return Err(CrudError::bad_configuration(
                    resource,
                    format!("key path binds unknown field '{}'", e.column_name),
                ));
            }
        }
        for f in &options.searchable_fields {
            if !entity.has_column(f) {
                return Err(CrudError::bad_configuration(resource, format!("searchable field '{}' is not a column", f)));
            }
        }
        for name in options.populate_one.iter().chain(&options.populate_many) {
            if entity.relation(name).is_none() {
                return Err(CrudError::bad_configuration(resource, format!("cannot populate unknown relation '{}'", name)));
            }
        }

        let default_sort = match &options.order_by {
            Some(raw) => parse_order(raw)
                .map_err(|token| CrudError::bad_configuration(resource, format!("bad default order token '{}'", token)))?,
            None if entity.has_column("updated_at") => vec![SortField::new("updated_at", SortDirection::Desc)],
            None => entity
                .pk_columns
                .iter()
                .map(|c| SortField::new(c.as_str(), SortDirection::Desc))
                .collect(),
        };
        if let Some(s) = default_sort.iter().find(|s| !entity.has_column(&s.field)) {
            return Err(CrudError::bad_configuration(resource, format!("cannot sort by unknown field '{}'", s.field)));
        }

        Ok(CrudController {
            store,
            model,
            entity,
            resource: resource.to_string(),
            key_path,
            default_sort,
            options,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn entity(&self) -> &EntityMeta {
        &self.entity
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    fn store_err(&self, e: StoreError) -> CrudError {
        CrudError::from_store(&self.resource, e)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, CrudError> {
        self.store.begin().await.map_err(|e| self.store_err(e))
    }

    async fn finish(&self, mut tx: Box<dyn Transaction>) -> Result<(), CrudError> {
        tx.flush().await.map_err(|e| self.store_err(e))?;
        tx.commit().await.map_err(|e| self.store_err(e))
    }

    fn body_object(&self, ctx: &RequestContext) -> Result<Record, CrudError> {
        match &ctx.body {
            None | Some(Value::Null) => Err(CrudError::update_malformed(
                &self.resource,
                "Empty update body, nothing to update!",
            )),
            Some(Value::Object(m)) => Ok(m.clone()),
            Some(_) => Err(CrudError::update_malformed(&self.resource, "expected JSON object body.")),
        }
    }

    /// Populate set from the query string, or the configured default.
    fn populate(&self, ctx: &RequestContext, many: bool) -> Result<Vec<String>, CrudError> {
        match ctx.populate() {
            Some(names) => {
                if let Some(bad) = names.iter().find(|n| self.entity.relation(n).is_none()) {
                    return Err(CrudError::query_malformed(&self.resource, format!("cannot populate '{}'", bad)));
                }
                Ok(names)
            }
            None if many => Ok(self.options.populate_many.clone()),
            None => Ok(self.options.populate_one.clone()),
        }
    }

    /// Key-path equalities overlaid by the scoping fields.
    fn key_filter(&self, ctx: &RequestContext) -> Result<WhereClause, CrudError> {
        let fields = self
            .key_path
            .where_fields(&self.resource, &ctx.params, self.options.underscore_as_empty)?;
        let mut filter = WhereClause::from_fields(fields);
        filter.merge_fields((self.options.scope)(ctx));
        Ok(filter)
    }

    async fn load_one(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
        populate: Vec<String>,
    ) -> Result<Record, CrudError> {
        let filter = self.key_filter(ctx)?;
        tracing::debug!(resource = %self.resource, filter = %filter, "find one");
        let found = tx
            .find_one(&self.entity, &filter, &FindOneOptions { populate })
            .await
            .map_err(|e| match e {
                // a key value the column type cannot hold names no instance
                StoreError::InvalidValue(detail) => {
                    CrudError::not_found(&self.resource, format!("query={}: {}", filter, detail))
                }
                e => self.store_err(e),
            })?;
        let record = found.ok_or_else(|| CrudError::not_found(&self.resource, format!("query={}", filter)))?;

        let mut loaded = vec![record];
        for hook in &self.options.after_load {
            loaded = hook.after_load(ctx, loaded).await?;
        }
        match (loaded.pop(), loaded.is_empty()) {
            (Some(record), true) => Ok(record),
            _ => Err(CrudError::bad_configuration(
                &self.resource,
                "Internal hooks might not returned promised objects. Please check afterLoad hooks.",
            )),
        }
    }

    pub async fn get_one(&self, ctx: &RequestContext) -> Result<Record, CrudError> {
        let populate = self.populate(ctx, false)?;
        let mut tx = self.begin().await?;
        self.load_one(ctx, tx.as_mut(), populate).await
    }

    pub async fn create_one(&self, ctx: &RequestContext) -> Result<Record, CrudError> {
        let body = self.body_object(ctx)?;
        let scope = (self.options.scope)(ctx);
        let mut tx = self.begin().await?;

        let preloaded = match &self.options.create_loader {
            Some(loader) => loader.load(ctx, tx.as_mut()).await?,
            None => None,
        };
        let mode = if preloaded.is_some() { WriteMode::Update } else { WriteMode::Insert };
        let body = match &self.options.sanitizer {
            Some(s) => s.sanitize(ctx, tx.as_mut(), body, true).await?,
            None => body,
        };

        // An upserted instance reconciles against its stored children; a new one against none.
        let current = match &preloaded {
            Some(existing) => self.with_collections(tx.as_mut(), existing.clone(), &body).await?,
            None => Record::new(),
        };
        let mut record = match preloaded {
            Some(_) => current.clone(),
            None => tx.create(&self.entity, Record::new()),
        };
        let mut plans = Vec::new();
        for (field, value) in body {
            match self.plan_children(&current, &field, &value)? {
                Some(plan) => {
                    record.insert(field, plan.resulting());
                    plans.push(plan);
                }
                None => {
                    record.insert(field, value);
                }
            }
        }
        record.extend(scope);

        RequestValidator::validate(&self.entity.column_fields(&record), &self.entity.validation)
            .map_err(|e| CrudError::validation(&self.resource, e.to_string()))?;

        for hook in &self.options.pre_save {
            record = hook.on_save(ctx, tx.as_mut(), record, true).await?;
        }
        record = self.write(tx.as_mut(), record, mode, plans).await?;
        for hook in &self.options.post_save {
            record = hook.on_save(ctx, tx.as_mut(), record, true).await?;
        }
        self.finish(tx).await?;
        tracing::info!(resource = %self.resource, key = ?self.entity.composite_key(&record), "created");
        Ok(record)
    }

    pub async fn update_one(&self, ctx: &RequestContext) -> Result<Record, CrudError> {
        let body = self.body_object(ctx)?;
        let mut populate = self.populate(ctx, false)?;
        for (field, value) in &body {
            let to_many = self
                .entity
                .relation(field)
                .map_or(false, |r| r.kind == RelationKind::ToMany);
            if to_many && value.is_array() && !populate.contains(field) {
                populate.push(field.clone());
            }
        }

        let mut tx = self.begin().await?;
        let mut record = self.load_one(ctx, tx.as_mut(), populate).await?;
        let body = match &self.options.sanitizer {
            Some(s) => s.sanitize(ctx, tx.as_mut(), body, false).await?,
            None => body,
        };
        RequestValidator::validate_partial(&self.entity.column_fields(&body), &self.entity.validation)
            .map_err(|e| CrudError::validation(&self.resource, e.to_string()))?;

        let mut plans = Vec::new();
        for (field, value) in body {
            match self.plan_children(&record, &field, &value)? {
                Some(plan) => {
                    record.insert(field, plan.resulting());
                    plans.push(plan);
                }
                None => {
                    record.insert(field, value);
                }
            }
        }

        for hook in &self.options.pre_save {
            record = hook.on_save(ctx, tx.as_mut(), record, false).await?;
        }
        record = self.write(tx.as_mut(), record, WriteMode::Update, plans).await?;
        for hook in &self.options.post_save {
            record = hook.on_save(ctx, tx.as_mut(), record, false).await?;
        }
        self.finish(tx).await?;
        tracing::info!(resource = %self.resource, key = ?self.entity.composite_key(&record), "updated");
        Ok(record)
    }

    /// Removals are flushed one by one but commit together, so a failure rolls every one back.
    pub async fn delete_one(&self, ctx: &RequestContext) -> Result<(), CrudError> {
        let populate = self.populate(ctx, false)?;
        let mut tx = self.begin().await?;
        let target = self.load_one(ctx, tx.as_mut(), populate).await?;

        let mut doomed = vec![target];
        for hook in &self.options.pre_delete {
            doomed = hook.before_delete(ctx, tx.as_mut(), doomed).await?;
        }
        for record in &doomed {
            tx.remove(&self.entity, record).await.map_err(|e| self.store_err(e))?;
            tx.flush().await.map_err(|e| self.store_err(e))?;
        }
        for hook in &self.options.post_delete {
            if let Err(e) = hook.after_delete(ctx, tx.as_mut(), &doomed).await {
                tracing::error!(resource = %self.resource, error = %e, "post-delete hook failed");
                return Err(e);
            }
        }
        tx.commit().await.map_err(|e| self.store_err(e))?;
        tracing::info!(resource = %self.resource, removed = doomed.len(), "deleted");
        Ok(())
    }

    pub async fn index(&self, ctx: &RequestContext) -> Result<ListResult, CrudError> {
        let offset = ctx.query_u64(&self.resource, "offset")?.unwrap_or(0);
        let limit = ctx.query_u64(&self.resource, "pagesize")?.unwrap_or(DEFAULT_PAGE_SIZE);

        let mut filter = WhereClause::from_fields((self.options.scope)(ctx));
        for field in &self.options.searchable_fields {
            let Some(raw) = ctx.query_single(&self.resource, field)? else { continue };
            let raw = match self.options.converters.get(field) {
                Some(convert) => convert(raw),
                None => raw.to_string(),
            };
            let condition = filter::interpret(&raw)
                .map_err(|e| CrudError::query_malformed(&self.resource, e.to_string()))?;
            if let Some(c) = condition {
                filter.push(field.as_str(), c);
            }
        }

        let sort = self.sort(ctx)?;
        let options = FindOptions {
            limit,
            offset,
            sort,
            populate: self.populate(ctx, true)?,
            distinct: self.options.distinct,
        };
        tracing::debug!(resource = %self.resource, filter = %filter, limit, offset, "index");

        let mut tx = self.begin().await?;
        let (mut items, count) = tx
            .find_and_count(&self.entity, &filter, &options)
            .await
            .map_err(|e| match e {
                StoreError::InvalidValue(detail) => CrudError::query_malformed(&self.resource, detail),
                e => self.store_err(e),
            })?;
        drop(tx);

        for hook in &self.options.after_load {
            items = hook.after_load(ctx, items).await?;
        }
        Ok(ListResult { count, items })
    }

    fn sort(&self, ctx: &RequestContext) -> Result<Vec<SortField>, CrudError> {
        let Some(raw) = ctx.query_single(&self.resource, "order")? else {
            return Ok(self.default_sort.clone());
        };
        let sort = parse_order(raw).map_err(|token| {
            CrudError::query_malformed(
                &self.resource,
                format!(
                    "order MUST has following format `db_field_name_1 asc,db_field_name2,db_field_name_3 desc`, got '{}'",
                    token
                ),
            )
        })?;
        if let Some(s) = sort.iter().find(|s| !self.entity.has_column(&s.field)) {
            return Err(CrudError::query_malformed(&self.resource, format!("cannot sort by '{}'", s.field)));
        }
        Ok(sort)
    }

    /// `record` with every to-many collection that `body` replaces loaded from the store.
    async fn with_collections(
        &self,
        tx: &mut dyn Transaction,
        record: Record,
        body: &Record,
    ) -> Result<Record, CrudError> {
        let populate: Vec<String> = body
            .iter()
            .filter(|(field, value)| {
                value.is_array()
                    && !record.get(*field).map_or(false, Value::is_array)
                    && self
                        .entity
                        .relation(field)
                        .map_or(false, |r| r.kind == RelationKind::ToMany)
            })
            .map(|(field, _)| field.clone())
            .collect();
        if populate.is_empty() {
            return Ok(record);
        }
        let filter = WhereClause::from_fields(self.entity.key_fields(&record));
        let stored = tx
            .find_one(&self.entity, &filter, &FindOneOptions { populate: populate.clone() })
            .await
            .map_err(|e| self.store_err(e))?;
        let mut record = record;
        if let Some(stored) = stored {
            for field in populate {
                if let Some(children) = stored.get(&field) {
                    record.insert(field, children.clone());
                }
            }
        }
        Ok(record)
    }

    /// Reconciliation plan for `field`, or `None` when the value is assigned as a whole.
    ///
    /// Applies only to a declared to-many relation whose payload is an array and whose
    /// target has a primary key. `current` holds the stored collection when populated;
    /// on create it is empty and every element becomes a creation.
    fn plan_children(&self, current: &Record, field: &str, payload: &Value) -> Result<Option<ChildPlan>, CrudError> {
        let Some(relation) = self.entity.relation(field).filter(|r| r.kind == RelationKind::ToMany) else {
            return Ok(None);
        };
        let Value::Array(elements) = payload else { return Ok(None) };
        let existing = match current.get(field) {
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Ok(None),
            None if current.is_empty() => Vec::new(),
            None => return Ok(None),
        };
        let Some(target) = self.model.entity(&relation.target).cloned() else {
            return Ok(None);
        };
        if target.pk_columns.is_empty() {
            return Ok(None);
        }

        let parent_key = current.get(&relation.local_column).filter(|v| !v.is_null()).cloned();
        let mut incoming = Vec::with_capacity(elements.len());
        for element in elements {
            let Value::Object(mut row) = element.clone() else {
                return Err(CrudError::update_malformed(
                    &self.resource,
                    format!("elements of '{}' must be objects", field),
                ));
            };
            if let Some(k) = &parent_key {
                row.entry(relation.remote_column.clone()).or_insert_with(|| k.clone());
            }
            incoming.push(row);
        }
        let existing: Vec<Record> = existing
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .collect();

        let partition = reconcile(existing, incoming, |e| target.composite_key(e), |p| target.composite_key(p))
            .map_err(|DuplicateKey(key)| {
                CrudError::update_malformed(&self.resource, format!("'{}' names {} more than once", field, key))
            })?;
        tracing::debug!(
            resource = %self.resource,
            field,
            update = partition.to_update.len(),
            create = partition.to_create.len(),
            remove = partition.to_remove.len(),
            "reconciled collection"
        );
        Ok(Some(ChildPlan {
            relation: relation.clone(),
            target,
            to_update: partition.to_update,
            to_create: partition.to_create,
            to_remove: partition.to_remove,
        }))
    }

    /// Persist the instance, then its child writes: update matched, create new, remove the rest.
    async fn write(
        &self,
        tx: &mut dyn Transaction,
        record: Record,
        mode: WriteMode,
        plans: Vec<ChildPlan>,
    ) -> Result<Record, CrudError> {
        let stored = tx
            .persist(&self.entity, record.clone(), mode)
            .await
            .map_err(|e| self.store_err(e))?;
        let mut out = record;
        out.extend(stored);

        for plan in plans {
            let parent_key = out.get(&plan.relation.local_column).cloned().unwrap_or(Value::Null);
            let fk = plan.relation.remote_column.clone();
            let mut children = Vec::with_capacity(plan.to_update.len() + plan.to_create.len());
            for (existing, patch) in plan.to_update {
                let mut row = existing;
                row.extend(patch);
                row.insert(fk.clone(), parent_key.clone());
                let saved = tx
                    .persist(&plan.target, row, WriteMode::Update)
                    .await
                    .map_err(|e| self.store_err(e))?;
                children.push(Value::Object(saved));
            }
            for fields in plan.to_create {
                let mut row = tx.create(&plan.target, fields);
                row.insert(fk.clone(), parent_key.clone());
                let saved = tx
                    .persist(&plan.target, row, WriteMode::Insert)
                    .await
                    .map_err(|e| self.store_err(e))?;
                children.push(Value::Object(saved));
            }
            for gone in &plan.to_remove {
                tx.remove(&plan.target, gone).await.map_err(|e| self.store_err(e))?;
            }
            out.insert(plan.relation.name.clone(), Value::Array(children));
        }
        Ok(out)
    }
}
