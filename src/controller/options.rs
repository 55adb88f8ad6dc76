//! Per-resource controller options: scoping, searchable fields, defaults and lifecycle hooks.
//!
//! Hooks run strictly in registration order, each awaited before the next, and each
//! receives the working value(s) and returns the replacement.

use crate::config::{Record, ResourceConfig};
use crate::controller::context::RequestContext;
use crate::controller::keypath::DEFAULT_KEY_PATH;
use crate::error::CrudError;
use crate::store::Transaction;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Field equalities applied to every query and write of a resource.
pub type ScopeFn = Arc<dyn Fn(&RequestContext) -> Record + Send + Sync>;

/// Rewrites a raw searchable-field value before the filter DSL reads it.
pub type ValueConverter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Rewrites the request body before it is merged onto the instance.
#[async_trait]
pub trait InputSanitizer: Send + Sync {
    async fn sanitize(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
        body: Record,
        creating: bool,
    ) -> Result<Record, CrudError>;
}

/// Supplies an existing instance for `create_one` to upsert onto.
#[async_trait]
pub trait CreateLoader: Send + Sync {
    async fn load(&self, ctx: &RequestContext, tx: &mut dyn Transaction) -> Result<Option<Record>, CrudError>;
}

#[async_trait]
pub trait AfterLoadHook: Send + Sync {
    async fn after_load(&self, ctx: &RequestContext, records: Vec<Record>) -> Result<Vec<Record>, CrudError>;
}

/// Pre-save and post-save hook.
#[async_trait]
pub trait SaveHook: Send + Sync {
    async fn on_save(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
        record: Record,
        creating: bool,
    ) -> Result<Record, CrudError>;
}

/// May widen or narrow the set of instances a delete removes.
#[async_trait]
pub trait PreDeleteHook: Send + Sync {
    async fn before_delete(
        &self,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, CrudError>;
}

/// Runs after removal. Must not fail: an error here is a programming defect.
#[async_trait]
pub trait PostDeleteHook: Send + Sync {
    async fn after_delete(&self, ctx: &RequestContext, tx: &mut dyn Transaction, deleted: &[Record]) -> Result<(), CrudError>;
}

#[async_trait]
impl<F> InputSanitizer for F
where
    F: Fn(&RequestContext, Record, bool) -> Result<Record, CrudError> + Send + Sync,
{
    async fn sanitize(
        &self,
        ctx: &RequestContext,
        _tx: &mut dyn Transaction,
        body: Record,
        creating: bool,
    ) -> Result<Record, CrudError> {
        self(ctx, body, creating)
    }
}

#[async_trait]
impl<F> AfterLoadHook for F
where
    F: Fn(&RequestContext, Vec<Record>) -> Result<Vec<Record>, CrudError> + Send + Sync,
{
    async fn after_load(&self, ctx: &RequestContext, records: Vec<Record>) -> Result<Vec<Record>, CrudError> {
        self(ctx, records)
    }
}

#[async_trait]
impl<F> SaveHook for F
where
    F: Fn(&RequestContext, Record, bool) -> Result<Record, CrudError> + Send + Sync,
{
    async fn on_save(
        &self,
        ctx: &RequestContext,
        _tx: &mut dyn Transaction,
        record: Record,
        creating: bool,
    ) -> Result<Record, CrudError> {
        self(ctx, record, creating)
    }
}

#[async_trait]
impl<F> PreDeleteHook for F
where
    F: Fn(&RequestContext, Vec<Record>) -> Result<Vec<Record>, CrudError> + Send + Sync,
{
    async fn before_delete(
        &self,
        ctx: &RequestContext,
        _tx: &mut dyn Transaction,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, CrudError> {
        self(ctx, records)
    }
}

#[async_trait]
impl<F> PostDeleteHook for F
where
    F: Fn(&RequestContext, &[Record]) -> Result<(), CrudError> + Send + Sync,
{
    async fn after_delete(&self, ctx: &RequestContext, _tx: &mut dyn Transaction, deleted: &[Record]) -> Result<(), CrudError> {
        self(ctx, deleted)
    }
}

/// Options for one resource. Built once; read-only while serving.
#[derive(Clone)]
pub struct ResourceOptions {
    pub(crate) scope: ScopeFn,
    pub(crate) searchable_fields: Vec<String>,
    pub(crate) converters: HashMap<String, ValueConverter>,
    pub(crate) order_by: Option<String>,
    pub(crate) key_path: String,
    pub(crate) populate_one: Vec<String>,
    pub(crate) populate_many: Vec<String>,
    pub(crate) distinct: bool,
    pub(crate) underscore_as_empty: bool,
    pub(crate) sanitizer: Option<Arc<dyn InputSanitizer>>,
    pub(crate) create_loader: Option<Arc<dyn CreateLoader>>,
    pub(crate) after_load: Vec<Arc<dyn AfterLoadHook>>,
    pub(crate) pre_save: Vec<Arc<dyn SaveHook>>,
    pub(crate) post_save: Vec<Arc<dyn SaveHook>>,
    pub(crate) pre_delete: Vec<Arc<dyn PreDeleteHook>>,
    pub(crate) post_delete: Vec<Arc<dyn PostDeleteHook>>,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        ResourceOptions {
            scope: Arc::new(|_| Record::new()),
            searchable_fields: Vec::new(),
            converters: HashMap::new(),
            order_by: None,
            key_path: DEFAULT_KEY_PATH.to_string(),
            populate_one: Vec::new(),
            populate_many: Vec::new(),
            distinct: false,
            underscore_as_empty: false,
            sanitizer: None,
            create_loader: None,
            after_load: Vec::new(),
            pre_save: Vec::new(),
            post_save: Vec::new(),
            pre_delete: Vec::new(),
            post_delete: Vec::new(),
        }
    }
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options declared in the model file. Each `scope_headers` entry scopes
    /// its field to the request header's value (null when the header is absent).
    pub fn from_config(config: &ResourceConfig) -> Self {
        let mut options = ResourceOptions {
            searchable_fields: config.searchable_fields.clone(),
            order_by: config.order_by.clone(),
            key_path: config.key_path.clone().unwrap_or_else(|| DEFAULT_KEY_PATH.to_string()),
            populate_one: config.default_populate.one.clone(),
            populate_many: config.default_populate.many.clone(),
            distinct: config.distinct,
            underscore_as_empty: config.replace_underscore_with_empty,
            ..ResourceOptions::default()
        };
        if !config.scope_headers.is_empty() {
            let headers: Vec<(String, String)> = config
                .scope_headers
                .iter()
                .map(|(field, header)| (field.clone(), header.to_ascii_lowercase()))
                .collect();
            options.scope = Arc::new(move |ctx: &RequestContext| {
                headers
                    .iter()
                    .map(|(field, header)| {
                        let value = ctx
                            .header(header)
                            .map(|v| Value::String(v.to_string()))
                            .unwrap_or(Value::Null);
                        (field.clone(), value)
                    })
                    .collect()
            });
        }
        options
    }

    pub fn scope(mut self, f: impl Fn(&RequestContext) -> Record + Send + Sync + 'static) -> Self {
        self.scope = Arc::new(f);
        self
    }

    pub fn searchable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn convert(mut self, field: impl Into<String>, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.converters.insert(field.into(), Arc::new(f));
        self
    }

    /// Default sort, in the `order` query syntax (`name asc,id`).
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn key_path(mut self, pattern: impl Into<String>) -> Self {
        self.key_path = pattern.into();
        self
    }

    /// Relations populated when the request names none: `one` for single fetches, `many` for lists.
    pub fn default_populate<I, J>(mut self, one: I, many: J) -> Self
    where
        I: IntoIterator<Item = &'static str>,
        J: IntoIterator<Item = &'static str>,
    {
        self.populate_one = one.into_iter().map(str::to_string).collect();
        self.populate_many = many.into_iter().map(str::to_string).collect();
        self
    }

    pub fn distinct(mut self, on: bool) -> Self {
        self.distinct = on;
        self
    }

    pub fn underscore_as_empty(mut self, on: bool) -> Self {
        self.underscore_as_empty = on;
        self
    }

    pub fn sanitize_with(mut self, sanitizer: impl InputSanitizer + 'static) -> Self {
        self.sanitizer = Some(Arc::new(sanitizer));
        self
    }

    pub fn load_for_create(mut self, loader: impl CreateLoader + 'static) -> Self {
        self.create_loader = Some(Arc::new(loader));
        self
    }

    pub fn after_load(mut self, hook: impl AfterLoadHook + 'static) -> Self {
        self.after_load.push(Arc::new(hook));
        self
    }

    pub fn pre_save(mut self, hook: impl SaveHook + 'static) -> Self {
        self.pre_save.push(Arc::new(hook));
        self
    }

    pub fn post_save(mut self, hook: impl SaveHook + 'static) -> Self {
        self.post_save.push(Arc::new(hook));
        self
    }

    pub fn pre_delete(mut self, hook: impl PreDeleteHook + 'static) -> Self {
        self.pre_delete.push(Arc::new(hook));
        self
    }

    pub fn post_delete(mut self, hook: impl PostDeleteHook + 'static) -> Self {
        self.post_delete.push(Arc::new(hook));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PopulateConfig;
    use serde_json::json;

    #[test]
    fn config_headers_become_scope() {
        let config = ResourceConfig {
            name: "orders".into(),
            entity: "orders".into(),
            mount: "/orders".into(),
            key_path: None,
            searchable_fields: vec!["status".into()],
            order_by: Some("id asc".into()),
            default_populate: PopulateConfig {
                one: vec!["lines".into()],
                many: vec![],
            },
            distinct: true,
            replace_underscore_with_empty: false,
            scope_headers: HashMap::from([("tenant".to_string(), "X-Tenant-ID".to_string())]),
        };
        let options = ResourceOptions::from_config(&config);
        assert_eq!(options.key_path, ":id");
        assert_eq!(options.populate_one, vec!["lines".to_string()]);
        assert!(options.distinct);

        let ctx = RequestContext::new().with_header("x-tenant-id", "acme");
        assert_eq!((options.scope)(&ctx).get("tenant"), Some(&json!("acme")));
        assert_eq!((options.scope)(&RequestContext::new()).get("tenant"), Some(&Value::Null));
    }
}
