//! Generic resource controller: key paths, filter DSL, collection reconciliation and the CRUD engine.

pub mod context;
pub mod engine;
pub mod filter;
pub mod keypath;
pub mod options;
pub mod query;
pub mod reconcile;

pub use context::{QueryValue, RequestContext};
pub use engine::{CrudController, ListResult};
pub use filter::{interpret, normalize, FilterExpr, MalformedOperator};
pub use keypath::{KeyPath, KeyPathEntry};
pub use options::{
    AfterLoadHook, CreateLoader, InputSanitizer, PostDeleteHook, PreDeleteHook, ResourceOptions, SaveHook, ScopeFn,
    ValueConverter,
};
pub use query::{Condition, FindOneOptions, FindOptions, SortDirection, SortField, WhereClause};
pub use reconcile::{reconcile, DuplicateKey, Reconciliation};
