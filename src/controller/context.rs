//! Per-request input handed to every controller operation and hook.

use crate::error::CrudError;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;

/// A query parameter value: one occurrence, or the key repeated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

/// Path parameters, query parameters, headers and the parsed body of one request.
///
/// `body` is `None` when the request had no body. A body that is not valid JSON is
/// kept as `Value::String` so operations can reject it as malformed.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub params: HashMap<String, String>,
    pub query: HashMap<String, QueryValue>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Add one query occurrence; a repeated key becomes [`QueryValue::Multiple`].
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_query(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(v) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), v);
        }
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Query map from decoded `key=value` pairs, in request order.
    pub fn query_from_pairs(pairs: Vec<(String, String)>) -> HashMap<String, QueryValue> {
        let mut ctx = RequestContext::default();
        for (k, v) in pairs {
            ctx.push_query(k, v);
        }
        ctx.query
    }

    /// Parse a raw request body. Empty input means no body.
    pub fn body_from_bytes(bytes: &[u8]) -> Option<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match serde_json::from_slice(bytes) {
            Ok(v) => Some(v),
            Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        }
    }

    fn push_query(&mut self, key: String, value: String) {
        use std::collections::hash_map::Entry;
        match self.query.entry(key) {
            Entry::Vacant(e) => {
                e.insert(QueryValue::Single(value));
            }
            Entry::Occupied(mut e) => {
                let all = match std::mem::replace(e.get_mut(), QueryValue::Multiple(Vec::new())) {
                    QueryValue::Single(first) => vec![first, value],
                    QueryValue::Multiple(mut all) => {
                        all.push(value);
                        all
                    }
                };
                *e.get_mut() = QueryValue::Multiple(all);
            }
        }
    }

    /// Trimmed, non-empty header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// A query value that must appear at most once.
    pub fn query_single(&self, resource: &str, key: &str) -> Result<Option<&str>, CrudError> {
        match self.query.get(key) {
            None => Ok(None),
            Some(QueryValue::Single(s)) => Ok(Some(s.as_str())),
            Some(QueryValue::Multiple(_)) => Err(CrudError::query_malformed(
                resource,
                format!("'{}' was given more than once; cannot evaluate a list value", key),
            )),
        }
    }

    /// Non-negative integer query value, e.g. `offset` or `pagesize`.
    pub fn query_u64(&self, resource: &str, key: &str) -> Result<Option<u64>, CrudError> {
        match self.query_single(resource, key)?.map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| CrudError::query_malformed(resource, format!("{} must be a non-negative integer, got '{}'", key, raw))),
        }
    }

    /// Relation names requested through `populate`, or `None` when absent or empty.
    /// Accepts a comma-separated value or the key repeated.
    pub fn populate(&self) -> Option<Vec<String>> {
        let raw: Vec<&str> = match self.query.get("populate")? {
            QueryValue::Single(s) => vec![s.as_str()],
            QueryValue::Multiple(all) => all.iter().map(String::as_str).collect(),
        };
        let names: Vec<String> = raw
            .iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }
}
