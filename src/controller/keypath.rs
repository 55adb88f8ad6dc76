//! Resource key path: `:param(regex)<column>` tokens resolved once at construction.
//!
//! ```text
//!  :paramName(regex)<columnName>
//!  :paramName(regex)              => columnName = paramName
//!  :paramName<columnName>         => pattern = ([A-Za-z0-9_]{0,})
//! ```
//!
//! Only declared `(regex)` groups are checked against request values.

use crate::config::Record;
use crate::error::CrudError;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

pub const DEFAULT_KEY_PATH: &str = ":id";
pub const DEFAULT_PARAM_PATTERN: &str = "([A-Za-z0-9_]{0,})";

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":(\w+)(\([^)]*\))?(<(\w+)>)?").expect("static regex"))
}

fn column_annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\w+>").expect("static regex"))
}

fn param_constraint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(:\w+)\([^)]*\)").expect("static regex"))
}

/// One path parameter bound to a backing field.
#[derive(Clone, Debug)]
pub struct KeyPathEntry {
    pub param_name: String,
    pub column_name: String,
    pub pattern: String,
    /// Set only for a declared `(regex)` group; the default pattern is not enforced.
    matcher: Option<Regex>,
}

impl PartialEq for KeyPathEntry {
    fn eq(&self, other: &Self) -> bool {
        self.param_name == other.param_name
            && self.column_name == other.column_name
            && self.pattern == other.pattern
    }
}

#[derive(Clone, Debug)]
pub struct KeyPath {
    raw: String,
    route_template: String,
    entries: Vec<KeyPathEntry>,
}

impl KeyPath {
    /// Parse a key path pattern; a leading `/` is added when missing.
    pub fn parse(resource: &str, pattern: &str) -> Result<Self, CrudError> {
        let raw = format!("/{}", pattern.trim_start_matches('/'));
        let entries = resolve(resource, &raw)?;
        let route_template = column_annotation_re().replace_all(&raw, "").into_owned();
        Ok(KeyPath {
            raw,
            route_template,
            entries,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn entries(&self) -> &[KeyPathEntry] {
        &self.entries
    }

    /// Path with `<column>` annotations removed, e.g. `/:slug([a-z-]+)`.
    pub fn route_template(&self) -> &str {
        &self.route_template
    }

    /// Route template without inline regex groups, as registered with axum.
    /// Patterns are enforced by [`KeyPath::where_fields`] instead.
    pub fn axum_path(&self) -> String {
        param_constraint_re().replace_all(&self.route_template, "$1").into_owned()
    }

    /// Field equalities identifying one instance from the request's path parameters.
    pub fn where_fields(
        &self,
        resource: &str,
        params: &HashMap<String, String>,
        underscore_as_empty: bool,
    ) -> Result<Record, CrudError> {
        let mut out = Record::new();
        for entry in &self.entries {
            let value = params.get(&entry.param_name).ok_or_else(|| {
                CrudError::bad_configuration(
                    resource,
                    format!("path parameter '{}' was not supplied by the router", entry.param_name),
                )
            })?;
            if entry.matcher.as_ref().map_or(false, |m| !m.is_match(value)) {
                return Err(CrudError::not_found(
                    resource,
                    format!("{}={} does not match {}", entry.param_name, value, entry.pattern),
                ));
            }
            let value = if underscore_as_empty && value == "_" { "" } else { value.as_str() };
            out.insert(entry.column_name.clone(), Value::String(value.to_string()));
        }
        Ok(out)
    }
}

/// Parse every `:token` of `path` into (param, column, pattern) triples, in order.
pub fn resolve(resource: &str, path: &str) -> Result<Vec<KeyPathEntry>, CrudError> {
    let bad = |detail: String| {
        CrudError::bad_configuration(
            resource,
            format!("failed to parse key path '{}': {}. Check the resource key path pattern.", path, detail),
        )
    };

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut literal = String::new();
    let mut cursor = 0;
    for (pos, _) in path.match_indices(':') {
        if pos < cursor {
            // ':' inside a token already consumed (e.g. a regex group)
            continue;
        }
        let caps = token_re()
            .captures_at(path, pos)
            .filter(|c| c.get(0).map(|m| m.start()) == Some(pos))
            .ok_or_else(|| bad(format!("invalid token at offset {}", pos)))?;
        let whole = caps.get(0).map(|m| m.end()).unwrap_or(pos);
        literal.push_str(&path[cursor..pos]);
        cursor = whole;

        let param_name = caps[1].to_string();
        let column_name = caps.get(4).map(|m| m.as_str().to_string()).unwrap_or_else(|| param_name.clone());
        let (pattern, matcher) = match caps.get(2) {
            Some(group) => {
                let pattern = group.as_str().to_string();
                let matcher = Regex::new(&format!("^(?:{})$", pattern))
                    .map_err(|e| bad(format!("pattern {} for :{} does not compile: {}", pattern, param_name, e)))?;
                (pattern, Some(matcher))
            }
            None => (DEFAULT_PARAM_PATTERN.to_string(), None),
        };
        if !seen.insert(param_name.clone()) {
            return Err(bad(format!("parameter :{} declared twice", param_name)));
        }
        entries.push(KeyPathEntry {
            param_name,
            column_name,
            pattern,
            matcher,
        });
    }
    literal.push_str(&path[cursor..]);
    if let Some(c) = literal.chars().find(|c| matches!(c, '(' | ')' | '<' | '>')) {
        return Err(bad(format!("unexpected '{}' outside a token", c)));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn plain_param_defaults_column_and_pattern() {
        let kp = KeyPath::parse("todo", ":id").unwrap();
        let e = &kp.entries()[0];
        assert_eq!(e.param_name, "id");
        assert_eq!(e.column_name, "id");
        assert_eq!(e.pattern, DEFAULT_PARAM_PATTERN);
        assert_eq!(kp.raw(), "/:id");
        assert_eq!(kp.route_template(), "/:id");
    }

    #[test]
    fn annotated_params_keep_order() {
        let kp = KeyPath::parse("doc", "/:org<orgId>/:slug([a-z-]+)<name>").unwrap();
        let pairs: Vec<_> = kp
            .entries()
            .iter()
            .map(|e| (e.param_name.as_str(), e.column_name.as_str(), e.pattern.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("org", "orgId", DEFAULT_PARAM_PATTERN), ("slug", "name", "([a-z-]+)")]
        );
        assert_eq!(kp.route_template(), "/:org/:slug([a-z-]+)");
        assert_eq!(kp.axum_path(), "/:org/:slug");
    }

    #[test]
    fn resolving_twice_is_identical() {
        let a = resolve("x", "/:a(\\d+)<b>/:c").unwrap();
        let b = resolve("x", "/:a(\\d+)<b>/:c").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_patterns_fail_as_bad_configuration() {
        for p in [":", "/:id/<name>", "/:id(", "/:(x)", "/:id/:id"] {
            let err = KeyPath::parse("todo", p).unwrap_err();
            assert_eq!(err.code(), "RES-005 BAD_CONTROLLER_CONFIGURATION", "pattern {}", p);
        }
    }

    #[test]
    fn where_fields_map_params_to_columns() {
        let kp = KeyPath::parse("doc", ":org<orgId>/:slug<name>").unwrap();
        let w = kp.where_fields("doc", &params(&[("org", "7"), ("slug", "intro")]), false).unwrap();
        assert_eq!(w.get("orgId"), Some(&Value::String("7".into())));
        assert_eq!(w.get("name"), Some(&Value::String("intro".into())));
    }

    #[test]
    fn value_outside_pattern_is_not_found() {
        let kp = KeyPath::parse("todo", ":id(\\d+)").unwrap();
        let err = kp.where_fields("todo", &params(&[("id", "abc")]), false).unwrap_err();
        assert_eq!(err.code(), "RES-001 RESOURCE_NOT_FOUND");
    }

    #[test]
    fn default_pattern_is_not_enforced() {
        let kp = KeyPath::parse("doc", ":id").unwrap();
        let id = "4380a5d6-2e81-4b76-8a6c-5101d9f6ceb6";
        let w = kp.where_fields("doc", &params(&[("id", id)]), false).unwrap();
        assert_eq!(w["id"], Value::String(id.into()));
    }

    #[test]
    fn underscore_reads_as_empty_when_enabled() {
        let kp = KeyPath::parse("cfg", ":section").unwrap();
        let p = params(&[("section", "_")]);
        assert_eq!(kp.where_fields("cfg", &p, true).unwrap()["section"], Value::String(String::new()));
        assert_eq!(kp.where_fields("cfg", &p, false).unwrap()["section"], Value::String("_".into()));
    }
}
