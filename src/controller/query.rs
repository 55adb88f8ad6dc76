//! Structured query intent handed to the store: where clause, sort, pagination, population.

use crate::config::Record;
use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::OnceLock;

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// One operator constraint on a single field.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Lt(Value),
    Range { gte: Value, lte: Value },
    Like(String),
    In(Vec<Value>),
}

impl Condition {
    pub fn to_json(&self) -> Value {
        match self {
            Condition::Eq(v) => json!({ "$eq": v }),
            Condition::Ne(v) => json!({ "$ne": v }),
            Condition::Gt(v) => json!({ "$gt": v }),
            Condition::Lt(v) => json!({ "$lt": v }),
            Condition::Range { gte, lte } => json!({ "$gte": gte, "$lte": lte }),
            Condition::Like(s) => json!({ "$like": s }),
            Condition::In(items) => json!({ "$in": items }),
        }
    }
}

/// Top-level field equalities AND-ed with a nested conjunction of per-field conditions.
/// Never combined by OR.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WhereClause {
    pub fields: Record,
    pub and: Vec<(String, Condition)>,
}

impl WhereClause {
    pub fn from_fields(fields: Record) -> Self {
        WhereClause {
            fields,
            and: Vec::new(),
        }
    }

    /// Overlay equalities; later values win on the same field.
    pub fn merge_fields(&mut self, fields: Record) {
        self.fields.extend(fields);
    }

    pub fn push(&mut self, field: impl Into<String>, condition: Condition) {
        self.and.push((field.into(), condition));
    }

    pub fn to_json(&self) -> Value {
        let mut out = self.fields.clone();
        if !self.and.is_empty() {
            let group: Vec<Value> = self
                .and
                .iter()
                .map(|(field, c)| {
                    let mut entry = Record::new();
                    entry.insert(field.clone(), c.to_json());
                    Value::Object(entry)
                })
                .collect();
            out.insert("$and".into(), Value::Array(group));
        }
        Value::Object(out)
    }
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        SortField {
            field: field.into(),
            direction,
        }
    }
}

fn order_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^([^\s]+)(?:\s+(asc|desc))?$").expect("static regex"))
}

/// Parse `field_1 asc,field_2,field_3 desc`; a missing direction means `desc`.
/// Returns the offending token on failure.
pub fn parse_order(raw: &str) -> Result<Vec<SortField>, String> {
    let mut out: Vec<SortField> = Vec::new();
    for token in raw.split(',') {
        let token = token.trim();
        let m = order_token_re().captures(token).ok_or_else(|| token.to_string())?;
        let direction = match m.get(2).map(|d| d.as_str().to_ascii_lowercase()) {
            Some(d) if d == "asc" => SortDirection::Asc,
            _ => SortDirection::Desc,
        };
        let field = m[1].to_string();
        match out.iter_mut().find(|s| s.field == field) {
            Some(existing) => existing.direction = direction,
            None => out.push(SortField { field, direction }),
        }
    }
    Ok(out)
}

/// Options for a single-result fetch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOneOptions {
    pub populate: Vec<String>,
}

/// Options for a paged multi-result fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct FindOptions {
    pub limit: u64,
    pub offset: u64,
    pub sort: Vec<SortField>,
    pub populate: Vec<String>,
    /// Request duplicate elimination on the primary query.
    pub distinct: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            sort: Vec::new(),
            populate: Vec::new(),
            distinct: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_defaults_to_desc() {
        let sort = parse_order("name asc,id").unwrap();
        assert_eq!(
            sort,
            vec![SortField::new("name", SortDirection::Asc), SortField::new("id", SortDirection::Desc)]
        );
    }

    #[test]
    fn order_direction_is_case_insensitive() {
        assert_eq!(parse_order("a ASC").unwrap()[0].direction, SortDirection::Asc);
        assert_eq!(parse_order(" b  Desc ").unwrap()[0].direction, SortDirection::Desc);
    }

    #[test]
    fn order_rejects_bad_tokens() {
        assert_eq!(parse_order("name sideways").unwrap_err(), "name sideways");
        assert_eq!(parse_order("name,").unwrap_err(), "");
    }

    #[test]
    fn where_clause_json_shape() {
        let mut w = WhereClause::default();
        w.fields.insert("tenant".into(), json!("acme"));
        w.push("status", Condition::In(vec![json!("1"), json!("2")]));
        assert_eq!(
            w.to_json(),
            json!({ "tenant": "acme", "$and": [{ "status": { "$in": ["1", "2"] } }] })
        );
        let plain = WhereClause::from_fields(Record::new());
        assert_eq!(plain.to_string(), "{}");
    }
}
