//! Query-string filter DSL.
//!
//! Supported forms, tried in this order:
//!
//! - `$between(1,5)` numeric range, then `$like(pattern)`
//! - `$between(a,b)` general range, `$in(a,b,c)`, `$gt(v)`, `$lt(v)`
//! - `$null`, `$nenull`, `$bool(true|1|yes|false|no|0)`
//! - anything else is a literal equality
//!
//! Operands may be `$dt(<epoch millis>)`, converted to an ISO-8601 timestamp.

use crate::controller::query::Condition;
use chrono::{DateTime, SecondsFormat};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

/// Smallest `$dt(...)` argument read as epoch milliseconds (13-digit values).
const EPOCH_MILLIS_FLOOR: i64 = 10_000_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to evaluate {operator}: {reason}")]
pub struct MalformedOperator {
    pub operator: &'static str,
    pub reason: String,
}

impl MalformedOperator {
    fn new(operator: &'static str, reason: impl Into<String>) -> Self {
        MalformedOperator {
            operator,
            reason: reason.into(),
        }
    }
}

/// A raw query value resolved once into its operator.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpr {
    NumericBetween(i64, i64),
    Like(String),
    Between(String, String),
    In(Vec<String>),
    Gt(String),
    Lt(String),
    IsNull,
    IsNotNull,
    Bool(bool),
    Literal(String),
}

struct Grammar {
    numeric_between: Regex,
    like: Regex,
    between: Regex,
    in_list: Regex,
    gt: Regex,
    lt: Regex,
    null: Regex,
    not_null: Regex,
    boolean: Regex,
    operator_name: Regex,
    dt: Regex,
}

fn grammar() -> &'static Grammar {
    static G: OnceLock<Grammar> = OnceLock::new();
    G.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("static regex");
        Grammar {
            numeric_between: re(r"(?i)^\$between\((\d+),(\d+)\)$"),
            like: re(r"(?i)^\$like\(([^)]*)\)$"),
            between: re(r"(?i)^\$between\(([^,]+),(.+)\)$"),
            in_list: re(r"(?i)^\$in\((.*)\)$"),
            gt: re(r"(?i)^\$gt\((.+)\)$"),
            lt: re(r"(?i)^\$lt\((.+)\)$"),
            null: re(r"(?i)^\$null$"),
            not_null: re(r"(?i)^\$nenull$"),
            boolean: re(r"(?i)^\$bool\((true|1|yes|false|no|0)\)$"),
            operator_name: re(r"(?i)^\$(between|like|in|gt|lt|bool)\b"),
            dt: re(r"^\$dt\((\d+)\)$"),
        }
    })
}

impl FilterExpr {
    /// Classify a raw value. A value that names an operator but does not fit its
    /// argument grammar is malformed rather than literal.
    pub fn parse(raw: &str) -> Result<Self, MalformedOperator> {
        let g = grammar();
        let v = raw.trim();

        if let Some(m) = g.numeric_between.captures(v) {
            if let (Ok(a), Ok(b)) = (m[1].parse::<i64>(), m[2].parse::<i64>()) {
                return Ok(FilterExpr::NumericBetween(a, b));
            }
        }
        if let Some(m) = g.like.captures(v) {
            return Ok(FilterExpr::Like(m[1].to_string()));
        }
        if let Some(m) = g.between.captures(v) {
            return Ok(FilterExpr::Between(m[1].trim().to_string(), m[2].trim().to_string()));
        }
        if let Some(items) = g.in_list.captures(v).and_then(|m| split_top_level(&m[1])) {
            return Ok(FilterExpr::In(items));
        }
        if let Some(m) = g.gt.captures(v) {
            return Ok(FilterExpr::Gt(m[1].trim().to_string()));
        }
        if let Some(m) = g.lt.captures(v) {
            return Ok(FilterExpr::Lt(m[1].trim().to_string()));
        }
        if g.null.is_match(v) {
            return Ok(FilterExpr::IsNull);
        }
        if g.not_null.is_match(v) {
            return Ok(FilterExpr::IsNotNull);
        }
        if let Some(m) = g.boolean.captures(v) {
            let truthy = matches!(m[1].to_ascii_lowercase().as_str(), "true" | "1" | "yes");
            return Ok(FilterExpr::Bool(truthy));
        }
        if let Some(m) = g.operator_name.captures(v) {
            let operator = match m[1].to_ascii_lowercase().as_str() {
                "between" => "$between",
                "like" => "$like",
                "in" => "$in",
                "gt" => "$gt",
                "lt" => "$lt",
                _ => "$bool",
            };
            return Err(MalformedOperator::new(operator, format!("cannot read arguments of '{}'", raw)));
        }
        Ok(FilterExpr::Literal(raw.to_string()))
    }

    /// Structured condition, or `None` when the expression places no constraint.
    pub fn into_condition(self) -> Result<Option<Condition>, MalformedOperator> {
        Ok(Some(match self {
            FilterExpr::NumericBetween(a, b) => Condition::Range {
                gte: Value::from(a),
                lte: Value::from(b),
            },
            FilterExpr::Like(s) => Condition::Like(s),
            FilterExpr::Between(a, b) => Condition::Range {
                gte: normalize(&a)?,
                lte: normalize(&b)?,
            },
            FilterExpr::In(items) => {
                if items.is_empty() {
                    return Ok(None);
                }
                Condition::In(items.iter().map(|s| normalize(s)).collect::<Result<_, _>>()?)
            }
            FilterExpr::Gt(v) => Condition::Gt(normalize(&v)?),
            FilterExpr::Lt(v) => Condition::Lt(normalize(&v)?),
            FilterExpr::IsNull => Condition::Eq(Value::Null),
            FilterExpr::IsNotNull => Condition::Ne(Value::Null),
            FilterExpr::Bool(b) => Condition::Eq(Value::from(if b { 1 } else { 0 })),
            FilterExpr::Literal(v) => Condition::Eq(normalize(&v)?),
        }))
    }
}

/// Split `$in` arguments on commas outside parentheses, so `$dt(..)` operands stay whole.
/// Empty items are dropped; unbalanced parentheses give `None`.
fn split_top_level(args: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in args.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                items.push(&args[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    items.push(&args[start..]);
    Some(
        items
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Interpret a raw query value into a condition; `None` means no constraint.
pub fn interpret(raw: &str) -> Result<Option<Condition>, MalformedOperator> {
    FilterExpr::parse(raw)?.into_condition()
}

/// `$dt(<epoch millis>)` becomes an ISO-8601 string; everything else passes through.
pub fn normalize(v: &str) -> Result<Value, MalformedOperator> {
    let Some(m) = grammar().dt.captures(v.trim()) else {
        return Ok(Value::String(v.to_string()));
    };
    let millis: i64 = m[1]
        .parse()
        .map_err(|_| MalformedOperator::new("$dt", format!("'{}' is not an epoch", &m[1])))?;
    if millis < EPOCH_MILLIS_FLOOR {
        return Ok(Value::String(v.to_string()));
    }
    let dt = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| MalformedOperator::new("$dt", format!("{} is out of range", millis)))?;
    Ok(Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(raw: &str) -> Option<Condition> {
        interpret(raw).unwrap()
    }

    #[test]
    fn numeric_between_keeps_numbers() {
        assert_eq!(cond("$between(3,7)"), Some(Condition::Range { gte: json!(3), lte: json!(7) }));
    }

    #[test]
    fn general_between_normalizes_operands() {
        assert_eq!(
            cond("$between($dt(1700000000000),$dt(1700000060000))"),
            Some(Condition::Range {
                gte: json!("2023-11-14T22:13:20.000Z"),
                lte: json!("2023-11-14T22:14:20.000Z"),
            })
        );
        assert_eq!(
            cond("$between(a,m)"),
            Some(Condition::Range { gte: json!("a"), lte: json!("m") })
        );
    }

    #[test]
    fn like_and_comparisons() {
        assert_eq!(cond("$like(%milk%)"), Some(Condition::Like("%milk%".into())));
        assert_eq!(cond("$gt(10)"), Some(Condition::Gt(json!("10"))));
        assert_eq!(cond("$LT(5)"), Some(Condition::Lt(json!("5"))));
    }

    #[test]
    fn in_list_drops_empty_items() {
        assert_eq!(cond("$in(1,2,3)"), Some(Condition::In(vec![json!("1"), json!("2"), json!("3")])));
        assert_eq!(cond("$in(a,,b)"), Some(Condition::In(vec![json!("a"), json!("b")])));
    }

    #[test]
    fn comparisons_accept_dt_operands() {
        let at = json!("2023-11-14T22:13:20.000Z");
        assert_eq!(cond("$gt($dt(1700000000000))"), Some(Condition::Gt(at.clone())));
        assert_eq!(cond("$lt($dt(1700000000000))"), Some(Condition::Lt(at.clone())));
        assert_eq!(
            cond("$in($dt(1700000000000), 7)"),
            Some(Condition::In(vec![at, json!("7")]))
        );
        assert_eq!(interpret("$in($dt(1700000000000),7").unwrap_err().operator, "$in");
    }

    #[test]
    fn empty_in_list_is_no_constraint() {
        assert_eq!(cond("$in()"), None);
        assert_eq!(cond("$in(,,)"), None);
    }

    #[test]
    fn null_checks_and_booleans() {
        assert_eq!(cond("$null"), Some(Condition::Eq(Value::Null)));
        assert_eq!(cond("$nenull"), Some(Condition::Ne(Value::Null)));
        for t in ["$bool(true)", "$bool(1)", "$bool(YES)"] {
            assert_eq!(cond(t), Some(Condition::Eq(json!(1))), "{}", t);
        }
        for f in ["$bool(false)", "$bool(0)", "$bool(no)"] {
            assert_eq!(cond(f), Some(Condition::Eq(json!(0))), "{}", f);
        }
    }

    #[test]
    fn literals_are_equalities_after_normalize() {
        for v in ["hello", "42", "a$b", "$unknown(1)", ""] {
            assert_eq!(cond(v), Some(Condition::Eq(normalize(v).unwrap())), "{}", v);
        }
        assert_eq!(cond("$dt(1700000000000)"), Some(Condition::Eq(json!("2023-11-14T22:13:20.000Z"))));
    }

    #[test]
    fn short_dt_values_pass_through() {
        assert_eq!(normalize("$dt(12345)").unwrap(), json!("$dt(12345)"));
        assert_eq!(normalize("$dt(1700000000000)").unwrap(), json!("2023-11-14T22:13:20.000Z"));
    }

    #[test]
    fn operator_with_unreadable_arguments_is_malformed() {
        assert_eq!(interpret("$between(5)").unwrap_err().operator, "$between");
        assert_eq!(interpret("$gt()").unwrap_err().operator, "$gt");
        assert_eq!(interpret("$bool(maybe)").unwrap_err().operator, "$bool");
        assert_eq!(interpret("$in(1,2").unwrap_err().operator, "$in");
    }
}
