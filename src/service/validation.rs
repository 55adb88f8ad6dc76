//! Static instance validation from the entity's declared rules.

use crate::config::{Record, ValidationRule};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a full instance against per-column rules. All required fields must be present.
    pub fn validate(record: &Record, rules: &HashMap<String, ValidationRule>) -> Result<(), ValidationError> {
        for (col, rule) in rules {
            let val = record.get(col);
            if rule.required == Some(true) && val.map_or(true, Value::is_null) {
                return Err(ValidationError(format!("{} is required", col)));
            }
            if let Some(v) = val {
                validate_field(col, v, rule)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present (for updates). Required is not enforced for missing fields.
    pub fn validate_partial(record: &Record, rules: &HashMap<String, ValidationRule>) -> Result<(), ValidationError> {
        for (col, v) in record {
            if let Some(rule) = rules.get(col) {
                if rule.required == Some(true) && v.is_null() {
                    return Err(ValidationError(format!("{} is required", col)));
                }
                validate_field(col, v, rule)?;
            }
        }
        Ok(())
    }
}

fn validate_field(col: &str, v: &Value, rule: &ValidationRule) -> Result<(), ValidationError> {
    if v.is_null() {
        return Ok(());
    }
    if let Some(format) = &rule.format {
        validate_format(col, v, format)?;
    }
    if let Some(s) = v.as_str() {
        let chars = s.chars().count();
        if let Some(max) = rule.max_length {
            if chars > max as usize {
                return Err(ValidationError(format!("{} must be at most {} characters", col, max)));
            }
        }
        if let Some(min) = rule.min_length {
            if chars < min as usize {
                return Err(ValidationError(format!("{} must be at least {} characters", col, min)));
            }
        }
        if let Some(pattern) = &rule.pattern {
            let re = Regex::new(pattern).map_err(|_| ValidationError(format!("invalid pattern for {}", col)))?;
            if !re.is_match(s) {
                return Err(ValidationError(format!("{} does not match required pattern", col)));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(ValidationError(format!(
                "{} must be one of: {:?}",
                col,
                allowed.iter().take(5).collect::<Vec<_>>()
            )));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(ValidationError(format!("{} must be at least {}", col, min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(ValidationError(format!("{} must be at most {}", col, max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(col: &str, v: &Value, format: &str) -> Result<(), ValidationError> {
    let Some(s) = v.as_str() else { return Ok(()) };
    match format.to_lowercase().as_str() {
        "email" if !s.contains('@') || s.len() < 3 => {
            Err(ValidationError(format!("{} must be a valid email", col)))
        }
        "uuid" if uuid::Uuid::parse_str(s).is_err() => Err(ValidationError(format!("{} must be a valid UUID", col))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> HashMap<String, ValidationRule> {
        HashMap::from([
            (
                "email".to_string(),
                ValidationRule {
                    required: Some(true),
                    format: Some("email".into()),
                    ..Default::default()
                },
            ),
            (
                "qty".to_string(),
                ValidationRule {
                    minimum: Some(1.0),
                    maximum: Some(99.0),
                    ..Default::default()
                },
            ),
            (
                "status".to_string(),
                ValidationRule {
                    allowed: Some(vec![json!("open"), json!("closed")]),
                    ..Default::default()
                },
            ),
        ])
    }

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn full_validation_requires_fields() {
        assert_eq!(
            RequestValidator::validate(&rec(json!({ "qty": 2 })), &rules()).unwrap_err(),
            ValidationError("email is required".into())
        );
        assert!(RequestValidator::validate(&rec(json!({ "email": "a@b.c", "qty": 2, "status": "open" })), &rules()).is_ok());
    }

    #[test]
    fn partial_validation_checks_present_fields_only() {
        assert!(RequestValidator::validate_partial(&rec(json!({ "qty": 5 })), &rules()).is_ok());
        assert!(RequestValidator::validate_partial(&rec(json!({ "qty": 500 })), &rules()).is_err());
        assert!(RequestValidator::validate_partial(&rec(json!({ "status": "lost" })), &rules()).is_err());
        assert!(RequestValidator::validate_partial(&rec(json!({ "email": "nope" })), &rules()).is_err());
    }
}
