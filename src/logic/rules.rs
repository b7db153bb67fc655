use chrono::NaiveDate;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::logic::loaders::Row;

/// Result of one rule invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub success: bool,
    pub note: Option<String>,
}

impl RuleOutcome {
    pub fn pass() -> Self {
        Self {
            success: true,
            note: None,
        }
    }

    pub fn fail(note: impl Into<String>) -> Self {
        Self {
            success: false,
            note: Some(note.into()),
        }
    }
}

/// Context handed to every rule. Uniqueness rules inspect `all_rows`, the
/// full staged-row set across every upload, not just the current one.
pub struct RuleContext<'a> {
    pub field_name: &'a str,
    pub row: &'a Row,
    pub all_rows: &'a [Row],
}

pub type RuleFn = dyn for<'a> Fn(&Value, &RuleContext<'a>) -> RuleOutcome + Send + Sync;

/// Registry resolving rule names from schema descriptors to pure functions.
/// Schema descriptors reference rules by name; resolution happens at
/// validation time.
pub struct RuleRegistry {
    rules: RwLock<HashMap<String, Arc<RuleFn>>>,
}

impl RuleRegistry {
    /// Registry preloaded with the built-in rules.
    pub fn with_defaults() -> Self {
        let registry = Self {
            rules: RwLock::new(HashMap::new()),
        };
        registry.register("not_empty", not_empty);
        registry.register("integer", integer);
        registry.register("iso_date", iso_date);
        registry.register("unique_value", unique_value);
        registry
    }

    pub fn register<F>(&self, name: &str, rule: F)
    where
        F: for<'a> Fn(&Value, &RuleContext<'a>) -> RuleOutcome + Send + Sync + 'static,
    {
        self.rules.write().insert(name.to_string(), Arc::new(rule));
    }

    /// Invoke a named rule. An unknown rule name is itself a failure so a
    /// schema typo surfaces on the affected rows instead of passing silently.
    pub fn invoke(&self, name: &str, value: &Value, context: &RuleContext<'_>) -> RuleOutcome {
        match self.rules.read().get(name).cloned() {
            Some(rule) => rule(value, context),
            None => RuleOutcome::fail(format!("unknown validation rule: {}", name)),
        }
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn not_empty(value: &Value, _context: &RuleContext<'_>) -> RuleOutcome {
    match value_as_text(value) {
        Some(_) => RuleOutcome::pass(),
        None => RuleOutcome::fail("value must not be empty"),
    }
}

fn integer(value: &Value, _context: &RuleContext<'_>) -> RuleOutcome {
    let ok = match value {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    };
    if ok {
        RuleOutcome::pass()
    } else {
        RuleOutcome::fail("value must be an integer")
    }
}

fn iso_date(value: &Value, _context: &RuleContext<'_>) -> RuleOutcome {
    let parsed = value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok());
    match parsed {
        Some(_) => RuleOutcome::pass(),
        None => RuleOutcome::fail("value must be an ISO date (YYYY-MM-DD)"),
    }
}

/// Duplicate detection across the entire staged-row set. Null/empty values
/// are not considered duplicates of each other.
fn unique_value(value: &Value, context: &RuleContext<'_>) -> RuleOutcome {
    let Some(needle) = value_as_text(value) else {
        return RuleOutcome::pass();
    };
    let occurrences = context
        .all_rows
        .iter()
        .filter_map(|row| row.get(context.field_name))
        .filter_map(value_as_text)
        .filter(|candidate| candidate == &needle)
        .count();
    if occurrences > 1 {
        RuleOutcome::fail(format!(
            "'{}' duplicated across {} staged rows",
            needle, occurrences
        ))
    } else {
        RuleOutcome::pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context<'a>(field: &'a str, row: &'a Row, all: &'a [Row]) -> RuleContext<'a> {
        RuleContext {
            field_name: field,
            row,
            all_rows: all,
        }
    }

    #[test]
    fn unknown_rule_fails_with_note() {
        let registry = RuleRegistry::with_defaults();
        let row = Row::new();
        let outcome = registry.invoke("no_such_rule", &json!("x"), &context("f", &row, &[]));
        assert!(!outcome.success);
        assert!(outcome.note.unwrap().contains("no_such_rule"));
    }

    #[test]
    fn unique_value_flags_cross_upload_duplicates() {
        let registry = RuleRegistry::with_defaults();
        let mut a = Row::new();
        a.insert("national_id".to_string(), json!("N-1"));
        let mut b = Row::new();
        b.insert("national_id".to_string(), json!("N-1"));
        let all = vec![a.clone(), b];
        let outcome = registry.invoke("unique_value", &json!("N-1"), &context("national_id", &a, &all));
        assert!(!outcome.success);
    }

    #[test]
    fn unique_value_ignores_nulls() {
        let registry = RuleRegistry::with_defaults();
        let mut a = Row::new();
        a.insert("email".to_string(), Value::Null);
        let all = vec![a.clone(), a.clone()];
        let outcome = registry.invoke("unique_value", &Value::Null, &context("email", &a, &all));
        assert!(outcome.success);
    }

    #[test]
    fn iso_date_accepts_dashed_dates_only() {
        let registry = RuleRegistry::with_defaults();
        let row = Row::new();
        assert!(registry.invoke("iso_date", &json!("1990-01-02"), &context("dob", &row, &[])).success);
        assert!(!registry.invoke("iso_date", &json!("02/01/1990"), &context("dob", &row, &[])).success);
    }
}
