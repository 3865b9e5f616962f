//! Filter condition tree and its in-process evaluation.
//!
//! # Invariants
//! - Evaluation follows SQL three-valued logic: a comparison against a missing
//!   or null field is unknown (`None`), and `NOT unknown` stays unknown.
//! - Value ordering mirrors SQLite over `json_extract` results: null < numbers
//!   (bools as 0/1) < text. Arrays and objects compare as their JSON text.
//! - Two integers compare exactly; only mixed or float operands go through
//!   `f64`.

use crate::error::{RepoError, RepoResult};
use crate::model::record::Record;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

static FIELD_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("valid field path regex")
});

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// Filter expression over record fields.
///
/// Sub-trees are `Arc`-shared so refining a query never copies the
/// conditions it was built from.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Matches every record.
    All,
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    IsNull(String),
    Not(Arc<Condition>),
    And(Arc<Condition>, Arc<Condition>),
    Or(Arc<Condition>, Arc<Condition>),
}

impl Condition {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Conjunction; `All` is the identity element.
    pub fn and(left: Arc<Condition>, right: Arc<Condition>) -> Arc<Condition> {
        if matches!(*left, Self::All) {
            return right;
        }
        if matches!(*right, Self::All) {
            return left;
        }
        Arc::new(Self::And(left, right))
    }

    pub fn or(left: Arc<Condition>, right: Arc<Condition>) -> Arc<Condition> {
        if matches!(*left, Self::All) || matches!(*right, Self::All) {
            return Arc::new(Self::All);
        }
        Arc::new(Self::Or(left, right))
    }

    pub fn not(inner: Arc<Condition>) -> Arc<Condition> {
        Arc::new(Self::Not(inner))
    }

    /// Rejects field paths that are not dotted identifiers and operands that
    /// are not scalars.
    pub fn validate(&self) -> RepoResult<()> {
        match self {
            Self::All => Ok(()),
            Self::Compare { field, value, .. } => {
                validate_field_path(field)?;
                validate_operand(field, value)
            }
            Self::In { field, values } => {
                validate_field_path(field)?;
                if values.iter().any(Value::is_null) {
                    return Err(RepoError::invalid_query(
                        self.to_string(),
                        "IN lists must not contain null",
                    ));
                }
                values
                    .iter()
                    .try_for_each(|value| validate_operand(field, value))
            }
            Self::IsNull(field) => validate_field_path(field),
            Self::Not(inner) => inner.validate(),
            Self::And(left, right) | Self::Or(left, right) => {
                left.validate()?;
                right.validate()
            }
        }
    }

    /// Evaluates against one record. `None` means unknown.
    pub fn evaluate(&self, record: &Record) -> Option<bool> {
        match self {
            Self::All => Some(true),
            Self::Compare { field, op, value } => {
                let actual = non_null(record.get(field))?;
                if value.is_null() {
                    return None;
                }
                Some(op.accepts(compare_values(&actual, value)))
            }
            Self::In { field, values } => {
                if values.is_empty() {
                    return Some(false);
                }
                let actual = non_null(record.get(field))?;
                Some(
                    values
                        .iter()
                        .any(|value| compare_values(&actual, value) == Ordering::Equal),
                )
            }
            Self::IsNull(field) => Some(non_null(record.get(field)).is_none()),
            Self::Not(inner) => inner.evaluate(record).map(|matched| !matched),
            Self::And(left, right) => match (left.evaluate(record), right.evaluate(record)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Self::Or(left, right) => match (left.evaluate(record), right.evaluate(record)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "TRUE"),
            Self::Compare { field, op, value } => write!(f, "{field} {} {value}", op.as_sql()),
            Self::In { field, values } => {
                let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "{field} IN ({})", rendered.join(", "))
            }
            Self::IsNull(field) => write!(f, "{field} IS NULL"),
            Self::Not(inner) => write!(f, "NOT ({inner})"),
            Self::And(left, right) => write!(f, "({left}) AND ({right})"),
            Self::Or(left, right) => write!(f, "({left}) OR ({right})"),
        }
    }
}

pub(crate) fn validate_field_path(field: &str) -> RepoResult<()> {
    if FIELD_PATH_RE.is_match(field) {
        Ok(())
    } else {
        Err(RepoError::invalid_query(
            field,
            "field path must be a dotted identifier",
        ))
    }
}

fn validate_operand(field: &str, value: &Value) -> RepoResult<()> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(RepoError::invalid_query(
            format!("{field} {value}"),
            "operands must be scalar values",
        )),
        _ => Ok(()),
    }
}

fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|value| !value.is_null())
}

/// Total order over JSON values, mirroring SQLite's cross-type ordering.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Number(a), Value::Number(b)) => match (as_integer(a), as_integer(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => compare_floats(left, right),
        },
        (Value::Bool(_) | Value::Number(_), _) => compare_floats(left, right),
        _ => as_text(left).cmp(&as_text(right)),
    }
}

fn compare_floats(left: &Value, right: &Value) -> Ordering {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn as_integer(number: &Number) -> Option<i128> {
    number
        .as_i64()
        .map(i128::from)
        .or_else(|| number.as_u64().map(i128::from))
}

/// Strings compare by content; composites by their compact JSON text, which
/// is what `json_extract` hands back for them.
fn as_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        Value::Number(number) => number.as_f64(),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) => 1,
        Value::String(_) | Value::Array(_) | Value::Object(_) => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::{compare_values, CompareOp, Condition};
    use crate::model::record::Record;
    use serde_json::{json, Map, Value};
    use std::cmp::Ordering;
    use std::sync::Arc;

    fn record(value: Value) -> Record {
        let fields: Map<String, Value> = value.as_object().cloned().unwrap_or_default();
        Record::new(Some(1), fields)
    }

    #[test]
    fn comparisons_against_missing_fields_are_unknown() {
        let condition = Condition::compare("pages", CompareOp::Gt, 100);
        let row = record(json!({ "title": "A" }));

        assert_eq!(condition.evaluate(&row), None);
        assert_eq!(Condition::not(Arc::new(condition)).evaluate(&row), None);
    }

    #[test]
    fn and_or_follow_three_valued_logic() {
        let unknown = Arc::new(Condition::compare("pages", CompareOp::Gt, 100));
        let falsy = Arc::new(Condition::compare("title", CompareOp::Eq, "B"));
        let truthy = Arc::new(Condition::compare("title", CompareOp::Eq, "A"));
        let row = record(json!({ "title": "A" }));

        assert_eq!(
            Condition::and(unknown.clone(), falsy.clone()).evaluate(&row),
            Some(false)
        );
        assert_eq!(
            Condition::and(unknown.clone(), truthy.clone()).evaluate(&row),
            None
        );
        assert_eq!(Condition::or(unknown.clone(), truthy).evaluate(&row), Some(true));
        assert_eq!(Condition::or(unknown, falsy).evaluate(&row), None);
    }

    #[test]
    fn all_is_identity_for_and() {
        let leaf = Arc::new(Condition::IsNull("title".to_string()));
        let combined = Condition::and(Arc::new(Condition::All), leaf.clone());
        assert!(Arc::ptr_eq(&combined, &leaf));
    }

    #[test]
    fn ordering_places_numbers_before_text_and_null_first() {
        assert_eq!(compare_values(&json!(null), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(99), &json!("1")), Ordering::Less);
        assert_eq!(compare_values(&json!(1), &json!(1.0)), Ordering::Equal);
        assert_eq!(compare_values(&json!(true), &json!(1)), Ordering::Equal);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
    }

    #[test]
    fn integers_beyond_f64_precision_compare_exactly() {
        let stored = json!(9_007_199_254_740_992_i64);
        let next = json!(9_007_199_254_740_993_i64);
        assert_eq!(compare_values(&stored, &next), Ordering::Less);
        assert_eq!(compare_values(&json!(u64::MAX), &json!(i64::MAX)), Ordering::Greater);
        assert_eq!(compare_values(&json!(-1), &json!(u64::MAX)), Ordering::Less);

        let condition = Condition::compare("n", CompareOp::Eq, next);
        assert_eq!(condition.evaluate(&record(json!({ "n": stored }))), Some(false));
    }

    #[test]
    fn composites_order_as_their_json_text() {
        assert_eq!(compare_values(&json!(["zeta"]), &json!("alpha")), Ordering::Less);
        assert_eq!(compare_values(&json!({ "k": 1 }), &json!("alpha")), Ordering::Greater);
        assert_eq!(compare_values(&json!({ "k": 1 }), &json!("~")), Ordering::Less);
        assert_eq!(compare_values(&json!(42), &json!(["a"])), Ordering::Less);
    }

    #[test]
    fn validate_rejects_bad_paths_and_composite_operands() {
        assert!(Condition::compare("author.name", CompareOp::Eq, "x")
            .validate()
            .is_ok());
        assert!(Condition::compare("name; DROP", CompareOp::Eq, "x")
            .validate()
            .is_err());
        assert!(Condition::compare("tags", CompareOp::Eq, json!(["a"]))
            .validate()
            .is_err());
    }

    #[test]
    fn in_matches_any_listed_value() {
        let condition = Condition::In {
            field: "id".to_string(),
            values: vec![json!(3), json!(1)],
        };
        assert_eq!(condition.evaluate(&record(json!({}))), Some(true));
    }
}
