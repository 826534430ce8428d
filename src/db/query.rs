//! Collection queries shared by every store backend.
//!
//! Filters address fields with dotted paths (`stats.current_viewers`) and are
//! evaluated against the JSON form of a document, so the in-memory store and the
//! in-process half of the Postgres store agree on semantics.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

use super::store::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A single predicate on a document field
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// The field is an array holding this element
    ArrayContains(String, Value),
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(f, _)
            | Filter::Ne(f, _)
            | Filter::In(f, _)
            | Filter::Gt(f, _)
            | Filter::Gte(f, _)
            | Filter::Lt(f, _)
            | Filter::Lte(f, _)
            | Filter::ArrayContains(f, _) => f,
        }
    }

    /// Evaluates the predicate; a missing field behaves like `null`
    pub fn matches(&self, doc: &Value) -> bool {
        let actual = lookup(doc, self.field());
        match self {
            Filter::Eq(_, expected) => match actual {
                Some(a) => values_equal(a, expected),
                None => expected.is_null(),
            },
            Filter::Ne(_, expected) => match actual {
                Some(a) => !values_equal(a, expected),
                None => !expected.is_null(),
            },
            Filter::In(_, options) => {
                actual.is_some_and(|a| options.iter().any(|o| values_equal(a, o)))
            }
            Filter::Gt(_, bound) => ordering(actual, bound) == Some(Ordering::Greater),
            Filter::Gte(_, bound) => matches!(
                ordering(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt(_, bound) => ordering(actual, bound) == Some(Ordering::Less),
            Filter::Lte(_, bound) => matches!(
                ordering(actual, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::ArrayContains(_, element) => actual
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|i| values_equal(i, element))),
        }
    }
}

fn ordering(actual: Option<&Value>, bound: &Value) -> Option<Ordering> {
    actual.and_then(|a| compare_values(a, bound))
}

/// Filters, ordering and paging applied to one collection
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, field: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Eq(field.to_string(), to_value(value)))
    }

    pub fn ne(self, field: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Ne(field.to_string(), to_value(value)))
    }

    pub fn is_in<V: Serialize>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(to_value).collect();
        self.filter(Filter::In(field.to_string(), values))
    }

    pub fn gt(self, field: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Gt(field.to_string(), to_value(value)))
    }

    pub fn gte(self, field: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Gte(field.to_string(), to_value(value)))
    }

    pub fn lt(self, field: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Lt(field.to_string(), to_value(value)))
    }

    pub fn lte(self, field: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Lte(field.to_string(), to_value(value)))
    }

    pub fn contains(self, field: &str, value: impl Serialize) -> Self {
        self.filter(Filter::ArrayContains(field.to_string(), to_value(value)))
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push((field.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filters, sorts (ties broken by id), then pages a candidate set
    pub fn apply(&self, candidates: Vec<Snapshot>) -> Vec<Snapshot> {
        let mut selected: Vec<Snapshot> = candidates
            .into_iter()
            .filter(|s| self.matches(&s.data))
            .collect();

        selected.sort_by(|a, b| {
            for (field, direction) in &self.order_by {
                let ord = sort_cmp(lookup(&a.data, field), lookup(&b.data, field));
                let ord = match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });

        let iter = selected.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Resolves a dotted field path inside a JSON document
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Timestamps are stored as RFC 3339 strings with variable precision, so they
/// are compared as instants rather than lexically
fn parse_instant(s: &str) -> Option<DateTime<FixedOffset>> {
    let bytes = s.as_bytes();
    if bytes.len() < 20 || bytes[4] != b'-' || bytes[10] != b'T' {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok()
}

/// Orders two values of the same kind; `None` for mismatched kinds
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_instant(x), parse_instant(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order used for sorting: missing/null first, then by kind, then by value
fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
