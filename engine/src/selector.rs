//! Selectors and find options for live queries.
//!
//! A deliberately small query language: per-field equality plus a handful of
//! comparison operators, all clauses AND-ed together.

use crate::{document::json_type, error::Result, Document, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

impl Condition {
    fn parse(op: &str, operand: &Value) -> Result<Self> {
        let list = || match operand {
            Value::Array(items) => Ok(items.clone()),
            other => Err(Error::InvalidSelector(format!(
                "{op} expects an array, got {}",
                json_type(other)
            ))),
        };

        Ok(match op {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(list()?),
            "$nin" => Condition::Nin(list()?),
            "$exists" => match operand {
                Value::Bool(flag) => Condition::Exists(*flag),
                other => {
                    return Err(Error::InvalidSelector(format!(
                        "$exists expects a boolean, got {}",
                        json_type(other)
                    )))
                }
            },
            other => return Err(Error::InvalidSelector(format!("unknown operator {other}"))),
        })
    }

    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => value == Some(expected),
            Condition::Ne(expected) => value != Some(expected),
            Condition::Gt(bound) => ordered(value, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => ordered(value, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => ordered(value, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => ordered(value, bound, |o| o != Ordering::Greater),
            Condition::In(options) => value.is_some_and(|v| options.contains(v)),
            Condition::Nin(options) => !value.is_some_and(|v| options.contains(v)),
            Condition::Exists(flag) => value.is_some() == *flag,
        }
    }
}

fn ordered(value: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    value
        .and_then(|v| compare_values(v, bound))
        .is_some_and(accept)
}

/// Compare two JSON values of the same kind. Mixed kinds are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// A set of field conditions, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    clauses: Vec<(String, Condition)>,
}

impl Selector {
    /// Selector matching every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Selector requiring `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, Condition::Eq(value.into()))
    }

    /// Add a condition on `field`.
    pub fn and(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push((field.into(), condition));
        self
    }

    /// Parse a JSON selector such as `{"done": false, "age": {"$gte": 18}}`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::all()),
            Value::Object(map) => map,
            other => {
                return Err(Error::InvalidSelector(format!(
                    "expected object, got {}",
                    json_type(other)
                )))
            }
        };

        let mut selector = Self::all();
        for (field, spec) in map {
            match spec {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    for (op, operand) in ops {
                        selector = selector.and(field.clone(), Condition::parse(op, operand)?);
                    }
                }
                literal => selector = selector.and(field.clone(), Condition::Eq(literal.clone())),
            }
        }
        Ok(selector)
    }

    /// Whether this selector matches everything.
    pub fn is_all(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Test a document against every clause.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.matches(doc.lookup(field).as_ref()))
    }
}

/// Sort direction for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Ordering and paging for a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    /// Sort keys in priority order; ties fall back to id order
    #[serde(default)]
    pub sort: Vec<(String, SortOrder)>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Order two documents by the sort keys, then by id.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, order) in &self.sort {
            let ord = match (a.lookup(field), b.lookup(field)) {
                (Some(x), Some(y)) => compare_values(&x, &y).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };
            let ord = match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }

    /// Sort and page an already filtered result set.
    pub fn apply<'a>(&self, mut docs: Vec<&'a Document>) -> Vec<&'a Document> {
        docs.sort_by(|a, b| self.compare(a, b));
        docs.into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}
