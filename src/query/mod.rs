//! Store-agnostic query descriptors built from request parameters.

use std::cmp::Ordering;

use serde_json::{Map, Value};

mod features;

pub use features::{ApiFeatures, QueryParams};
pub(crate) use features::coerce;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 100;
pub const DEFAULT_SORT: &str = "-createdAt";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error("Invalid field name: {0}")]
    InvalidField(String),
    #[error("Unsupported filter operator: {0}")]
    UnsupportedOperator(String),
    #[error("This page does not exist")]
    PageUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Value is an array; matches any element.
    In,
}

impl Operator {
    fn from_bracket(op: &str) -> Option<Self> {
        match op {
            "gte" => Some(Operator::Gte),
            "gt" => Some(Operator::Gt),
            "lte" => Some(Operator::Lte),
            "lt" => Some(Operator::Lt),
            _ => None,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "IS DISTINCT FROM",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Ne, value)
    }

    /// Evaluates the predicate against a flattened document.
    pub fn matches(&self, doc: &Value) -> bool {
        let actual = lookup(doc, &self.field);
        match self.op {
            Operator::Eq => actual.map_or(false, |a| json_eq(a, &self.value)),
            Operator::Ne => actual.map_or(true, |a| !json_eq(a, &self.value)),
            Operator::In => match (&self.value, actual) {
                (Value::Array(options), Some(a)) => options.iter().any(|o| json_eq(a, o)),
                _ => false,
            },
            op => {
                let Some(ord) = actual.and_then(|a| compare_values(a, &self.value)) else {
                    return false;
                };
                match op {
                    Operator::Gt => ord == Ordering::Greater,
                    Operator::Gte => ord != Ordering::Less,
                    Operator::Lt => ord == Ordering::Less,
                    Operator::Lte => ord != Ordering::Greater,
                    _ => unreachable!("handled above"),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => SortKey {
                field: field.to_string(),
                direction: Direction::Desc,
            },
            None => SortKey {
                field: raw.trim_start_matches('+').to_string(),
                direction: Direction::Asc,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Projection {
    /// Everything except the version bookkeeping field.
    #[default]
    Default,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    pub fn apply(&self, doc: Value) -> Value {
        let Value::Object(mut map) = doc else {
            return doc;
        };
        match self {
            Projection::Default => {
                map.remove(crate::store::VERSION_FIELD);
            }
            Projection::Exclude(fields) => {
                for f in fields {
                    map.remove(f);
                }
            }
            Projection::Include(fields) => {
                let mut kept = Map::new();
                if let Some(id) = map.remove("id") {
                    kept.insert("id".into(), id);
                }
                for f in fields {
                    if let Some(v) = map.remove(f) {
                        kept.insert(f.clone(), v);
                    }
                }
                map = kept;
            }
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub limit: u32,
    /// Whether the request named a page; only then is availability checked.
    pub explicit: bool,
}

impl Page {
    pub fn offset(&self) -> u64 {
        u64::from(self.number.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn ensure_available(&self, total: u64) -> Result<(), QueryError> {
        let offset = self.offset();
        if self.explicit && offset > 0 && offset >= total {
            return Err(QueryError::PageUnavailable);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryDescriptor {
    pub filters: Vec<Predicate>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    /// `None` fetches every match.
    pub page: Option<Page>,
}

impl QueryDescriptor {
    /// Every document matching `filters`, newest first.
    pub fn matching(filters: Vec<Predicate>) -> Self {
        Self {
            filters,
            sort: vec![SortKey::parse(DEFAULT_SORT)],
            projection: Projection::Default,
            page: None,
        }
    }

    pub fn with_filters(mut self, extra: impl IntoIterator<Item = Predicate>) -> Self {
        self.filters.extend(extra);
        self
    }
}

/// Resolves a dotted path inside a JSON object.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |cur, part| cur.get(part))
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Orders two JSON scalars of the same kind; mixed kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
