use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{
    Page, Predicate, Projection, QueryDescriptor, QueryError, SortKey, Operator, DEFAULT_LIMIT,
    DEFAULT_PAGE, DEFAULT_SORT,
};

const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

lazy_static! {
    static ref FIELD_RE: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
    static ref BRACKET_RE: Regex = Regex::new(r"^([^\[\]]+)\[([A-Za-z]+)\]$").unwrap();
}

/// Raw query string pairs in request order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(pub Vec<(String, String)>);

impl QueryParams {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every occurrence of `key` with a single value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.0.retain(|(k, _)| k != key);
        self.0.push((key.to_string(), value.to_string()));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Chained request-to-query translation; the steps are meant to run as
/// `filter → sort → limit_fields → paginate`.
pub struct ApiFeatures<'a> {
    params: &'a QueryParams,
    multi_value_fields: &'a [&'a str],
    descriptor: QueryDescriptor,
}

impl<'a> ApiFeatures<'a> {
    pub fn new(params: &'a QueryParams) -> Self {
        Self {
            params,
            multi_value_fields: &[],
            descriptor: QueryDescriptor::default(),
        }
    }

    /// Fields whose repeated equality parameters become a membership test.
    pub fn multi_value(mut self, fields: &'a [&'a str]) -> Self {
        self.multi_value_fields = fields;
        self
    }

    pub fn filter(mut self) -> Result<Self, QueryError> {
        let mut filters: Vec<Predicate> = Vec::new();
        for (key, raw) in &self.params.0 {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let predicate = match BRACKET_RE.captures(key) {
                Some(caps) => {
                    let field = validate_field(&caps[1])?;
                    let op = Operator::from_bracket(&caps[2].to_ascii_lowercase())
                        .ok_or_else(|| QueryError::UnsupportedOperator(caps[2].to_string()))?;
                    Predicate::new(field, op, coerce(raw))
                }
                None => Predicate::eq(validate_field(key)?, coerce(raw)),
            };
            self.push_filter(&mut filters, predicate);
        }
        self.descriptor.filters = filters;
        Ok(self)
    }

    fn push_filter(&self, filters: &mut Vec<Predicate>, p: Predicate) {
        let existing = filters
            .iter()
            .position(|f| f.field == p.field && matches!(f.op, Operator::Eq | Operator::In));
        match (p.op, existing) {
            (Operator::Eq, Some(i)) if self.multi_value_fields.contains(&p.field.as_str()) => {
                let prev = &mut filters[i];
                match (&mut prev.value, prev.op) {
                    (Value::Array(values), Operator::In) => values.push(p.value),
                    (current, _) => {
                        let first = current.take();
                        prev.value = Value::Array(vec![first, p.value]);
                        prev.op = Operator::In;
                    }
                }
            }
            // Parameter pollution: the last value wins.
            (Operator::Eq, Some(i)) => filters[i] = p,
            _ => {
                filters.retain(|f| !(f.field == p.field && f.op == p.op));
                filters.push(p);
            }
        }
    }

    pub fn sort(mut self) -> Result<Self, QueryError> {
        let raw = self.params.get("sort").unwrap_or(DEFAULT_SORT);
        let mut keys = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let key = SortKey::parse(part);
            validate_field(&key.field)?;
            keys.push(key);
        }
        if keys.is_empty() {
            keys.push(SortKey::parse(DEFAULT_SORT));
        }
        self.descriptor.sort = keys;
        Ok(self)
    }

    pub fn limit_fields(mut self) -> Result<Self, QueryError> {
        let Some(raw) = self.params.get("fields") else {
            self.descriptor.projection = Projection::Default;
            return Ok(self);
        };
        let parts: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            self.descriptor.projection = Projection::Default;
            return Ok(self);
        }
        let excluding = parts.iter().all(|p| p.starts_with('-'));
        let mut fields = Vec::with_capacity(parts.len());
        for part in parts {
            let name = if excluding { &part[1..] } else { part };
            fields.push(validate_field(name)?);
        }
        self.descriptor.projection = if excluding {
            Projection::Exclude(fields)
        } else {
            Projection::Include(fields)
        };
        Ok(self)
    }

    pub fn paginate(mut self) -> Self {
        let page_param = self.params.get("page");
        let number = page_param
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE);
        let limit = self
            .params
            .get("limit")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LIMIT);
        self.descriptor.page = Some(Page {
            number,
            limit,
            explicit: page_param.is_some(),
        });
        self
    }

    pub fn into_descriptor(self) -> QueryDescriptor {
        self.descriptor
    }

    /// All four steps in order.
    pub fn build(params: &'a QueryParams, multi_value_fields: &'a [&'a str]) -> Result<QueryDescriptor, QueryError> {
        Ok(ApiFeatures::new(params)
            .multi_value(multi_value_fields)
            .filter()?
            .sort()?
            .limit_fields()?
            .paginate()
            .into_descriptor())
    }
}

fn validate_field(name: &str) -> Result<String, QueryError> {
    if FIELD_RE.is_match(name) {
        Ok(name.to_string())
    } else {
        Err(QueryError::InvalidField(name.to_string()))
    }
}

/// Query strings carry no types: numbers and booleans are recognised,
/// everything else stays a string.
pub(crate) fn coerce(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Direction;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().copied().collect()
    }

    #[test]
    fn builds_full_descriptor() {
        let p = params(&[
            ("duration[gte]", "5"),
            ("difficulty", "easy"),
            ("sort", "-price,ratingsAverage"),
            ("fields", "name,price"),
            ("page", "2"),
            ("limit", "10"),
        ]);
        let q = ApiFeatures::build(&p, &[]).unwrap();
        assert_eq!(
            q.filters,
            vec![
                Predicate::new("duration", Operator::Gte, 5),
                Predicate::eq("difficulty", "easy"),
            ]
        );
        assert_eq!(q.sort[0], SortKey { field: "price".into(), direction: Direction::Desc });
        assert_eq!(q.sort[1].direction, Direction::Asc);
        assert_eq!(q.projection, Projection::Include(vec!["name".into(), "price".into()]));
        let page = q.page.unwrap();
        assert_eq!((page.number, page.limit, page.explicit), (2, 10, true));
        assert_eq!(page.offset(), 10);
    }

    #[test]
    fn defaults_apply_when_absent_or_garbage() {
        let p = params(&[("page", "abc"), ("limit", "-3")]);
        let q = ApiFeatures::build(&p, &[]).unwrap();
        assert!(q.filters.is_empty());
        assert_eq!(q.sort, vec![SortKey { field: "createdAt".into(), direction: Direction::Desc }]);
        assert_eq!(q.projection, Projection::Default);
        let page = q.page.unwrap();
        assert_eq!((page.number, page.limit), (1, 100));
        assert!(page.explicit);
    }

    #[test]
    fn reserved_keys_are_not_filters() {
        let p = params(&[("sort", "price"), ("limit", "1"), ("fields", "name"), ("page", "1")]);
        let q = ApiFeatures::build(&p, &[]).unwrap();
        assert!(q.filters.is_empty());
    }

    #[test]
    fn rejects_unknown_operator_and_bad_fields() {
        let p = params(&[("price[regex]", "1")]);
        assert_eq!(
            ApiFeatures::build(&p, &[]).unwrap_err(),
            QueryError::UnsupportedOperator("regex".into())
        );
        let p = params(&[("$where", "1")]);
        assert!(matches!(ApiFeatures::build(&p, &[]), Err(QueryError::InvalidField(_))));
        let p = params(&[("sort", "price;drop")]);
        assert!(matches!(ApiFeatures::build(&p, &[]), Err(QueryError::InvalidField(_))));
    }

    #[test]
    fn repeated_whitelisted_values_become_membership() {
        let p = params(&[("duration", "5"), ("duration", "9"), ("name", "a"), ("name", "b")]);
        let q = ApiFeatures::build(&p, &["duration"]).unwrap();
        assert_eq!(q.filters[0], Predicate::new("duration", Operator::In, json!([5, 9])));
        assert_eq!(q.filters[1], Predicate::eq("name", "b"));
    }

    #[test]
    fn exclusion_projection() {
        let p = params(&[("fields", "-description,-images")]);
        let q = ApiFeatures::build(&p, &[]).unwrap();
        assert_eq!(
            q.projection,
            Projection::Exclude(vec!["description".into(), "images".into()])
        );
    }

    #[test]
    fn coerces_scalars() {
        assert_eq!(coerce("5"), json!(5));
        assert_eq!(coerce("4.5"), json!(4.5));
        assert_eq!(coerce("true"), json!(true));
        assert_eq!(coerce("easy"), json!("easy"));
        assert_eq!(coerce("NaN"), json!("NaN"));
    }

    #[test]
    fn set_overrides_existing_values() {
        let mut p = params(&[("limit", "50"), ("limit", "60")]);
        p.set("limit", "5");
        assert_eq!(p.get("limit"), Some("5"));
        assert_eq!(p.0.len(), 1);
    }
}
