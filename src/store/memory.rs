//! In-memory document store for development and testing

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{describe_key, Collection, Document, DocumentStore, StoreError, StoreResult};
use crate::query::{compare_values, lookup, Direction, Predicate, QueryDescriptor, SortKey};

#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<Collection, HashMap<Uuid, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_unique(
    collection: Collection,
    docs: &HashMap<Uuid, Document>,
    skip: Option<Uuid>,
    body: &Map<String, Value>,
) -> StoreResult<()> {
    for key in collection.unique_keys() {
        if key.iter().any(|f| body.get(*f).map_or(true, Value::is_null)) {
            continue;
        }
        let clash = docs.values().any(|d| {
            Some(d.id) != skip && key.iter().all(|f| d.body.get(*f) == body.get(*f))
        });
        if clash {
            return Err(StoreError::Duplicate {
                field: key.join(", "),
                value: describe_key(body, key),
            });
        }
    }
    Ok(())
}

fn matches_all(doc: &Document, filters: &[Predicate]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let flat = doc.to_json();
    filters.iter().all(|p| p.matches(&flat))
}

/// Flattened document with `createdAt` as microseconds so it sorts numerically.
fn sort_view(doc: &Document) -> Value {
    let mut flat = doc.to_json();
    let micros = (doc.created_at.unix_timestamp_nanos() / 1_000) as i64;
    flat["createdAt"] = Value::from(micros);
    flat
}

/// Cross-kind order of `jsonb`: null < string < number < boolean < array < object.
fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Missing fields rank below every value, like SQL `NULLS FIRST` ascending
/// and `NULLS LAST` descending.
fn compare_docs(a: &Value, b: &Value, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = match (lookup(a, &key.field), lookup(b, &key.field)) {
            (Some(x), Some(y)) => compare_values(x, y)
                .unwrap_or_else(|| kind_rank(x).cmp(&kind_rank(y))),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        let ord = match key.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> StoreResult<Document> {
        let mut docs = self.collections.entry(collection).or_default();
        check_unique(collection, &docs, None, &body)?;
        let doc = Document {
            id: Uuid::new_v4(),
            version: 0,
            created_at: OffsetDateTime::now_utc(),
            body,
        };
        docs.insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn get(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Document>> {
        Ok(self
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(&id).cloned()))
    }

    async fn find(&self, collection: Collection, query: &QueryDescriptor) -> StoreResult<Vec<Document>> {
        let Some(docs) = self.collections.get(&collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(Value, Document)> = docs
            .values()
            .filter(|d| matches_all(d, &query.filters))
            .map(|d| (sort_view(d), d.clone()))
            .collect();
        drop(docs);

        hits.sort_by(|(a, da), (b, db)| {
            compare_docs(a, b, &query.sort).then_with(|| da.id.cmp(&db.id))
        });

        let iter = hits.into_iter().map(|(_, d)| d);
        Ok(match query.page {
            Some(page) => iter
                .skip(page.offset() as usize)
                .take(page.limit as usize)
                .collect(),
            None => iter.collect(),
        })
    }

    async fn count(&self, collection: Collection, filters: &[Predicate]) -> StoreResult<u64> {
        Ok(self
            .collections
            .get(&collection)
            .map(|docs| docs.values().filter(|d| matches_all(d, filters)).count() as u64)
            .unwrap_or(0))
    }

    async fn replace(
        &self,
        collection: Collection,
        id: Uuid,
        expected_version: i64,
        body: Map<String, Value>,
    ) -> StoreResult<Option<Document>> {
        let mut docs = self.collections.entry(collection).or_default();
        check_unique(collection, &docs, Some(id), &body)?;
        let Some(doc) = docs.get_mut(&id) else {
            return Ok(None);
        };
        if doc.version != expected_version {
            return Err(StoreError::VersionConflict(id));
        }
        doc.body = body;
        doc.version += 1;
        Ok(Some(doc.clone()))
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<bool> {
        Ok(self
            .collections
            .get_mut(&collection)
            .map(|mut docs| docs.remove(&id).is_some())
            .unwrap_or(false))
    }

    async fn delete_all(&self, collection: Collection) -> StoreResult<u64> {
        Ok(self
            .collections
            .remove(&collection)
            .map(|(_, docs)| docs.len() as u64)
            .unwrap_or(0))
    }
}
