//! Generic resource operations shared by every collection.
//!
//! A [`Resource`] names its collection and supplies the schema and lifecycle
//! hooks; the functions here implement create/read/update/delete and listing
//! on top of the document store and the query builder.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    query::{ApiFeatures, Predicate, QueryDescriptor, QueryParams},
    state::AppState,
    store::{Collection, Document, VERSION_FIELD},
};

pub mod handlers;

/// Fields maintained by the store; never taken from request bodies.
const MANAGED_FIELDS: &[&str] = &["id", "_id", "createdAt"];

#[async_trait]
pub trait Resource: Send + Sync + 'static {
    const COLLECTION: Collection;
    /// Fields allowed to repeat in a query string (membership filter).
    const MULTI_VALUE_FIELDS: &'static [&'static str] = &[];
    /// Fields removed from every response.
    const HIDDEN_FIELDS: &'static [&'static str] = &[];

    /// Schema validation of a complete document body.
    fn validate(body: &Map<String, Value>) -> Vec<String>;

    /// Pre-save hook: defaults and derived fields.
    fn prepare(_body: &mut Map<String, Value>) {}

    /// Pre-find hook: predicates every read is restricted to.
    fn base_filters() -> Vec<Predicate> {
        Vec::new()
    }

    /// Pre-update hook on the incoming patch.
    fn sanitize_patch(_patch: &mut Map<String, Value>) {}

    fn present(doc: &Document) -> Value {
        let mut value = doc.to_json();
        if let Value::Object(map) = &mut value {
            for field in Self::HIDDEN_FIELDS {
                map.remove(*field);
            }
        }
        value
    }

    /// Eager-loads related documents into a single-document response.
    async fn populate(_state: &AppState, _doc: &mut Value) -> AppResult<()> {
        Ok(())
    }

    /// Replaces references with embedded documents in any response.
    async fn expand(_state: &AppState, _docs: &mut [Value]) -> AppResult<()> {
        Ok(())
    }
}

pub fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidId {
        field: "id".into(),
        value: raw.to_string(),
    })
}

fn visible<R: Resource>(doc: &Document) -> bool {
    let filters = R::base_filters();
    if filters.is_empty() {
        return true;
    }
    let flat = doc.to_json();
    filters.iter().all(|p| p.matches(&flat))
}

fn validated<R: Resource>(body: &Map<String, Value>) -> AppResult<()> {
    let errors = R::validate(body);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::InvalidInput(errors))
    }
}

/// Loads a document the resource's read hooks allow; anything else is a 404.
pub async fn find_by_id<R: Resource>(state: &AppState, id: Uuid) -> AppResult<Document> {
    state
        .store
        .get(R::COLLECTION, id)
        .await?
        .filter(visible::<R>)
        .ok_or_else(AppError::not_found)
}

/// Every visible document matching `filters`, newest first, unpaged.
pub async fn find_docs<R: Resource>(state: &AppState, filters: Vec<Predicate>) -> AppResult<Vec<Document>> {
    let query = QueryDescriptor::matching(filters).with_filters(R::base_filters());
    Ok(state.store.find(R::COLLECTION, &query).await?)
}

#[instrument(skip(state, body), fields(collection = R::COLLECTION.table()))]
pub async fn create_one<R: Resource>(state: &AppState, mut body: Map<String, Value>) -> AppResult<Value> {
    for field in MANAGED_FIELDS.iter().chain([&VERSION_FIELD]) {
        body.remove(*field);
    }
    R::prepare(&mut body);
    validated::<R>(&body)?;
    let doc = state.store.insert(R::COLLECTION, body).await?;
    info!(id = %doc.id, "document created");
    let mut value = R::present(&doc);
    R::expand(state, std::slice::from_mut(&mut value)).await?;
    Ok(value)
}

#[instrument(skip(state), fields(collection = R::COLLECTION.table()))]
pub async fn get_one<R: Resource>(state: &AppState, raw_id: &str) -> AppResult<Value> {
    let doc = find_by_id::<R>(state, parse_id(raw_id)?).await?;
    let mut value = R::present(&doc);
    R::populate(state, &mut value).await?;
    R::expand(state, std::slice::from_mut(&mut value)).await?;
    Ok(value)
}

/// Lists documents through the query builder, with extra fixed filters
/// (e.g. from a nested route) added to the resource's own.
#[instrument(skip(state, params, extra), fields(collection = R::COLLECTION.table()))]
pub async fn get_all<R: Resource>(
    state: &AppState,
    params: &QueryParams,
    extra: Vec<Predicate>,
) -> AppResult<Vec<Value>> {
    let query = ApiFeatures::build(params, R::MULTI_VALUE_FIELDS)?
        .with_filters(R::base_filters())
        .with_filters(extra);
    if let Some(page) = query.page.filter(|p| p.explicit) {
        let total = state.store.count(R::COLLECTION, &query.filters).await?;
        page.ensure_available(total)?;
    }
    let docs = state.store.find(R::COLLECTION, &query).await?;
    debug!(results = docs.len(), "documents found");
    let mut values: Vec<Value> = docs
        .iter()
        .map(|d| query.projection.apply(R::present(d)))
        .collect();
    R::expand(state, &mut values).await?;
    Ok(values)
}

/// Applies the update hooks to `patch` and merges it into `doc`. Returns the
/// validated body and the version the write must match. A `__v` in the patch
/// pins that version.
fn merge_patch<R: Resource>(doc: &Document, mut patch: Map<String, Value>) -> AppResult<(Map<String, Value>, i64)> {
    let pinned = patch.remove(VERSION_FIELD).and_then(|v| v.as_i64());
    for field in MANAGED_FIELDS {
        patch.remove(*field);
    }
    R::sanitize_patch(&mut patch);

    let mut body = doc.body.clone();
    body.extend(patch);
    R::prepare(&mut body);
    validated::<R>(&body)?;
    Ok((body, pinned.unwrap_or(doc.version)))
}

/// Runs every check `update_one` would, without writing. Lets callers with
/// side effects (file uploads) reject a bad patch before performing them.
pub async fn check_update<R: Resource>(
    state: &AppState,
    raw_id: &str,
    patch: &Map<String, Value>,
) -> AppResult<Document> {
    let doc = find_by_id::<R>(state, parse_id(raw_id)?).await?;
    merge_patch::<R>(&doc, patch.clone())?;
    Ok(doc)
}

/// Merges `patch` into the stored document, re-validates and writes it back
/// if nobody else did in between.
#[instrument(skip(state, patch), fields(collection = R::COLLECTION.table()))]
pub async fn update_one<R: Resource>(
    state: &AppState,
    raw_id: &str,
    patch: Map<String, Value>,
) -> AppResult<Value> {
    let id = parse_id(raw_id)?;
    let doc = find_by_id::<R>(state, id).await?;
    let (body, expected_version) = merge_patch::<R>(&doc, patch)?;

    let updated = state
        .store
        .replace(R::COLLECTION, id, expected_version, body)
        .await?
        .ok_or_else(AppError::not_found)?;
    info!(%id, version = updated.version, "document updated");
    let mut value = R::present(&updated);
    R::expand(state, std::slice::from_mut(&mut value)).await?;
    Ok(value)
}

/// Only documents the resource's read hooks allow can be deleted.
#[instrument(skip(state), fields(collection = R::COLLECTION.table()))]
pub async fn delete_one<R: Resource>(state: &AppState, raw_id: &str) -> AppResult<Uuid> {
    let id = find_by_id::<R>(state, parse_id(raw_id)?).await?.id;
    if !state.store.delete(R::COLLECTION, id).await? {
        return Err(AppError::not_found());
    }
    info!(%id, "document deleted");
    Ok(id)
}

/// Helpers for reading loosely typed document bodies in validators.
pub mod fields {
    use serde_json::{Map, Value};

    pub fn str_of<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
        body.get(key).and_then(Value::as_str)
    }

    pub fn f64_of(body: &Map<String, Value>, key: &str) -> Option<f64> {
        body.get(key).and_then(Value::as_f64)
    }

    pub fn is_present(body: &Map<String, Value>, key: &str) -> bool {
        match body.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Number within an inclusive range when present.
    pub fn check_range(
        body: &Map<String, Value>,
        key: &str,
        min: f64,
        max: f64,
        message: &str,
        errors: &mut Vec<String>,
    ) {
        match body.get(key) {
            None | Some(Value::Null) => {}
            Some(v) => match v.as_f64() {
                Some(n) if n >= min && n <= max => {}
                _ => errors.push(message.to_string()),
            },
        }
    }
}
