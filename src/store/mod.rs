//! Document persistence.
//!
//! Every collection holds JSON objects plus store-managed metadata (`id`,
//! `createdAt` and the `__v` version counter). Writes are atomic per
//! document; nothing here coordinates across documents.

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::query::{Predicate, QueryDescriptor};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const VERSION_FIELD: &str = "__v";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Tours,
    Users,
    Reviews,
    Bookings,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Tours,
        Collection::Users,
        Collection::Reviews,
        Collection::Bookings,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Collection::Tours => "tours",
            Collection::Users => "users",
            Collection::Reviews => "reviews",
            Collection::Bookings => "bookings",
        }
    }

    /// Field groups that must be unique across the collection.
    pub fn unique_keys(self) -> &'static [&'static [&'static str]] {
        match self {
            Collection::Tours => &[&["name"]],
            Collection::Users => &[&["email"]],
            Collection::Reviews => &[&["tour", "user"]],
            Collection::Bookings => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub body: Map<String, Value>,
}

impl Document {
    /// Flattens the document for API output: body fields plus `id`,
    /// `createdAt` and `__v`.
    pub fn to_json(&self) -> Value {
        let mut out = self.body.clone();
        out.insert("id".into(), Value::String(self.id.to_string()));
        if let Ok(ts) = self.created_at.format(&Rfc3339) {
            out.insert("createdAt".into(), Value::String(ts));
        }
        out.insert(VERSION_FIELD.into(), Value::from(self.version));
        Value::Object(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate value for {field}: {value}")]
    Duplicate { field: String, value: String },
    #[error("document {0} was modified concurrently")]
    VersionConflict(Uuid),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> StoreResult<Document>;
    async fn get(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Document>>;
    async fn find(&self, collection: Collection, query: &QueryDescriptor) -> StoreResult<Vec<Document>>;
    async fn count(&self, collection: Collection, filters: &[Predicate]) -> StoreResult<u64>;
    /// Replaces the body when the stored version still equals `expected_version`.
    /// `Ok(None)` means the document does not exist.
    async fn replace(
        &self,
        collection: Collection,
        id: Uuid,
        expected_version: i64,
        body: Map<String, Value>,
    ) -> StoreResult<Option<Document>>;
    /// Returns whether a document was removed.
    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<bool>;
    async fn delete_all(&self, collection: Collection) -> StoreResult<u64>;
}

/// Renders the value a unique key was violated with, for error messages.
pub(crate) fn describe_key(body: &Map<String, Value>, fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| match body.get(*f) {
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => "null".into(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
