//! Loads or wipes the development data set.
//!
//! ```text
//! import-dev-data --import
//! import-dev-data --delete
//! ```
//!
//! Documents in `dev-data/data` reference each other through a local `_id`;
//! the importer swaps those for the ids the store assigns.

use std::{collections::HashMap, path::Path};

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use natours::{
    auth::password::hash_blocking,
    store::{Collection, DocumentStore, PgStore},
    tours::model,
    users::model::normalize_email,
};

const DATA_DIR: &str = "dev-data/data";

fn load(name: &str) -> anyhow::Result<Vec<Map<String, Value>>> {
    let path = Path::new(DATA_DIR).join(name);
    let raw = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let docs: Vec<Value> = serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(docs
        .into_iter()
        .filter_map(|d| match d {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

fn local_id(doc: &mut Map<String, Value>) -> anyhow::Result<String> {
    match doc.remove("_id") {
        Some(Value::String(id)) => Ok(id),
        _ => bail!("document without _id: {doc:?}"),
    }
}

fn resolve(ids: &HashMap<String, Uuid>, value: &Value) -> anyhow::Result<Value> {
    let key = value.as_str().context("reference must be a string")?;
    let id = ids.get(key).with_context(|| format!("unknown reference {key}"))?;
    Ok(Value::String(id.to_string()))
}

async fn import(store: &dyn DocumentStore) -> anyhow::Result<()> {
    let mut user_ids = HashMap::new();
    for mut user in load("users.json")? {
        let key = local_id(&mut user)?;
        let plain = user
            .remove("password")
            .and_then(|p| p.as_str().map(str::to_string))
            .context("user without password")?;
        user.remove("passwordConfirm");
        let hash = hash_blocking(plain).await?;
        user.insert("password".into(), Value::String(hash));
        if let Some(email) = user.get("email").and_then(Value::as_str).map(normalize_email) {
            user.insert("email".into(), Value::String(email));
        }
        user.entry("photo").or_insert(Value::String("default.jpg".into()));
        user.entry("role").or_insert(Value::String("user".into()));
        user.entry("active").or_insert(Value::Bool(true));
        let doc = store.insert(Collection::Users, user).await?;
        user_ids.insert(key, doc.id);
    }
    info!(count = user_ids.len(), "users imported");

    let mut tour_ids = HashMap::new();
    for mut tour in load("tours.json")? {
        let key = local_id(&mut tour)?;
        if let Some(Value::Array(guides)) = tour.get("guides") {
            let mapped = guides
                .iter()
                .map(|g| resolve(&user_ids, g))
                .collect::<anyhow::Result<Vec<_>>>()?;
            tour.insert("guides".into(), Value::Array(mapped));
        }
        model::prepare(&mut tour);
        let errors = model::validate(&tour);
        if !errors.is_empty() {
            bail!("tour {key} is invalid: {}", errors.join(". "));
        }
        let doc = store.insert(Collection::Tours, tour).await?;
        tour_ids.insert(key, doc.id);
    }
    info!(count = tour_ids.len(), "tours imported");

    let mut reviews = 0;
    for mut review in load("reviews.json")? {
        review.remove("_id");
        for (field, ids) in [("tour", &tour_ids), ("user", &user_ids)] {
            let value = review.get(field).cloned().unwrap_or(Value::Null);
            review.insert(field.into(), resolve(ids, &value)?);
        }
        store.insert(Collection::Reviews, review).await?;
        reviews += 1;
    }
    info!(count = reviews, "reviews imported");
    Ok(())
}

async fn delete(store: &dyn DocumentStore) -> anyhow::Result<()> {
    for collection in [Collection::Reviews, Collection::Bookings, Collection::Tours, Collection::Users] {
        let removed = store.delete_all(collection).await?;
        info!(collection = collection.table(), removed, "collection emptied");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    let mode = std::env::args().nth(1).unwrap_or_default();
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PgStore::connect(&url).await?;
    store.migrate().await?;

    match mode.as_str() {
        "--import" => import(&store).await,
        "--delete" => delete(&store).await,
        other => bail!("unknown option {other:?}, expected --import or --delete"),
    }
}
