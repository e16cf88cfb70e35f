//! PostgreSQL-backed document store: one JSONB table per collection.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{describe_key, Collection, Document, DocumentStore, StoreError, StoreResult};
use crate::query::{Direction, Operator, Predicate, QueryDescriptor, SortKey};

const COLUMNS: &str = "id, version, doc, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: Uuid,
    version: i64,
    doc: Json<Value>,
    created_at: OffsetDateTime,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        let body = match row.doc.0 {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Document {
            id: row.id,
            version: row.version,
            created_at: row.created_at,
            body,
        }
    }
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }

    fn map_write_error(collection: Collection, body: &Map<String, Value>, err: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                let keys = collection.unique_keys();
                let key = keys
                    .iter()
                    .find(|k| db.constraint() == Some(constraint_name(collection, k).as_str()))
                    .or_else(|| keys.first());
                if let Some(key) = key {
                    return StoreError::Duplicate {
                        field: key.join(", "),
                        value: describe_key(body, key),
                    };
                }
            }
        }
        StoreError::Db(err)
    }
}

fn constraint_name(collection: Collection, key: &[&str]) -> String {
    format!("{}_{}_key", collection.table(), key.join("_"))
}

fn push_field(qb: &mut QueryBuilder<'_, Postgres>, field: &str) {
    match field {
        "id" => {
            qb.push("to_jsonb(id::text)");
        }
        "createdAt" => {
            qb.push("to_jsonb(created_at)");
        }
        "__v" => {
            qb.push("to_jsonb(version)");
        }
        path => {
            let parts: Vec<String> = path.split('.').map(str::to_string).collect();
            qb.push("(doc #> ");
            qb.push_bind(parts);
            qb.push(")");
        }
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Predicate]) {
    qb.push(" WHERE TRUE");
    for p in filters {
        qb.push(" AND ");
        if p.op == Operator::In {
            let values = match &p.value {
                Value::Array(values) => values.clone(),
                other => vec![other.clone()],
            };
            if values.is_empty() {
                qb.push("FALSE");
                continue;
            }
            push_field(qb, &p.field);
            qb.push(" IN (");
            let mut list = qb.separated(", ");
            for v in values {
                list.push_bind(Json(v));
            }
            list.push_unseparated(")");
            continue;
        }
        let ranged = matches!(p.op, Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte);
        if ranged {
            qb.push("(");
        }
        push_field(qb, &p.field);
        qb.push(" ");
        qb.push(p.op.sql());
        qb.push(" ");
        qb.push_bind(Json(p.value.clone()));
        // jsonb orders across kinds (every number above every string); a
        // range only holds between values of the same kind.
        if ranged {
            qb.push(" AND jsonb_typeof(");
            push_field(qb, &p.field);
            qb.push(") = jsonb_typeof(");
            qb.push_bind(Json(p.value.clone()));
            qb.push("))");
        }
    }
}

fn push_sort(qb: &mut QueryBuilder<'_, Postgres>, keys: &[SortKey]) {
    qb.push(" ORDER BY ");
    for key in keys {
        if key.field == "createdAt" {
            qb.push("created_at");
        } else {
            push_field(qb, &key.field);
        }
        qb.push(match key.direction {
            Direction::Asc => " ASC NULLS FIRST, ",
            Direction::Desc => " DESC NULLS LAST, ",
        });
    }
    qb.push("id");
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> StoreResult<Document> {
        let sql = format!(
            "INSERT INTO {} (id, doc) VALUES ($1, $2) RETURNING {}",
            collection.table(),
            COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(Json(Value::Object(body.clone())))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::map_write_error(collection, &body, e))?;
        Ok(row.into())
    }

    async fn get(&self, collection: Collection, id: Uuid) -> StoreResult<Option<Document>> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", COLUMNS, collection.table());
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn find(&self, collection: Collection, query: &QueryDescriptor) -> StoreResult<Vec<Document>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {}",
            COLUMNS,
            collection.table()
        ));
        push_filters(&mut qb, &query.filters);
        push_sort(&mut qb, &query.sort);
        if let Some(page) = query.page {
            qb.push(" LIMIT ");
            qb.push_bind(i64::from(page.limit));
            qb.push(" OFFSET ");
            qb.push_bind(page.offset() as i64);
        }
        debug!(sql = %qb.sql(), "find");
        let rows = qb
            .build_query_as::<DocumentRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count(&self, collection: Collection, filters: &[Predicate]) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {}", collection.table()));
        push_filters(&mut qb, filters);
        let (n,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn replace(
        &self,
        collection: Collection,
        id: Uuid,
        expected_version: i64,
        body: Map<String, Value>,
    ) -> StoreResult<Option<Document>> {
        let sql = format!(
            "UPDATE {} SET doc = $1, version = version + 1 WHERE id = $2 AND version = $3 RETURNING {}",
            collection.table(),
            COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(Json(Value::Object(body.clone())))
            .bind(id)
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Self::map_write_error(collection, &body, e))?;
        match row {
            Some(row) => Ok(Some(row.into())),
            None => match self.get(collection, id).await? {
                Some(_) => Err(StoreError::VersionConflict(id)),
                None => Ok(None),
            },
        }
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", collection.table());
        let res = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(res.rows_affected() > 0)
    }

    async fn delete_all(&self, collection: Collection) -> StoreResult<u64> {
        let sql = format!("DELETE FROM {}", collection.table());
        let res = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Page;
    use serde_json::json;

    fn find_sql(query: &QueryDescriptor) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM tours");
        push_filters(&mut qb, &query.filters);
        push_sort(&mut qb, &query.sort);
        qb.sql().to_string()
    }

    #[test]
    fn compiles_filters_and_sort_with_bound_paths() {
        let q = QueryDescriptor {
            filters: vec![
                Predicate::new("price", Operator::Gte, 100),
                Predicate::new("difficulty", Operator::In, json!(["easy", "medium"])),
                Predicate::ne("secretTour", true),
            ],
            sort: vec![SortKey::parse("-price"), SortKey::parse("createdAt")],
            page: Some(Page { number: 1, limit: 2, explicit: false }),
            ..Default::default()
        };
        let sql = find_sql(&q);
        assert_eq!(
            sql,
            "SELECT * FROM tours WHERE TRUE \
             AND ((doc #> $1) >= $2 AND jsonb_typeof((doc #> $3)) = jsonb_typeof($4)) \
             AND (doc #> $5) IN ($6, $7) \
             AND (doc #> $8) IS DISTINCT FROM $9 \
             ORDER BY (doc #> $10) DESC NULLS LAST, created_at ASC NULLS FIRST, id"
        );
    }

    #[test]
    fn empty_membership_matches_nothing() {
        let q = QueryDescriptor {
            filters: vec![Predicate::new("id", Operator::In, json!([]))],
            sort: vec![],
            ..Default::default()
        };
        assert_eq!(find_sql(&q), "SELECT * FROM tours WHERE TRUE AND FALSE ORDER BY id");
    }

    #[test]
    fn constraint_names_follow_table_and_fields() {
        assert_eq!(constraint_name(Collection::Users, &["email"]), "users_email_key");
        assert_eq!(
            constraint_name(Collection::Reviews, &["tour", "user"]),
            "reviews_tour_user_key"
        );
    }
}
