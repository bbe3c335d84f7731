use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    QueryBuilder, Row, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Direction, Filter, Page, Record, Sort, SortField, Store, StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (collection, id)
)"#;

const UPDATED_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS documents_by_update ON documents (collection, updated_at)";

/// Every collection shares one `documents` table; bodies are JSON text and
/// filters go through `json_extract`.
#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let db_pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;
        Self::from_pool(db_pool).await
    }

    /// A private database that lives as long as the store. Used by tests.
    pub async fn in_memory() -> StoreResult<Self> {
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(db_pool).await
    }

    pub async fn from_pool(db_pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(SCHEMA).execute(&db_pool).await?;
        sqlx::query(UPDATED_INDEX).execute(&db_pool).await?;
        Ok(Self { db_pool })
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(millis: i64) -> StoreResult<OffsetDateTime> {
    Ok(OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)?)
}

fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) {
    for (field, value) in filter.fields() {
        query
            .push(" AND json_extract(body, ")
            .push_bind(format!("$.{field}"))
            .push(")");
        match value {
            Value::Null => {
                query.push(" IS NULL");
            }
            Value::Bool(flag) => {
                query.push(" = ").push_bind(i64::from(*flag));
            }
            Value::Number(number) => match number.as_i64() {
                Some(int) => {
                    query.push(" = ").push_bind(int);
                }
                None => {
                    query.push(" = ").push_bind(number.as_f64().unwrap_or_default());
                }
            },
            Value::String(text) => {
                query.push(" = ").push_bind(text.clone());
            }
            nested => {
                query.push(" = json(").push_bind(nested.to_string()).push(")");
            }
        }
    }
}

fn row_to_record(row: &SqliteRow) -> StoreResult<Record> {
    let body: String = row.try_get("body")?;
    Ok(Record {
        id: row.try_get("id")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        body: serde_json::from_str(&body)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert(&self, collection: &str, body: Value) -> StoreResult<Record> {
        let id = Uuid::now_v7().to_string();
        let now = now_millis();
        sqlx::query("INSERT INTO documents (collection,id,created_at,updated_at,body) VALUES (?,?,?,?,?)")
            .bind(collection)
            .bind(&id)
            .bind(now)
            .bind(now)
            .bind(body.to_string())
            .execute(&self.db_pool)
            .await?;

        Ok(Record {
            id,
            created_at: from_millis(now)?,
            updated_at: from_millis(now)?,
            body,
        })
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Record> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id,created_at,updated_at,body FROM documents WHERE collection = ",
        );
        query.push_bind(collection.to_owned());
        push_filter(&mut query, filter);
        query.push(" ORDER BY rowid LIMIT 1");

        match query.build().fetch_optional(&self.db_pool).await? {
            Some(row) => row_to_record(&row),
            None => Err(StoreError::not_found(collection)),
        }
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Sort,
        page: Page,
    ) -> StoreResult<(Vec<Record>, u64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM documents WHERE collection = ");
        count.push_bind(collection.to_owned());
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db_pool).await?;

        let column = match sort.field {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
        };
        let direction = match sort.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id,created_at,updated_at,body FROM documents WHERE collection = ",
        );
        query.push_bind(collection.to_owned());
        push_filter(&mut query, filter);
        query.push(format!(" ORDER BY {column} {direction}, rowid {direction} LIMIT "));
        // -1 is sqlite for "no limit"
        query.push_bind(page.limit.map(to_sql).unwrap_or(-1));
        query.push(" OFFSET ").push_bind(to_sql(page.skip));

        let records = query
            .build()
            .fetch_all(&self.db_pool)
            .await?
            .iter()
            .map(row_to_record)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok((records, u64::try_from(total).unwrap_or_default()))
    }

    async fn update(&self, collection: &str, id: &str, body: Value) -> StoreResult<Record> {
        let now = now_millis();
        let row = sqlx::query("UPDATE documents SET body=?, updated_at=? WHERE collection=? AND id=? RETURNING created_at")
            .bind(body.to_string())
            .bind(now)
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::not_found(collection));
        };

        Ok(Record {
            id: id.to_owned(),
            created_at: from_millis(row.try_get("created_at")?)?,
            updated_at: from_millis(now)?,
            body,
        })
    }

    async fn soft_delete(&self, collection: &str, id: &str, tombstone: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE documents SET body=json_set(body,'$.status',?), updated_at=? WHERE collection=? AND id=?")
            .bind(tombstone)
            .bind(now_millis())
            .bind(collection)
            .bind(id)
            .execute(&self.db_pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::OptionalExt;

    #[tokio::test]
    async fn insert_assigns_identity_and_find_one_matches_fields() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = store
            .insert("members", json!({"room_id": "r1", "user_id": "alice", "status": "joined"}))
            .await
            .unwrap();
        assert!(!record.id.is_empty());
        assert_eq!(record.created_at, record.updated_at);

        let filter = Filter::new().eq("room_id", "r1").eq("status", "joined");
        let found = store.find_one("members", &filter).await.unwrap();
        assert_eq!(found, record);

        let wrong_collection = store.find_one("rooms", &filter).await;
        assert!(matches!(wrong_collection, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn filters_compare_numbers_nulls_and_bools() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert("seats", json!({"room_id": "r1", "index": 2, "occupant": null, "muted": true}))
            .await
            .unwrap();

        let by_index = Filter::new().eq("index", 2);
        assert!(store.find_one("seats", &by_index).await.optional().unwrap().is_some());

        let open = Filter::new().eq("occupant", Value::Null).eq("muted", true);
        assert!(store.find_one("seats", &open).await.optional().unwrap().is_some());

        let other = Filter::new().eq("index", 3);
        assert!(store.find_one("seats", &other).await.optional().unwrap().is_none());
    }

    #[tokio::test]
    async fn find_many_pages_and_counts() {
        let store = SqliteStore::in_memory().await.unwrap();
        for n in 0..5 {
            store.insert("members", json!({"room_id": "r1", "n": n})).await.unwrap();
        }
        store.insert("members", json!({"room_id": "r2", "n": 9})).await.unwrap();

        let filter = Filter::new().eq("room_id", "r1");
        let (page, total) = store
            .find_many("members", &filter, Sort::oldest_first(), Page::new(1, Some(2)))
            .await
            .unwrap();
        assert_eq!(total, 5);
        let ns: Vec<_> = page.iter().map(|r| r.body["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![1, 2]);

        let (newest, _) = store
            .find_many("members", &filter, Sort::newest_first(), Page::new(0, Some(1)))
            .await
            .unwrap();
        assert_eq!(newest[0].body["n"], 4);
    }

    #[tokio::test]
    async fn update_replaces_body_and_soft_delete_keeps_row() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = store.insert("rooms", json!({"room_id": "r1", "status": "created"})).await.unwrap();

        let updated = store
            .update("rooms", &record.id, json!({"room_id": "r1", "status": "closed"}))
            .await
            .unwrap();
        assert_eq!(updated.created_at, record.created_at);
        assert!(updated.updated_at >= record.updated_at);

        store.soft_delete("rooms", &record.id, "destroyed").await.unwrap();
        let gone = store
            .find_one("rooms", &Filter::new().eq("status", "destroyed"))
            .await
            .unwrap();
        assert_eq!(gone.id, record.id);
        assert_eq!(gone.body["room_id"], "r1");

        let missing = store.update("rooms", "nope", json!({})).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
        let missing = store.soft_delete("rooms", "nope", "destroyed").await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }
}
