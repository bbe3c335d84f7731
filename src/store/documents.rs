//! Typed access to the store for entities that map one-to-one onto documents.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;

use super::{Filter, Page, Record, Sort, Store, StoreResult};

/// Fields owned by the store rather than by the document body.
const STORE_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;
    /// Status written by a soft delete.
    const TOMBSTONE: &'static str = "deleted";

    fn id(&self) -> &str;
}

pub fn encode<T: Document>(doc: &T) -> StoreResult<Value> {
    let mut body = serde_json::to_value(doc)?;
    if let Some(fields) = body.as_object_mut() {
        for field in STORE_FIELDS {
            fields.remove(field);
        }
    }
    Ok(body)
}

pub fn decode<T: Document>(record: Record) -> StoreResult<T> {
    let Record { id, created_at, updated_at, mut body } = record;
    if let Some(fields) = body.as_object_mut() {
        fields.insert("id".to_owned(), Value::String(id));
        fields.insert("created_at".to_owned(), Value::String(created_at.format(&Rfc3339)?));
        fields.insert("updated_at".to_owned(), Value::String(updated_at.format(&Rfc3339)?));
    }
    Ok(serde_json::from_value(body)?)
}

pub async fn insert<T: Document>(store: &dyn Store, doc: &T) -> StoreResult<T> {
    let body = encode(doc)?;
    decode(store.insert(T::COLLECTION, body).await?)
}

pub async fn find_one<T: Document>(store: &dyn Store, filter: &Filter) -> StoreResult<T> {
    decode(store.find_one(T::COLLECTION, filter).await?)
}

pub async fn find_many<T: Document>(
    store: &dyn Store,
    filter: &Filter,
    sort: Sort,
    page: Page,
) -> StoreResult<(Vec<T>, u64)> {
    let (records, total) = store.find_many(T::COLLECTION, filter, sort, page).await?;
    let docs = records.into_iter().map(decode).collect::<StoreResult<Vec<T>>>()?;
    Ok((docs, total))
}

pub async fn update<T: Document>(store: &dyn Store, doc: &T) -> StoreResult<T> {
    let body = encode(doc)?;
    decode(store.update(T::COLLECTION, doc.id(), body).await?)
}

pub async fn soft_delete<T: Document>(store: &dyn Store, id: &str) -> StoreResult<()> {
    store.soft_delete(T::COLLECTION, id, T::TOMBSTONE).await
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::db::{Member, Room, RoomStatus};
    use crate::store::SqliteStore;

    #[test]
    fn encode_leaves_store_fields_to_the_store() {
        let member = Member::joined("r1", "alice", OffsetDateTime::now_utc());
        let body = encode(&member).unwrap();
        assert!(body.get("id").is_none());
        assert!(body.get("created_at").is_none());
        assert_eq!(body["status"], "joined");
        assert!(body.get("last_heartbeat").is_some());
    }

    #[tokio::test]
    async fn insert_then_update_keeps_identity() {
        let store = SqliteStore::in_memory().await.unwrap();
        let room = Room::new("r1", "karaoke", "ABC123", 4, OffsetDateTime::now_utc());
        let mut stored = insert(&store, &room).await.unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(stored.status, RoomStatus::Created);

        stored.status = RoomStatus::Closed;
        let updated = update(&store, &stored).await.unwrap();
        assert_eq!(updated.id, stored.id);
        assert_eq!(updated.status, RoomStatus::Closed);

        soft_delete::<Room>(&store, &stored.id).await.unwrap();
        let destroyed: Room = find_one(&store, &Filter::new().eq("room_id", "r1")).await.unwrap();
        assert_eq!(destroyed.status, RoomStatus::Destroyed);

        let (members, total) = find_many::<Member>(&store, &Filter::new(), Sort::newest_first(), Page::ALL)
            .await
            .unwrap();
        assert!(members.is_empty());
        assert_eq!(total, 0);
    }
}
