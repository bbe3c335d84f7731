//! Document store the occupancy authority persists through.
//!
//! Records are opaque JSON bodies keyed by a store-assigned identifier. The
//! store owns `id`, `created_at` and `updated_at`; everything else lives in the
//! body and can be matched with field-equality filters.

pub mod documents;
mod sqlite;

pub use documents::Document;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no document in {collection} matches")]
    NotFound { collection: String },
    #[error("store backend failed: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("malformed document: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("stored timestamp out of range: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
    #[error("could not format timestamp: {0}")]
    Format(#[from] time::error::Format),
}

impl StoreError {
    pub(crate) fn not_found(collection: &str) -> Self {
        Self::NotFound { collection: collection.to_owned() }
    }
}

/// Turns `NotFound` into `Ok(None)`, keeping every other failure.
pub trait OptionalExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for StoreResult<T> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub body: Value,
}

/// Conjunction of `field == value` predicates over a document body.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    fields: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub direction: Direction,
}

impl Sort {
    pub const fn newest_first() -> Self {
        Self { field: SortField::UpdatedAt, direction: Direction::Desc }
    }

    pub const fn latest_created() -> Self {
        Self { field: SortField::CreatedAt, direction: Direction::Desc }
    }

    pub const fn oldest_first() -> Self {
        Self { field: SortField::CreatedAt, direction: Direction::Asc }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: Option<u64>,
}

impl Page {
    pub const ALL: Page = Page { skip: 0, limit: None };

    pub const fn new(skip: u64, limit: Option<u64>) -> Self {
        Self { skip, limit }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Stores a new document, assigning its identifier and timestamps.
    async fn insert(&self, collection: &str, body: Value) -> StoreResult<Record>;

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Record>;

    /// Returns the requested page together with the total number of matches.
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Sort,
        page: Page,
    ) -> StoreResult<(Vec<Record>, u64)>;

    /// Replaces the whole body and refreshes `updated_at`.
    async fn update(&self, collection: &str, id: &str, body: Value) -> StoreResult<Record>;

    /// Rows are never removed; the body's `status` is set to `tombstone`.
    async fn soft_delete(&self, collection: &str, id: &str, tombstone: &str) -> StoreResult<()>;
}
