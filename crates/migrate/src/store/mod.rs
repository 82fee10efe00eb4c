//! Document store abstraction
//!
//! Migration units and the ledger only ever touch the database through the
//! `DocumentStore` primitives: collection management, index management and
//! filtered document writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreResult;

pub mod memory;

#[cfg(feature = "mongodb-backend")]
pub mod mongo;

pub use memory::*;

#[cfg(feature = "mongodb-backend")]
pub use mongo::*;

/// A stored document
pub type Document = Map<String, Value>;

/// Equality filter over (dotted) field paths; an empty filter matches everything
pub type Filter = Map<String, Value>;

/// Field assignments and removals applied by `update_many`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub set: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unset: Vec<String>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` at `path`
    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(path.into(), value.into());
        self
    }

    /// Remove the field at `path`
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

/// Sort order of one index key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Numeric form used by MongoDB key specifications
    pub fn as_i32(self) -> i32 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// Named index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            unique: false,
        }
    }

    /// Append an ascending key
    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            order: SortOrder::Asc,
        });
        self
    }

    /// Append a descending key
    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            order: SortOrder::Desc,
        });
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Database handle used by migration units and the ledger
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create an empty collection
    async fn create_collection(&self, name: &str) -> StoreResult<()>;

    /// Drop a collection with its documents and indexes; absent collections are ignored
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;

    /// List collection names in ascending order
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Insert a document, creating the collection if needed
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()>;

    /// Apply `update` to every matching document, returning the match count
    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<u64>;

    /// Delete every matching document, returning the deleted count
    async fn delete_many(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Delete the first matching document
    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<bool>;

    /// Fetch every matching document; a missing collection yields nothing
    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;

    /// Create a named index
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()>;

    /// Remove a named index
    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()>;

    /// List the indexes defined on a collection
    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>>;

    /// Check whether a collection exists
    async fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.list_collections().await?.iter().any(|c| c == name))
    }

    /// Fetch the first matching document
    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }
}

/// Build an equality filter on `_id`
pub fn id_filter(id: impl Into<Value>) -> Filter {
    let mut filter = Filter::new();
    filter.insert("_id".to_string(), id.into());
    filter
}

/// Resolve a dotted path inside a document
pub fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = document.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Whether `document` satisfies every equality in `filter`
///
/// A `null` expectation also matches a missing field, as in MongoDB.
pub fn matches_filter(document: &Document, filter: &Filter) -> bool {
    filter.iter().all(|(path, expected)| match lookup_path(document, path) {
        Some(actual) => actual == expected,
        None => expected.is_null(),
    })
}
