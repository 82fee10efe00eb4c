//! In-memory document store backend

use crate::error::{StoreError, StoreResult};
use crate::store::{lookup_path, matches_filter, Document, DocumentStore, Filter, IndexSpec, Update};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default, Clone)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl CollectionState {
    fn contains_id(&self, id: &Value) -> bool {
        self.documents.iter().any(|doc| doc.get("_id") == Some(id))
    }

    /// Find the first unique index `document` would violate
    fn unique_violation(&self, document: &Document) -> Option<&IndexSpec> {
        self.indexes.iter().filter(|index| index.unique).find(|index| {
            let key = index_key(index, document);
            self.documents.iter().any(|existing| index_key(index, existing) == key)
        })
    }
}

/// Values of the indexed fields, missing fields compare as null
fn index_key(index: &IndexSpec, document: &Document) -> Vec<Value> {
    index
        .keys
        .iter()
        .map(|key| lookup_path(document, &key.field).cloned().unwrap_or(Value::Null))
        .collect()
}

/// First key shared by two documents under `index`
fn first_duplicate(index: &IndexSpec, documents: &[Document]) -> Option<Vec<Value>> {
    let mut seen = Vec::with_capacity(documents.len());
    for document in documents {
        let key = index_key(index, document);
        if seen.contains(&key) {
            return Some(key);
        }
        seen.push(key);
    }
    None
}

fn set_path(document: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            document.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(map)) = document.get_mut(head) {
                unset_path(map, rest);
            }
        }
    }
}

/// In-memory document store
///
/// Collections live behind a single lock, so every primitive is atomic with
/// respect to the documents it touches.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, CollectionState>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating primitives executed so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of documents in a collection, zero when absent
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |state| state.documents.len())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_collection(&self, name: &str) -> StoreResult<()> {
        self.record_write();
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        collections.insert(name.to_string(), CollectionState::default());
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        self.record_write();
        self.collections.write().remove(name);
        Ok(())
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    async fn insert_one(&self, collection: &str, mut document: Document) -> StoreResult<()> {
        self.record_write();
        let id = document
            .entry("_id".to_string())
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()))
            .clone();

        let mut collections = self.collections.write();
        let state = collections.entry(collection.to_string()).or_default();

        if state.contains_id(&id) {
            return Err(StoreError::duplicate_key(collection, id.to_string()));
        }
        if let Some(index) = state.unique_violation(&document) {
            return Err(StoreError::duplicate_key(
                collection,
                format!("{} {:?}", index.name, index_key(index, &document)),
            ));
        }

        state.documents.push(document);
        Ok(())
    }

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<u64> {
        self.record_write();
        if update.set.contains_key("_id") || update.unset.iter().any(|path| path == "_id") {
            return Err(StoreError::InvalidDocument("the _id field is immutable".to_string()));
        }

        let mut collections = self.collections.write();
        let Some(state) = collections.get_mut(collection) else {
            return Ok(0);
        };

        // Updated copy is swapped in only when every unique index still holds
        let mut documents = state.documents.clone();
        let mut matched = 0;
        for document in documents.iter_mut().filter(|doc| matches_filter(doc, filter)) {
            for (path, value) in &update.set {
                set_path(document, path, value.clone());
            }
            for path in &update.unset {
                unset_path(document, path);
            }
            matched += 1;
        }

        for index in state.indexes.iter().filter(|index| index.unique) {
            if let Some(key) = first_duplicate(index, &documents) {
                return Err(StoreError::duplicate_key(
                    collection,
                    format!("{} {:?}", index.name, key),
                ));
            }
        }

        state.documents = documents;
        Ok(matched)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.record_write();
        let mut collections = self.collections.write();
        let Some(state) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = state.documents.len();
        state.documents.retain(|doc| !matches_filter(doc, filter));
        Ok((before - state.documents.len()) as u64)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<bool> {
        self.record_write();
        let mut collections = self.collections.write();
        let Some(state) = collections.get_mut(collection) else {
            return Ok(false);
        };

        match state.documents.iter().position(|doc| matches_filter(doc, filter)) {
            Some(pos) => {
                state.documents.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|state| {
                state
                    .documents
                    .iter()
                    .filter(|doc| matches_filter(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        self.record_write();
        if index.keys.is_empty() {
            return Err(StoreError::InvalidDocument(format!(
                "index '{}' has no keys",
                index.name
            )));
        }

        let mut collections = self.collections.write();
        let state = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = state.indexes.iter().find(|i| i.name == index.name) {
            if existing == index {
                return Ok(());
            }
            return Err(StoreError::IndexConflict {
                collection: collection.to_string(),
                index: index.name.clone(),
            });
        }

        if index.unique {
            if let Some(key) = first_duplicate(index, &state.documents) {
                return Err(StoreError::duplicate_key(
                    collection,
                    format!("{} {:?}", index.name, key),
                ));
            }
        }

        state.indexes.push(index.clone());
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()> {
        self.record_write();
        let mut collections = self.collections.write();
        let not_found = || StoreError::IndexNotFound {
            collection: collection.to_string(),
            index: name.to_string(),
        };

        let state = collections.get_mut(collection).ok_or_else(not_found)?;
        let pos = state
            .indexes
            .iter()
            .position(|index| index.name == name)
            .ok_or_else(not_found)?;
        state.indexes.remove(pos);
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|state| state.indexes.clone())
            .unwrap_or_default())
    }
}
