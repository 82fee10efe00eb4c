//! MongoDB document store backend

use crate::error::{StoreError, StoreResult};
use crate::store::{Document, DocumentStore, Filter, IndexKey, IndexSpec, SortOrder, Update};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, Bson, Document as BsonDocument},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
    Client, Collection, Database, IndexModel,
};
use tracing::debug;

const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_NOT_FOUND: i32 = 27;
const NAMESPACE_EXISTS: i32 = 48;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

/// Document store over one MongoDB database
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Connect with a MongoDB connection string
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!(database = %database, "connected to MongoDB");
        Ok(Self::new(client.database(database)))
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection::<BsonDocument>(name)
    }
}

fn command_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        _ => None,
    }
}

fn map_error(collection: &str, err: MongoError) -> StoreError {
    map_code(collection, command_code(&err), err.to_string())
}

/// Translate a server error code into the store taxonomy
fn map_code(collection: &str, code: Option<i32>, message: String) -> StoreError {
    match code {
        Some(DUPLICATE_KEY) => StoreError::duplicate_key(collection, message),
        Some(NAMESPACE_EXISTS) => StoreError::CollectionExists(collection.to_string()),
        _ => StoreError::Backend(message),
    }
}

fn to_bson(document: &Document) -> StoreResult<BsonDocument> {
    bson::to_document(document).map_err(|e| StoreError::InvalidDocument(e.to_string()))
}

fn from_bson(document: BsonDocument) -> StoreResult<Document> {
    match Bson::Document(document).into_relaxed_extjson() {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!("expected a document, got {}", other))),
    }
}

fn update_document(update: &Update) -> StoreResult<BsonDocument> {
    let mut document = BsonDocument::new();
    if !update.set.is_empty() {
        document.insert("$set", to_bson(&update.set)?);
    }
    if !update.unset.is_empty() {
        let mut unset = BsonDocument::new();
        for path in &update.unset {
            unset.insert(path.as_str(), "");
        }
        document.insert("$unset", unset);
    }
    Ok(document)
}

fn key_order(value: &Bson) -> SortOrder {
    let numeric = match value {
        Bson::Int32(n) => *n as f64,
        Bson::Int64(n) => *n as f64,
        Bson::Double(n) => *n,
        _ => 1.0,
    };
    if numeric < 0.0 {
        SortOrder::Desc
    } else {
        SortOrder::Asc
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn create_collection(&self, name: &str) -> StoreResult<()> {
        self.database
            .create_collection(name, None)
            .await
            .map_err(|e| map_error(name, e))
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        match self.collection(name).drop(None).await {
            Ok(()) => Ok(()),
            Err(e) if command_code(&e) == Some(NAMESPACE_NOT_FOUND) => Ok(()),
            Err(e) => Err(map_error(name, e)),
        }
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let mut names = self
            .database
            .list_collection_names(None)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        names.sort();
        Ok(names)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()> {
        let document = to_bson(&document)?;
        self.collection(collection)
            .insert_one(document, None)
            .await
            .map(|_| ())
            .map_err(|e| map_error(collection, e))
    }

    async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<u64> {
        let result = self
            .collection(collection)
            .update_many(to_bson(filter)?, update_document(update)?, None)
            .await
            .map_err(|e| map_error(collection, e))?;
        Ok(result.matched_count)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let result = self
            .collection(collection)
            .delete_many(to_bson(filter)?, None)
            .await
            .map_err(|e| map_error(collection, e))?;
        Ok(result.deleted_count)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<bool> {
        let result = self
            .collection(collection)
            .delete_one(to_bson(filter)?, None)
            .await
            .map_err(|e| map_error(collection, e))?;
        Ok(result.deleted_count > 0)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        let cursor = self
            .collection(collection)
            .find(to_bson(filter)?, None)
            .await
            .map_err(|e| map_error(collection, e))?;
        let documents: Vec<BsonDocument> = cursor
            .try_collect()
            .await
            .map_err(|e| map_error(collection, e))?;
        documents.into_iter().map(from_bson).collect()
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        let mut keys = BsonDocument::new();
        for key in &index.keys {
            keys.insert(key.field.as_str(), key.order.as_i32());
        }
        let options = IndexOptions::builder()
            .name(index.name.clone())
            .unique(index.unique)
            .build();
        let model = IndexModel::builder().keys(keys).options(options).build();

        match self.collection(collection).create_index(model, None).await {
            Ok(_) => Ok(()),
            Err(e) => match command_code(&e) {
                Some(INDEX_OPTIONS_CONFLICT) | Some(INDEX_KEY_SPECS_CONFLICT) => {
                    Err(StoreError::IndexConflict {
                        collection: collection.to_string(),
                        index: index.name.clone(),
                    })
                }
                _ => Err(map_error(collection, e)),
            },
        }
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()> {
        match self.collection(collection).drop_index(name, None).await {
            Ok(()) => Ok(()),
            Err(e) if matches!(command_code(&e), Some(INDEX_NOT_FOUND) | Some(NAMESPACE_NOT_FOUND)) => {
                Err(StoreError::IndexNotFound {
                    collection: collection.to_string(),
                    index: name.to_string(),
                })
            }
            Err(e) => Err(map_error(collection, e)),
        }
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        let cursor = match self.collection(collection).list_indexes(None).await {
            Ok(cursor) => cursor,
            Err(e) if command_code(&e) == Some(NAMESPACE_NOT_FOUND) => return Ok(Vec::new()),
            Err(e) => return Err(map_error(collection, e)),
        };
        let models: Vec<IndexModel> = cursor
            .try_collect()
            .await
            .map_err(|e| map_error(collection, e))?;

        Ok(models
            .into_iter()
            .filter_map(|model| {
                let options = model.options.unwrap_or_default();
                let name = options.name?;
                if name == "_id_" {
                    return None;
                }
                let keys = model
                    .keys
                    .iter()
                    .map(|(field, order)| IndexKey {
                        field: field.clone(),
                        order: key_order(order),
                    })
                    .collect();
                Some(IndexSpec {
                    name,
                    keys,
                    unique: options.unique.unwrap_or(false),
                })
            })
            .collect())
    }
}
