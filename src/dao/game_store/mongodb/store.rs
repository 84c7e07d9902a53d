use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database,
    bson::{Bson, Document, doc},
    error::{Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::{RwLock, watch::Receiver};
use tracing::{debug, warn};

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{StoredDocument, doc_id, json_to_bson},
};
use crate::dao::{
    game_store::{
        ConflictKind, DocumentStore, Fields, WriteMode, WriteOp, WriteOutcome, fields_match,
        watch::WatchHub,
    },
    storage::StorageResult,
};

const DOCUMENT_COLLECTION_NAME: &str = "documents";
const DUPLICATE_KEY: i32 = 11000;
const WRITE_CONFLICT: i32 = 112;
/// Bumped by `Expect` so a concurrent writer of the same document aborts one side.
const REVISION_FIELD: &str = "_rev";

/// MongoDB-backed document store.
///
/// Batches run inside a multi-document transaction, so the deployment must be
/// a replica set. Change notifications are fanned out in-process after each
/// commit.
#[derive(Clone)]
pub struct MongoDocumentStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    hub: WatchHub,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoDocumentStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
                hub: WatchHub::new(),
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"collection": 1, "_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("document_collection_idx".to_owned()))
                    .build(),
            )
            .build();

        self.collection()
            .await
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: DOCUMENT_COLLECTION_NAME,
                index: "collection,_id",
                source,
            })?;
        Ok(())
    }

    async fn collection(&self) -> Collection<StoredDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<StoredDocument>(DOCUMENT_COLLECTION_NAME)
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn find(&self, path: &str) -> MongoResult<Option<Fields>> {
        let document = self
            .collection()
            .await
            .find_one(doc_id(path))
            .await
            .map_err(|source| MongoDaoError::LoadDocument {
                path: path.to_owned(),
                source,
            })?;
        Ok(document.map(|stored| stored.fields))
    }

    async fn list(&self, collection: &str) -> MongoResult<Vec<(String, Fields)>> {
        let prefix = format!("{collection}/");
        let list_error = |source| MongoDaoError::ListCollection {
            collection: collection.to_owned(),
            source,
        };

        let documents: Vec<StoredDocument> = self
            .collection()
            .await
            .find(doc! {"collection": collection})
            .sort(doc! {"_id": 1})
            .await
            .map_err(list_error)?
            .try_collect()
            .await
            .map_err(list_error)?;

        Ok(documents
            .into_iter()
            .filter_map(|stored| {
                let id = stored.path.strip_prefix(&prefix)?.to_owned();
                Some((id, stored.fields))
            })
            .collect())
    }

    /// Re-read committed documents and fan them out to subscribers.
    async fn publish(&self, paths: &[String]) {
        for path in paths {
            match self.find(path).await {
                Ok(snapshot) => self.inner.hub.publish(path, snapshot),
                Err(err) => warn!(%path, error = %err, "failed to refresh document after write"),
            }
        }
    }

    async fn write(&self, path: &str, fields: Fields, mode: WriteMode) -> MongoResult<()> {
        let collection = self.collection().await;
        let write_error = |source| MongoDaoError::WriteDocument {
            path: path.to_owned(),
            source,
        };

        match mode {
            WriteMode::Replace => {
                collection
                    .replace_one(doc_id(path), StoredDocument::new(path, fields))
                    .upsert(true)
                    .await
                    .map_err(write_error)?;
            }
            WriteMode::Merge => {
                collection
                    .update_one(doc_id(path), merge_update(path, &fields))
                    .upsert(true)
                    .await
                    .map_err(write_error)?;
            }
        }

        self.publish(&[path.to_owned()]).await;
        Ok(())
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> MongoResult<WriteOutcome> {
        let client = self.client().await;
        let collection = self.collection().await;
        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;

        let mut touched: Vec<String> = Vec::new();
        for op in ops {
            let path = op.path().to_owned();
            let applied = apply_op(&collection, &mut session, op).await;
            let rejected = match applied {
                Ok(None) => {
                    if !touched.contains(&path) {
                        touched.push(path);
                    }
                    continue;
                }
                Ok(Some(kind)) => kind,
                Err(source) => match conflict_kind(&source) {
                    Some(kind) => kind,
                    None => {
                        abort(&mut session).await;
                        return Err(MongoDaoError::WriteDocument { path, source });
                    }
                },
            };
            debug!(%path, kind = ?rejected, "MongoDB batch rejected");
            abort(&mut session).await;
            return Ok(WriteOutcome::Conflict {
                path,
                kind: rejected,
            });
        }

        if let Err(source) = session.commit_transaction().await {
            let Some(kind) = conflict_kind(&source) else {
                return Err(MongoDaoError::Transaction { source });
            };
            let path = touched.first().cloned().unwrap_or_default();
            debug!(%path, ?kind, "MongoDB commit lost to a concurrent transaction");
            return Ok(WriteOutcome::Conflict { path, kind });
        }

        self.publish(&touched).await;
        Ok(WriteOutcome::Committed)
    }
}

/// Apply a single batch operation inside `session`, returning the conflict if a precondition failed.
async fn apply_op(
    collection: &Collection<StoredDocument>,
    session: &mut ClientSession,
    op: WriteOp,
) -> mongodb::error::Result<Option<ConflictKind>> {
    match op {
        WriteOp::Set {
            path,
            fields,
            mode: WriteMode::Replace,
        } => {
            collection
                .replace_one(doc_id(&path), StoredDocument::new(&path, fields))
                .upsert(true)
                .session(&mut *session)
                .await?;
        }
        WriteOp::Set {
            path,
            fields,
            mode: WriteMode::Merge,
        } => {
            collection
                .update_one(doc_id(&path), merge_update(&path, &fields))
                .upsert(true)
                .session(&mut *session)
                .await?;
        }
        WriteOp::Create { path, fields } => {
            let existing = collection
                .find_one(doc_id(&path))
                .session(&mut *session)
                .await?;
            if existing.is_some() {
                return Ok(Some(ConflictKind::AlreadyExists));
            }
            collection
                .insert_one(StoredDocument::new(&path, fields))
                .session(&mut *session)
                .await?;
        }
        WriteOp::Increment {
            path,
            field,
            delta,
            floor,
        } => {
            let existing = collection
                .find_one(doc_id(&path))
                .session(&mut *session)
                .await?;
            let Some(existing) = existing else {
                return Ok(Some(ConflictKind::Missing));
            };
            if existing
                .fields
                .get(&field)
                .is_some_and(|value| !value.is_null() && !value.is_i64())
            {
                return Ok(Some(ConflictKind::Mismatch));
            }
            collection
                .update_one(doc_id(&path), vec![increment_stage(&field, delta, floor)])
                .session(&mut *session)
                .await?;
        }
        WriteOp::Delete { path } => {
            collection
                .delete_one(doc_id(&path))
                .session(&mut *session)
                .await?;
        }
        WriteOp::Expect { path, fields } => {
            let existing = collection
                .find_one(doc_id(&path))
                .session(&mut *session)
                .await?;
            match existing {
                None => return Ok(Some(ConflictKind::Missing)),
                Some(stored) if !fields_match(&stored.fields, &fields) => {
                    return Ok(Some(ConflictKind::Mismatch));
                }
                Some(_) => {}
            }
            // Writing the document makes a concurrent commit on it a write conflict.
            let mut revision = Document::new();
            revision.insert(REVISION_FIELD, 1_i64);
            let pinned = collection
                .update_one(doc_id(&path), doc! {"$inc": revision})
                .session(&mut *session)
                .await?;
            if pinned.matched_count == 0 {
                return Ok(Some(ConflictKind::Missing));
            }
        }
    }
    Ok(None)
}

/// Driver errors that mean another writer won: the batch is rejected, not failed.
fn conflict_kind(err: &MongoError) -> Option<ConflictKind> {
    let code = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) => Some(failure.code),
        ErrorKind::Command(failure) => Some(failure.code),
        _ => None,
    };
    classify_conflict(code, err.contains_label(TRANSIENT_TRANSACTION_ERROR))
}

fn classify_conflict(code: Option<i32>, transient: bool) -> Option<ConflictKind> {
    match code {
        Some(DUPLICATE_KEY) => Some(ConflictKind::AlreadyExists),
        Some(WRITE_CONFLICT) => Some(ConflictKind::Mismatch),
        _ if transient => Some(ConflictKind::Mismatch),
        _ => None,
    }
}

async fn abort(session: &mut ClientSession) {
    if let Err(err) = session.abort_transaction().await {
        warn!(error = %err, "failed to abort MongoDB transaction");
    }
}

/// `$set` update writing each field under `fields.` and tagging the collection on insert.
fn merge_update(path: &str, fields: &Fields) -> Document {
    let mut set = Document::new();
    for (key, value) in fields {
        set.insert(format!("fields.{key}"), json_to_bson(value));
    }
    let mut on_insert = Document::new();
    on_insert.insert(
        "collection",
        crate::dao::game_store::collection_of(path).to_owned(),
    );

    let mut update = Document::new();
    update.insert("$set", set);
    update.insert("$setOnInsert", on_insert);
    update
}

/// Aggregation stage adding `delta` to a numeric field, optionally clamped below by `floor`.
fn increment_stage(field: &str, delta: i64, floor: Option<i64>) -> Document {
    let current = doc! {"$ifNull": [format!("$fields.{field}"), 0_i64]};
    let added = doc! {"$add": [current, delta]};
    let value = match floor {
        Some(floor) => Bson::Document(doc! {"$max": [floor, added]}),
        None => Bson::Document(added),
    };

    let mut set = Document::new();
    set.insert(format!("fields.{field}"), value);
    let mut stage = Document::new();
    stage.insert("$set", set);
    stage
}

impl DocumentStore for MongoDocumentStore {
    fn get(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Fields>>> {
        let store = self.clone();
        let path = path.to_owned();
        Box::pin(async move { store.find(&path).await.map_err(Into::into) })
    }

    fn list(&self, collection: &str) -> BoxFuture<'static, StorageResult<Vec<(String, Fields)>>> {
        let store = self.clone();
        let collection = collection.to_owned();
        Box::pin(async move { store.list(&collection).await.map_err(Into::into) })
    }

    fn subscribe(&self, path: &str) -> Receiver<Option<Fields>> {
        let receiver = self.inner.hub.subscribe(path);
        if !self.inner.hub.has_snapshot(path) {
            // Documents written before this process started are loaded once.
            let store = self.clone();
            let path = path.to_owned();
            tokio::spawn(async move {
                match store.find(&path).await {
                    Ok(snapshot) => store.inner.hub.seed(&path, snapshot),
                    Err(err) => warn!(%path, error = %err, "failed to seed document subscription"),
                }
            });
        }
        receiver
    }

    fn subscribe_collection(&self, collection: &str) -> Receiver<u64> {
        self.inner.hub.subscribe_collection(collection)
    }

    fn write(
        &self,
        path: &str,
        fields: Fields,
        mode: WriteMode,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.to_owned();
        Box::pin(async move { store.write(&path, fields, mode).await.map_err(Into::into) })
    }

    fn batch_write(&self, ops: Vec<WriteOp>) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.batch_write(ops).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
