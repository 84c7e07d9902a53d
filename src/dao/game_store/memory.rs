//! Process-local document store used for single-instance deployments and tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use futures::future::BoxFuture;
use tokio::sync::watch::Receiver;
use tracing::debug;

use super::{
    ConflictKind, DocumentStore, Fields, WriteMode, WriteOp, WriteOutcome, apply_increment,
    apply_write, fields_match, watch::WatchHub,
};
use crate::dao::storage::StorageResult;

/// Document store keeping every document in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    documents: Mutex<BTreeMap<String, Fields>>,
    hub: WatchHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> MutexGuard<'_, BTreeMap<String, Fields>> {
        // A poisoned lock only means another writer panicked mid-batch; batches
        // are staged before being applied so the map itself is consistent.
        self.inner
            .documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply_batch(&self, ops: Vec<WriteOp>) -> WriteOutcome {
        let mut documents = self.documents();
        let mut staged: BTreeMap<String, Option<Fields>> = BTreeMap::new();

        for op in ops {
            let path = op.path().to_owned();
            let current = match staged.get(&path) {
                Some(entry) => entry.clone(),
                None => documents.get(&path).cloned(),
            };

            let next = match op {
                WriteOp::Set { fields, mode, .. } => Some(apply_write(current, fields, mode)),
                WriteOp::Create { fields, .. } => {
                    if current.is_some() {
                        return conflict(path, ConflictKind::AlreadyExists);
                    }
                    Some(fields)
                }
                WriteOp::Increment {
                    field,
                    delta,
                    floor,
                    ..
                } => {
                    let Some(mut document) = current else {
                        return conflict(path, ConflictKind::Missing);
                    };
                    if apply_increment(&mut document, &field, delta, floor).is_none() {
                        return conflict(path, ConflictKind::Mismatch);
                    }
                    Some(document)
                }
                WriteOp::Delete { .. } => None,
                WriteOp::Expect { fields, .. } => {
                    let Some(document) = current else {
                        return conflict(path, ConflictKind::Missing);
                    };
                    if !fields_match(&document, &fields) {
                        return conflict(path, ConflictKind::Mismatch);
                    }
                    continue;
                }
            };
            staged.insert(path, next);
        }

        for (path, next) in staged {
            match &next {
                Some(document) => {
                    documents.insert(path.clone(), document.clone());
                }
                None => {
                    if documents.remove(&path).is_none() {
                        continue;
                    }
                }
            }
            // Published under the lock so subscribers see same-document writes in commit order.
            self.inner.hub.publish(&path, next);
        }

        WriteOutcome::Committed
    }
}

fn conflict(path: String, kind: ConflictKind) -> WriteOutcome {
    debug!(%path, ?kind, "in-memory batch rejected");
    WriteOutcome::Conflict { path, kind }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Fields>>> {
        let document = self.documents().get(path).cloned();
        Box::pin(async move { Ok(document) })
    }

    fn list(&self, collection: &str) -> BoxFuture<'static, StorageResult<Vec<(String, Fields)>>> {
        let prefix = format!("{collection}/");
        let entries = self
            .documents()
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, document)| (path[prefix.len()..].to_owned(), document.clone()))
            .collect();
        Box::pin(async move { Ok(entries) })
    }

    fn subscribe(&self, path: &str) -> Receiver<Option<Fields>> {
        self.inner.hub.subscribe(path)
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
        self.apply_batch(vec![WriteOp::Set {
            path: path.to_owned(),
            fields,
            mode,
        }]);
        Box::pin(async { Ok(()) })
    }

    fn batch_write(&self, ops: Vec<WriteOp>) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        let outcome = self.apply_batch(ops);
        Box::pin(async move { Ok(outcome) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .write("teams/a", fields(json!({"score": 1})), WriteMode::Replace)
            .await
            .unwrap();

        let outcome = store
            .batch_write(vec![
                WriteOp::Increment {
                    path: "teams/a".into(),
                    field: "score".into(),
                    delta: 5,
                    floor: Some(0),
                },
                WriteOp::Increment {
                    path: "teams/missing".into(),
                    field: "score".into(),
                    delta: 5,
                    floor: Some(0),
                },
            ])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WriteOutcome::Conflict {
                path: "teams/missing".into(),
                kind: ConflictKind::Missing
            }
        );
        let team = store.get("teams/a").await.unwrap().unwrap();
        assert_eq!(team["score"], json!(1));
    }

    #[tokio::test]
    async fn create_refuses_existing_document() {
        let store = MemoryStore::new();
        let op = WriteOp::Create {
            path: "answers/q1__t1".into(),
            fields: fields(json!({"payload": 1})),
        };
        assert!(store.batch_write(vec![op.clone()]).await.unwrap().is_committed());
        assert_eq!(
            store.batch_write(vec![op]).await.unwrap(),
            WriteOutcome::Conflict {
                path: "answers/q1__t1".into(),
                kind: ConflictKind::AlreadyExists
            }
        );
    }

    #[tokio::test]
    async fn conditional_write_only_applies_on_match() {
        let store = MemoryStore::new();
        store
            .write(
                "game/state",
                fields(json!({"phase": "active", "version": 3})),
                WriteMode::Replace,
            )
            .await
            .unwrap();

        let stale = store
            .conditional_write(
                "game/state",
                fields(json!({"phase": "countdown", "version": 2})),
                fields(json!({"phase": "reveal", "version": 3})),
            )
            .await
            .unwrap();
        assert!(!stale.is_committed());

        let fresh = store
            .conditional_write(
                "game/state",
                fields(json!({"phase": "active", "version": 3})),
                fields(json!({"phase": "reveal", "version": 4})),
            )
            .await
            .unwrap();
        assert!(fresh.is_committed());
        let state = store.get("game/state").await.unwrap().unwrap();
        assert_eq!(state["phase"], json!("reveal"));
    }

    #[tokio::test]
    async fn subscribers_see_writes_and_deletes() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("teams/a");
        let mut revisions = store.subscribe_collection("teams");

        store
            .write("teams/a", fields(json!({"score": 2})), WriteMode::Merge)
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().unwrap()["score"], json!(2));

        store
            .batch_write(vec![WriteOp::Delete {
                path: "teams/a".into(),
            }])
            .await
            .unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        revisions.changed().await.unwrap();
        assert_eq!(*revisions.borrow(), 2);
    }

    #[tokio::test]
    async fn list_is_scoped_to_collection() {
        let store = MemoryStore::new();
        for path in ["teams/b", "teams/a", "teamsx/c", "rounds/R1"] {
            store
                .write(path, fields(json!({})), WriteMode::Replace)
                .await
                .unwrap();
        }
        let ids: Vec<String> = store
            .list("teams")
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
