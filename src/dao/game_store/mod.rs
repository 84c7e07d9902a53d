pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub mod watch;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::watch::Receiver;

use crate::dao::storage::StorageResult;

/// Field map of a stored document.
pub type Fields = Map<String, Value>;

/// How a plain write combines with the document already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Overwrite only the provided fields, creating the document when absent.
    Merge,
    /// Replace the whole document.
    Replace,
}

/// Single operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Write fields to a document.
    Set {
        path: String,
        fields: Fields,
        mode: WriteMode,
    },
    /// Create a document that must not exist yet.
    Create { path: String, fields: Fields },
    /// Add `delta` to an integer field of an existing document, never going below `floor`.
    Increment {
        path: String,
        field: String,
        delta: i64,
        floor: Option<i64>,
    },
    /// Remove a document; deleting an absent document is not an error.
    Delete { path: String },
    /// Precondition: the document exists and every listed field holds the given value.
    Expect { path: String, fields: Fields },
}

impl WriteOp {
    /// Path of the document touched by this operation.
    pub fn path(&self) -> &str {
        match self {
            WriteOp::Set { path, .. }
            | WriteOp::Create { path, .. }
            | WriteOp::Increment { path, .. }
            | WriteOp::Delete { path }
            | WriteOp::Expect { path, .. } => path,
        }
    }
}

/// Why a conditional operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A document that had to be created already exists.
    AlreadyExists,
    /// A document that had to exist is absent.
    Missing,
    /// Stored fields differ from the expected values.
    Mismatch,
}

/// Result of a conditional write or batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every operation was applied.
    Committed,
    /// Nothing was applied because a precondition failed on `path`.
    Conflict { path: String, kind: ConflictKind },
}

impl WriteOutcome {
    /// Whether the write was applied.
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed)
    }
}

/// Abstraction over the replicated document store shared by every participant.
///
/// Writes to the same document are observed by subscribers in commit order;
/// nothing is promised across documents.
pub trait DocumentStore: Send + Sync {
    fn get(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Fields>>>;
    fn list(&self, collection: &str) -> BoxFuture<'static, StorageResult<Vec<(String, Fields)>>>;
    /// Watch snapshots of a single document (`None` while absent).
    fn subscribe(&self, path: &str) -> Receiver<Option<Fields>>;
    /// Watch a revision counter bumped on every write inside `collection`.
    fn subscribe_collection(&self, collection: &str) -> Receiver<u64>;
    fn write(
        &self,
        path: &str,
        fields: Fields,
        mode: WriteMode,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Apply all operations or none of them.
    fn batch_write(&self, ops: Vec<WriteOp>) -> BoxFuture<'static, StorageResult<WriteOutcome>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Merge `fields` into the document only if it currently holds `expected`.
    fn conditional_write(
        &self,
        path: &str,
        expected: Fields,
        fields: Fields,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        self.batch_write(vec![
            WriteOp::Expect {
                path: path.to_owned(),
                fields: expected,
            },
            WriteOp::Set {
                path: path.to_owned(),
                fields,
                mode: WriteMode::Merge,
            },
        ])
    }
}

/// Collection segment of a `<collection>/<id>` document path.
pub fn collection_of(path: &str) -> &str {
    path.split_once('/').map(|(collection, _)| collection).unwrap_or(path)
}

/// Whether every expected field matches the stored value (absent fields read as null).
pub fn fields_match(stored: &Fields, expected: &Fields) -> bool {
    expected
        .iter()
        .all(|(key, value)| stored.get(key).unwrap_or(&Value::Null) == value)
}

/// Apply an increment to `document`, returning `None` when the field is not an integer.
pub fn apply_increment(
    document: &mut Fields,
    field: &str,
    delta: i64,
    floor: Option<i64>,
) -> Option<i64> {
    let current = match document.get(field) {
        None | Some(Value::Null) => 0,
        Some(value) => value.as_i64()?,
    };
    let mut next = current.saturating_add(delta);
    if let Some(floor) = floor {
        next = next.max(floor);
    }
    document.insert(field.to_owned(), Value::from(next));
    Some(next)
}

/// Apply a plain write to an optional existing document.
pub fn apply_write(existing: Option<Fields>, fields: Fields, mode: WriteMode) -> Fields {
    match (mode, existing) {
        (WriteMode::Merge, Some(mut document)) => {
            document.extend(fields);
            document
        }
        _ => fields,
    }
}
