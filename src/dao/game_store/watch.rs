//! In-process fan-out of document snapshots to subscribers.

use dashmap::DashMap;
use tokio::sync::watch;

use super::{Fields, collection_of};

/// Registry of per-document and per-collection watch channels.
///
/// Senders of live documents are kept even without receivers so late
/// subscribers start from the latest published snapshot. A deleted document
/// keeps its sender only while someone is subscribed to it.
#[derive(Default)]
pub struct WatchHub {
    documents: DashMap<String, watch::Sender<Option<Fields>>>,
    collections: DashMap<String, watch::Sender<u64>>,
}

impl WatchHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to snapshots of the document stored at `path`.
    pub fn subscribe(&self, path: &str) -> watch::Receiver<Option<Fields>> {
        self.documents
            .entry(path.to_owned())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Subscribe to the revision counter of `collection`.
    pub fn subscribe_collection(&self, collection: &str) -> watch::Receiver<u64> {
        self.collections
            .entry(collection.to_owned())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Whether a snapshot has already been published for `path`.
    pub fn has_snapshot(&self, path: &str) -> bool {
        self.documents
            .get(path)
            .map(|sender| sender.borrow().is_some())
            .unwrap_or(false)
    }

    /// Publish the committed state of `path` and bump its collection revision.
    pub fn publish(&self, path: &str, snapshot: Option<Fields>) {
        match snapshot {
            Some(snapshot) => {
                self.documents
                    .entry(path.to_owned())
                    .or_insert_with(|| watch::channel(None).0)
                    .send_replace(Some(snapshot));
            }
            None => {
                self.documents.remove_if(path, |_, sender| sender.receiver_count() == 0);
                if let Some(sender) = self.documents.get(path) {
                    sender.send_replace(None);
                }
            }
        }
        self.collections
            .entry(collection_of(path).to_owned())
            .or_insert_with(|| watch::channel(0).0)
            .send_modify(|revision| *revision += 1);
    }

    /// Seed a snapshot loaded from the backend unless a write already published a newer one.
    pub fn seed(&self, path: &str, snapshot: Option<Fields>) {
        if let Some(sender) = self.documents.get(path) {
            sender.send_if_modified(|current| {
                if current.is_none() && snapshot.is_some() {
                    *current = snapshot;
                    true
                } else {
                    false
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn late_subscriber_sees_latest_snapshot() {
        let hub = WatchHub::new();
        hub.publish("teams/a", Some(fields(json!({"score": 1}))));
        hub.publish("teams/a", Some(fields(json!({"score": 2}))));

        let rx = hub.subscribe("teams/a");
        assert_eq!(rx.borrow().as_ref().unwrap()["score"], json!(2));
        assert_eq!(*hub.subscribe_collection("teams").borrow(), 2);
    }

    #[test]
    fn deleting_an_unwatched_document_drops_its_channel() {
        let hub = WatchHub::new();
        hub.publish("answers/q1__a", Some(fields(json!({"is_correct": null}))));
        hub.publish("answers/q1__a", None);
        assert!(!hub.documents.contains_key("answers/q1__a"));
        assert_eq!(*hub.subscribe_collection("answers").borrow(), 2);

        let rx = hub.subscribe("teams/b");
        hub.publish("teams/b", Some(fields(json!({"score": 3}))));
        hub.publish("teams/b", None);
        assert!(rx.borrow().is_none());
        assert!(hub.documents.contains_key("teams/b"));

        drop(rx);
        hub.publish("teams/b", None);
        assert!(!hub.documents.contains_key("teams/b"));
    }

    #[test]
    fn seed_does_not_override_published_writes() {
        let hub = WatchHub::new();
        let rx = hub.subscribe("game/state");
        hub.publish("game/state", Some(fields(json!({"phase": "active"}))));
        hub.seed("game/state", Some(fields(json!({"phase": "idle"}))));
        assert_eq!(rx.borrow().as_ref().unwrap()["phase"], json!("active"));
    }
}
