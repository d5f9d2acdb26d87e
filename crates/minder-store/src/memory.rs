//! In-memory reference implementation of the persistence service.
//!
//! Used by the CLI as a self-contained backend and by the test suites, which
//! also rely on its scripted fault injection to exercise rollback paths.

use crate::{ChangeEvent, ChangeKind, ItemStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use minder_model::{Item, ItemId, ItemPatch};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

pub struct MemoryStore {
    items: RwLock<HashMap<ItemId, Item>>,
    events: broadcast::Sender<ChangeEvent>,
    /// Scripted failures, consumed one per mutating call.
    scripted_failures: Mutex<VecDeque<StoreError>>,
    /// Scripted failures for `list`, consumed one per fetch.
    scripted_list_failures: Mutex<VecDeque<StoreError>>,
    list_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            items: RwLock::new(HashMap::new()),
            events,
            scripted_failures: Mutex::new(VecDeque::new()),
            scripted_list_failures: Mutex::new(VecDeque::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Pre-populate without emitting change events.
    pub fn seed(&self, items: impl IntoIterator<Item = Item>) {
        let mut map = self.items.write();
        for item in items {
            map.insert(item.id, item);
        }
    }

    /// Queue an error for the next mutating call (create/update/delete).
    pub fn fail_next(&self, error: StoreError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Queue an error for the next `list` fetch.
    pub fn fail_next_list(&self, error: StoreError) {
        self.scripted_list_failures.lock().push_back(error);
    }

    /// How many `list` fetches have been served. The debounce tests count
    /// these.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn take_scripted_failure(&self) -> Option<StoreError> {
        self.scripted_failures.lock().pop_front()
    }

    fn emit(&self, event: ChangeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn create(&self, item: Item) -> StoreResult<Item> {
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }
        self.items.write().insert(item.id, item.clone());
        self.emit(ChangeEvent {
            kind: ChangeKind::Insert,
            new: Some(item.clone()),
            old: None,
        });
        Ok(item)
    }

    async fn get(&self, id: ItemId) -> StoreResult<Item> {
        self.items
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, owner_id: &str) -> StoreResult<Vec<Item>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.scripted_list_failures.lock().pop_front() {
            return Err(err);
        }
        let mut items: Vec<Item> = self
            .items
            .read()
            .values()
            .filter(|i| i.owner_id == owner_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    async fn update(&self, id: ItemId, patch: ItemPatch) -> StoreResult<Item> {
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }
        let (old, updated) = {
            let mut map = self.items.write();
            let old = map.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
            let updated = patch.apply_to(&old, Utc::now());
            map.insert(id, updated.clone());
            (old, updated)
        };
        self.emit(ChangeEvent {
            kind: ChangeKind::Update,
            new: Some(updated.clone()),
            old: Some(old),
        });
        Ok(updated)
    }

    async fn delete(&self, id: ItemId) -> StoreResult<()> {
        if let Some(err) = self.take_scripted_failure() {
            return Err(err);
        }
        let old = self
            .items
            .write()
            .remove(&id)
            .ok_or(StoreError::NotFound(id))?;
        self.emit(ChangeEvent {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        });
        Ok(())
    }

    fn subscribe(&self, _owner_id: &str) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minder_model::{CandidateItem, ItemKind, Origin};

    fn task(title: &str) -> Item {
        CandidateItem {
            kind: Some(ItemKind::Task),
            title: Some(title.to_string()),
            ..Default::default()
        }
        .into_item("alice", Origin::Manual, Utc::now())
    }

    #[tokio::test]
    async fn crud_roundtrip() {
        let store = MemoryStore::new();
        let item = store.create(task("buy groceries")).await.unwrap();
        assert_eq!(store.get(item.id).await.unwrap().title, "buy groceries");

        let updated = store
            .update(
                item.id,
                ItemPatch {
                    title: Some("buy food".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "buy food");

        store.delete(item.id).await.unwrap();
        assert!(matches!(
            store.get(item.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner() {
        let store = MemoryStore::new();
        store.create(task("mine")).await.unwrap();
        let mut other = task("theirs");
        other.owner_id = "bob".into();
        store.create(other).await.unwrap();

        let mine = store.list("alice").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].title, "mine");
    }

    #[tokio::test]
    async fn scripted_failure_is_consumed_once() {
        let store = MemoryStore::new();
        store.fail_next(StoreError::Backend("down".into()));
        assert!(store.create(task("a")).await.is_err());
        assert!(store.create(task("b")).await.is_ok());
    }

    #[tokio::test]
    async fn mutations_emit_change_events() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("alice");
        let item = store.create(task("watch me")).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.new.unwrap().id, item.id);
    }
}
