//! Optimistic apply, rollback, and debounced reconciliation.
//!
//! Every approved mutation follows the same discipline: capture an undo
//! snapshot of exactly the value being overwritten, apply the change to the
//! local set immediately, then commit to the backend. A failed commit rolls
//! back from that mutation's own snapshot, never a shared slot, so two
//! rapid mutations against different items cannot restore each other's
//! state. A successful commit triggers the debounced reconciler, which
//! collapses any number of triggers inside the quiet window into a single
//! authoritative `list` fetch timed from the last trigger.

use crate::{ChangeEvent, ItemStore, StoreError};
use chrono::Utc;
use minder_model::{Item, ItemId, ItemPatch};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Quiet window for reconciliation fetches. Triggers closer together than
/// this collapse into one fetch.
pub const RECONCILE_QUIET_WINDOW: Duration = Duration::from_millis(300);

// ============================================================================
// Errors
// ============================================================================

/// A persistence commit failed during an optimistic mutation. Local state
/// has already been rolled back when this is returned.
#[derive(Debug, thiserror::Error)]
#[error("mutation {mutation_id} failed to commit: {source}")]
pub struct MutationError {
    pub mutation_id: Uuid,
    #[source]
    pub source: StoreError,
}

/// A link/unlink pair update failed. Both sides have been rolled back.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("cannot link: item {0} not in local set")]
    Missing(ItemId),
    #[error("link commit between {a} and {b} failed: {source}")]
    Commit {
        a: ItemId,
        b: ItemId,
        #[source]
        source: StoreError,
    },
}

// ============================================================================
// Mutations
// ============================================================================

/// One durable change, as approved by the confirmation workflow.
#[derive(Debug, Clone)]
pub enum Mutation {
    Create(Item),
    Update { id: ItemId, patch: ItemPatch },
    Delete { id: ItemId },
}

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub enum Committed {
    Created(Item),
    Updated(Item),
    Deleted(ItemId),
}

impl Committed {
    pub fn item(&self) -> Option<&Item> {
        match self {
            Committed::Created(item) | Committed::Updated(item) => Some(item),
            Committed::Deleted(_) => None,
        }
    }
}

/// The specific prior value a mutation overwrites.
enum Undo {
    /// Item did not exist before (create).
    Absent(ItemId),
    /// Item existed with this exact value (update).
    Present(Box<Item>),
    /// Item existed and peers referenced it (delete).
    Removed {
        item: Box<Item>,
        peer_links: Vec<(ItemId, Item)>,
    },
}

// ============================================================================
// Debounced Reconciler
// ============================================================================

type Job = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Debounce scheduler: any number of triggers within the quiet window run
/// the job exactly once, after the window elapses from the *last* trigger.
/// The pending timer is the only cancellable unit in the pipeline: a new
/// trigger aborts it and starts a fresh one.
pub struct Reconciler {
    window: Duration,
    job: Job,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(window: Duration, job: Job) -> Self {
        Self {
            window,
            job,
            pending: Mutex::new(None),
        }
    }

    pub fn trigger(&self) {
        let mut slot = self.pending.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let job = Arc::clone(&self.job);
        let window = self.window;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            job().await;
        }));
    }

    /// Run the job immediately, bypassing the quiet window. Clears any
    /// pending timer first so the same trigger cannot fetch twice.
    pub async fn run_now(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
        (self.job)().await;
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Optimistic Store
// ============================================================================

/// The mutation/reconciliation layer. Sole writer of the in-memory item set;
/// everything else reads snapshots through [`OptimisticStore::items`] /
/// [`OptimisticStore::get`].
pub struct OptimisticStore {
    backend: Arc<dyn ItemStore>,
    owner_id: String,
    local: Arc<RwLock<HashMap<ItemId, Item>>>,
    reconciler: Reconciler,
}

impl OptimisticStore {
    pub fn new(backend: Arc<dyn ItemStore>, owner_id: impl Into<String>) -> Arc<Self> {
        let owner_id = owner_id.into();
        let local: Arc<RwLock<HashMap<ItemId, Item>>> = Arc::new(RwLock::new(HashMap::new()));

        let job: Job = {
            let backend = Arc::clone(&backend);
            let local = Arc::clone(&local);
            let owner = owner_id.clone();
            Arc::new(move || {
                let backend = Arc::clone(&backend);
                let local = Arc::clone(&local);
                let owner = owner.clone();
                Box::pin(async move {
                    match backend.list(&owner).await {
                        Ok(fresh) => {
                            let mut map = local.write();
                            map.clear();
                            map.extend(fresh.into_iter().map(|i| (i.id, i)));
                        }
                        Err(error) => {
                            // The next trigger (push event or mutation
                            // completion) retries implicitly.
                            tracing::warn!(%error, "reconciliation fetch failed");
                        }
                    }
                })
            })
        };

        Arc::new(Self {
            backend,
            owner_id,
            local,
            reconciler: Reconciler::new(RECONCILE_QUIET_WINDOW, job),
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Snapshot of the local item set, in stable (creation, id) order.
    pub fn items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.local.read().values().cloned().collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        items
    }

    pub fn get(&self, id: ItemId) -> Option<Item> {
        self.local.read().get(&id).cloned()
    }

    /// Fetch the authoritative set immediately. Used at startup.
    pub async fn load(&self) -> Result<(), StoreError> {
        let fresh = self.backend.list(&self.owner_id).await?;
        let mut map = self.local.write();
        map.clear();
        map.extend(fresh.into_iter().map(|i| (i.id, i)));
        Ok(())
    }

    /// Feed the persistence service's push stream into the debounced
    /// reconciler. Returns the listener task.
    pub fn watch_remote(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.backend.subscribe(&self.owner_id);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChangeEvent { .. }) => this.reconciler.trigger(),
                    Err(broadcast::error::RecvError::Lagged(_)) => this.reconciler.trigger(),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Await a full reconciliation immediately (test hook and shutdown path).
    pub async fn reconcile_now(&self) {
        self.reconciler.run_now().await;
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Apply one mutation: optimistic local update, backend commit, and
    /// rollback from this mutation's own snapshot if the commit fails.
    pub async fn apply(&self, mutation: Mutation) -> Result<Committed, MutationError> {
        let mutation_id = Uuid::new_v4();
        match mutation {
            Mutation::Create(item) => {
                let undo = Undo::Absent(item.id);
                self.local.write().insert(item.id, item.clone());
                match self.backend.create(item).await {
                    Ok(stored) => {
                        self.local.write().insert(stored.id, stored.clone());
                        self.reconciler.trigger();
                        Ok(Committed::Created(stored))
                    }
                    Err(source) => {
                        self.rollback(undo);
                        Err(MutationError {
                            mutation_id,
                            source,
                        })
                    }
                }
            }
            Mutation::Update { id, patch } => {
                let undo = {
                    let mut map = self.local.write();
                    let Some(prior) = map.get(&id).cloned() else {
                        return Err(MutationError {
                            mutation_id,
                            source: StoreError::NotFound(id),
                        });
                    };
                    let optimistic = patch.apply_to(&prior, Utc::now());
                    map.insert(id, optimistic);
                    Undo::Present(Box::new(prior))
                };
                match self.backend.update(id, patch).await {
                    Ok(stored) => {
                        self.local.write().insert(id, stored.clone());
                        self.reconciler.trigger();
                        Ok(Committed::Updated(stored))
                    }
                    Err(source) => {
                        self.rollback(undo);
                        Err(MutationError {
                            mutation_id,
                            source,
                        })
                    }
                }
            }
            Mutation::Delete { id } => {
                // Removing an item also removes it from every peer's link
                // set, locally in the same lock turn.
                let (undo, scrubbed) = {
                    let mut map = self.local.write();
                    let Some(prior) = map.remove(&id) else {
                        return Err(MutationError {
                            mutation_id,
                            source: StoreError::NotFound(id),
                        });
                    };
                    let mut peer_links = Vec::new();
                    let mut scrubbed = Vec::new();
                    for peer in map.values_mut() {
                        if peer.linked_items.remove(&id) {
                            let mut prior_peer = peer.clone();
                            prior_peer.linked_items.insert(id);
                            peer_links.push((peer.id, prior_peer));
                            scrubbed.push((peer.id, peer.linked_items.clone()));
                        }
                    }
                    (
                        Undo::Removed {
                            item: Box::new(prior),
                            peer_links,
                        },
                        scrubbed,
                    )
                };
                match self.backend.delete(id).await {
                    Ok(()) => {
                        // Peer link scrubbing is best-effort; the
                        // reconciliation fetch converges any failures.
                        for (peer_id, links) in scrubbed {
                            if let Err(error) = self
                                .backend
                                .update(peer_id, ItemPatch::links(links))
                                .await
                            {
                                tracing::warn!(%peer_id, %error, "peer link scrub failed");
                            }
                        }
                        self.reconciler.trigger();
                        Ok(Committed::Deleted(id))
                    }
                    Err(source) => {
                        self.rollback(undo);
                        Err(MutationError {
                            mutation_id,
                            source,
                        })
                    }
                }
            }
        }
    }

    fn rollback(&self, undo: Undo) {
        let mut map = self.local.write();
        match undo {
            Undo::Absent(id) => {
                map.remove(&id);
            }
            Undo::Present(item) => {
                map.insert(item.id, *item);
            }
            Undo::Removed { item, peer_links } => {
                map.insert(item.id, *item);
                for (peer_id, prior) in peer_links {
                    map.insert(peer_id, prior);
                }
            }
        }
    }

    // ========================================================================
    // Link Maintenance
    // ========================================================================

    /// Make `a` and `b` reference each other. Idempotent; both local sides
    /// change in one lock turn, and both are restored if either backend
    /// update fails.
    pub async fn link_pair(&self, a: ItemId, b: ItemId) -> Result<(), LinkError> {
        if a == b {
            return Ok(());
        }
        let Some((next_a, next_b, undo)) = self.edit_pair(a, b, true)? else {
            return Ok(());
        };
        self.commit_pair(a, b, next_a, next_b, undo).await
    }

    /// Remove the mutual reference between `a` and `b`. Idempotent.
    pub async fn unlink_pair(&self, a: ItemId, b: ItemId) -> Result<(), LinkError> {
        if a == b {
            return Ok(());
        }
        let Some((next_a, next_b, undo)) = self.edit_pair(a, b, false)? else {
            return Ok(());
        };
        self.commit_pair(a, b, next_a, next_b, undo).await
    }

    /// Apply the local half of a link edit. Returns `None` when the pair is
    /// already in the requested state.
    #[allow(clippy::type_complexity)]
    fn edit_pair(
        &self,
        a: ItemId,
        b: ItemId,
        linked: bool,
    ) -> Result<Option<(Item, Item, (Item, Item))>, LinkError> {
        let mut map = self.local.write();
        let item_a = map.get(&a).cloned().ok_or(LinkError::Missing(a))?;
        let item_b = map.get(&b).cloned().ok_or(LinkError::Missing(b))?;
        let already = item_a.linked_items.contains(&b) && item_b.linked_items.contains(&a);
        if already == linked {
            return Ok(None);
        }
        let undo = (item_a.clone(), item_b.clone());
        let mut next_a = item_a;
        let mut next_b = item_b;
        if linked {
            next_a.linked_items.insert(b);
            next_b.linked_items.insert(a);
        } else {
            next_a.linked_items.remove(&b);
            next_b.linked_items.remove(&a);
        }
        map.insert(a, next_a.clone());
        map.insert(b, next_b.clone());
        Ok(Some((next_a, next_b, undo)))
    }

    async fn commit_pair(
        &self,
        a: ItemId,
        b: ItemId,
        next_a: Item,
        next_b: Item,
        undo: (Item, Item),
    ) -> Result<(), LinkError> {
        let result_a = self
            .backend
            .update(a, ItemPatch::links(next_a.linked_items))
            .await;
        let result_b = self
            .backend
            .update(b, ItemPatch::links(next_b.linked_items))
            .await;
        match (result_a, result_b) {
            (Ok(_), Ok(_)) => {
                self.reconciler.trigger();
                Ok(())
            }
            (result_a, result_b) => {
                // Best-effort compensation for a half-committed pair; the
                // reconciliation fetch converges anything left over.
                if result_a.is_ok() {
                    let links = undo.0.linked_items.clone();
                    if let Err(error) = self.backend.update(a, ItemPatch::links(links)).await {
                        tracing::warn!(id = %a, %error, "link compensation failed");
                    }
                }
                if result_b.is_ok() {
                    let links = undo.1.linked_items.clone();
                    if let Err(error) = self.backend.update(b, ItemPatch::links(links)).await {
                        tracing::warn!(id = %b, %error, "link compensation failed");
                    }
                }
                {
                    let mut map = self.local.write();
                    map.insert(a, undo.0);
                    map.insert(b, undo.1);
                }
                let source = result_a
                    .err()
                    .or_else(|| result_b.err())
                    .expect("at least one side failed");
                Err(LinkError::Commit { a, b, source })
            }
        }
    }
}
