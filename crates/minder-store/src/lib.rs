//! Minder Persistence & Mutation Layer
//!
//! Two halves live here:
//!
//! 1. [`ItemStore`]: the narrow interface to the backing persistence
//!    service: per-item CRUD, list-by-owner, and a push-based change stream.
//!    [`MemoryStore`] is the in-process reference implementation used by the
//!    CLI and the test suites.
//! 2. [`OptimisticStore`]: the mutation/reconciliation layer. It owns the
//!    in-memory item set (it is the *only* writer), applies approved
//!    mutations optimistically before the backend call resolves, rolls back
//!    from a per-mutation undo snapshot on failure, and keeps the local set
//!    converged with the authoritative store through a debounced
//!    reconciliation fetch driven by both mutation completions and push
//!    notifications.
//!
//! ```text
//!   approve ──► optimistic apply ──► commit ──► trigger ─┐
//!                    │ (failure)                          ▼
//!                    └──► rollback (own snapshot)   ┌──────────┐
//!   push event ────────────────────────────────────►│ debounce │──► list()
//!                                                   └──────────┘  overwrite
//! ```

use async_trait::async_trait;
use minder_model::{Item, ItemId, ItemPatch};
use tokio::sync::broadcast;

mod memory;
mod optimistic;

pub use memory::MemoryStore;
pub use optimistic::{
    Committed, LinkError, Mutation, MutationError, OptimisticStore, Reconciler,
    RECONCILE_QUIET_WINDOW,
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("item {0} not found")]
    NotFound(ItemId),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Change Stream
// ============================================================================

/// What kind of remote change a push notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A push notification from the persistence service.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub new: Option<Item>,
    pub old: Option<Item>,
}

// ============================================================================
// Persistence Service Interface
// ============================================================================

/// The persistence collaborator. Implementations sit on the far side of a
/// network boundary; every call is a suspension point.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn create(&self, item: Item) -> StoreResult<Item>;

    async fn get(&self, id: ItemId) -> StoreResult<Item>;

    async fn list(&self, owner_id: &str) -> StoreResult<Vec<Item>>;

    async fn update(&self, id: ItemId, patch: ItemPatch) -> StoreResult<Item>;

    async fn delete(&self, id: ItemId) -> StoreResult<()>;

    /// Subscribe to changes for one owner's items. Events arrive for writes
    /// from any client, including this one.
    fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<ChangeEvent>;
}
