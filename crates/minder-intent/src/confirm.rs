//! Confirmation workflow: one card per candidate mutation.
//!
//! Cards are tiny state machines: `pending → approved` or `pending →
//! rejected`, both terminal. A terminal card accepts no further edits or
//! flag changes. Approval is the only path into the mutation layer; a failed
//! commit leaves the card pending with its error recorded and never blocks
//! sibling cards.

use crate::interpret::Operation;
use chrono::Utc;
use minder_model::{CandidateItem, Item, Origin};
use minder_store::{Committed, Mutation, MutationError, OptimisticStore};
use std::time::Duration;
use uuid::Uuid;

/// How long a fully terminal batch stays visible before auto-closing.
/// Display policy, not a correctness requirement.
pub const BATCH_CLOSE_DELAY: Duration = Duration::from_millis(1500);

pub type CardId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("card {0} not found in batch")]
    UnknownCard(CardId),
    #[error("card {0} is already terminal")]
    Terminal(CardId),
}

#[derive(Debug, thiserror::Error)]
pub enum ApproveError {
    #[error(transparent)]
    Card(#[from] CardError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

// ============================================================================
// Cards
// ============================================================================

/// One pending decision: a candidate mutation awaiting approve/reject/edit.
#[derive(Debug, Clone)]
pub struct ConfirmationCard {
    pub id: CardId,
    pub operation: Operation,
    /// Editable payload while pending.
    pub candidate: CandidateItem,
    /// The matched concrete item, for edit/delete.
    pub target: Option<Item>,
    state: CardState,
    /// Last commit failure, surfaced per card.
    pub last_error: Option<String>,
    /// What the approval committed, once approved.
    committed: Option<Committed>,
}

impl ConfirmationCard {
    fn new(operation: Operation, candidate: CandidateItem, target: Option<Item>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            candidate,
            target,
            state: CardState::Pending,
            last_error: None,
            committed: None,
        }
    }

    pub fn create(candidate: CandidateItem) -> Self {
        Self::new(Operation::Create, candidate, None)
    }

    pub fn edit(target: Item, candidate: CandidateItem) -> Self {
        Self::new(Operation::Edit, candidate, Some(target))
    }

    pub fn delete(target: Item) -> Self {
        Self::new(Operation::Delete, CandidateItem::default(), Some(target))
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state != CardState::Pending
    }

    pub fn committed(&self) -> Option<&Committed> {
        self.committed.as_ref()
    }
}

// ============================================================================
// Batch
// ============================================================================

/// Summary of a bulk approve pass.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub approved: usize,
    pub failed: Vec<(CardId, String)>,
}

/// All cards produced by one interpreted command.
#[derive(Debug)]
pub struct ConfirmationBatch {
    origin: Origin,
    cards: Vec<ConfirmationCard>,
}

impl ConfirmationBatch {
    pub fn new(origin: Origin, cards: Vec<ConfirmationCard>) -> Self {
        Self { origin, cards }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn cards(&self) -> &[ConfirmationCard] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Every card is terminal; the batch-closure policy may fire.
    pub fn is_closed(&self) -> bool {
        self.cards.iter().all(ConfirmationCard::is_terminal)
    }

    pub fn approved_count(&self) -> usize {
        self.count(CardState::Approved)
    }

    pub fn rejected_count(&self) -> usize {
        self.count(CardState::Rejected)
    }

    fn count(&self, state: CardState) -> usize {
        self.cards.iter().filter(|c| c.state == state).count()
    }

    /// Items that approved create cards committed, in card order.
    pub fn created_items(&self) -> Vec<Item> {
        self.cards
            .iter()
            .filter(|c| c.operation == Operation::Create)
            .filter_map(|c| c.committed())
            .filter_map(Committed::item)
            .cloned()
            .collect()
    }

    fn card_mut(&mut self, id: CardId) -> Result<&mut ConfirmationCard, CardError> {
        let card = self
            .cards
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(CardError::UnknownCard(id))?;
        if card.is_terminal() {
            return Err(CardError::Terminal(id));
        }
        Ok(card)
    }

    /// Merge an edit into a pending card's payload.
    pub fn edit(&mut self, id: CardId, patch: &CandidateItem) -> Result<(), CardError> {
        self.card_mut(id)?.candidate.merge(patch);
        Ok(())
    }

    /// Reject a pending card. No persistence call.
    pub fn reject(&mut self, id: CardId) -> Result<(), CardError> {
        self.card_mut(id)?.state = CardState::Rejected;
        Ok(())
    }

    /// Approve a pending card: commit its mutation through the store. On
    /// failure the card stays pending and the error is recorded on it.
    pub async fn approve(
        &mut self,
        id: CardId,
        store: &OptimisticStore,
    ) -> Result<Committed, ApproveError> {
        let origin = self.origin;
        let card = self.card_mut(id)?;
        let mutation = build_mutation(card, origin, store.owner_id());
        match store.apply(mutation).await {
            Ok(committed) => {
                card.state = CardState::Approved;
                card.last_error = None;
                card.committed = Some(committed.clone());
                Ok(committed)
            }
            Err(error) => {
                card.last_error = Some(error.to_string());
                Err(error.into())
            }
        }
    }

    /// Approve every pending card. A failing commit does not abort the rest.
    pub async fn approve_all(&mut self, store: &OptimisticStore) -> BatchReport {
        let pending: Vec<CardId> = self
            .cards
            .iter()
            .filter(|c| !c.is_terminal())
            .map(|c| c.id)
            .collect();
        let mut report = BatchReport::default();
        for id in pending {
            match self.approve(id, store).await {
                Ok(_) => report.approved += 1,
                Err(error) => report.failed.push((id, error.to_string())),
            }
        }
        report
    }

    /// Reject every pending card.
    pub fn reject_all(&mut self) {
        for card in &mut self.cards {
            if !card.is_terminal() {
                card.state = CardState::Rejected;
            }
        }
    }
}

fn build_mutation(card: &ConfirmationCard, origin: Origin, owner_id: &str) -> Mutation {
    match card.operation {
        Operation::Create => {
            Mutation::Create(card.candidate.clone().into_item(owner_id, origin, Utc::now()))
        }
        // Queries never produce cards; the constructors only admit the three
        // mutating operations.
        Operation::Query => unreachable!("query operations have no confirmation cards"),
        Operation::Edit => {
            let target = card.target.as_ref().expect("edit card has a target");
            Mutation::Update {
                id: target.id,
                patch: card.candidate.clone().into_patch(),
            }
        }
        Operation::Delete => {
            let target = card.target.as_ref().expect("delete card has a target");
            Mutation::Delete { id: target.id }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
