//! Session orchestration: transcript in, confirmed mutations out.
//!
//! `CommandSession` wires the pipeline together: interpretation, reference
//! resolution for edit/delete, card construction, commit-on-approve, and
//! the post-batch relationship pass. Observers register event handlers to
//! follow progress; the session never renders anything itself.

use crate::affinity::Linker;
use crate::confirm::{
    ApproveError, BatchReport, CardError, CardId, ConfirmationBatch, ConfirmationCard,
    BATCH_CLOSE_DELAY,
};
use crate::interpret::{InterpretError, Interpreter, Operation};
use crate::resolve::resolve;
use minder_model::{CandidateItem, Item, ItemId, Origin};
use minder_store::{Committed, OptimisticStore};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Events & Outcomes
// ============================================================================

/// Progress events for observers (UI, logs, tests).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Interpreted {
        operation: Operation,
        candidates: usize,
        confidence: f32,
    },
    CardsReady {
        count: usize,
    },
    NothingMatched {
        reference: String,
    },
    CardApproved {
        card_id: CardId,
    },
    CardFailed {
        card_id: CardId,
        error: String,
    },
    AutoLinked {
        links: usize,
    },
    BatchClosed {
        approved: usize,
        rejected: usize,
    },
}

pub type SessionEventHandler = Box<dyn Fn(SessionEvent) + Send + Sync>;

/// What one submitted command produced.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Cards awaiting the user's decisions.
    Confirmation(ConfirmationBatch),
    /// The reference resolved to nothing; the operation is abandoned.
    /// Informational, not an error.
    NothingMatched { reference: String },
    /// Query results, no cards.
    Matches(Vec<Item>),
}

/// Post-closure batch summary.
#[derive(Debug, Clone, Copy)]
pub struct BatchSummary {
    pub approved: usize,
    pub rejected: usize,
    pub auto_links: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Interpret(#[from] InterpretError),
}

// ============================================================================
// Session
// ============================================================================

pub struct CommandSession {
    interpreter: Interpreter,
    store: Arc<OptimisticStore>,
    linker: Linker,
    handlers: Vec<SessionEventHandler>,
}

impl CommandSession {
    pub fn new(interpreter: Interpreter, store: Arc<OptimisticStore>) -> Self {
        let linker = Linker::new(Arc::clone(&store));
        Self {
            interpreter,
            store,
            linker,
            handlers: Vec::new(),
        }
    }

    pub fn on_event(&mut self, handler: SessionEventHandler) {
        self.handlers.push(handler);
    }

    pub fn store(&self) -> &Arc<OptimisticStore> {
        &self.store
    }

    fn emit(&self, event: SessionEvent) {
        for handler in &self.handlers {
            handler(event.clone());
        }
    }

    /// Interpret one command and route it to an outcome. Pass
    /// `asr_confidence: None` for typed input; `Some(confidence)` marks the
    /// resulting creations as voice-originated.
    pub async fn submit(
        &self,
        transcript: &str,
        asr_confidence: Option<f32>,
    ) -> Result<CommandOutcome, SessionError> {
        let now = chrono::Utc::now();
        let corpus = self.store.items();
        let asr = asr_confidence.unwrap_or(1.0);

        let interpretation = self
            .interpreter
            .interpret(transcript, asr, &corpus, now)
            .await?;
        self.emit(SessionEvent::Interpreted {
            operation: interpretation.operation,
            candidates: interpretation.candidates.len(),
            confidence: interpretation.confidence,
        });

        let origin = match asr_confidence {
            Some(_) => Origin::voice(interpretation.confidence),
            None => Origin::Manual,
        };

        let cards = match interpretation.operation {
            Operation::Create => interpretation
                .candidates
                .into_iter()
                .map(ConfirmationCard::create)
                .collect::<Vec<_>>(),
            Operation::Edit | Operation::Delete => {
                let (cards, references) = self.resolve_candidates(
                    interpretation.operation,
                    &interpretation.candidates,
                    &corpus,
                    now,
                );
                if cards.is_empty() {
                    let reference = references.join(", ");
                    self.emit(SessionEvent::NothingMatched {
                        reference: reference.clone(),
                    });
                    return Ok(CommandOutcome::NothingMatched { reference });
                }
                cards
            }
            Operation::Query => {
                let reference = interpretation
                    .candidates
                    .first()
                    .map(|c| c.reference_text().to_string())
                    .unwrap_or_else(|| transcript.to_string());
                return Ok(CommandOutcome::Matches(resolve(&reference, &corpus, now)));
            }
        };

        self.emit(SessionEvent::CardsReady { count: cards.len() });
        Ok(CommandOutcome::Confirmation(ConfirmationBatch::new(
            origin, cards,
        )))
    }

    /// Resolve each candidate's reference to concrete items and build one
    /// card per matched item, deduplicated across candidates.
    fn resolve_candidates(
        &self,
        operation: Operation,
        candidates: &[CandidateItem],
        corpus: &[Item],
        now: chrono::DateTime<chrono::Utc>,
    ) -> (Vec<ConfirmationCard>, Vec<String>) {
        let mut cards = Vec::new();
        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut references = Vec::new();
        for candidate in candidates {
            let reference = candidate.reference_text().to_string();
            for matched in resolve(&reference, corpus, now) {
                if !seen.insert(matched.id) {
                    continue;
                }
                let card = match operation {
                    Operation::Edit => ConfirmationCard::edit(matched, candidate.clone()),
                    Operation::Delete => ConfirmationCard::delete(matched),
                    _ => continue,
                };
                cards.push(card);
            }
            references.push(reference);
        }
        (cards, references)
    }

    // ========================================================================
    // Card Decisions
    // ========================================================================

    /// Approve one card, emitting progress events.
    pub async fn approve(
        &self,
        batch: &mut ConfirmationBatch,
        card_id: CardId,
    ) -> Result<Committed, ApproveError> {
        match batch.approve(card_id, &self.store).await {
            Ok(committed) => {
                self.emit(SessionEvent::CardApproved { card_id });
                Ok(committed)
            }
            Err(error) => {
                if let ApproveError::Mutation(_) = &error {
                    self.emit(SessionEvent::CardFailed {
                        card_id,
                        error: error.to_string(),
                    });
                }
                Err(error)
            }
        }
    }

    pub fn reject(&self, batch: &mut ConfirmationBatch, card_id: CardId) -> Result<(), CardError> {
        batch.reject(card_id)
    }

    pub async fn approve_all(&self, batch: &mut ConfirmationBatch) -> BatchReport {
        let report = batch.approve_all(&self.store).await;
        for (card_id, error) in &report.failed {
            self.emit(SessionEvent::CardFailed {
                card_id: *card_id,
                error: error.clone(),
            });
        }
        report
    }

    pub fn reject_all(&self, batch: &mut ConfirmationBatch) {
        batch.reject_all();
    }

    // ========================================================================
    // Batch Closure
    // ========================================================================

    /// Close out a fully terminal batch: run the relationship pass over what
    /// it created, wait out the display delay, and report.
    ///
    /// Link failures never surface here; linking is best-effort.
    pub async fn finalize(&self, batch: ConfirmationBatch) -> BatchSummary {
        debug_assert!(batch.is_closed(), "finalize called on an open batch");

        let created = batch.created_items();
        let mut auto_links = 0;
        if created.len() > 1 {
            // Items created together belong together.
            auto_links += self.linker.auto_link_batch(&created).await;
        } else if created.len() == 1 && batch.origin().is_voice() {
            let item = &created[0];
            let corpus: Vec<Item> = self
                .store
                .items()
                .into_iter()
                .filter(|i| i.id != item.id)
                .collect();
            auto_links += self.linker.auto_link_single(item, &corpus).await;
        }
        if auto_links > 0 {
            self.emit(SessionEvent::AutoLinked { links: auto_links });
        }

        tokio::time::sleep(BATCH_CLOSE_DELAY).await;
        let summary = BatchSummary {
            approved: batch.approved_count(),
            rejected: batch.rejected_count(),
            auto_links,
        };
        self.emit(SessionEvent::BatchClosed {
            approved: summary.approved,
            rejected: summary.rejected,
        });
        summary
    }
}
