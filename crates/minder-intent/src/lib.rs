//! Minder Intent Pipeline
//!
//! Turns a free-text or spoken command into confirmed mutations against the
//! item store:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      INTENT → MUTATION PIPELINE                      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  transcript ──► Interpreter ──► {operation, candidates, confidence}  │
//! │                     │                                                │
//! │        create ──────┼───── edit / delete ──► Entity Resolver         │
//! │            │        │                              │                 │
//! │            ▼        │                              ▼                 │
//! │      ┌──────────────┴──────────────┐      concrete matched items     │
//! │      │     Confirmation Cards      │◄────────────┘                   │
//! │      │  (approve / reject / edit)  │                                 │
//! │      └──────────────┬──────────────┘                                 │
//! │                     │ approve                                        │
//! │                     ▼                                                │
//! │          Mutation Layer (optimistic) ──► Relationship Engine         │
//! │                                            (auto-link)               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing durable happens without a card being approved. Interpretation
//! output is untrusted and coerced defensively; vague references ("all
//! overdue tasks", "my standup") are resolved against the current corpus
//! before any card exists; relationship links are best-effort and never
//! block the mutation that triggered them.

pub mod affinity;
pub mod confirm;
pub mod interpret;
pub mod llm;
pub mod resolve;
pub mod session;
pub mod speech;

pub use affinity::{score_affinity, suggestions, Linker, AUTO_LINK_CAP, LINK_THRESHOLD};
pub use confirm::{
    ApproveError, BatchReport, CardError, CardId, CardState, ConfirmationBatch, ConfirmationCard,
    BATCH_CLOSE_DELAY,
};
pub use interpret::{InterpretError, Interpretation, Interpreter, Operation};
pub use llm::{CompletionClient, CompletionError, MockCompletion};
pub use resolve::{resolve, resolve_scored};
pub use session::{
    BatchSummary, CommandOutcome, CommandSession, SessionError, SessionEvent, SessionEventHandler,
};
pub use speech::{
    collect_final, ScriptedSpeech, SpeechCapture, SpeechError, TranscriptEvent, CAPTURE_CEILING,
};
