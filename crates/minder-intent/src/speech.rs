//! Speech-capture collaborator interface.
//!
//! Capture emits incremental transcripts while active and one cumulative
//! final transcript when stopped. The backend self-terminates at
//! [`CAPTURE_CEILING`] regardless of what the caller does; nothing in this
//! pipeline depends on stopping it explicitly.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Hard upper bound on one capture session, enforced by the backend.
pub const CAPTURE_CEILING: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    /// Incremental transcript while capture is active.
    Partial { text: String, confidence: f32 },
    /// Cumulative transcript; ends the stream.
    Final { text: String, confidence: f32 },
}

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("capture already running")]
    AlreadyRunning,
    #[error("capture backend error: {0}")]
    Backend(String),
}

/// The speech-capture service.
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    /// Begin capturing; events arrive on the returned channel.
    async fn start(&self) -> Result<mpsc::Receiver<TranscriptEvent>, SpeechError>;

    /// Request the final cumulative transcript early.
    async fn stop(&self) -> Result<(), SpeechError>;
}

// ============================================================================
// Scripted Capture
// ============================================================================

/// Scripted speech source for tests and the offline CLI mode: replays its
/// partials, then the final transcript.
pub struct ScriptedSpeech {
    partials: Vec<(String, f32)>,
    final_text: String,
    final_confidence: f32,
}

impl ScriptedSpeech {
    pub fn new(partials: Vec<(String, f32)>, final_text: &str, final_confidence: f32) -> Self {
        Self {
            partials,
            final_text: final_text.to_string(),
            final_confidence: final_confidence.clamp(0.0, 1.0),
        }
    }

    /// A capture that immediately finalizes with the given transcript.
    pub fn finalized(text: &str, confidence: f32) -> Self {
        Self::new(Vec::new(), text, confidence)
    }
}

#[async_trait]
impl SpeechCapture for ScriptedSpeech {
    async fn start(&self) -> Result<mpsc::Receiver<TranscriptEvent>, SpeechError> {
        let (tx, rx) = mpsc::channel(8);
        let partials = self.partials.clone();
        let final_text = self.final_text.clone();
        let final_confidence = self.final_confidence;
        tokio::spawn(async move {
            for (text, confidence) in partials {
                if tx
                    .send(TranscriptEvent::Partial { text, confidence })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx
                .send(TranscriptEvent::Final {
                    text: final_text,
                    confidence: final_confidence,
                })
                .await;
        });
        Ok(rx)
    }

    async fn stop(&self) -> Result<(), SpeechError> {
        Ok(())
    }
}

/// Drain a capture stream to its final transcript.
pub async fn collect_final(
    mut rx: mpsc::Receiver<TranscriptEvent>,
) -> Option<(String, f32)> {
    while let Some(event) = rx.recv().await {
        if let TranscriptEvent::Final { text, confidence } = event {
            return Some((text, confidence));
        }
    }
    None
}
