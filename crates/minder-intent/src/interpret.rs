//! Command interpretation: transcript → typed operation + candidate items.
//!
//! The completion collaborator returns free text that is only *likely* to
//! contain a JSON object, so everything it produces goes through one
//! defensive unwrap-and-coerce step: strip code fences, take the first
//! balanced `{…}` substring, parse, then coerce field by field. Minor shape
//! problems are repaired with defaults; only a response with no parseable
//! object at all is an error.

use crate::llm::{CompletionClient, CompletionError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use minder_model::{CandidateItem, Item, ItemKind, Priority};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper bound on existing items embedded in the prompt for reference.
pub const DEFAULT_CONTEXT_LIMIT: usize = 20;

// ============================================================================
// Types
// ============================================================================

/// What the user asked the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Create,
    Edit,
    Delete,
    Query,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Edit => "edit",
            Operation::Delete => "delete",
            Operation::Query => "query",
        };
        f.write_str(s)
    }
}

/// The interpreted command.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub operation: Operation,
    pub candidates: Vec<CandidateItem>,
    /// `min(asr confidence, model confidence)`, clamped to [0, 1].
    pub confidence: f32,
    pub explanation: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error("completion response contained no parseable JSON object")]
    Unparseable { raw: String },
}

// ============================================================================
// Interpreter
// ============================================================================

pub struct Interpreter {
    client: Arc<dyn CompletionClient>,
    context_limit: usize,
}

impl Interpreter {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            context_limit: DEFAULT_CONTEXT_LIMIT,
        }
    }

    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit;
        self
    }

    /// Interpret one transcript against the current item corpus.
    ///
    /// Pure transform plus one outbound call; failures are surfaced to the
    /// caller, never retried here.
    pub async fn interpret(
        &self,
        transcript: &str,
        asr_confidence: f32,
        context: &[Item],
        now: DateTime<Utc>,
    ) -> Result<Interpretation, InterpretError> {
        let sample = &context[..context.len().min(self.context_limit)];
        let prompt = build_prompt(transcript, now, sample);
        let raw = self.client.complete(&prompt).await?;
        parse_completion(&raw, asr_confidence)
    }
}

/// Build the interpretation prompt: the command, the current time, and a
/// bounded sample of the user's existing items for reference.
pub fn build_prompt(transcript: &str, now: DateTime<Utc>, context: &[Item]) -> String {
    let mut listing = String::new();
    for item in context {
        listing.push_str(&format!(
            "- [{}] {} (id {})\n",
            item.kind().as_str(),
            item.title,
            item.id
        ));
    }
    if listing.is_empty() {
        listing.push_str("(none)\n");
    }

    format!(
        r#"You convert one personal-assistant command into a structured operation.

Current time: {now}

The user's existing items, for reference:
{listing}
Command: {transcript}

Respond with ONLY one JSON object:
{{
  "operation": "create" | "edit" | "delete" | "query",
  "confidence": 0.0-1.0,
  "items": [
    {{
      "kind": "event" | "task" | "note",
      "title": "...",
      "description": "...",
      "start_time": "ISO 8601",
      "end_time": "ISO 8601",
      "location": "...",
      "attendees": ["..."],
      "due_date": "ISO 8601",
      "priority": "urgent" | "important" | "optional",
      "completed": false,
      "content": "...",
      "tags": ["..."]
    }}
  ],
  "explanation": "one sentence"
}}

Rules:
1. For edit/delete/query, put the user's reference to the item(s) in "title".
2. Resolve relative dates ("Friday", "tomorrow") against the current time.
3. Omit fields the command does not mention.
4. Do not invent items the user did not ask for."#,
        now = now.to_rfc3339(),
        listing = listing,
        transcript = transcript,
    )
}

// ============================================================================
// Defensive Unwrapping
// ============================================================================

/// Strip leading/trailing markdown code-fence markers, if present.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence.
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

/// Extract the first balanced `{…}` substring, tracking string literals so
/// braces inside quoted values do not confuse the depth count.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Unwrap and coerce one completion response.
pub fn parse_completion(raw: &str, asr_confidence: f32) -> Result<Interpretation, InterpretError> {
    let unfenced = strip_fences(raw);
    let object = balanced_object(unfenced).ok_or_else(|| InterpretError::Unparseable {
        raw: raw.to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(object).map_err(|_| InterpretError::Unparseable {
            raw: raw.to_string(),
        })?;

    let operation = value["operation"]
        .as_str()
        .map(|s| match s.to_lowercase().as_str() {
            "edit" | "update" => Operation::Edit,
            "delete" | "remove" => Operation::Delete,
            "query" | "search" => Operation::Query,
            _ => Operation::Create,
        })
        .unwrap_or_default();

    let candidates = value["items"]
        .as_array()
        .map(|items| items.iter().map(coerce_candidate).collect())
        .unwrap_or_default();

    let model_confidence = value["confidence"].as_f64().unwrap_or(1.0) as f32;
    let confidence = asr_confidence.min(model_confidence).clamp(0.0, 1.0);

    Ok(Interpretation {
        operation,
        candidates,
        confidence,
        explanation: value["explanation"].as_str().map(str::to_string),
    })
}

/// Coerce one raw item object. Never rejects: bad fields are defaulted or
/// dropped.
fn coerce_candidate(value: &serde_json::Value) -> CandidateItem {
    let kind = value["kind"].as_str().and_then(|s| {
        match s.to_lowercase().as_str() {
            "event" => Some(ItemKind::Event),
            "task" => Some(ItemKind::Task),
            "note" => Some(ItemKind::Note),
            _ => None,
        }
    });

    let title = value["title"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| Some("Untitled".to_string()));

    let priority = match value["priority"].as_str() {
        Some(s) => Some(coerce_priority(s)),
        None => None,
    };

    CandidateItem {
        kind: kind.or(Some(ItemKind::Note)),
        title,
        description: value["description"].as_str().map(str::to_string),
        starts_at: coerce_datetime(&value["start_time"]),
        ends_at: coerce_datetime(&value["end_time"]),
        location: value["location"].as_str().map(str::to_string),
        attendees: coerce_string_list(&value["attendees"]),
        due_at: coerce_datetime(&value["due_date"]),
        priority,
        completed: value["completed"].as_bool(),
        content: value["content"].as_str().map(str::to_string),
        tags: coerce_string_list(&value["tags"]),
    }
}

fn coerce_priority(raw: &str) -> Priority {
    match raw.to_lowercase().as_str() {
        "urgent" | "high" => Priority::Urgent,
        "important" | "medium" => Priority::Important,
        "optional" | "low" => Priority::Optional,
        // Outside the enum: default, do not reject.
        _ => Priority::Important,
    }
}

/// Parse a date-like value. Invalid values are dropped, not rejected.
fn coerce_datetime(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}

fn coerce_string_list(value: &serde_json::Value) -> Option<Vec<String>> {
    match value {
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        serde_json::Value::String(s) if !s.is_empty() => Some(vec![s.clone()]),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
