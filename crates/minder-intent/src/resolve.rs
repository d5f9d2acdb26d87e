//! Entity resolution: a free-text reference → concrete items.
//!
//! Two mutually exclusive modes, bulk checked first:
//!
//! - **Bulk-predicate mode** for vague plural references ("all overdue
//!   tasks"): a declarative rule table maps category tokens to predicates
//!   and selection is a direct filter over the corpus, bypassing scoring.
//! - **Fuzzy mode** otherwise: weighted substring scoring across every
//!   searchable field, a multi-term bonus, and a recency boost.
//!
//! An empty result is not an error; the caller surfaces "nothing matched"
//! to the user instead of silently dropping the operation.

use chrono::{DateTime, Duration, Utc};
use minder_model::{Item, ItemKind};
use regex::Regex;
use std::sync::LazyLock;

/// Terms shorter than this, and anything here, never participate in fuzzy
/// scoring.
const STOPWORDS: &[&str] = &[
    "the", "and", "or", "a", "an", "to", "for", "with", "my", "i", "me",
];

static TERM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("term regex"));

// ============================================================================
// Bulk-Predicate Rules
// ============================================================================

struct BulkRule {
    /// Category token looked for in the lowered reference. Substring
    /// containment on purpose: "meeting" matches "meetings". Coarse, but
    /// that is the documented behavior of bulk references.
    token: &'static str,
    applies: fn(&Item, DateTime<Utc>) -> bool,
}

/// Order matters: the date-based categories win over bare kind tokens, so
/// "all overdue tasks" selects by due date, not by kind alone.
const BULK_RULES: &[BulkRule] = &[
    BulkRule {
        token: "overdue",
        applies: |item, now| {
            item.kind() == ItemKind::Task
                && !item.completed()
                && item.due_at().is_some_and(|due| due < now)
        },
    },
    BulkRule {
        token: "today",
        applies: |item, now| {
            item.starts_at()
                .or_else(|| item.due_at())
                .is_some_and(|t| t.date_naive() == now.date_naive())
        },
    },
    BulkRule {
        token: "meeting",
        applies: |item, _| item.kind() == ItemKind::Event,
    },
    BulkRule {
        token: "event",
        applies: |item, _| item.kind() == ItemKind::Event,
    },
    BulkRule {
        token: "task",
        applies: |item, _| item.kind() == ItemKind::Task,
    },
    BulkRule {
        token: "note",
        applies: |item, _| item.kind() == ItemKind::Note,
    },
];

/// Bulk mode triggers when the reference contains the word "all" together
/// with a recognized category token.
fn bulk_rule_for(lowered: &str) -> Option<&'static BulkRule> {
    let has_all = lowered.split_whitespace().any(|w| w == "all");
    if !has_all {
        return None;
    }
    BULK_RULES.iter().find(|rule| lowered.contains(rule.token))
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve a reference against the corpus. May be empty; that is a
/// "nothing matched" outcome, not an error.
pub fn resolve(reference: &str, corpus: &[Item], now: DateTime<Utc>) -> Vec<Item> {
    let lowered = reference.to_lowercase();
    if let Some(rule) = bulk_rule_for(&lowered) {
        return corpus
            .iter()
            .filter(|item| (rule.applies)(item, now))
            .cloned()
            .collect();
    }
    resolve_scored(reference, corpus, now)
        .into_iter()
        .map(|(item, _)| item)
        .collect()
}

/// Fuzzy mode with scores exposed, for ranking-sensitive callers and tests.
/// Descending by score; ties keep corpus order.
pub fn resolve_scored(reference: &str, corpus: &[Item], now: DateTime<Utc>) -> Vec<(Item, f32)> {
    let terms = query_terms(reference);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(Item, f32)> = corpus
        .iter()
        .filter_map(|item| {
            let score = score_item(item, &terms, now);
            (score > 0.0).then(|| (item.clone(), score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}

fn query_terms(reference: &str) -> Vec<String> {
    let lowered = reference.to_lowercase();
    TERM_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn score_item(item: &Item, terms: &[String], now: DateTime<Utc>) -> f32 {
    let title = item.title.to_lowercase();
    let description = item.description.as_deref().unwrap_or_default().to_lowercase();
    let content = item.content().unwrap_or_default().to_lowercase();
    let location = item.location().unwrap_or_default().to_lowercase();
    let tags = item.tags().join(" ").to_lowercase();
    let attendees = item.attendees().join(" ").to_lowercase();

    let mut score = 0.0f32;
    let mut matched_terms = 0usize;
    for term in terms {
        let mut hit = false;
        if title.contains(term) {
            score += 10.0;
            if title == *term {
                score += 20.0;
            }
            hit = true;
        }
        if !description.is_empty() && description.contains(term) {
            score += 5.0;
            hit = true;
        }
        if !content.is_empty() && content.contains(term) {
            score += 3.0;
            hit = true;
        }
        if !location.is_empty() && location.contains(term) {
            score += 7.0;
            hit = true;
        }
        if !tags.is_empty() && tags.contains(term) {
            score += 8.0;
            hit = true;
        }
        if !attendees.is_empty() && attendees.contains(term) {
            score += 6.0;
            hit = true;
        }
        if hit {
            matched_terms += 1;
        }
    }

    if matched_terms > 1 {
        score *= 1.0 + 0.5 * (matched_terms - 1) as f32;
    }
    if now.signed_duration_since(item.created_at) <= Duration::days(7) {
        score *= 1.2;
    }
    score
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_terms_drop_stopwords_and_short_tokens() {
        assert_eq!(
            query_terms("delete my standup for the team"),
            vec!["standup", "team"]
        );
        assert!(query_terms("to a i").is_empty());
    }

    #[test]
    fn bulk_rule_requires_the_word_all() {
        assert!(bulk_rule_for("all overdue tasks").is_some());
        assert!(bulk_rule_for("overdue tasks").is_none());
        // "all" must be a whole word.
        assert!(bulk_rule_for("recall that meeting").is_none());
    }

    #[test]
    fn overdue_wins_over_the_kind_token() {
        let rule = bulk_rule_for("all overdue tasks").unwrap();
        assert_eq!(rule.token, "overdue");
    }

    #[test]
    fn kind_tokens_match_plurals_by_substring() {
        assert_eq!(bulk_rule_for("all meetings").unwrap().token, "meeting");
        assert_eq!(bulk_rule_for("all my notes").unwrap().token, "note");
    }
}
