//! Relationship engine: pairwise affinity scoring and link policy.
//!
//! Affinity is additive over a fixed set of signals, all driven by
//! declarative tables so new rules are data, not branches. Two policies sit
//! on the same scorer:
//!
//! 1. *Suggestion*: score one item against the corpus and surface the
//!    eligible set for manual approval.
//! 2. *Auto-link*: items created together in one batch are linked
//!    pairwise; a single newly created voice item is linked to at most the
//!    top [`AUTO_LINK_CAP`] eligible existing items.
//!
//! Linking is best-effort everywhere: failures are logged and swallowed,
//! never allowed to block or roll back the item mutation that triggered
//! them.

use chrono::Duration;
use minder_model::{Item, ItemId, ItemKind};
use minder_store::{LinkError, OptimisticStore};
use std::sync::Arc;

/// Affinity at or above this is eligible for linking.
pub const LINK_THRESHOLD: f32 = 30.0;

/// Blast-radius bound for auto-linking one new item into the existing set.
pub const AUTO_LINK_CAP: usize = 2;

// ============================================================================
// Rule Tables
// ============================================================================

/// Domain vocabulary grouped by semantic category. A keyword shared by both
/// items' searchable text scores +10, once per distinct keyword.
const SHARED_VOCABULARY: &[(&str, &[&str])] = &[
    (
        "meeting",
        &[
            "meeting", "standup", "sync", "call", "review", "retro", "demo", "1:1",
        ],
    ),
    (
        "task",
        &[
            "task", "todo", "deadline", "due", "finish", "complete", "deliver",
        ],
    ),
    (
        "note",
        &["note", "notes", "summary", "minutes", "idea", "draft"],
    ),
    (
        "project",
        &[
            "project", "plan", "planning", "launch", "release", "sprint", "milestone", "roadmap",
        ],
    ),
];

struct CrossTypeRule {
    from: ItemKind,
    to: ItemKind,
    keywords: &'static [&'static str],
}

/// Ordered kind-pair rules. A keyword hit in either item's searchable text
/// scores +40, at most once per pair.
const CROSS_TYPE_RULES: &[CrossTypeRule] = &[
    CrossTypeRule {
        from: ItemKind::Event,
        to: ItemKind::Task,
        keywords: &["prepare", "agenda", "action item", "follow up", "todo"],
    },
    CrossTypeRule {
        from: ItemKind::Task,
        to: ItemKind::Event,
        keywords: &["before the meeting", "for the meeting", "presentation", "slides", "demo"],
    },
    CrossTypeRule {
        from: ItemKind::Event,
        to: ItemKind::Note,
        keywords: &["minutes", "notes", "summary", "recap"],
    },
    CrossTypeRule {
        from: ItemKind::Note,
        to: ItemKind::Event,
        keywords: &["discussed", "decided", "agenda", "meeting notes"],
    },
    CrossTypeRule {
        from: ItemKind::Task,
        to: ItemKind::Note,
        keywords: &["reference", "spec", "document", "writeup"],
    },
    CrossTypeRule {
        from: ItemKind::Note,
        to: ItemKind::Task,
        keywords: &["todo", "action", "next step", "follow up"],
    },
];

// ============================================================================
// Scoring
// ============================================================================

/// Additive affinity between two items. Symmetric in its arguments.
pub fn score_affinity(a: &Item, b: &Item) -> f32 {
    let text_a = a.searchable_text();
    let text_b = b.searchable_text();
    let mut score = 0.0f32;

    // Shared domain keywords, +10 per distinct keyword present in both.
    for (_, keywords) in SHARED_VOCABULARY {
        for keyword in *keywords {
            if text_a.contains(keyword) && text_b.contains(keyword) {
                score += 10.0;
            }
        }
    }

    // Anchor dates within a week of each other.
    let gap = a.anchor_time().signed_duration_since(b.anchor_time());
    if gap.abs() <= Duration::days(7) {
        score += 20.0;
    }

    // Shared attendees.
    if a.attendees()
        .iter()
        .any(|attendee| b.attendees().contains(attendee))
    {
        score += 30.0;
    }

    // Explicit mention: a word longer than 3 characters from one title
    // appearing in the other's searchable text.
    if mentions(&a.title, &text_b) || mentions(&b.title, &text_a) {
        score += 50.0;
    }

    // Cross-type rule for the kind pair, either direction, at most once.
    let rule = rule_for(a.kind(), b.kind()).or_else(|| rule_for(b.kind(), a.kind()));
    if let Some(rule) = rule {
        let hit = rule
            .keywords
            .iter()
            .any(|kw| text_a.contains(kw) || text_b.contains(kw));
        if hit {
            score += 40.0;
        }
    }

    score
}

fn rule_for(from: ItemKind, to: ItemKind) -> Option<&'static CrossTypeRule> {
    CROSS_TYPE_RULES
        .iter()
        .find(|rule| rule.from == from && rule.to == to)
}

fn mentions(title: &str, other_text: &str) -> bool {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 3)
        .any(|word| other_text.contains(word))
}

/// Link-eligible peers of `item`, highest affinity first. Already-linked
/// peers and the item itself are excluded.
pub fn suggestions(item: &Item, corpus: &[Item]) -> Vec<(Item, f32)> {
    let mut eligible: Vec<(Item, f32)> = corpus
        .iter()
        .filter(|peer| peer.id != item.id && !item.linked_items.contains(&peer.id))
        .filter_map(|peer| {
            let score = score_affinity(item, peer);
            (score >= LINK_THRESHOLD).then(|| (peer.clone(), score))
        })
        .collect();
    eligible.sort_by(|a, b| b.1.total_cmp(&a.1));
    eligible
}

// ============================================================================
// Link Policies
// ============================================================================

/// Applies link decisions through the mutation layer, which owns the actual
/// symmetric set updates.
pub struct Linker {
    store: Arc<OptimisticStore>,
}

impl Linker {
    pub fn new(store: Arc<OptimisticStore>) -> Self {
        Self { store }
    }

    pub async fn link(&self, a: ItemId, b: ItemId) -> Result<(), LinkError> {
        self.store.link_pair(a, b).await
    }

    pub async fn unlink(&self, a: ItemId, b: ItemId) -> Result<(), LinkError> {
        self.store.unlink_pair(a, b).await
    }

    /// Link the pair only when their affinity clears [`LINK_THRESHOLD`].
    /// Returns whether a link was made.
    pub async fn link_if_affine(&self, a: &Item, b: &Item) -> Result<bool, LinkError> {
        if score_affinity(a, b) < LINK_THRESHOLD {
            return Ok(false);
        }
        self.store.link_pair(a.id, b.id).await?;
        Ok(true)
    }

    /// Pairwise-link every item created together in one batch. Best-effort.
    pub async fn auto_link_batch(&self, created: &[Item]) -> usize {
        let mut linked = 0;
        for (i, a) in created.iter().enumerate() {
            for b in &created[i + 1..] {
                match self.store.link_pair(a.id, b.id).await {
                    Ok(()) => linked += 1,
                    Err(error) => {
                        tracing::warn!(a = %a.id, b = %b.id, %error, "batch auto-link failed");
                    }
                }
            }
        }
        linked
    }

    /// Auto-link one newly created item to at most [`AUTO_LINK_CAP`] of its
    /// most affine existing peers. Best-effort.
    pub async fn auto_link_single(&self, item: &Item, corpus: &[Item]) -> usize {
        let mut linked = 0;
        for (peer, score) in suggestions(item, corpus).into_iter().take(AUTO_LINK_CAP) {
            match self.store.link_pair(item.id, peer.id).await {
                Ok(()) => {
                    tracing::debug!(a = %item.id, b = %peer.id, score, "auto-linked");
                    linked += 1;
                }
                Err(error) => {
                    tracing::warn!(a = %item.id, b = %peer.id, %error, "auto-link failed");
                }
            }
        }
        linked
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use minder_model::{CandidateItem, Origin};

    fn item(kind: ItemKind, title: &str, description: Option<&str>) -> Item {
        CandidateItem {
            kind: Some(kind),
            title: Some(title.to_string()),
            description: description.map(str::to_string),
            ..Default::default()
        }
        .into_item("alice", Origin::Manual, Utc::now())
    }

    #[test]
    fn scorer_is_symmetric() {
        let event = item(ItemKind::Event, "Planning Meeting", Some("prepare agenda"));
        let task = item(ItemKind::Task, "Prepare slides for meeting", None);
        assert_eq!(score_affinity(&event, &task), score_affinity(&task, &event));
    }

    #[test]
    fn cross_type_example_is_link_eligible() {
        let event = item(ItemKind::Event, "Planning Meeting", Some("prepare agenda"));
        let task = item(ItemKind::Task, "Prepare slides for meeting", None);
        let score = score_affinity(&event, &task);
        // Cross-type +40 plus shared-keyword and mention hits.
        assert!(score >= LINK_THRESHOLD, "score {score} below threshold");
        assert!(score >= 40.0 + 10.0);
    }

    #[test]
    fn unrelated_items_score_below_threshold_on_text_signals() {
        let a = item(ItemKind::Note, "Wine list", Some("chianti"));
        let b = item(ItemKind::Event, "Dentist", None);
        // Same-day creation still grants the date signal, nothing else.
        assert!(score_affinity(&a, &b) < LINK_THRESHOLD);
    }

    #[test]
    fn attendee_overlap_scores() {
        let mut a = item(ItemKind::Event, "Standup", None);
        let mut b = item(ItemKind::Event, "Retro", None);
        if let minder_model::ItemBody::Event { attendees, .. } = &mut a.body {
            *attendees = vec!["carol".into()];
        }
        if let minder_model::ItemBody::Event { attendees, .. } = &mut b.body {
            *attendees = vec!["carol".into(), "dave".into()];
        }
        // +20 same-week anchors, +30 shared attendee.
        assert!(score_affinity(&a, &b) >= 50.0);
    }

    #[tokio::test]
    async fn link_if_affine_respects_the_threshold() {
        use minder_store::{MemoryStore, Mutation, OptimisticStore};
        use std::sync::Arc;

        let backend = Arc::new(MemoryStore::new());
        let store = OptimisticStore::new(backend, "alice");
        let affine_a = store
            .apply(Mutation::Create(item(
                ItemKind::Event,
                "Planning Meeting",
                Some("prepare agenda"),
            )))
            .await
            .unwrap()
            .item()
            .unwrap()
            .clone();
        let affine_b = store
            .apply(Mutation::Create(item(
                ItemKind::Task,
                "Prepare slides for meeting",
                None,
            )))
            .await
            .unwrap()
            .item()
            .unwrap()
            .clone();
        let stranger = store
            .apply(Mutation::Create(item(ItemKind::Note, "Wine list", None)))
            .await
            .unwrap()
            .item()
            .unwrap()
            .clone();

        let linker = Linker::new(Arc::clone(&store));
        assert!(linker.link_if_affine(&affine_a, &affine_b).await.unwrap());
        assert!(!linker.link_if_affine(&affine_a, &stranger).await.unwrap());

        assert!(store.get(affine_a.id).unwrap().linked_items.contains(&affine_b.id));
        assert!(!store.get(affine_a.id).unwrap().linked_items.contains(&stranger.id));
    }

    #[tokio::test]
    async fn linker_link_and_unlink_round_trip() {
        use minder_store::{MemoryStore, Mutation, OptimisticStore};
        use std::sync::Arc;

        let backend = Arc::new(MemoryStore::new());
        let store = OptimisticStore::new(backend, "alice");
        let a = store
            .apply(Mutation::Create(item(ItemKind::Event, "Standup", None)))
            .await
            .unwrap()
            .item()
            .unwrap()
            .clone();
        let b = store
            .apply(Mutation::Create(item(ItemKind::Note, "Standup notes", None)))
            .await
            .unwrap()
            .item()
            .unwrap()
            .clone();

        let linker = Linker::new(Arc::clone(&store));
        linker.link(a.id, b.id).await.unwrap();
        assert!(store.get(a.id).unwrap().linked_items.contains(&b.id));
        assert!(store.get(b.id).unwrap().linked_items.contains(&a.id));

        linker.unlink(a.id, b.id).await.unwrap();
        assert!(store.get(a.id).unwrap().linked_items.is_empty());
        assert!(store.get(b.id).unwrap().linked_items.is_empty());
    }

    #[test]
    fn suggestions_exclude_self_and_linked_peers() {
        let a = item(ItemKind::Event, "Planning Meeting", Some("prepare agenda"));
        let mut b = item(ItemKind::Task, "Prepare slides for meeting", None);
        b.linked_items.insert(a.id);
        let mut a_linked = a.clone();
        a_linked.linked_items.insert(b.id);

        let corpus = vec![a_linked.clone(), b.clone()];
        assert!(suggestions(&a_linked, &corpus).is_empty());

        let fresh = item(ItemKind::Task, "Prepare handout for meeting", None);
        let got = suggestions(&fresh, &corpus);
        assert!(!got.is_empty());
    }
}
