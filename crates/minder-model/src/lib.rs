//! Minder Core Item Model
//!
//! The unit of persistence is the [`Item`]: an event, task, or note owned by
//! one user. Items are produced in two ways, typed in manually or spoken /
//! free-texted and run through the interpretation pipeline, and carry their
//! provenance with them.
//!
//! Alongside the concrete `Item` this crate defines the two partial shapes
//! the pipeline works with:
//!
//! - [`CandidateItem`]: an unconfirmed, possibly incomplete item as parsed
//!   out of a completion response. Exists only until the user confirms or
//!   rejects it.
//! - [`ItemPatch`]: a partial update applied to an existing item.
//!
//! `linked_items` is a symmetric relation: if A references B, B references A.
//! Nothing in this crate enforces that; the mutation layer's link/unlink
//! operations are the only writers allowed to touch the sets.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for an item.
pub type ItemId = Uuid;

// ============================================================================
// Core Types
// ============================================================================

/// Discriminant for the three item shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Event,
    Task,
    Note,
}

impl ItemKind {
    /// Lowercase name as it appears in references and completion output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Event => "event",
            ItemKind::Task => "task",
            ItemKind::Note => "note",
        }
    }
}

/// Task priority. Accepts the legacy high/medium/low spellings on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(alias = "high")]
    Urgent,
    #[default]
    #[serde(alias = "medium")]
    Important,
    #[serde(alias = "low")]
    Optional,
}

/// How an item came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Origin {
    Manual,
    /// Created from speech; carries the interpretation confidence in [0, 1].
    Voice {
        confidence: f32,
    },
}

impl Origin {
    pub fn voice(confidence: f32) -> Self {
        Origin::Voice {
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn is_voice(&self) -> bool {
        matches!(self, Origin::Voice { .. })
    }
}

/// Kind-specific payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemBody {
    Event {
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
        location: Option<String>,
        #[serde(default)]
        attendees: Vec<String>,
    },
    Task {
        due_at: Option<DateTime<Utc>>,
        #[serde(default)]
        priority: Priority,
        #[serde(default)]
        completed: bool,
    },
    Note {
        content: String,
        #[serde(default)]
        tags: Vec<String>,
    },
}

impl ItemBody {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemBody::Event { .. } => ItemKind::Event,
            ItemBody::Task { .. } => ItemKind::Task,
            ItemBody::Note { .. } => ItemKind::Note,
        }
    }
}

/// A persisted event/task/note record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: ItemBody,
    #[serde(default)]
    pub linked_items: BTreeSet<ItemId>,
    pub origin: Origin,
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        self.body.kind()
    }

    pub fn starts_at(&self) -> Option<DateTime<Utc>> {
        match &self.body {
            ItemBody::Event { starts_at, .. } => *starts_at,
            _ => None,
        }
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        match &self.body {
            ItemBody::Task { due_at, .. } => *due_at,
            _ => None,
        }
    }

    pub fn completed(&self) -> bool {
        match &self.body {
            ItemBody::Task { completed, .. } => *completed,
            _ => false,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match &self.body {
            ItemBody::Note { content, .. } if !content.is_empty() => Some(content),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match &self.body {
            ItemBody::Event { location, .. } => location.as_deref(),
            _ => None,
        }
    }

    pub fn attendees(&self) -> &[String] {
        match &self.body {
            ItemBody::Event { attendees, .. } => attendees,
            _ => &[],
        }
    }

    pub fn tags(&self) -> &[String] {
        match &self.body {
            ItemBody::Note { tags, .. } => tags,
            _ => &[],
        }
    }

    /// Best date to anchor relationship scoring on: event start, else task
    /// due date, else creation time.
    pub fn anchor_time(&self) -> DateTime<Utc> {
        self.starts_at()
            .or_else(|| self.due_at())
            .unwrap_or(self.created_at)
    }

    /// Lowercased concatenation of every text field worth searching:
    /// title, description, content, location, tags, attendees.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.title.as_str()];
        if let Some(d) = self.description.as_deref() {
            parts.push(d);
        }
        if let Some(c) = self.content() {
            parts.push(c);
        }
        if let Some(l) = self.location() {
            parts.push(l);
        }
        parts.extend(self.tags().iter().map(String::as_str));
        parts.extend(self.attendees().iter().map(String::as_str));
        parts.join(" ").to_lowercase()
    }
}

// ============================================================================
// Candidate Items
// ============================================================================

/// A partial, unconfirmed item as produced by interpretation.
///
/// Every field is optional: the completion output may omit anything, and the
/// confirmation workflow lets the user fill in or correct fields before a
/// mutation is committed. This is the editable payload on a confirmation
/// card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub kind: Option<ItemKind>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub attendees: Option<Vec<String>>,
    pub due_at: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub completed: Option<bool>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl CandidateItem {
    /// Merge an edit into this candidate. Set fields win, unset fields keep
    /// the current value.
    pub fn merge(&mut self, patch: &CandidateItem) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = patch.$field.clone() {
                    self.$field = Some(v);
                }
            };
        }
        take!(kind);
        take!(title);
        take!(description);
        take!(starts_at);
        take!(ends_at);
        take!(location);
        take!(attendees);
        take!(due_at);
        take!(priority);
        take!(completed);
        take!(content);
        take!(tags);
    }

    /// Reference text used to resolve this candidate against existing items.
    pub fn reference_text(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    /// Build a concrete item from this candidate. Missing kind falls back to
    /// note, missing title to "Untitled".
    pub fn into_item(self, owner_id: &str, origin: Origin, now: DateTime<Utc>) -> Item {
        let kind = self.kind.unwrap_or(ItemKind::Note);
        let body = match kind {
            ItemKind::Event => ItemBody::Event {
                starts_at: self.starts_at,
                ends_at: self.ends_at,
                location: self.location,
                attendees: self.attendees.unwrap_or_default(),
            },
            ItemKind::Task => ItemBody::Task {
                due_at: self.due_at,
                priority: self
                    .priority
                    .unwrap_or_else(|| recommended_priority(self.due_at, now)),
                completed: self.completed.unwrap_or(false),
            },
            ItemKind::Note => ItemBody::Note {
                content: self.content.unwrap_or_default(),
                tags: self.tags.unwrap_or_default(),
            },
        };
        Item {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            title: sanitize_title(self.title.as_deref().unwrap_or_default()),
            description: self.description,
            created_at: now,
            updated_at: now,
            body,
            linked_items: BTreeSet::new(),
            origin,
        }
    }

    /// Convert the set fields of this candidate into a partial update.
    pub fn into_patch(self) -> ItemPatch {
        ItemPatch {
            title: self.title.map(|t| sanitize_title(&t)),
            description: self.description,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            location: self.location,
            attendees: self.attendees,
            due_at: self.due_at,
            priority: self.priority,
            completed: self.completed,
            content: self.content,
            tags: self.tags,
            linked_items: None,
        }
    }
}

// ============================================================================
// Patches
// ============================================================================

/// A partial update against an existing item. Unset fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub attendees: Option<Vec<String>>,
    pub due_at: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub completed: Option<bool>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub linked_items: Option<BTreeSet<ItemId>>,
}

impl ItemPatch {
    /// Patch that only rewrites the link set. Only the mutation layer's
    /// link/unlink operations should build these.
    pub fn links(linked_items: BTreeSet<ItemId>) -> Self {
        Self {
            linked_items: Some(linked_items),
            ..Self::default()
        }
    }

    /// Apply this patch to an item, producing the updated record. Fields for
    /// a different kind than the item's are ignored.
    pub fn apply_to(&self, item: &Item, now: DateTime<Utc>) -> Item {
        let mut next = item.clone();
        if let Some(t) = &self.title {
            next.title = sanitize_title(t);
        }
        if let Some(d) = &self.description {
            next.description = Some(d.clone());
        }
        if let Some(links) = &self.linked_items {
            next.linked_items = links.clone();
        }
        match &mut next.body {
            ItemBody::Event {
                starts_at,
                ends_at,
                location,
                attendees,
            } => {
                if let Some(v) = self.starts_at {
                    *starts_at = Some(v);
                }
                if let Some(v) = self.ends_at {
                    *ends_at = Some(v);
                }
                if let Some(v) = &self.location {
                    *location = Some(v.clone());
                }
                if let Some(v) = &self.attendees {
                    *attendees = v.clone();
                }
            }
            ItemBody::Task {
                due_at,
                priority,
                completed,
            } => {
                if let Some(v) = self.due_at {
                    *due_at = Some(v);
                }
                if let Some(v) = self.priority {
                    *priority = v;
                }
                if let Some(v) = self.completed {
                    *completed = v;
                }
            }
            ItemBody::Note { content, tags } => {
                if let Some(v) = &self.content {
                    *content = v.clone();
                }
                if let Some(v) = &self.tags {
                    *tags = v.clone();
                }
            }
        }
        next.updated_at = now;
        next
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Normalize a title: trim, collapse interior whitespace, and fall back to
/// "Untitled" when nothing is left.
pub fn sanitize_title(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "Untitled".to_string()
    } else {
        collapsed
    }
}

/// Suggest a priority from how close the due date is.
///
/// TODO: every branch currently returns `Important`, matching the behavior
/// this was ported from; confirm the intended urgency mapping with product
/// before wiring the distinct branches to distinct values.
#[allow(clippy::if_same_then_else)]
pub fn recommended_priority(due_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Priority {
    let Some(due) = due_at else {
        return Priority::Important;
    };
    let remaining = due - now;
    if remaining <= Duration::days(1) {
        Priority::Important
    } else if remaining <= Duration::days(7) {
        Priority::Important
    } else {
        Priority::Important
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    #[test]
    fn sanitize_collapses_and_defaults() {
        assert_eq!(sanitize_title("  buy   groceries  "), "buy groceries");
        assert_eq!(sanitize_title("   "), "Untitled");
        assert_eq!(sanitize_title(""), "Untitled");
    }

    #[test]
    fn candidate_into_item_defaults_to_note() {
        let item = CandidateItem::default().into_item("alice", Origin::Manual, now());
        assert_eq!(item.kind(), ItemKind::Note);
        assert_eq!(item.title, "Untitled");
        assert!(item.linked_items.is_empty());
    }

    #[test]
    fn candidate_into_item_builds_task() {
        let due = now() + Duration::days(2);
        let candidate = CandidateItem {
            kind: Some(ItemKind::Task),
            title: Some("buy groceries".into()),
            due_at: Some(due),
            ..Default::default()
        };
        let item = candidate.into_item("alice", Origin::voice(0.8), now());
        assert_eq!(item.kind(), ItemKind::Task);
        assert_eq!(item.due_at(), Some(due));
        assert_eq!(
            item.body,
            ItemBody::Task {
                due_at: Some(due),
                priority: Priority::Important,
                completed: false,
            }
        );
        assert!(item.origin.is_voice());
    }

    #[test]
    fn candidate_merge_keeps_unset_fields() {
        let mut base = CandidateItem {
            title: Some("Team Standup".into()),
            location: Some("Room 4".into()),
            ..Default::default()
        };
        base.merge(&CandidateItem {
            location: Some("Room 7".into()),
            ..Default::default()
        });
        assert_eq!(base.title.as_deref(), Some("Team Standup"));
        assert_eq!(base.location.as_deref(), Some("Room 7"));
    }

    #[test]
    fn priority_aliases_parse() {
        assert_eq!(
            serde_json::from_str::<Priority>("\"high\"").unwrap(),
            Priority::Urgent
        );
        assert_eq!(
            serde_json::from_str::<Priority>("\"medium\"").unwrap(),
            Priority::Important
        );
        assert_eq!(
            serde_json::from_str::<Priority>("\"optional\"").unwrap(),
            Priority::Optional
        );
    }

    #[test]
    fn patch_ignores_fields_for_other_kinds() {
        let note = CandidateItem {
            kind: Some(ItemKind::Note),
            title: Some("journal".into()),
            content: Some("day one".into()),
            ..Default::default()
        }
        .into_item("alice", Origin::Manual, now());

        let patch = ItemPatch {
            due_at: Some(now()),
            content: Some("day two".into()),
            ..Default::default()
        };
        let updated = patch.apply_to(&note, now() + Duration::hours(1));
        assert_eq!(updated.content(), Some("day two"));
        assert_eq!(updated.due_at(), None);
        assert!(updated.updated_at > note.updated_at);
    }

    #[test]
    fn anchor_time_prefers_start_then_due() {
        let start = now() + Duration::days(1);
        let event = CandidateItem {
            kind: Some(ItemKind::Event),
            title: Some("standup".into()),
            starts_at: Some(start),
            ..Default::default()
        }
        .into_item("alice", Origin::Manual, now());
        assert_eq!(event.anchor_time(), start);

        let note = CandidateItem {
            kind: Some(ItemKind::Note),
            title: Some("scratch".into()),
            ..Default::default()
        }
        .into_item("alice", Origin::Manual, now());
        assert_eq!(note.anchor_time(), note.created_at);
    }

    #[test]
    fn recommended_priority_is_flat_across_branches() {
        // Branch structure exists, output does not vary; see TODO on the
        // helper before relying on differences here.
        for days in [0i64, 3, 30] {
            assert_eq!(
                recommended_priority(Some(now() + Duration::days(days)), now()),
                Priority::Important
            );
        }
        assert_eq!(recommended_priority(None, now()), Priority::Important);
    }

    #[test]
    fn item_roundtrips_through_json() {
        let item = CandidateItem {
            kind: Some(ItemKind::Event),
            title: Some("Planning Meeting".into()),
            attendees: Some(vec!["bob".into()]),
            ..Default::default()
        }
        .into_item("alice", Origin::Manual, now());
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"kind\":\"event\""));
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
