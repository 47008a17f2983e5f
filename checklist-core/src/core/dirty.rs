//! Unsaved-change tracking and the in-memory edit journal.

use crate::ItemPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// What kind of edit made the document dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    InsertSibling,
    InsertChild,
    Delete,
    MoveUpLevel,
    MoveDownLevel,
    MoveVisualUp,
    MoveVisualDown,
    Paste,
    /// Label, done flag or field value.
    Content,
    Style,
    Collapse,
    Layout,
    /// Repairs applied on load that could not be written back.
    Repair,
    /// A new checklist that has never been saved.
    Created,
    SourceImported,
    Attachment,
}

impl EditKind {
    /// Whether this edit changes the tree shape and needs renumbering.
    #[must_use]
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::InsertSibling
                | Self::InsertChild
                | Self::Delete
                | Self::MoveUpLevel
                | Self::MoveDownLevel
                | Self::MoveVisualUp
                | Self::MoveVisualDown
                | Self::Paste
        )
    }

    fn rank(self) -> u8 {
        match self {
            Self::Created | Self::Repair => 3,
            Self::Layout => 2,
            k if k.is_structural() => 2,
            _ => 1,
        }
    }

    /// Whether this edit should replace `current` as the dirty reason.
    fn outranks(self, current: EditKind) -> bool {
        self.rank() >= current.rank()
    }
}

/// Whether the in-memory document differs from the last save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyState {
    #[default]
    Clean,
    /// Dirty; tagged with the latest of the most significant edits since the
    /// last save.
    Dirty(EditKind),
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EditKind,
    /// Dotted path of the affected item, if any.
    pub path: Option<String>,
}

/// Controls how many events the journal retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStrategy {
    KeepLast(usize),
    KeepAll,
}

/// Bounded, in-memory log of the edits made since the session started.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    events: VecDeque<EditEvent>,
    strategy: PurgeStrategy,
}

impl ChangeLog {
    pub fn new(strategy: PurgeStrategy) -> Self {
        Self { events: VecDeque::new(), strategy }
    }

    /// Appends an event and drops the oldest ones beyond the retention limit.
    pub fn record(&mut self, kind: EditKind, path: Option<&ItemPath>) {
        self.events.push_back(EditEvent {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            path: path.map(ToString::to_string),
        });
        self.purge_if_needed();
    }

    fn purge_if_needed(&mut self) {
        if let PurgeStrategy::KeepLast(keep_last) = self.strategy {
            while self.events.len() > keep_last {
                self.events.pop_front();
            }
        }
    }

    /// Events oldest first.
    pub fn events(&self) -> impl Iterator<Item = &EditEvent> {
        self.events.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Tracks unsaved changes and gates them on the document being ready.
///
/// Marks made before [`raise_ready_gate`](Self::raise_ready_gate) are ignored:
/// loading and the first render touch the document too and must not count
/// as user edits.
#[derive(Debug, Clone)]
pub struct DirtyTracker {
    state: DirtyState,
    change_count: usize,
    ready: bool,
    journal: ChangeLog,
}

impl DirtyTracker {
    pub fn new(strategy: PurgeStrategy) -> Self {
        Self {
            state: DirtyState::Clean,
            change_count: 0,
            ready: false,
            journal: ChangeLog::new(strategy),
        }
    }

    /// Records an edit. Returns `false` if the ready gate is down and the mark
    /// was ignored.
    pub fn mark_dirty(&mut self, kind: EditKind, path: Option<&ItemPath>) -> bool {
        if !self.ready {
            log::debug!("Ignoring {kind:?} edit before the document is ready");
            return false;
        }
        // Structural and layout edits take over the tag from content and
        // style edits; an unsaved or repaired document keeps its tag.
        let replaces = match self.state {
            DirtyState::Clean => true,
            DirtyState::Dirty(current) => kind.outranks(current),
        };
        if replaces {
            self.state = DirtyState::Dirty(kind);
        }
        self.change_count += 1;
        self.journal.record(kind, path);
        true
    }

    /// Resets to clean after a successful save.
    pub fn mark_clean(&mut self) {
        self.state = DirtyState::Clean;
        self.change_count = 0;
    }

    pub fn raise_ready_gate(&mut self) {
        self.ready = true;
    }

    /// Drops the gate while a document is being replaced.
    pub fn lower_ready_gate(&mut self) {
        self.ready = false;
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        matches!(self.state, DirtyState::Dirty(_))
    }

    #[must_use]
    pub fn state(&self) -> DirtyState {
        self.state
    }

    /// Edits since the last save.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.change_count
    }

    /// Whether the save control should be shown.
    #[must_use]
    pub fn save_visible(&self) -> bool {
        self.ready && self.is_dirty()
    }

    #[must_use]
    pub fn journal(&self) -> &ChangeLog {
        &self.journal
    }
}
