//! The presentation side of a session.
//!
//! The core never draws anything. After each operation it hands a
//! [`RenderFrame`] to the host's [`Renderer`], which redraws as much as the
//! [`RenderReason`] calls for.

use crate::{EditKind, FieldDefinition, Item, ItemPath, LayoutState};

/// Why a frame is being rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderReason {
    /// A document was installed. Redraw everything.
    Loaded,
    /// The tree shape changed; `focus` is the path to select afterwards.
    Structure { kind: EditKind, focus: Option<ItemPath> },
    /// Only the row at `path` changed.
    Row { kind: EditKind, path: ItemPath },
    /// The column layout changed.
    Columns,
}

/// Everything a renderer needs to draw the grid.
#[derive(Debug, Clone, Copy)]
pub struct RenderFrame<'a> {
    pub items: &'a [Item],
    pub layout: &'a LayoutState,
    pub fields: &'a [FieldDefinition],
    pub selection: Option<&'a ItemPath>,
    pub reason: &'a RenderReason,
}

impl RenderFrame<'_> {
    #[must_use]
    pub fn row_height(&self) -> u32 {
        self.layout.rows.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
    /// An operation was refused, e.g. a move past the tree boundary.
    Blocked,
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Blocked, message: message.into() }
    }
}

/// Host-side presentation hooks.
pub trait Renderer {
    /// Redraws the grid.
    fn render(&mut self, frame: &RenderFrame<'_>);

    /// Shows a message. Defaults to logging it.
    fn notify(&mut self, notice: &Notice) {
        match notice.level {
            NoticeLevel::Info => log::info!("{}", notice.message),
            NoticeLevel::Warning | NoticeLevel::Blocked => log::warn!("{}", notice.message),
            NoticeLevel::Error => log::error!("{}", notice.message),
        }
    }

    /// Asks the user to confirm a destructive action. Defaults to refusing.
    fn confirm(&mut self, _prompt: &str) -> bool {
        false
    }

    /// Shows or hides the save control.
    fn save_indicator(&mut self, _visible: bool) {}
}

/// Renderer for headless sessions. Draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _frame: &RenderFrame<'_>) {}
}
