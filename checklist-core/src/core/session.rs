//! The editing session: one open checklist and everything the user does to it.
//!
//! A [`Session`] owns the document, the current selection, the clipboard and
//! the dirty tracker. Every structural edit runs the same four steps in
//! order: mutate the tree, renumber, mark dirty, render. Content edits only
//! mark dirty; the host already shows the new value in place.

use crate::core::path::{resolve_item, resolve_item_mut};
use crate::core::renumber::renumber;
use crate::core::tree::{self, MoveOutcome};
use crate::{
    default_fields, source_key, Attachment, ChecklistDocument, ChecklistError, DeleteResult,
    DeleteStrategy, DirtyTracker, EditKind, FieldDefinition, FieldIssue, FieldRegistry,
    FieldSelection, FieldValue, Item, ItemPath, Layout, Notice, PurgeStrategy, RenderFrame,
    RenderReason, Renderer, Result, SavePhase,
};
use std::sync::Arc;

/// Whether a destructive operation asks the renderer for confirmation first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Ask,
    Bypass,
}

fn stale(e: ChecklistError) -> ChecklistError {
    log::warn!("Ignoring operation on stale path: {e}");
    e
}

fn collect_ids(item: &Item, ids: &mut Vec<String>) {
    ids.push(item.id.clone());
    for child in &item.children {
        collect_ids(child, ids);
    }
}

/// An open checklist plus the editing state around it.
pub struct Session<R: Renderer> {
    document: Option<ChecklistDocument>,
    /// Blob path the document was loaded from or will be saved to.
    path: Option<String>,
    selected: Option<ItemPath>,
    clipboard: Option<Item>,
    tracker: DirtyTracker,
    /// `lastSave` of the remote copy this session is based on.
    baseline: Option<String>,
    save_in_progress: bool,
    save_phase: SavePhase,
    registry: FieldRegistry,
    renderer: R,
}

impl<R: Renderer> Session<R> {
    pub fn new(registry: FieldRegistry, renderer: R) -> Self {
        Self {
            document: None,
            path: None,
            selected: None,
            clipboard: None,
            tracker: DirtyTracker::new(PurgeStrategy::KeepLast(500)),
            baseline: None,
            save_in_progress: false,
            save_phase: SavePhase::Idle,
            registry,
            renderer,
        }
    }

    /// Replaces the journal retention policy.
    #[must_use]
    pub fn with_journal(mut self, strategy: PurgeStrategy) -> Self {
        self.tracker = DirtyTracker::new(strategy);
        self
    }

    #[must_use]
    pub fn document(&self) -> Option<&ChecklistDocument> {
        self.document.as_ref()
    }

    pub(crate) fn document_mut(&mut self) -> Option<&mut ChecklistDocument> {
        self.document.as_mut()
    }

    fn doc(&self) -> Result<&ChecklistDocument> {
        self.document.as_ref().ok_or(ChecklistError::NoChecklistLoaded)
    }

    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn selection(&self) -> Option<&ItemPath> {
        self.selected.as_ref()
    }

    /// Selects the item at `path`, or clears the selection.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::PathNotFound`] if `path` does not resolve; the
    /// selection is left unchanged.
    pub fn select(&mut self, path: Option<ItemPath>) -> Result<()> {
        if let Some(p) = &path {
            resolve_item(&self.doc()?.items, p)?;
        }
        self.selected = path;
        Ok(())
    }

    #[must_use]
    pub fn clipboard(&self) -> Option<&Item> {
        self.clipboard.as_ref()
    }

    #[must_use]
    pub fn tracker(&self) -> &DirtyTracker {
        &self.tracker
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    #[must_use]
    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    #[must_use]
    pub fn save_phase(&self) -> SavePhase {
        self.save_phase
    }

    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.save_in_progress
    }

    #[must_use]
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    #[must_use]
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    // ---- lifecycle ----------------------------------------------------------

    /// Replaces the open document. The ready gate is down while the document
    /// is swapped, so nothing done here counts as an edit.
    pub(crate) fn install(&mut self, mut document: ChecklistDocument, path: Option<String>) {
        self.tracker.lower_ready_gate();
        renumber(&mut document.items);
        self.baseline = document.last_save.clone();
        self.document = Some(document);
        self.path = path;
        self.selected = None;
        self.tracker.mark_clean();
        self.tracker.raise_ready_gate();
        self.renderer.save_indicator(false);
        self.render(RenderReason::Loaded);
    }

    /// Whether the open checklist may be replaced. Unsaved edits are only
    /// dropped once the renderer confirms, unless the caller already asked.
    pub(crate) fn confirm_discard(&mut self, confirmation: Confirmation) -> bool {
        if !self.is_dirty() || confirmation == Confirmation::Bypass {
            return true;
        }
        let title = self.document.as_ref().map(|d| d.title.clone()).unwrap_or_default();
        let confirmed = self
            .renderer
            .confirm(&format!("Discard unsaved changes to \"{title}\"?"));
        if !confirmed {
            log::info!("Kept unsaved changes to '{title}'");
        }
        confirmed
    }

    /// Starts a new, unsaved checklist with a single "First item", selected.
    ///
    /// Returns `false` and leaves the open checklist alone if it has unsaved
    /// edits and discarding them was not confirmed.
    pub fn new_checklist(&mut self, title: &str, confirmation: Confirmation) -> bool {
        if !self.confirm_discard(confirmation) {
            return false;
        }
        let fields = self.registry.snapshot();
        self.install(ChecklistDocument::new(title, &fields), None);
        self.selected = Some(ItemPath::root(1));
        self.mark_dirty(EditKind::Created, None);
        true
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = Some(path);
    }

    /// Claims the save slot. Returns `false` if a save is already running.
    pub(crate) fn begin_save(&mut self) -> bool {
        if self.save_in_progress {
            return false;
        }
        self.save_in_progress = true;
        true
    }

    pub(crate) fn end_save(&mut self) {
        self.save_in_progress = false;
        self.set_save_phase(SavePhase::Idle);
    }

    pub(crate) fn set_save_phase(&mut self, phase: SavePhase) {
        if self.save_phase != phase {
            log::debug!("Save phase {:?} -> {:?}", self.save_phase, phase);
            self.save_phase = phase;
        }
    }

    /// Records a successful write: the new token becomes both the document's
    /// `lastSave` and the baseline, and the document is clean.
    pub(crate) fn complete_save(&mut self, token: &str) {
        if let Some(doc) = self.document.as_mut() {
            doc.last_save = Some(token.to_string());
        }
        self.baseline = Some(token.to_string());
        self.tracker.mark_clean();
        self.renderer.save_indicator(false);
    }

    pub(crate) fn notify(&mut self, notice: Notice) {
        self.renderer.notify(&notice);
    }

    pub(crate) fn mark_dirty(&mut self, kind: EditKind, path: Option<&ItemPath>) {
        let was_visible = self.tracker.save_visible();
        if self.tracker.mark_dirty(kind, path) && !was_visible {
            self.renderer.save_indicator(true);
        }
    }

    fn render(&mut self, reason: RenderReason) {
        let Some(doc) = self.document.as_ref() else {
            return;
        };
        let fields = self.registry.snapshot();
        let frame = RenderFrame {
            items: &doc.items,
            layout: &doc.layout,
            fields: &fields,
            selection: self.selected.as_ref(),
            reason: &reason,
        };
        self.renderer.render(&frame);
    }

    fn new_item(&self) -> Item {
        Item::new("", default_fields(&self.registry.snapshot()))
    }

    // ---- structural edits ---------------------------------------------------

    fn after_structural(&mut self, kind: EditKind, focus: Option<ItemPath>) {
        if let Some(doc) = self.document.as_mut() {
            renumber(&mut doc.items);
        }
        self.selected = focus.clone();
        self.mark_dirty(kind, focus.as_ref());
        self.render(RenderReason::Structure { kind, focus });
    }

    /// Runs a tree primitive on the selection. Returns the new selection, or
    /// `None` when nothing is selected or the move hit a boundary.
    fn structural<F>(&mut self, kind: EditKind, blocked: &str, op: F) -> Result<Option<ItemPath>>
    where
        F: FnOnce(&mut Vec<Item>, &ItemPath) -> Result<MoveOutcome>,
    {
        let Some(path) = self.selected.clone() else {
            log::debug!("{kind:?} ignored: nothing selected");
            return Ok(None);
        };
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        match op(&mut doc.items, &path).map_err(stale)? {
            MoveOutcome::AtBoundary => {
                self.notify(Notice::blocked(blocked));
                Ok(None)
            }
            MoveOutcome::Moved(new_path) => {
                self.after_structural(kind, Some(new_path.clone()));
                Ok(Some(new_path))
            }
        }
    }

    /// Inserts a new item right after the selection and selects it.
    pub fn insert_sibling(&mut self) -> Result<Option<ItemPath>> {
        let new = self.new_item();
        self.structural(EditKind::InsertSibling, "", |items, path| {
            tree::insert_sibling(items, path, new).map(MoveOutcome::Moved)
        })
    }

    /// Appends a new last child to the selection, expands it, and selects the child.
    pub fn insert_child(&mut self) -> Result<Option<ItemPath>> {
        let new = self.new_item();
        self.structural(EditKind::InsertChild, "", |items, path| {
            tree::insert_child(items, path, new).map(MoveOutcome::Moved)
        })
    }

    /// Appends a new item at the end of the top level. Works without a
    /// selection, so an emptied checklist can get items again.
    pub fn insert_root_item(&mut self) -> Result<ItemPath> {
        let new = self.new_item();
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        let path = tree::insert_after(&mut doc.items, None, new)?;
        self.after_structural(EditKind::InsertSibling, Some(path.clone()));
        Ok(path)
    }

    /// Deletes the selection and clears it.
    ///
    /// With [`Confirmation::Ask`] the renderer must confirm first; a refusal
    /// returns `Ok(None)` and changes nothing.
    pub fn delete_selected(
        &mut self,
        strategy: DeleteStrategy,
        confirmation: Confirmation,
    ) -> Result<Option<DeleteResult>> {
        let Some(path) = self.selected.clone() else {
            return Ok(None);
        };
        let label = resolve_item(&self.doc()?.items, &path).map_err(stale)?.label.clone();
        if confirmation == Confirmation::Ask
            && !self.renderer.confirm(&format!("Delete item {path} \"{label}\"?"))
        {
            return Ok(None);
        }
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        let result = match strategy {
            DeleteStrategy::DeleteAll => {
                let removed = tree::remove(&mut doc.items, &path)?;
                let mut deleted_ids = Vec::new();
                collect_ids(&removed, &mut deleted_ids);
                DeleteResult { deleted_count: deleted_ids.len(), promoted_count: 0, deleted_ids }
            }
            DeleteStrategy::PromoteChildren => {
                let (removed, promoted_count) = tree::remove_promote_children(&mut doc.items, &path)?;
                DeleteResult { deleted_count: 1, promoted_count, deleted_ids: vec![removed.id] }
            }
        };
        self.after_structural(EditKind::Delete, None);
        Ok(Some(result))
    }

    pub fn move_up_one_level(&mut self) -> Result<Option<ItemPath>> {
        self.structural(
            EditKind::MoveUpLevel,
            "The item is already at the top level",
            tree::move_up_one_level,
        )
    }

    pub fn move_down_one_level(&mut self) -> Result<Option<ItemPath>> {
        self.structural(
            EditKind::MoveDownLevel,
            "There is no item above to move this one under",
            tree::move_down_one_level,
        )
    }

    pub fn move_visual_up(&mut self) -> Result<Option<ItemPath>> {
        self.structural(EditKind::MoveVisualUp, "The item is already first", tree::move_visual_up)
    }

    pub fn move_visual_down(&mut self) -> Result<Option<ItemPath>> {
        self.structural(EditKind::MoveVisualDown, "The item is already last", tree::move_visual_down)
    }

    /// Copies the selected subtree to the clipboard. Later edits to the source
    /// do not affect the copy. Returns `false` when nothing is selected.
    pub fn copy_selected(&mut self) -> Result<bool> {
        let Some(path) = self.selected.as_ref() else {
            return Ok(false);
        };
        let item = resolve_item(&self.doc()?.items, path).map_err(stale)?.clone();
        self.clipboard = Some(item);
        Ok(true)
    }

    /// Pastes a fresh copy of the clipboard after the selection, or at the
    /// end of the top level when nothing is selected.
    pub fn paste_after(&mut self) -> Result<Option<ItemPath>> {
        let Some(copy) = self.clipboard.as_ref().map(tree::deep_copy_with_fresh_ids) else {
            self.notify(Notice::info("Nothing to paste"));
            return Ok(None);
        };
        let selected = self.selected.clone();
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        let path = tree::insert_after(&mut doc.items, selected.as_ref(), copy).map_err(stale)?;
        self.after_structural(EditKind::Paste, Some(path.clone()));
        Ok(Some(path))
    }

    // ---- content edits ------------------------------------------------------

    fn edit_item<T>(
        &mut self,
        path: &ItemPath,
        kind: EditKind,
        edit: impl FnOnce(&mut Item) -> T,
    ) -> Result<T> {
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        let item = resolve_item_mut(&mut doc.items, path).map_err(stale)?;
        let out = edit(item);
        self.mark_dirty(kind, Some(path));
        Ok(out)
    }

    pub fn set_label(&mut self, path: &ItemPath, label: impl Into<String>) -> Result<()> {
        let label = label.into();
        self.edit_item(path, EditKind::Content, |item| item.label = label)
    }

    /// Flips the done flag and returns the new value.
    pub fn toggle_done(&mut self, path: &ItemPath) -> Result<bool> {
        self.edit_item(path, EditKind::Content, |item| {
            item.done = !item.done;
            item.done
        })
    }

    /// Writes a registry-defined field. An empty value clears the field.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::ValidationFailed`] for unknown or computed fields and
    /// values that do not fit the definition.
    pub fn set_field(&mut self, path: &ItemPath, key: &str, value: FieldValue) -> Result<()> {
        let def = self
            .registry
            .get(key)
            .ok_or_else(|| ChecklistError::ValidationFailed(format!("Unknown field '{key}'")))?;
        def.check_value(&value, &self.doc()?.sources)?;
        match key {
            "label" => {
                let text = match value {
                    FieldValue::Text(t) => t,
                    _ => String::new(),
                };
                self.edit_item(path, EditKind::Content, |item| item.label = text)
            }
            "done" => {
                let done = matches!(value, FieldValue::Bool(true));
                self.edit_item(path, EditKind::Content, |item| item.done = done)
            }
            _ if def.is_reserved() => Err(ChecklistError::ValidationFailed(format!(
                "Field '{key}' is not editable as a value"
            ))),
            _ => self.edit_item(path, EditKind::Content, |item| {
                if value.is_empty() {
                    item.fields.remove(key);
                } else {
                    item.fields.insert(key.to_string(), value);
                }
            }),
        }
    }

    /// Current value of a field, evaluating computed fields.
    pub fn computed_value(&self, path: &ItemPath, key: &str) -> Result<FieldValue> {
        let item = resolve_item(&self.doc()?.items, path)?;
        Ok(match self.registry.get(key).and_then(|d| d.computation) {
            Some(kind) => kind.evaluate(item),
            None => item.fields.get(key).cloned().unwrap_or(FieldValue::Empty),
        })
    }

    // ---- style edits --------------------------------------------------------

    fn edit_row(&mut self, path: &ItemPath, kind: EditKind, edit: impl FnOnce(&mut Item)) -> Result<()> {
        self.edit_item(path, kind, edit)?;
        self.render(RenderReason::Row { kind, path: path.clone() });
        Ok(())
    }

    pub fn toggle_collapsed(&mut self, path: &ItemPath) -> Result<()> {
        self.edit_row(path, EditKind::Collapse, |item| item.collapsed = !item.collapsed)
    }

    pub fn toggle_bold(&mut self, path: &ItemPath) -> Result<()> {
        self.edit_row(path, EditKind::Style, |item| item.style.bold = !item.style.bold)
    }

    pub fn toggle_important(&mut self, path: &ItemPath) -> Result<()> {
        self.edit_row(path, EditKind::Style, |item| item.style.important = !item.style.important)
    }

    /// Sets the row color; `None` removes it.
    pub fn apply_color(&mut self, path: &ItemPath, color: Option<String>) -> Result<()> {
        self.edit_row(path, EditKind::Style, |item| item.style.color = color)
    }

    pub fn reset_style(&mut self, path: &ItemPath) -> Result<()> {
        self.edit_row(path, EditKind::Style, |item| item.style = Default::default())
    }

    // ---- attachments and sources --------------------------------------------

    /// Attaches a file to the item at `target`, or to the checklist itself.
    /// Pending bytes are uploaded on the next save.
    pub fn attach_file(&mut self, target: Option<&ItemPath>, attachment: Attachment) -> Result<()> {
        match target {
            Some(path) => {
                self.edit_row(path, EditKind::Attachment, |item| item.attachments.push(attachment))
            }
            None => {
                let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
                doc.files.push(attachment);
                self.mark_dirty(EditKind::Attachment, None);
                Ok(())
            }
        }
    }

    /// Number of attachments still waiting for upload.
    #[must_use]
    pub fn pending_uploads(&self) -> usize {
        let Some(doc) = self.document.as_ref() else {
            return 0;
        };
        fn count(item: &Item) -> usize {
            item.files.iter().chain(&item.attachments).filter(|a| a.is_pending()).count()
                + item.children.iter().map(count).sum::<usize>()
        }
        doc.files.iter().filter(|a| a.is_pending()).count()
            + doc.items.iter().map(count).sum::<usize>()
    }

    /// Stores an option list under `doc.sources[key]`.
    pub fn set_source(&mut self, key: &str, values: Vec<String>) -> Result<()> {
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        doc.sources.insert(key.to_string(), values);
        self.mark_dirty(EditKind::SourceImported, None);
        Ok(())
    }

    /// Validates the registry against this checklist's sources and the given
    /// whitelisted external documents.
    #[must_use]
    pub fn validate_fields(&self, external_sources: &[String]) -> Vec<FieldIssue> {
        let mut known: Vec<String> = self
            .document
            .as_ref()
            .map(|d| d.sources.keys().cloned().collect())
            .unwrap_or_default();
        known.extend(external_sources.iter().filter_map(|s| source_key(s).ok()));
        crate::validate_fields(&self.registry.snapshot(), &known)
    }

    // ---- layout -------------------------------------------------------------

    fn layout_changed(&mut self) {
        self.mark_dirty(EditKind::Layout, None);
        self.render(RenderReason::Columns);
    }

    fn fields(&self) -> Arc<Vec<FieldDefinition>> {
        self.registry.snapshot()
    }

    /// Applies a saved layout. Only a layout that changes the applied
    /// settings marks the checklist dirty; the grid is redrawn either way.
    pub fn apply_layout(&mut self, name: &str) -> Result<bool> {
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        let changed = doc.layout.apply(name)?;
        if changed {
            self.mark_dirty(EditKind::Layout, None);
        }
        self.render(RenderReason::Columns);
        Ok(changed)
    }

    pub fn save_as_new_layout(&mut self, name: &str, selections: &[FieldSelection]) -> Result<()> {
        let fields = self.fields();
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        doc.layout.save_as_new(name, selections, &fields)?;
        self.layout_changed();
        Ok(())
    }

    /// Moves a column before `target`, or to the end. Returns `false` (and
    /// leaves the checklist clean) if `source` is not a column.
    pub fn reorder_column(&mut self, source: &str, target: Option<&str>) -> Result<bool> {
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        let moved = doc.layout.reorder_column(source, target);
        if moved {
            self.layout_changed();
        }
        Ok(moved)
    }

    pub fn set_column_width(&mut self, key: &str, width: u32) -> Result<bool> {
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        let changed = doc.layout.set_column_width(key, width);
        if changed {
            self.layout_changed();
        }
        Ok(changed)
    }

    pub fn set_column_visible(&mut self, key: &str, visible: bool) -> Result<()> {
        let fields = self.fields();
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        doc.layout.set_column_visible(key, visible, &fields);
        self.layout_changed();
        Ok(())
    }

    pub fn set_row_height(&mut self, height: u32) -> Result<()> {
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        doc.layout.set_row_height(height);
        self.layout_changed();
        Ok(())
    }

    pub fn delete_layout(&mut self, name: &str) -> Result<()> {
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        doc.layout.delete_layout(name)?;
        self.layout_changed();
        Ok(())
    }

    /// Adds a shared layout preset to this checklist's history.
    pub fn add_layout(&mut self, layout: Layout) -> Result<()> {
        let doc = self.document.as_mut().ok_or(ChecklistError::NoChecklistLoaded)?;
        doc.layout.add_layout(layout)?;
        self.layout_changed();
        Ok(())
    }
}
