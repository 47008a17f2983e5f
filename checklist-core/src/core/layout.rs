//! Column layouts: which fields are shown, how wide, and in what order.
//!
//! A checklist's `layout` object holds the settings currently applied
//! (`columns`, `columnOrder`, `rows`) next to a history of named layouts
//! (`layouts[]`) and the name of the one last applied (`lastlayout`). The
//! `lastused` entry in `layouts[]` is a sentinel that always mirrors the
//! applied settings.

use crate::core::integrity::Repair;
use crate::{ChecklistError, FieldDefinition, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Name of the sentinel layout mirroring the applied settings.
pub const LAST_USED: &str = "lastused";

/// Name given to layouts synthesized from field definitions or legacy data.
pub const DEFAULT_LAYOUT: &str = "Default";

const DEFAULT_ROW_HEIGHT: u32 = 28;

/// Display settings for one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSettings {
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default = "default_column_width")]
    pub width: u32,
}

fn default_visible() -> bool {
    true
}

fn default_column_width() -> u32 {
    120
}

/// Row display settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSettings {
    #[serde(default = "default_row_height")]
    pub height: u32,
}

fn default_row_height() -> u32 {
    DEFAULT_ROW_HEIGHT
}

impl Default for RowSettings {
    fn default() -> Self {
        Self { height: DEFAULT_ROW_HEIGHT }
    }
}

/// A named, switchable set of column settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub layout_name: String,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnSettings>,
    #[serde(default)]
    pub column_order: Vec<String>,
    #[serde(default)]
    pub rows: RowSettings,
}

/// A user's choice for one field when saving a new layout.
///
/// `visible` implies `active`; inactive fields are left out of the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelection {
    pub key: String,
    pub active: bool,
    pub visible: bool,
}

impl FieldSelection {
    pub fn visible(key: impl Into<String>) -> Self {
        Self { key: key.into(), active: true, visible: true }
    }

    pub fn hidden(key: impl Into<String>) -> Self {
        Self { key: key.into(), active: true, visible: false }
    }

    pub fn inactive(key: impl Into<String>) -> Self {
        Self { key: key.into(), active: false, visible: false }
    }
}

/// The `layout` object of a checklist document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutState {
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnSettings>,
    #[serde(default)]
    pub column_order: Vec<String>,
    #[serde(default)]
    pub rows: RowSettings,
    #[serde(default)]
    pub layouts: Vec<Layout>,
    #[serde(default, rename = "lastlayout", skip_serializing_if = "Option::is_none")]
    pub last_layout: Option<String>,
}

/// Builds the "Default" layout from field definitions, in registry order.
#[must_use]
pub fn default_layout(fields: &[FieldDefinition]) -> Layout {
    Layout {
        layout_name: DEFAULT_LAYOUT.to_string(),
        columns: fields
            .iter()
            .map(|f| (f.key.clone(), ColumnSettings { visible: f.visible, width: f.width }))
            .collect(),
        column_order: fields.iter().map(|f| f.key.clone()).collect(),
        rows: RowSettings::default(),
    }
}

impl LayoutState {
    /// State with `layout` applied and recorded in the history.
    #[must_use]
    pub fn from_layout(layout: Layout) -> Self {
        let mut state = Self {
            columns: layout.columns.clone(),
            column_order: layout.column_order.clone(),
            rows: layout.rows,
            last_layout: Some(layout.layout_name.clone()),
            layouts: vec![layout],
        };
        state.sync_last_used();
        state
    }

    /// The applied settings as a layout named [`LAST_USED`].
    #[must_use]
    pub fn current(&self) -> Layout {
        Layout {
            layout_name: LAST_USED.to_string(),
            columns: self.columns.clone(),
            column_order: self.column_order.clone(),
            rows: self.rows,
        }
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Layout> {
        self.layouts.iter().find(|l| l.layout_name == name)
    }

    /// Names of the saved layouts, excluding the sentinel.
    #[must_use]
    pub fn layout_names(&self) -> Vec<&str> {
        self.layouts
            .iter()
            .map(|l| l.layout_name.as_str())
            .filter(|n| *n != LAST_USED)
            .collect()
    }

    /// Column keys in display order, visible ones only.
    #[must_use]
    pub fn visible_columns(&self) -> Vec<&str> {
        self.column_order
            .iter()
            .filter(|k| self.columns.get(*k).is_some_and(|c| c.visible))
            .map(String::as_str)
            .collect()
    }

    /// Rewrites the [`LAST_USED`] entry from the applied settings.
    pub fn sync_last_used(&mut self) {
        let current = self.current();
        self.upsert(current);
    }

    fn upsert(&mut self, layout: Layout) {
        match self.layouts.iter_mut().find(|l| l.layout_name == layout.layout_name) {
            Some(existing) => *existing = layout,
            None => self.layouts.push(layout),
        }
    }

    /// Adds a layout to the history, replacing one of the same name. The
    /// applied settings are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ChecklistError::ValidationFailed`] for the sentinel name.
    pub fn add_layout(&mut self, layout: Layout) -> Result<()> {
        if layout.layout_name == LAST_USED {
            return Err(ChecklistError::ValidationFailed(
                "The lastused layout is maintained automatically".to_string(),
            ));
        }
        self.upsert(layout);
        Ok(())
    }

    /// Applies the named layout. Returns whether the applied settings or the
    /// applied layout name changed.
    ///
    /// # Errors
    ///
    /// Returns [`ChecklistError::LayoutNotFound`] if no layout has that name.
    pub fn apply(&mut self, name: &str) -> Result<bool> {
        let layout = self
            .find(name)
            .cloned()
            .ok_or_else(|| ChecklistError::LayoutNotFound(name.to_string()))?;
        let changed = self.columns != layout.columns
            || self.column_order != layout.column_order
            || self.rows != layout.rows
            || self.last_layout.as_deref() != Some(name);
        self.columns = layout.columns;
        self.column_order = layout.column_order;
        self.rows = layout.rows;
        self.last_layout = Some(name.to_string());
        self.sync_last_used();
        Ok(changed)
    }

    /// Builds a layout from `selections`, stores it under `name` (replacing a
    /// layout of the same name) and applies it.
    ///
    /// Widths are kept from the applied columns where known, otherwise taken
    /// from the field definition. Active columns keep their current relative
    /// order; newly activated ones follow in selection order.
    ///
    /// # Errors
    ///
    /// Returns [`ChecklistError::ValidationFailed`] if `name` is empty or the
    /// reserved sentinel name.
    pub fn save_as_new(
        &mut self,
        name: &str,
        selections: &[FieldSelection],
        fields: &[FieldDefinition],
    ) -> Result<()> {
        let name = name.trim();
        if name.is_empty() || name == LAST_USED {
            return Err(ChecklistError::ValidationFailed(format!(
                "'{name}' cannot be used as a layout name"
            )));
        }
        let active: Vec<&FieldSelection> =
            selections.iter().filter(|s| s.active || s.visible).collect();
        let columns: BTreeMap<String, ColumnSettings> = active
            .iter()
            .map(|s| {
                let width = self
                    .columns
                    .get(&s.key)
                    .map(|c| c.width)
                    .or_else(|| fields.iter().find(|f| f.key == s.key).map(|f| f.width))
                    .unwrap_or_else(default_column_width);
                (s.key.clone(), ColumnSettings { visible: s.visible, width })
            })
            .collect();
        let mut column_order: Vec<String> = self
            .column_order
            .iter()
            .filter(|k| columns.contains_key(*k))
            .cloned()
            .collect();
        for s in &active {
            if !column_order.contains(&s.key) {
                column_order.push(s.key.clone());
            }
        }
        self.upsert(Layout {
            layout_name: name.to_string(),
            columns,
            column_order,
            rows: self.rows,
        });
        self.apply(name)?;
        Ok(())
    }

    /// Moves `source` to just before `target`, or to the end when `target`
    /// is `None` or unknown. Returns `false` (and changes nothing) if
    /// `source` is not in the order.
    pub fn reorder_column(&mut self, source: &str, target: Option<&str>) -> bool {
        let Some(from) = self.column_order.iter().position(|k| k == source) else {
            log::warn!("Cannot reorder column '{source}': not in column order");
            return false;
        };
        if target == Some(source) {
            return false;
        }
        let key = self.column_order.remove(from);
        match target.and_then(|t| self.column_order.iter().position(|k| k == t)) {
            Some(to) => self.column_order.insert(to, key),
            None => {
                if let Some(t) = target {
                    log::warn!("Reorder target column '{t}' not found; moving '{source}' to the end");
                }
                self.column_order.push(key);
            }
        }
        self.sync_last_used();
        true
    }

    /// Sets a column's width. Returns `false` for an unknown column.
    pub fn set_column_width(&mut self, key: &str, width: u32) -> bool {
        let Some(column) = self.columns.get_mut(key) else {
            return false;
        };
        column.width = width;
        self.sync_last_used();
        true
    }

    /// Shows or hides a column, adding it at the end of the order if it was
    /// not part of the layout yet.
    pub fn set_column_visible(&mut self, key: &str, visible: bool, fields: &[FieldDefinition]) {
        let width = fields
            .iter()
            .find(|f| f.key == key)
            .map_or_else(default_column_width, |f| f.width);
        self.columns
            .entry(key.to_string())
            .or_insert(ColumnSettings { visible, width })
            .visible = visible;
        if !self.column_order.iter().any(|k| k == key) {
            self.column_order.push(key.to_string());
        }
        self.sync_last_used();
    }

    pub fn set_row_height(&mut self, height: u32) {
        self.rows.height = height;
        self.sync_last_used();
    }

    /// Removes a saved layout. The applied settings are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ChecklistError::LayoutNotFound`] for an unknown name and
    /// [`ChecklistError::ValidationFailed`] for the sentinel.
    pub fn delete_layout(&mut self, name: &str) -> Result<()> {
        if name == LAST_USED {
            return Err(ChecklistError::ValidationFailed(
                "The lastused layout cannot be deleted".to_string(),
            ));
        }
        let before = self.layouts.len();
        self.layouts.retain(|l| l.layout_name != name);
        if self.layouts.len() == before {
            return Err(ChecklistError::LayoutNotFound(name.to_string()));
        }
        if self.last_layout.as_deref() == Some(name) {
            self.last_layout = Some(LAST_USED.to_string());
        }
        Ok(())
    }

    /// Column keys that no field definition describes.
    #[must_use]
    pub fn unresolved_keys(&self, fields: &[FieldDefinition]) -> Vec<String> {
        let mut keys: Vec<String> = self
            .column_order
            .iter()
            .chain(self.columns.keys())
            .filter(|k| !fields.iter().any(|f| &f.key == *k))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Brings a raw `layout` object up to the current shape.
///
/// Synthesizes a missing layout from `fields`, fills in missing `columns` and
/// `columnOrder`, and lifts the legacy single-layout shape (no `layouts[]`)
/// into the history format. Returns the repairs applied.
pub(crate) fn migrate_layout(doc: &mut Map<String, Value>, fields: &[FieldDefinition]) -> Vec<Repair> {
    let mut repairs = Vec::new();
    let Some(Value::Object(layout)) = doc.get_mut("layout") else {
        let fresh = LayoutState::from_layout(default_layout(fields));
        doc.insert(
            "layout".to_string(),
            serde_json::to_value(fresh).unwrap_or(Value::Null),
        );
        repairs.push(Repair::MissingLayout);
        return repairs;
    };

    let legacy = !matches!(layout.get("layouts"), Some(Value::Array(_)));
    if legacy {
        repairs.push(Repair::LegacyLayoutLifted);
    }

    if !matches!(layout.get("columns"), Some(Value::Object(_))) {
        let columns: Map<String, Value> = match layout.get("columnOrder") {
            Some(Value::Array(order)) => order
                .iter()
                .filter_map(Value::as_str)
                .map(|k| {
                    let width = fields
                        .iter()
                        .find(|f| f.key == k)
                        .map_or_else(default_column_width, |f| f.width);
                    (k.to_string(), serde_json::json!({"visible": true, "width": width}))
                })
                .collect(),
            _ => fields
                .iter()
                .map(|f| {
                    (f.key.clone(), serde_json::json!({"visible": f.visible, "width": f.width}))
                })
                .collect(),
        };
        layout.insert("columns".to_string(), Value::Object(columns));
        repairs.push(Repair::MissingColumns);
    }

    if !matches!(layout.get("columnOrder"), Some(Value::Array(_))) {
        let keys: Vec<String> = match layout.get("columns") {
            Some(Value::Object(columns)) => columns.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let mut order: Vec<String> = fields
            .iter()
            .filter(|f| keys.contains(&f.key))
            .map(|f| f.key.clone())
            .collect();
        let mut rest: Vec<String> = keys.into_iter().filter(|k| !order.contains(k)).collect();
        rest.sort();
        order.extend(rest);
        layout.insert("columnOrder".to_string(), serde_json::json!(order));
        repairs.push(Repair::MissingColumnOrder);
    }

    if legacy {
        let rows = layout
            .get("rows")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"height": DEFAULT_ROW_HEIGHT}));
        let lifted = |name: &str| {
            serde_json::json!({
                "layoutName": name,
                "columns": layout.get("columns").cloned().unwrap_or(Value::Null),
                "columnOrder": layout.get("columnOrder").cloned().unwrap_or(Value::Null),
                "rows": rows,
            })
        };
        let history = serde_json::json!([lifted(DEFAULT_LAYOUT), lifted(LAST_USED)]);
        layout.insert("layouts".to_string(), history);
        layout.insert("lastlayout".to_string(), Value::String(DEFAULT_LAYOUT.to_string()));
    }
    repairs
}
