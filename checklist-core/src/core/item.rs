//! Checklist items and their registry-defined field values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A value stored under a registry-defined field key on an [`Item`].
///
/// Serialized untagged so the wire format stays the plain JSON value
/// (`true`, `3.5`, `"2024-05-01"`, `"kg"`, `["a","b"]`). Variants are tried
/// in declaration order, so a `YYYY-MM-DD` string reads back as a `Date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Empty,
    Bool(bool),
    Number(f64),
    Date(NaiveDate),
    Text(String),
    Selection(Vec<String>),
    /// Any other JSON payload, kept verbatim so it survives a load/save cycle.
    Raw(serde_json::Value),
}

impl FieldValue {
    /// Numeric view of the value, used by computed fields.
    ///
    /// Text that parses as a number counts; everything else is `None`.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            Self::Selection(v) => v.is_empty(),
            Self::Raw(v) => v.is_null(),
            Self::Bool(_) | Self::Number(_) | Self::Date(_) => false,
        }
    }
}

/// Presentation flags carried on every item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub important: bool,
}

/// A file referenced by an item or by the checklist itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub path: String,
    /// Bytes waiting to be uploaded on the next save. Never serialized.
    #[serde(skip)]
    pub pending: Option<Vec<u8>>,
}

impl Attachment {
    /// An attachment whose bytes still have to be uploaded to `path`.
    pub fn pending(name: impl Into<String>, path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { name: name.into(), path: path.into(), pending: Some(bytes) }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// A node in the checklist tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default = "new_item_id")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub children: Vec<Item>,
    /// Dotted display number. Derived; only the renumbering pass writes it.
    #[serde(default, alias = "no", skip_serializing_if = "Option::is_none")]
    pub hns: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(flatten)]
    pub style: ItemStyle,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

pub(crate) fn new_item_id() -> String {
    Uuid::new_v4().to_string()
}

impl Item {
    /// Creates an empty, not-done item with the given label and field defaults.
    pub fn new(label: impl Into<String>, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            id: new_item_id(),
            label: label.into(),
            done: false,
            children: Vec::new(),
            hns: None,
            collapsed: false,
            note_file: None,
            image_file: None,
            link: None,
            files: Vec::new(),
            attachments: Vec::new(),
            style: ItemStyle::default(),
            fields,
        }
    }

    /// Number of items in this subtree, including `self`.
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Item::subtree_len).sum::<usize>()
    }

    /// Visits every attachment in this subtree.
    pub fn for_each_attachment_mut(&mut self, f: &mut dyn FnMut(&mut Attachment)) {
        for a in self.files.iter_mut().chain(self.attachments.iter_mut()) {
            f(a);
        }
        for child in &mut self.children {
            child.for_each_attachment_mut(f);
        }
    }
}
