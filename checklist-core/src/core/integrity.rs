//! Repair-on-load for checklist documents.
//!
//! Runs on the raw JSON before it is deserialized, so documents written by
//! older clients (or damaged by hand edits) still load.

use crate::core::layout::migrate_layout;
use crate::FieldDefinition;
use serde_json::{Map, Value};
use std::fmt;

/// One fix applied while loading a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Repair {
    /// The document was not a JSON object and was replaced by an empty one.
    NotAnObject,
    /// `items` was missing or not an array.
    MissingItems,
    /// An item at this path had no `children` array.
    MissingChildren { at: String },
    /// A non-object entry at this path was dropped from its list.
    DroppedMalformedItem { at: String },
    /// The label at this path was not a string.
    LabelNotText { at: String },
    /// The item at this path carried both the legacy `no` key and `hns`;
    /// `no` was dropped.
    LegacyNumberDropped { at: String },
    /// The document had no `layout`; one was built from the field registry.
    MissingLayout,
    /// A single-layout document was lifted into the named-layout history.
    LegacyLayoutLifted,
    MissingColumns,
    MissingColumnOrder,
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "document replaced: not a JSON object"),
            Self::MissingItems => write!(f, "items list restored"),
            Self::MissingChildren { at } => write!(f, "children list added to item {at}"),
            Self::DroppedMalformedItem { at } => write!(f, "malformed entry {at} dropped"),
            Self::LabelNotText { at } => write!(f, "label of item {at} converted to text"),
            Self::LegacyNumberDropped { at } => write!(f, "legacy number of item {at} dropped"),
            Self::MissingLayout => write!(f, "default layout added"),
            Self::LegacyLayoutLifted => write!(f, "layout upgraded to named layouts"),
            Self::MissingColumns => write!(f, "layout columns rebuilt"),
            Self::MissingColumnOrder => write!(f, "layout column order rebuilt"),
        }
    }
}

/// Repairs `doc` in place and returns what was fixed. An empty result means
/// the document was already well-formed.
pub fn repair_document(doc: &mut Value, fields: &[FieldDefinition]) -> Vec<Repair> {
    let mut repairs = Vec::new();
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
        repairs.push(Repair::NotAnObject);
    }
    let Value::Object(map) = doc else {
        return repairs;
    };

    repairs.extend(migrate_layout(map, fields));

    match map.get_mut("items") {
        Some(Value::Array(items)) => repair_items(items, "", &mut repairs),
        _ => {
            map.insert("items".to_string(), Value::Array(Vec::new()));
            repairs.push(Repair::MissingItems);
        }
    }

    for r in &repairs {
        log::warn!("Repaired checklist on load: {r}");
    }
    repairs
}

fn repair_items(items: &mut Vec<Value>, prefix: &str, repairs: &mut Vec<Repair>) {
    let mut position = 0;
    items.retain(|v| {
        position += 1;
        if v.is_object() {
            true
        } else {
            repairs.push(Repair::DroppedMalformedItem { at: dotted(prefix, position) });
            false
        }
    });

    for (i, item) in items.iter_mut().enumerate() {
        let at = dotted(prefix, i + 1);
        let Value::Object(obj) = item else { continue };

        match obj.get("label") {
            None | Some(Value::String(_)) => {}
            Some(Value::Null) => {
                obj.insert("label".to_string(), Value::String(String::new()));
                repairs.push(Repair::LabelNotText { at: at.clone() });
            }
            Some(other) => {
                let text = other.to_string();
                obj.insert("label".to_string(), Value::String(text));
                repairs.push(Repair::LabelNotText { at: at.clone() });
            }
        }

        if obj.contains_key("hns") && obj.remove("no").is_some() {
            repairs.push(Repair::LegacyNumberDropped { at: at.clone() });
        }

        match obj.get_mut("children") {
            Some(Value::Array(children)) => repair_items(children, &at, repairs),
            _ => {
                obj.insert("children".to_string(), Value::Array(Vec::new()));
                repairs.push(Repair::MissingChildren { at });
            }
        }
    }
}

fn dotted(prefix: &str, n: usize) -> String {
    if prefix.is_empty() {
        n.to_string()
    } else {
        format!("{prefix}.{n}")
    }
}
