//! The checklist document aggregate and its file naming.

use crate::core::layout::{default_layout, LayoutState};
use crate::{default_fields, Attachment, FieldDefinition, Item};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const FILENAME_FORMAT: &str = "%Y_%m_%d_@_%H-%M-%S";

/// A whole checklist, as stored in one blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistDocument {
    #[serde(default)]
    pub title: String,
    /// Optimistic-concurrency token. Written only by the save path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_save: Option<String>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub layout: LayoutState,
    /// Named option lists referenced by `select` fields.
    #[serde(default)]
    pub sources: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Attachment>,
    /// Top-level keys this version does not know about, kept for the next save.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChecklistDocument {
    /// A new, unsaved checklist with a single "First item".
    pub fn new(title: impl Into<String>, fields: &[FieldDefinition]) -> Self {
        Self {
            title: title.into(),
            last_save: None,
            items: vec![Item::new("First item", default_fields(fields))],
            layout: LayoutState::from_layout(default_layout(fields)),
            sources: BTreeMap::new(),
            files: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Total number of items in the tree.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.iter().map(Item::subtree_len).sum()
    }

    /// Visits every attachment of the checklist and its items.
    pub fn for_each_attachment_mut(&mut self, f: &mut dyn FnMut(&mut Attachment)) {
        for a in &mut self.files {
            f(a);
        }
        for item in &mut self.items {
            item.for_each_attachment_mut(f);
        }
    }
}

/// Lowercase, hyphen-separated form of a title for use in file names.
#[must_use]
pub fn slugify_title(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() { "checklist".to_string() } else { slug }
}

/// Blob file name for a checklist created at `now`:
/// `YYYY_MM_DD_@_HH-MM-SS_<slug>.json`.
#[must_use]
pub fn checklist_filename(now: DateTime<Utc>, title: &str) -> String {
    format!("{}_{}.json", now.format(FILENAME_FORMAT), slugify_title(title))
}

/// Splits a checklist file name into its creation time and slug.
#[must_use]
pub fn parse_checklist_filename(name: &str) -> Option<(DateTime<Utc>, String)> {
    let stem = name.strip_suffix(".json")?;
    // The timestamp part has a fixed width of 21 characters.
    let (stamp, rest) = (stem.get(..21)?, stem.get(21..)?);
    let slug = rest.strip_prefix('_')?;
    let naive = NaiveDateTime::parse_from_str(stamp, FILENAME_FORMAT).ok()?;
    Some((naive.and_utc(), slug.to_string()))
}

/// A `lastSave` token for `now` that differs from `previous`.
///
/// Tokens are RFC 3339 with millisecond precision. When two saves land in the
/// same millisecond the new token is pushed one millisecond forward.
#[must_use]
pub fn fresh_timestamp(now: DateTime<Utc>, previous: Option<&str>) -> String {
    let token = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let Some(prev) = previous else {
        return token;
    };
    if token.as_str() > prev {
        return token;
    }
    match DateTime::parse_from_rfc3339(prev) {
        Ok(p) => (p.with_timezone(&Utc) + Duration::milliseconds(1))
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        Err(_) if token == prev => {
            (now + Duration::milliseconds(1)).to_rfc3339_opts(SecondsFormat::Millis, true)
        }
        Err(_) => token,
    }
}
