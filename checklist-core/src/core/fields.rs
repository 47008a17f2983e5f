//! Field definitions and the shared field registry.
//!
//! A [`FieldDefinition`] describes one possible column: its key, type,
//! default and where a `select` field takes its options from. Definitions are
//! independent of any one checklist; layouts decide which of them are shown.

use crate::core::computed::ComputedKind;
use crate::core::store::BlobStore;
use crate::{ChecklistError, FieldValue, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Keys that name envelope properties of an item rather than entries of its
/// field map. Definitions may use them (the tree and checkbox columns do) but
/// their values live on [`Item`](crate::Item) itself.
pub const RESERVED_KEYS: &[&str] = &[
    "id", "label", "done", "children", "hns", "no", "collapsed", "noteFile", "imageFile", "link",
    "files", "attachments", "color", "bold", "important",
];

/// The kind of editor and value a column carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Checkbox,
    Text,
    Number,
    Date,
    Select,
    /// The hierarchical label column.
    Tree,
    Computed,
    Formula,
}

/// Describes a single column that items may carry a value for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(
        default,
        rename = "default_value",
        alias = "defaultValue",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_value: Option<Value>,
    /// Static option list for `select` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Name of a runtime-populated option list for `select` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Computation for `computed` and `formula` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computation: Option<ComputedKind>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_width")]
    pub width: u32,
    /// Whether the column is visible in a freshly synthesized layout.
    #[serde(default = "default_true")]
    pub visible: bool,
}

fn default_width() -> u32 {
    120
}

fn default_true() -> bool {
    true
}

impl FieldDefinition {
    pub fn new(key: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
            default_value: None,
            options: None,
            source: None,
            computation: None,
            required: false,
            width: default_width(),
            visible: true,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|s| s.to_string()).collect());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_computation(mut self, computation: ComputedKind) -> Self {
        self.computation = Some(computation);
        self
    }

    /// `true` for keys stored on the item envelope instead of its field map.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        RESERVED_KEYS.contains(&self.key.as_str())
    }

    /// `true` for read-only columns whose value is derived.
    #[must_use]
    pub fn is_derived(&self) -> bool {
        matches!(self.field_type, FieldType::Computed | FieldType::Formula)
    }

    fn has_options(&self) -> bool {
        self.options.is_some()
    }

    fn has_source(&self) -> bool {
        self.source.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Initial value for a new item, or `None` if new items leave it unset.
    ///
    /// An explicit `default_value` wins; otherwise only checkboxes get one.
    #[must_use]
    pub fn initial_value(&self) -> Option<FieldValue> {
        if self.is_reserved() || self.is_derived() {
            return None;
        }
        if let Some(v) = &self.default_value {
            return serde_json::from_value(v.clone()).ok();
        }
        match self.field_type {
            FieldType::Checkbox => Some(FieldValue::Bool(false)),
            _ => None,
        }
    }

    /// Checks that `value` may be written to this field.
    ///
    /// `sources` resolves `select` fields that draw their options from a
    /// named list.
    ///
    /// # Errors
    ///
    /// Returns [`ChecklistError::ValidationFailed`] naming the field when the
    /// value has the wrong shape, is not among the allowed options, is empty
    /// for a required field, or targets a derived field.
    pub fn check_value(
        &self,
        value: &FieldValue,
        sources: &BTreeMap<String, Vec<String>>,
    ) -> Result<()> {
        let fail = |msg: &str| {
            Err(ChecklistError::ValidationFailed(format!("Field '{}': {msg}", self.key)))
        };
        if self.is_derived() {
            return fail("is computed and cannot be edited");
        }
        if value.is_empty() {
            return if self.required { fail("must not be empty") } else { Ok(()) };
        }
        match (self.field_type, value) {
            (FieldType::Checkbox, FieldValue::Bool(_)) => Ok(()),
            (FieldType::Number, FieldValue::Number(_)) => Ok(()),
            (FieldType::Date, FieldValue::Date(_)) => Ok(()),
            (FieldType::Text | FieldType::Tree, FieldValue::Text(_)) => Ok(()),
            (FieldType::Select, FieldValue::Text(choice)) => self.check_choices(
                std::slice::from_ref(choice),
                sources,
            ),
            (FieldType::Select, FieldValue::Selection(choices)) => {
                self.check_choices(choices, sources)
            }
            _ => fail("value has the wrong type"),
        }
    }

    fn check_choices(
        &self,
        choices: &[String],
        sources: &BTreeMap<String, Vec<String>>,
    ) -> Result<()> {
        let allowed: Option<&Vec<String>> = match (&self.options, &self.source) {
            (Some(options), _) if !options.is_empty() => Some(options),
            (_, Some(source)) => sources.get(source),
            _ => None,
        };
        // An unpopulated source cannot be checked against.
        let Some(allowed) = allowed else {
            return Ok(());
        };
        match choices.iter().find(|c| !allowed.contains(c)) {
            Some(bad) => Err(ChecklistError::ValidationFailed(format!(
                "Field '{}': '{bad}' is not an allowed option",
                self.key
            ))),
            None => Ok(()),
        }
    }
}

/// Why a field definition was flagged by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssueKind {
    BothOptionsAndSource,
    NeitherOptionsNorSource,
    /// `options` is set but lists nothing to choose from.
    EmptyOptions,
    UnknownSource(String),
    MissingComputation,
    DuplicateKey,
}

/// One problem found in a set of field definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub key: String,
    pub kind: FieldIssueKind,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FieldIssueKind::BothOptionsAndSource => {
                write!(f, "'{}': select field sets both options and source", self.key)
            }
            FieldIssueKind::NeitherOptionsNorSource => {
                write!(f, "'{}': select field needs options or a source", self.key)
            }
            FieldIssueKind::EmptyOptions => {
                write!(f, "'{}': select field has an empty options list", self.key)
            }
            FieldIssueKind::UnknownSource(source) => {
                write!(f, "'{}': unknown source '{source}'", self.key)
            }
            FieldIssueKind::MissingComputation => {
                write!(f, "'{}': computed field has no computation", self.key)
            }
            FieldIssueKind::DuplicateKey => write!(f, "'{}': key defined more than once", self.key),
        }
    }
}

/// Checks a set of definitions and returns every issue found.
///
/// `known_sources` lists the option-list names a `select` field may
/// reference: the checklist's own `sources` keys plus whitelisted external
/// documents. An issue in one definition never hides issues in others.
#[must_use]
pub fn validate(defs: &[FieldDefinition], known_sources: &[String]) -> Vec<FieldIssue> {
    let mut issues = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for def in defs {
        let issue = |kind| FieldIssue { key: def.key.clone(), kind };
        if !seen.insert(def.key.as_str()) {
            issues.push(issue(FieldIssueKind::DuplicateKey));
        }
        match def.field_type {
            FieldType::Select => match (def.has_options(), def.has_source()) {
                (true, true) => issues.push(issue(FieldIssueKind::BothOptionsAndSource)),
                (false, false) => issues.push(issue(FieldIssueKind::NeitherOptionsNorSource)),
                (false, true) => {
                    let source = def.source.clone().unwrap_or_default();
                    if !known_sources.iter().any(|s| *s == source) {
                        issues.push(issue(FieldIssueKind::UnknownSource(source)));
                    }
                }
                (true, false) => {
                    if def.options.as_ref().is_some_and(Vec::is_empty) {
                        issues.push(issue(FieldIssueKind::EmptyOptions));
                    }
                }
            },
            FieldType::Computed | FieldType::Formula if def.computation.is_none() => {
                issues.push(issue(FieldIssueKind::MissingComputation));
            }
            _ => {}
        }
    }
    issues
}

/// Initial field map for a new item.
#[must_use]
pub fn default_fields(defs: &[FieldDefinition]) -> BTreeMap<String, FieldValue> {
    defs.iter()
        .filter_map(|d| d.initial_value().map(|v| (d.key.clone(), v)))
        .collect()
}

/// The definitions used when the field store has none yet.
#[must_use]
pub fn builtin_fields() -> Vec<FieldDefinition> {
    let mut label = FieldDefinition::new("label", "Item", FieldType::Tree);
    label.width = 320;
    let mut done = FieldDefinition::new("done", "Done", FieldType::Checkbox);
    done.width = 50;
    vec![
        done,
        label,
        FieldDefinition::new("who", "Who", FieldType::Select).with_source("collaborators"),
        FieldDefinition::new("date", "Date", FieldType::Date),
        FieldDefinition::new("qty_est", "Qty (est.)", FieldType::Number),
        FieldDefinition::new("unit", "Unit", FieldType::Select).with_source("unitChoices"),
    ]
}

/// Parses a field store document: either a bare array or `{ "fields": [...] }`.
///
/// # Errors
///
/// Returns [`ChecklistError::FieldDefinitionInvalid`] for any other shape and
/// [`ChecklistError::Json`] if an entry does not parse.
pub fn parse_field_definitions(value: Value) -> Result<Vec<FieldDefinition>> {
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => map.remove("fields").ok_or_else(|| {
            ChecklistError::FieldDefinitionInvalid("expected an array or a 'fields' key".to_string())
        })?,
        _ => {
            return Err(ChecklistError::FieldDefinitionInvalid(
                "expected an array or a 'fields' key".to_string(),
            ))
        }
    };
    Ok(serde_json::from_value(list)?)
}

/// Shared, process-wide set of field definitions.
///
/// Cloning the registry clones the handle, not the definitions. Readers take
/// a [`snapshot`](Self::snapshot); writers swap the whole list at once, so a
/// reader never sees a half-updated registry.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    inner: Arc<RwLock<Arc<Vec<FieldDefinition>>>>,
}

impl FieldRegistry {
    pub fn new(defs: Vec<FieldDefinition>) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(defs))) }
    }

    /// The current definitions.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<FieldDefinition>> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<FieldDefinition> {
        self.snapshot().iter().find(|d| d.key == key).cloned()
    }

    /// Replaces all definitions atomically.
    pub fn replace(&self, defs: Vec<FieldDefinition>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(defs);
    }

    /// Loads definitions from `path` in `store` and installs them.
    ///
    /// On any failure the previous definitions stay in place. Returns the
    /// number of definitions installed.
    ///
    /// # Errors
    ///
    /// Propagates store and parse errors.
    pub fn reload_from(&self, store: &dyn BlobStore, path: &str) -> Result<usize> {
        let defs = parse_field_definitions(store.fetch(path)?)?;
        let count = defs.len();
        self.replace(defs);
        log::info!("Loaded {count} field definitions from {path}");
        Ok(count)
    }
}

/// Pulls a flat list of option strings out of an external JSON document.
///
/// Recognized shapes: a raw array (strings, or objects with `username`,
/// `name` or `label`), `{ "users": [...] }` (usernames) and
/// `{ "items": [...] }` (labels). Returns `None` for anything else.
#[must_use]
pub fn extract_source_values(value: &Value) -> Option<Vec<String>> {
    let list = match value {
        Value::Array(list) => list,
        Value::Object(map) => match (map.get("users"), map.get("items")) {
            (Some(Value::Array(users)), _) => users,
            (_, Some(Value::Array(items))) => items,
            _ => return None,
        },
        _ => return None,
    };
    Some(list.iter().filter_map(option_text).collect())
}

fn option_text(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => ["username", "name", "label"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// Derives the `sources` key for an external document name: the file stem of
/// a `.json` path (`"config/users.json"` becomes `"users"`).
///
/// # Errors
///
/// Returns [`ChecklistError::InvalidSource`] if `name` is not a `.json` file.
pub fn source_key(name: &str) -> Result<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    match file.strip_suffix(".json") {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => Err(ChecklistError::InvalidSource(format!("'{name}' is not a .json document"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlobStore;
    use serde_json::json;

    fn select(key: &str) -> FieldDefinition {
        FieldDefinition::new(key, key, FieldType::Select)
    }

    #[test]
    fn test_select_with_both_options_and_source_is_flagged() {
        let defs = vec![select("unit").with_options(&["kg", "m"]).with_source("unitChoices")];
        let issues = validate(&defs, &["unitChoices".to_string()]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, FieldIssueKind::BothOptionsAndSource);
    }

    #[test]
    fn test_empty_options_still_count_as_set() {
        let defs = vec![select("unit").with_options(&[]).with_source("unitChoices")];
        let issues = validate(&defs, &["unitChoices".to_string()]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, FieldIssueKind::BothOptionsAndSource);

        let issues = validate(&[select("unit").with_options(&[])], &[]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, FieldIssueKind::EmptyOptions);
    }

    #[test]
    fn test_select_with_neither_is_flagged() {
        let issues = validate(&[select("unit")], &[]);
        assert_eq!(issues[0].kind, FieldIssueKind::NeitherOptionsNorSource);
    }

    #[test]
    fn test_select_with_exactly_one_passes() {
        let defs = vec![
            select("unit").with_options(&["kg"]),
            select("who").with_source("collaborators"),
        ];
        assert!(validate(&defs, &["collaborators".to_string()]).is_empty());
    }

    #[test]
    fn test_unknown_source_is_flagged_without_hiding_others() {
        let defs = vec![
            select("who").with_source("people"),
            select("unit"),
            FieldDefinition::new("pct", "%", FieldType::Computed),
        ];
        let issues = validate(&defs, &["collaborators".to_string()]);
        let kinds: Vec<_> = issues.iter().map(|i| i.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                FieldIssueKind::UnknownSource("people".to_string()),
                FieldIssueKind::NeitherOptionsNorSource,
                FieldIssueKind::MissingComputation,
            ]
        );
        assert!(issues[0].to_string().contains("people"));
    }

    #[test]
    fn test_wire_format() {
        let v = json!([
            {"key": "unit", "label": "Unit", "type": "select", "source": "unitChoices"},
            {"key": "qty", "label": "Qty", "type": "number", "default_value": 1}
        ]);
        let defs = parse_field_definitions(v).unwrap();
        assert_eq!(defs[0].field_type, FieldType::Select);
        assert_eq!(defs[0].source.as_deref(), Some("unitChoices"));
        assert_eq!(defs[1].initial_value(), Some(FieldValue::Number(1.0)));
        assert_eq!(defs[1].width, 120);
        let wrapped = parse_field_definitions(json!({"fields": []})).unwrap();
        assert!(wrapped.is_empty());
        assert!(parse_field_definitions(json!("nope")).is_err());
    }

    #[test]
    fn test_default_fields_skip_reserved_and_derived() {
        let mut defs = builtin_fields();
        defs.push(FieldDefinition::new("ok", "OK", FieldType::Checkbox));
        defs.push(
            FieldDefinition::new("pct", "%", FieldType::Computed)
                .with_computation(ComputedKind::PercentDone),
        );
        let fields = default_fields(&defs);
        assert_eq!(fields.get("ok"), Some(&FieldValue::Bool(false)));
        assert!(!fields.contains_key("done"));
        assert!(!fields.contains_key("pct"));
    }

    #[test]
    fn test_check_value() {
        let mut sources = BTreeMap::new();
        sources.insert("unitChoices".to_string(), vec!["kg".to_string(), "m".to_string()]);
        let unit = select("unit").with_source("unitChoices");
        assert!(unit.check_value(&FieldValue::Text("kg".to_string()), &sources).is_ok());
        assert!(unit.check_value(&FieldValue::Text("ft".to_string()), &sources).is_err());
        let qty = FieldDefinition::new("qty", "Qty", FieldType::Number);
        assert!(qty.check_value(&FieldValue::Number(3.0), &sources).is_ok());
        assert!(qty.check_value(&FieldValue::Text("3".to_string()), &sources).is_err());
        let mut who = FieldDefinition::new("who", "Who", FieldType::Text);
        who.required = true;
        assert!(who.check_value(&FieldValue::Text(String::new()), &sources).is_err());
        let pct = FieldDefinition::new("pct", "%", FieldType::Formula);
        assert!(pct.check_value(&FieldValue::Number(1.0), &sources).is_err());
    }

    #[test]
    fn test_registry_replace_on_success_keep_on_failure() {
        let registry = FieldRegistry::new(builtin_fields());
        let store = MemoryBlobStore::new();
        store.insert("config/fields.json", json!({"broken": true}));
        assert!(registry.reload_from(&store, "config/fields.json").is_err());
        assert_eq!(registry.snapshot().len(), builtin_fields().len());

        store.insert("config/fields.json", json!([{"key": "who", "type": "text"}]));
        assert_eq!(registry.reload_from(&store, "config/fields.json").unwrap(), 1);
        assert_eq!(registry.get("who").unwrap().field_type, FieldType::Text);
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let registry = FieldRegistry::new(builtin_fields());
        let before = registry.snapshot();
        registry.replace(Vec::new());
        assert_eq!(before.len(), builtin_fields().len());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_extract_source_values_shapes() {
        assert_eq!(extract_source_values(&json!(["kg", "m"])), Some(vec!["kg".into(), "m".into()]));
        assert_eq!(
            extract_source_values(&json!({"users": [{"username": "ann"}, {"username": "bob"}]})),
            Some(vec!["ann".into(), "bob".into()])
        );
        assert_eq!(
            extract_source_values(&json!({"items": [{"label": "Phase 1"}]})),
            Some(vec!["Phase 1".into()])
        );
        assert_eq!(extract_source_values(&json!({"other": 1})), None);
        assert_eq!(extract_source_values(&json!(42)), None);
    }

    #[test]
    fn test_source_key() {
        assert_eq!(source_key("config/users.json").unwrap(), "users");
        assert_eq!(source_key("units.json").unwrap(), "units");
        assert!(matches!(source_key("units.csv"), Err(ChecklistError::InvalidSource(_))));
        assert!(source_key(".json").is_err());
    }
}
