//! Loading and saving checklists and their satellite documents.
//!
//! A save walks a fixed sequence of [`SavePhase`]s. The conflict check always
//! comes first: the remote copy is re-fetched and its `lastSave` compared with
//! the session's baseline before anything is written.

use crate::core::integrity::{repair_document, Repair};
use crate::core::session::{Confirmation, Session};
use crate::{
    checklist_filename, extract_source_values, fresh_timestamp, parse_checklist_filename,
    source_key, validate_fields, BlobStore, ChecklistDocument,
    ChecklistError, EditKind, FieldDefinition, FieldIssue, FieldRegistry, GatewayConfig, Layout,
    Notice, PurgeStrategy, Renderer, Result, SaveRequest, UsersConfig,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Where a save currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePhase {
    #[default]
    Idle,
    CheckConflict,
    /// The remote copy changed; waiting for the user's decision.
    ConflictFound,
    UploadAttachments,
    PersistDocument,
    PersistUserIndex,
}

/// The two `lastSave` tokens that disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub path: String,
    /// Token this session loaded, `None` for a never-saved checklist.
    pub local: Option<String>,
    /// Token of the remote copy, `None` if it has no `lastSave`.
    pub remote: Option<String>,
}

/// The user's answer to a [`ConflictReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    Abort,
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { last_save: String },
    /// A conflict was found and the user chose not to overwrite.
    Aborted,
    /// Another save was still running; this call did nothing.
    Skipped,
}

/// What a successful load had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResult {
    Clean,
    /// The session had unsaved edits and discarding them was refused. Nothing
    /// was loaded.
    Cancelled,
    /// The document needed repairs, the repaired copy was written back and
    /// then loaded again.
    RepairedAndPersisted { repairs: Vec<Repair> },
    /// The document needed repairs that could not be written back. They are
    /// applied in memory and the checklist is marked dirty.
    RepairedInMemory { repairs: Vec<Repair> },
}

/// A checklist file found in the checklist directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistSummary {
    pub name: String,
    pub path: String,
    pub created: Option<DateTime<Utc>>,
    pub slug: Option<String>,
}

/// Moves documents between a [`Session`] and a [`BlobStore`].
pub struct PersistenceGateway<S: BlobStore> {
    store: S,
    config: GatewayConfig,
}

impl<S: BlobStore> PersistenceGateway<S> {
    pub fn new(store: S, config: GatewayConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// A session whose journal retention follows the config.
    pub fn open_session<R: Renderer>(&self, registry: FieldRegistry, renderer: R) -> Session<R> {
        Session::new(registry, renderer)
            .with_journal(PurgeStrategy::KeepLast(self.config.journal_keep_last))
    }

    // ---- checklists ---------------------------------------------------------

    /// Starts a new checklist in `session` and assigns it a timestamped file
    /// name. Nothing is written until the first save.
    ///
    /// Returns `None` when the session has unsaved edits and discarding them
    /// was not confirmed.
    pub fn create_checklist<R: Renderer>(
        &self,
        session: &mut Session<R>,
        title: &str,
        confirmation: Confirmation,
    ) -> Option<String> {
        if !session.new_checklist(title, confirmation) {
            return None;
        }
        let path = self.config.checklist_path(&checklist_filename(Utc::now(), title));
        session.set_path(path.clone());
        log::info!("Created checklist '{title}' at {path}");
        Some(path)
    }

    /// Checklist files in the checklist directory, newest first.
    pub fn list_checklists(&self) -> Result<Vec<ChecklistSummary>> {
        let mut list: Vec<ChecklistSummary> = self
            .store
            .list(&self.config.checklist_dir)?
            .into_iter()
            .filter(|e| e.name.ends_with(".json"))
            .map(|e| {
                let parsed = parse_checklist_filename(&e.name);
                ChecklistSummary {
                    created: parsed.as_ref().map(|(t, _)| *t),
                    slug: parsed.map(|(_, s)| s),
                    name: e.name,
                    path: e.path,
                }
            })
            .collect();
        list.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));
        Ok(list)
    }

    /// Loads the checklist at `path` into `session`.
    ///
    /// Unsaved edits in the session are only discarded once confirmed; a
    /// refusal returns [`LoadResult::Cancelled`] without touching the store.
    /// A document without `lastSave` is rejected and the session keeps what
    /// it had. Damaged documents are repaired; the repaired copy is written
    /// back and loaded once more so the session edits exactly what is stored.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::MissingTimestamp`], store errors, and
    /// [`ChecklistError::Json`] if the repaired document still does not parse.
    pub fn load<R: Renderer>(
        &self,
        session: &mut Session<R>,
        path: &str,
        confirmation: Confirmation,
    ) -> Result<LoadResult> {
        if !session.confirm_discard(confirmation) {
            return Ok(LoadResult::Cancelled);
        }
        let fields = session.registry().snapshot();
        let (document, repairs) = self.fetch_repaired(path, &fields)?;
        if repairs.is_empty() {
            session.install(document, Some(path.to_string()));
            self.touch_user_index(path);
            return Ok(LoadResult::Clean);
        }

        // One write-back per load. A document that still needs repairs after
        // that is edited in memory instead.
        let persisted = self.write_back_repaired(path, &document);
        let result = match persisted {
            Ok(()) => {
                let (reloaded, again) = self.fetch_repaired(path, &fields)?;
                if again.is_empty() {
                    session.install(reloaded, Some(path.to_string()));
                    LoadResult::RepairedAndPersisted { repairs }
                } else {
                    log::warn!("{path} still needs {} repairs after write-back", again.len());
                    session.install(reloaded, Some(path.to_string()));
                    session.mark_dirty(EditKind::Repair, None);
                    LoadResult::RepairedInMemory { repairs: again }
                }
            }
            Err(e) => {
                log::warn!("Could not write back repaired {path}: {e}");
                session.install(document, Some(path.to_string()));
                session.mark_dirty(EditKind::Repair, None);
                LoadResult::RepairedInMemory { repairs }
            }
        };
        self.touch_user_index(path);
        Ok(result)
    }

    fn fetch_repaired(
        &self,
        path: &str,
        fields: &[FieldDefinition],
    ) -> Result<(ChecklistDocument, Vec<Repair>)> {
        let mut raw = self.store.fetch(path)?;
        if raw.get("lastSave").and_then(Value::as_str).is_none() {
            return Err(ChecklistError::MissingTimestamp(path.to_string()));
        }
        let repairs = repair_document(&mut raw, fields);
        let document: ChecklistDocument = serde_json::from_value(raw)?;
        Ok((document, repairs))
    }

    fn write_back_repaired(&self, path: &str, document: &ChecklistDocument) -> Result<()> {
        let token = fresh_timestamp(Utc::now(), document.last_save.as_deref());
        let mut value = serde_json::to_value(document)?;
        value["lastSave"] = Value::String(token);
        self.store.store(&SaveRequest::json(path, value, format!("Repair {path}")))
    }

    /// Saves the session's checklist.
    ///
    /// `decide` is asked what to do when the remote copy changed since the
    /// session loaded it. A failed save leaves the document, its baseline and
    /// its dirty state as they were.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::NoChecklistLoaded`] and store errors.
    pub fn save<R: Renderer>(
        &self,
        session: &mut Session<R>,
        decide: &mut dyn FnMut(&ConflictReport) -> ConflictDecision,
    ) -> Result<SaveOutcome> {
        if !session.begin_save() {
            log::info!("Save ignored: another save is in progress");
            return Ok(SaveOutcome::Skipped);
        }
        let outcome = self.run_save(session, decide);
        session.end_save();
        if let Err(e) = &outcome {
            session.notify(Notice::error(e.user_message()));
        }
        outcome
    }

    /// Saves without overwriting a changed remote copy.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::SaveConflict`] if the remote copy changed, plus
    /// everything [`save`](Self::save) returns.
    pub fn save_or_fail<R: Renderer>(&self, session: &mut Session<R>) -> Result<String> {
        let mut conflict = None;
        let outcome = self.save(session, &mut |report| {
            conflict = Some(report.clone());
            ConflictDecision::Abort
        })?;
        match (outcome, conflict) {
            (SaveOutcome::Saved { last_save }, _) => Ok(last_save),
            (_, Some(report)) => Err(ChecklistError::SaveConflict {
                local: report.local,
                remote: report.remote,
            }),
            (_, None) => Err(ChecklistError::ValidationFailed(
                "A save is already in progress".to_string(),
            )),
        }
    }

    fn run_save<R: Renderer>(
        &self,
        session: &mut Session<R>,
        decide: &mut dyn FnMut(&ConflictReport) -> ConflictDecision,
    ) -> Result<SaveOutcome> {
        let path = session.path().ok_or(ChecklistError::NoChecklistLoaded)?.to_string();
        if session.document().is_none() {
            return Err(ChecklistError::NoChecklistLoaded);
        }

        session.set_save_phase(SavePhase::CheckConflict);
        let remote = match self.store.fetch(&path) {
            Ok(value) => Some(value.get("lastSave").and_then(Value::as_str).map(str::to_string)),
            Err(ChecklistError::BlobNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let local = session.baseline().map(str::to_string);
        if let Some(remote_token) = &remote {
            if *remote_token != local {
                session.set_save_phase(SavePhase::ConflictFound);
                let report = ConflictReport { path: path.clone(), local, remote: remote_token.clone() };
                log::warn!("Save conflict on {path}: local {:?}, remote {:?}", report.local, report.remote);
                if decide(&report) == ConflictDecision::Abort {
                    return Ok(SaveOutcome::Aborted);
                }
                log::info!("Overwriting remote copy of {path}");
            }
        }

        session.set_save_phase(SavePhase::UploadAttachments);
        self.upload_pending(session)?;

        session.set_save_phase(SavePhase::PersistDocument);
        let previous = remote.flatten().or_else(|| session.baseline().map(str::to_string));
        let token = fresh_timestamp(Utc::now(), previous.as_deref());
        let mut value = serde_json::to_value(session.document().ok_or(ChecklistError::NoChecklistLoaded)?)?;
        value["lastSave"] = Value::String(token.clone());
        self.store.store(&SaveRequest::json(path.as_str(), value, format!("Save {path}")))?;
        session.complete_save(&token);
        log::info!("Saved {path} at {token}");

        session.set_save_phase(SavePhase::PersistUserIndex);
        self.touch_user_index(&path);

        Ok(SaveOutcome::Saved { last_save: token })
    }

    fn upload_pending<R: Renderer>(&self, session: &mut Session<R>) -> Result<()> {
        let Some(doc) = session.document_mut() else {
            return Ok(());
        };
        let mut pending: Vec<(String, String)> = Vec::new();
        doc.for_each_attachment_mut(&mut |a| {
            if let Some(bytes) = &a.pending {
                pending.push((a.path.clone(), base64::engine::general_purpose::STANDARD.encode(bytes)));
            }
        });
        for (path, content) in &pending {
            self.store.store(&SaveRequest::base64(path.as_str(), content.clone(), format!("Upload {path}")))?;
            log::debug!("Uploaded attachment {path}");
        }
        if !pending.is_empty() {
            doc.for_each_attachment_mut(&mut |a| a.pending = None);
        }
        Ok(())
    }

    /// Best effort: a failure is logged and never fails the calling load or save.
    fn touch_user_index(&self, checklist_path: &str) {
        let Some(user_id) = self.config.user_id.as_deref() else {
            return;
        };
        let result = self.load_users().and_then(|mut users| {
            users.touch_last_accessed(user_id, checklist_path, Utc::now())?;
            self.save_users(&users)
        });
        if let Err(e) = result {
            log::warn!("Could not update last-accessed index for {user_id}: {e}");
        }
    }

    // ---- external sources ---------------------------------------------------

    /// Imports a whitelisted external `.json` document as an option source
    /// and returns the key it was stored under.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::InvalidSource`] if the name is not a `.json` file,
    /// not whitelisted, or its content has no recognized list shape.
    pub fn import_external_source<R: Renderer>(
        &self,
        session: &mut Session<R>,
        name: &str,
    ) -> Result<String> {
        let key = source_key(name)?;
        if !self.config.is_whitelisted_source(name) {
            return Err(ChecklistError::InvalidSource(format!("'{name}' is not an allowed source")));
        }
        let values = extract_source_values(&self.store.fetch(name)?).ok_or_else(|| {
            ChecklistError::InvalidSource(format!("'{name}' has no recognizable list"))
        })?;
        log::info!("Imported {} values from {name} as '{key}'", values.len());
        session.set_source(&key, values)?;
        Ok(key)
    }

    // ---- satellite documents ------------------------------------------------

    /// The users document; an absent one reads as empty.
    pub fn load_users(&self) -> Result<UsersConfig> {
        match self.store.fetch(&self.config.users_file) {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(ChecklistError::BlobNotFound(_)) => Ok(UsersConfig::default()),
            Err(e) => Err(e),
        }
    }

    pub fn save_users(&self, users: &UsersConfig) -> Result<()> {
        self.store.store(&SaveRequest::json(
            self.config.users_file.as_str(),
            serde_json::to_value(users)?,
            "Update users",
        ))
    }

    /// Reloads `registry` from the field store. The registry keeps its old
    /// definitions if this fails.
    pub fn load_field_definitions(&self, registry: &FieldRegistry) -> Result<usize> {
        registry.reload_from(&self.store, &self.config.fields_file)
    }

    /// Writes new field definitions and, once the write succeeded, installs
    /// them in `registry`. Returns the validation issues found, which do not
    /// block the save.
    ///
    /// # Errors
    ///
    /// [`ChecklistError::FieldDefinitionInvalid`] for duplicate keys, plus
    /// store errors.
    pub fn save_field_definitions(
        &self,
        registry: &FieldRegistry,
        defs: Vec<FieldDefinition>,
    ) -> Result<Vec<FieldIssue>> {
        let known: Vec<String> = self
            .config
            .external_sources
            .iter()
            .filter_map(|s| source_key(s).ok())
            .collect();
        let issues = validate_fields(&defs, &known);
        if let Some(dup) = issues.iter().find(|i| i.kind == crate::FieldIssueKind::DuplicateKey) {
            return Err(ChecklistError::FieldDefinitionInvalid(dup.to_string()));
        }
        let value = json!({ "fields": defs });
        self.store.store(&SaveRequest::json(
            self.config.fields_file.as_str(),
            value,
            "Update field definitions",
        ))?;
        registry.replace(defs);
        Ok(issues)
    }

    /// Shared layout presets; an absent document reads as none.
    pub fn load_layout_presets(&self) -> Result<Vec<Layout>> {
        match self.store.fetch(&self.config.layouts_file) {
            Ok(Value::Array(list)) => Ok(serde_json::from_value(Value::Array(list))?),
            Ok(mut value) => match value.get_mut("layouts").map(Value::take) {
                Some(list) => Ok(serde_json::from_value(list)?),
                None => Ok(Vec::new()),
            },
            Err(ChecklistError::BlobNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub fn save_layout_presets(&self, layouts: &[Layout]) -> Result<()> {
        self.store.store(&SaveRequest::json(
            self.config.layouts_file.as_str(),
            json!({ "layouts": layouts }),
            "Update layout presets",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::tests::RecordingRenderer;
    use crate::{builtin_fields, Attachment, FieldType, ItemPath, MemoryBlobStore, NoticeLevel, User};
    use std::cell::Cell;

    const PATH: &str = "checklists/2024_05_01_@_10-00-00_demo.json";

    fn gateway() -> PersistenceGateway<MemoryBlobStore> {
        PersistenceGateway::new(MemoryBlobStore::new(), GatewayConfig::default())
    }

    fn session(gw: &PersistenceGateway<MemoryBlobStore>) -> Session<RecordingRenderer> {
        gw.open_session(FieldRegistry::new(builtin_fields()), RecordingRenderer::default())
    }

    fn overwrite(_: &ConflictReport) -> ConflictDecision {
        ConflictDecision::Overwrite
    }

    fn stored_doc(last_save: &str) -> Value {
        let mut doc = ChecklistDocument::new("Demo", &builtin_fields());
        doc.last_save = Some(last_save.to_string());
        serde_json::to_value(doc).unwrap()
    }

    #[test]
    fn test_end_to_end_create_save_load() {
        let gw = gateway();
        let mut s = session(&gw);
        let path = gw.create_checklist(&mut s, "Demo", Confirmation::Ask).unwrap();
        assert!(path.starts_with("checklists/") && path.ends_with("_demo.json"));
        let doc = s.document().unwrap();
        assert_eq!(doc.items.len(), 1);
        assert_eq!(doc.items[0].label, "First item");
        assert!(!doc.items[0].done);
        assert!(doc.items[0].children.is_empty());

        let outcome = gw.save(&mut s, &mut overwrite).unwrap();
        let SaveOutcome::Saved { last_save } = outcome else {
            panic!("expected a save, got {outcome:?}");
        };
        assert!(!s.is_dirty());
        assert_eq!(s.baseline(), Some(last_save.as_str()));

        let mut fresh = session(&gw);
        assert_eq!(gw.load(&mut fresh, &path, Confirmation::Ask).unwrap(), LoadResult::Clean);
        let loaded = fresh.document().unwrap();
        assert_eq!(loaded.last_save.as_deref(), Some(last_save.as_str()));
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].label, "First item");
        assert!(loaded.items[0].children.is_empty());
        assert!(!fresh.is_dirty());
    }

    #[test]
    fn test_conflict_is_found_before_any_write() {
        let gw = gateway();
        gw.store().insert(PATH, stored_doc("T1"));
        let mut s = session(&gw);
        gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        s.set_label(&ItemPath::root(1), "mine").unwrap();
        gw.store().insert(PATH, stored_doc("T2"));

        let asked = Cell::new(false);
        let outcome = gw
            .save(&mut s, &mut |report| {
                assert_eq!(report.local.as_deref(), Some("T1"));
                assert_eq!(report.remote.as_deref(), Some("T2"));
                assert!(gw.store().writes().is_empty());
                asked.set(true);
                ConflictDecision::Abort
            })
            .unwrap();
        assert!(asked.get());
        assert_eq!(outcome, SaveOutcome::Aborted);
        assert!(gw.store().writes().is_empty());
        assert!(s.is_dirty());
        assert_eq!(s.baseline(), Some("T1"));
        assert_eq!(s.save_phase(), SavePhase::Idle);
        assert!(!s.is_saving());
    }

    #[test]
    fn test_overwrite_after_conflict() {
        let gw = gateway();
        gw.store().insert(PATH, stored_doc("2024-05-01T10:00:00.000Z"));
        let mut s = session(&gw);
        gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        gw.store().insert(PATH, stored_doc("2024-05-01T11:00:00.000Z"));
        let SaveOutcome::Saved { last_save } = gw.save(&mut s, &mut overwrite).unwrap() else {
            panic!("expected a save");
        };
        assert_ne!(last_save, "2024-05-01T11:00:00.000Z");
        let remote = gw.store().fetch(PATH).unwrap();
        assert_eq!(remote["lastSave"], json!(last_save));
    }

    #[test]
    fn test_save_or_fail_reports_conflict() {
        let gw = gateway();
        gw.store().insert(PATH, stored_doc("T1"));
        let mut s = session(&gw);
        gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        gw.store().insert(PATH, stored_doc("T2"));
        assert!(matches!(
            gw.save_or_fail(&mut s),
            Err(ChecklistError::SaveConflict { .. })
        ));
    }

    #[test]
    fn test_load_over_unsaved_edits_needs_confirmation() {
        let gw = gateway();
        gw.store().insert(PATH, stored_doc("T1"));
        let mut s = session(&gw);
        gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        s.set_label(&ItemPath::root(1), "unsaved work").unwrap();
        let frames = s.renderer().frames.len();

        assert_eq!(gw.load(&mut s, PATH, Confirmation::Ask).unwrap(), LoadResult::Cancelled);
        assert!(s.is_dirty());
        assert_eq!(s.document().unwrap().items[0].label, "unsaved work");
        assert_eq!(s.renderer().frames.len(), frames);

        s.renderer_mut().confirm_answer = true;
        assert_eq!(gw.load(&mut s, PATH, Confirmation::Ask).unwrap(), LoadResult::Clean);
        assert!(!s.is_dirty());
        assert_eq!(s.document().unwrap().items[0].label, "First item");
    }

    #[test]
    fn test_load_with_bypass_discards_without_asking() {
        let gw = gateway();
        gw.store().insert(PATH, stored_doc("T1"));
        let mut s = session(&gw);
        gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        s.toggle_done(&ItemPath::root(1)).unwrap();
        assert_eq!(gw.load(&mut s, PATH, Confirmation::Bypass).unwrap(), LoadResult::Clean);
        assert!(!s.document().unwrap().items[0].done);
    }

    #[test]
    fn test_create_over_unsaved_edits_needs_confirmation() {
        let gw = gateway();
        gw.store().insert(PATH, stored_doc("T1"));
        let mut s = session(&gw);
        gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        s.set_label(&ItemPath::root(1), "unsaved work").unwrap();

        assert_eq!(gw.create_checklist(&mut s, "Other", Confirmation::Ask), None);
        assert_eq!(s.path(), Some(PATH));
        assert_eq!(s.document().unwrap().items[0].label, "unsaved work");

        s.renderer_mut().confirm_answer = true;
        let path = gw.create_checklist(&mut s, "Other", Confirmation::Ask).unwrap();
        assert_eq!(s.path(), Some(path.as_str()));
        assert_eq!(s.document().unwrap().title, "Other");
    }

    #[test]
    fn test_legacy_number_key_next_to_hns_is_repaired() {
        let gw = gateway();
        let mut doc = stored_doc("2024-05-01T10:00:00.000Z");
        doc["items"] = json!([{"label": "a", "no": "1", "hns": "1", "children": []}]);
        gw.store().insert(PATH, doc);
        let mut s = session(&gw);
        let result = gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        let LoadResult::RepairedAndPersisted { repairs } = result else {
            panic!("expected a persisted repair, got {result:?}");
        };
        assert_eq!(repairs, vec![Repair::LegacyNumberDropped { at: "1".to_string() }]);
        assert_eq!(s.document().unwrap().items[0].label, "a");
        let remote = gw.store().fetch(PATH).unwrap();
        assert!(remote["items"][0].get("no").is_none());
    }

    #[test]
    fn test_missing_timestamp_installs_nothing() {
        let gw = gateway();
        let mut doc = stored_doc("T1");
        doc.as_object_mut().unwrap().remove("lastSave");
        gw.store().insert(PATH, doc);
        let mut s = session(&gw);
        assert!(matches!(
            gw.load(&mut s, PATH, Confirmation::Ask),
            Err(ChecklistError::MissingTimestamp(_))
        ));
        assert!(s.document().is_none());
        assert!(!s.tracker().is_ready());
    }

    #[test]
    fn test_repaired_document_is_written_back_and_reloaded() {
        let gw = gateway();
        gw.store().insert(
            PATH,
            json!({"title": "Old", "lastSave": "2024-05-01T10:00:00.000Z", "items": [{"label": "a"}]}),
        );
        let mut s = session(&gw);
        let result = gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        let LoadResult::RepairedAndPersisted { repairs } = result else {
            panic!("expected a persisted repair, got {result:?}");
        };
        assert!(repairs.contains(&Repair::MissingLayout));
        assert!(repairs.contains(&Repair::MissingChildren { at: "1".to_string() }));
        assert_eq!(gw.store().writes(), vec![PATH.to_string()]);
        assert!(!s.is_dirty());
        let remote = gw.store().fetch(PATH).unwrap();
        assert_eq!(remote["items"][0]["children"], json!([]));
        assert_eq!(s.baseline(), remote["lastSave"].as_str());
    }

    #[test]
    fn test_repair_kept_in_memory_when_write_back_fails() {
        let gw = gateway();
        gw.store().insert(
            PATH,
            json!({"lastSave": "2024-05-01T10:00:00.000Z", "items": [{"label": "a"}]}),
        );
        gw.store().set_fail_writes(true);
        let mut s = session(&gw);
        let result = gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        assert!(matches!(result, LoadResult::RepairedInMemory { .. }));
        assert!(s.is_dirty());
        assert_eq!(s.document().unwrap().items[0].hns.as_deref(), Some("1"));
    }

    #[test]
    fn test_failed_save_keeps_dirty_state() {
        let gw = gateway();
        gw.store().insert(PATH, stored_doc("T1"));
        let mut s = session(&gw);
        gw.load(&mut s, PATH, Confirmation::Ask).unwrap();
        s.toggle_done(&ItemPath::root(1)).unwrap();
        gw.store().set_fail_writes(true);
        assert!(matches!(gw.save(&mut s, &mut overwrite), Err(ChecklistError::Network(_))));
        assert!(s.is_dirty());
        assert_eq!(s.baseline(), Some("T1"));
        assert_eq!(s.document().unwrap().last_save.as_deref(), Some("T1"));
        assert_eq!(s.renderer().notices.last().map(|n| n.level), Some(NoticeLevel::Error));
        assert!(!s.is_saving());
    }

    #[test]
    fn test_reentrant_save_is_skipped() {
        let gw = gateway();
        let mut s = session(&gw);
        gw.create_checklist(&mut s, "Demo", Confirmation::Ask).unwrap();
        assert!(s.begin_save());
        assert_eq!(gw.save(&mut s, &mut overwrite).unwrap(), SaveOutcome::Skipped);
        assert!(gw.store().writes().is_empty());
    }

    #[test]
    fn test_attachments_upload_before_document() {
        let gw = gateway();
        let mut s = session(&gw);
        let path = gw.create_checklist(&mut s, "Demo", Confirmation::Ask).unwrap();
        let target = gw.config().attachment_path("photo.png");
        s.attach_file(Some(&ItemPath::root(1)), Attachment::pending("photo.png", target.as_str(), vec![0, 1, 2]))
            .unwrap();
        gw.save(&mut s, &mut overwrite).unwrap();
        assert_eq!(gw.store().writes(), vec![target.clone(), path.clone()]);
        assert_eq!(gw.store().encoded(&target).as_deref(), Some("AAEC"));
        assert_eq!(s.pending_uploads(), 0);
        let remote = gw.store().fetch(&path).unwrap();
        assert_eq!(remote["items"][0]["attachments"][0]["path"], json!(target));
    }

    #[test]
    fn test_save_touches_user_index() {
        let config = GatewayConfig { user_id: Some("u1".to_string()), ..GatewayConfig::default() };
        let gw = PersistenceGateway::new(MemoryBlobStore::new(), config);
        let mut users = UsersConfig::default();
        let mut alice = User::new("alice", "h");
        alice.id = "u1".to_string();
        users.add_user(alice).unwrap();
        gw.save_users(&users).unwrap();

        let mut s = session(&gw);
        let path = gw.create_checklist(&mut s, "Demo", Confirmation::Ask).unwrap();
        gw.save(&mut s, &mut overwrite).unwrap();
        let users = gw.load_users().unwrap();
        let entry = &users.find("u1").unwrap().checklists[0];
        assert_eq!(entry.id, path);
        assert!(entry.last_accessed.is_some());
    }

    #[test]
    fn test_user_index_failure_does_not_fail_save() {
        let config = GatewayConfig { user_id: Some("ghost".to_string()), ..GatewayConfig::default() };
        let gw = PersistenceGateway::new(MemoryBlobStore::new(), config);
        let mut s = session(&gw);
        gw.create_checklist(&mut s, "Demo", Confirmation::Ask).unwrap();
        assert!(matches!(gw.save(&mut s, &mut overwrite).unwrap(), SaveOutcome::Saved { .. }));
    }

    #[test]
    fn test_list_checklists_newest_first() {
        let gw = gateway();
        gw.store().insert("checklists/2024_01_01_@_08-00-00_old.json", json!({}));
        gw.store().insert("checklists/2024_06_01_@_08-00-00_new.json", json!({}));
        gw.store().insert("checklists/readme.txt", json!({}));
        let list = gw.list_checklists().unwrap();
        let slugs: Vec<_> = list.iter().map(|c| c.slug.as_deref()).collect();
        assert_eq!(slugs, vec![Some("new"), Some("old")]);
    }

    #[test]
    fn test_import_external_source() {
        let gw = gateway();
        gw.store().insert("config/users.json", json!({"users": [{"username": "alice"}, {"username": "bob"}]}));
        let mut s = session(&gw);
        gw.create_checklist(&mut s, "Demo", Confirmation::Ask).unwrap();
        let key = gw.import_external_source(&mut s, "config/users.json").unwrap();
        assert_eq!(key, "users");
        assert_eq!(s.document().unwrap().sources["users"], vec!["alice", "bob"]);

        assert!(matches!(
            gw.import_external_source(&mut s, "config/users.csv"),
            Err(ChecklistError::InvalidSource(_))
        ));
        assert!(matches!(
            gw.import_external_source(&mut s, "config/secret.json"),
            Err(ChecklistError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_field_definitions_replace_on_success_only() {
        let gw = gateway();
        let registry = FieldRegistry::new(builtin_fields());
        let mut defs = builtin_fields();
        defs.push(FieldDefinition::new("cost", "Cost", FieldType::Number));
        gw.save_field_definitions(&registry, defs).unwrap();
        assert!(registry.get("cost").is_some());

        gw.store().set_fail_writes(true);
        let err = gw.save_field_definitions(&registry, builtin_fields());
        assert!(err.is_err());
        assert!(registry.get("cost").is_some());

        gw.store().set_fail_writes(false);
        let fresh = FieldRegistry::new(Vec::new());
        assert_eq!(gw.load_field_definitions(&fresh).unwrap(), 7);
    }

    #[test]
    fn test_duplicate_field_keys_are_rejected() {
        let gw = gateway();
        let registry = FieldRegistry::new(builtin_fields());
        let mut defs = builtin_fields();
        defs.push(FieldDefinition::new("who", "Who again", FieldType::Text));
        assert!(matches!(
            gw.save_field_definitions(&registry, defs),
            Err(ChecklistError::FieldDefinitionInvalid(_))
        ));
        assert!(gw.store().writes().is_empty());
    }

    #[test]
    fn test_layout_presets() {
        let gw = gateway();
        assert!(gw.load_layout_presets().unwrap().is_empty());
        let preset = crate::default_layout(&builtin_fields());
        gw.save_layout_presets(std::slice::from_ref(&preset)).unwrap();
        let loaded = gw.load_layout_presets().unwrap();
        assert_eq!(loaded, vec![preset.clone()]);

        let mut s = session(&gw);
        gw.create_checklist(&mut s, "Demo", Confirmation::Ask).unwrap();
        let mut shared = preset;
        shared.layout_name = "Shared".to_string();
        s.add_layout(shared).unwrap();
        assert!(s.document().unwrap().layout.find("Shared").is_some());
    }
}
