//! Internal domain modules for the checklist core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod computed;
pub mod config;
pub mod delete;
pub mod dirty;
pub mod document;
pub mod error;
pub mod fields;
pub mod integrity;
pub mod item;
pub mod layout;
pub mod path;
pub mod persistence;
pub mod renderer;
pub mod renumber;
pub mod session;
pub mod store;
pub mod tree;
pub mod users;

#[doc(inline)]
pub use computed::ComputedKind;
#[doc(inline)]
pub use config::{default_config_path, load_config, save_config, GatewayConfig};
#[doc(inline)]
pub use delete::{DeleteResult, DeleteStrategy};
#[doc(inline)]
pub use dirty::{ChangeLog, DirtyState, DirtyTracker, EditEvent, EditKind, PurgeStrategy};
#[doc(inline)]
pub use document::{
    checklist_filename, fresh_timestamp, parse_checklist_filename, slugify_title, ChecklistDocument,
};
#[doc(inline)]
pub use error::{ChecklistError, Result};
#[doc(inline)]
pub use fields::{
    builtin_fields, default_fields, extract_source_values, parse_field_definitions, source_key,
    validate as validate_fields, FieldDefinition, FieldIssue, FieldIssueKind, FieldRegistry,
    FieldType, RESERVED_KEYS,
};
#[doc(inline)]
pub use integrity::{repair_document, Repair};
#[doc(inline)]
pub use item::{Attachment, FieldValue, Item, ItemStyle};
#[doc(inline)]
pub use layout::{
    default_layout, ColumnSettings, FieldSelection, Layout, LayoutState, RowSettings,
    DEFAULT_LAYOUT, LAST_USED,
};
#[doc(inline)]
pub use path::{resolve_item, resolve_item_mut, resolve_parent_array, ItemPath};
#[doc(inline)]
pub use persistence::{
    ChecklistSummary, ConflictDecision, ConflictReport, LoadResult, PersistenceGateway,
    SaveOutcome, SavePhase,
};
#[doc(inline)]
pub use renderer::{Notice, NoticeLevel, NullRenderer, RenderFrame, RenderReason, Renderer};
#[doc(inline)]
pub use renumber::{is_numbered, renumber};
#[doc(inline)]
pub use session::{Confirmation, Session};
#[doc(inline)]
pub use store::{BlobEntry, BlobStore, MemoryBlobStore, SaveRequest};
#[cfg(feature = "remote")]
#[doc(inline)]
pub use store::HttpBlobStore;
#[doc(inline)]
pub use tree::MoveOutcome;
#[doc(inline)]
pub use users::{AccessLevel, ChecklistAccess, User, UsersConfig};
