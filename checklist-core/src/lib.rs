//! Core library for a collaborative checklist editor.
//!
//! A checklist is a tree of items shown as a spreadsheet-like grid. The
//! primary entry points are [`Session`], which holds one open checklist and
//! runs every edit on it, and [`PersistenceGateway`], which loads and saves
//! checklists against a [`BlobStore`] with `lastSave` conflict detection.
//!
//! Drawing is left to the host through the [`Renderer`] trait.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

#[doc(inline)]
pub use self::core::*;
