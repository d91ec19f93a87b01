//! Bulk Google Drive permission management.
//!
//! A run snapshots the grants under a folder, lets an operator edit them as a
//! CSV sheet, plans the requested changes against live state, applies them with
//! an append-only audit log, and can undo an applied run from that log.

extern crate google_drive3 as drive3;

pub mod apply;
pub mod audit;
pub mod auth;
pub mod commands;
pub mod config;
pub mod model;
pub mod plan;
pub mod retry;
pub mod rollback;
pub mod sheet;
pub mod snapshot;
pub mod store;
