//! Domain model for releases and the records derived from them.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep creation-time validation next to the data it guards.
//!
//! # Invariants
//! - A release is identified by `(tenant_id, version)`; the pair is unique.
//! - Projects are referenced by the core, never created by the creation path.
//! - Activities are append-only and derived from a release/project link.

pub mod activity;
pub mod project;
pub mod release;
