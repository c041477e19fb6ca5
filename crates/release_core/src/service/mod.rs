//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository and lock calls into use-case level APIs.
//! - Keep the CLI and other callers decoupled from storage details.

pub mod association_manager;
pub mod notification_dispatcher;
pub mod release_creation;
pub mod release_service;
