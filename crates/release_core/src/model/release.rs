//! Release domain model.
//!
//! # Responsibility
//! - Define the stored release record and its insert model.
//! - Validate creation input before it reaches storage or the lock.
//!
//! # Invariants
//! - `(tenant_id, version)` is unique and never changes after creation.
//! - `date_released == None` means the release is not live yet.

use crate::model::project::TenantId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Database identifier of a release row.
pub type ReleaseId = i64;

/// Upper bound for `version`, matching the storage column contract.
pub const MAX_VERSION_LEN: usize = 64;

/// Stored release record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub tenant_id: TenantId,
    /// Version identifier: a version number, commit hash or similar.
    pub version: String,
    /// Optional commit reference, useful when `version` is a tag.
    pub ref_name: Option<String>,
    /// Optional link to the release in an external interface.
    pub url: Option<String>,
    /// Optional owning user reference.
    pub owner_id: Option<i64>,
    /// Unix epoch milliseconds.
    pub date_started: Option<i64>,
    /// Unix epoch milliseconds. `None` while the release is not live.
    pub date_released: Option<i64>,
    /// Unix epoch milliseconds, set once on insert.
    pub date_added: i64,
}

impl Release {
    /// Returns whether the release has shipped.
    pub fn is_live(&self) -> bool {
        self.date_released.is_some()
    }
}

/// Insert model carrying the caller-supplied release fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRelease {
    pub tenant_id: TenantId,
    pub version: String,
    pub ref_name: Option<String>,
    pub url: Option<String>,
    pub owner_id: Option<i64>,
    pub date_started: Option<i64>,
    pub date_released: Option<i64>,
}

impl NewRelease {
    /// Creates an insert model with only the identity fields set.
    pub fn new(tenant_id: TenantId, version: impl Into<String>) -> Self {
        Self {
            tenant_id,
            version: version.into(),
            ..Self::default()
        }
    }

    /// Marks the release as live at `date_released`.
    pub fn released_at(mut self, date_released: i64) -> Self {
        self.date_released = Some(date_released);
        self
    }

    /// Validates identity fields.
    ///
    /// # Errors
    /// - `EmptyVersion` when `version` is blank.
    /// - `VersionTooLong` when `version` exceeds `MAX_VERSION_LEN` chars.
    /// - `InvalidVersionCharacter` when `version` has control characters or
    ///   leading/trailing whitespace.
    /// - `EmptyOptionalField` when a provided `ref_name`/`url` is blank.
    pub fn validate(&self) -> Result<(), ReleaseValidationError> {
        if self.version.trim().is_empty() {
            return Err(ReleaseValidationError::EmptyVersion);
        }

        let length = self.version.chars().count();
        if length > MAX_VERSION_LEN {
            return Err(ReleaseValidationError::VersionTooLong { length });
        }

        if self.version.trim() != self.version || self.version.chars().any(char::is_control) {
            return Err(ReleaseValidationError::InvalidVersionCharacter(
                self.version.clone(),
            ));
        }

        for (field, value) in [("ref", &self.ref_name), ("url", &self.url)] {
            if value.as_deref().is_some_and(|value| value.trim().is_empty()) {
                return Err(ReleaseValidationError::EmptyOptionalField(field));
            }
        }

        Ok(())
    }
}

/// Validation failure for release creation input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseValidationError {
    EmptyVersion,
    VersionTooLong { length: usize },
    InvalidVersionCharacter(String),
    EmptyOptionalField(&'static str),
}

impl Display for ReleaseValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyVersion => write!(f, "release version must not be blank"),
            Self::VersionTooLong { length } => write!(
                f,
                "release version is {length} characters long; at most {MAX_VERSION_LEN} allowed"
            ),
            Self::InvalidVersionCharacter(version) => write!(
                f,
                "release version `{}` contains surrounding whitespace or control characters",
                version.escape_debug()
            ),
            Self::EmptyOptionalField(field) => {
                write!(f, "release `{field}` must be omitted or non-blank")
            }
        }
    }
}

impl Error for ReleaseValidationError {}
