//! Activity (side-effect event) domain model.
//!
//! # Invariants
//! - One activity exists per newly created link of a live release.
//! - `datetime` mirrors the release `date_released`, not insertion time.

use crate::model::project::ProjectId;
use crate::model::release::ReleaseId;
use serde::{Deserialize, Serialize};

/// Database identifier of an activity row.
pub type ActivityId = i64;

/// Category of an activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A project started shipping in a live release.
    Release,
}

impl ActivityKind {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Release => "release",
        }
    }

    pub(crate) fn from_db(value: &str) -> Option<Self> {
        match value {
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

/// Payload stored with a release activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseActivityData {
    pub version: String,
}

/// Append-only event emitted when a project is newly linked to a live release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub kind: ActivityKind,
    pub project_id: ProjectId,
    pub release_id: ReleaseId,
    /// Release version, used as a stable grouping identifier.
    pub ident: String,
    pub data: ReleaseActivityData,
    /// Unix epoch milliseconds; the release `date_released`.
    pub datetime: i64,
}

/// Insert model for a new activity row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewActivity {
    pub kind: ActivityKind,
    pub project_id: ProjectId,
    pub release_id: ReleaseId,
    pub ident: String,
    pub data: ReleaseActivityData,
    pub datetime: i64,
}
