//! Project (sub-resource) domain model.

use serde::{Deserialize, Serialize};

/// Database identifier of a project row.
pub type ProjectId = i64;

/// Tenant identifier shared by every tenant-owned record.
pub type TenantId = i64;

/// A pre-existing project a release can be linked to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub tenant_id: TenantId,
    /// Tenant-unique short name used by callers to reference the project.
    pub slug: String,
    pub name: String,
}
