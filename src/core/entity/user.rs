// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::core::entity::ids::{StudyCourseId, TenantId, UserId};

/// A student account as the engine sees it.
///
/// Accounts are provisioned by the surrounding identity system; the engine
/// only reads the attributes that registration rules inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub tenant: TenantId,
    pub name: String,
    /// Semester count, starting at 1 for first-term students.
    pub term: u32,
    pub study_course: StudyCourseId,
}

impl User {
    pub fn new(
        id: UserId,
        tenant: TenantId,
        name: impl Into<String>,
        term: u32,
        study_course: StudyCourseId,
    ) -> Self {
        Self {
            id,
            tenant,
            name: name.into(),
            term,
            study_course,
        }
    }
}
