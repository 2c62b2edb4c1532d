// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::ids::{EventId, PriorityListId, ProcedureId, RegistrationId, TenantId, UserId};

/// Payload for inserting a confirmed seat; the repository assigns the id and
/// enforces the one-seat-per-(user, event) invariant.
#[derive(Debug, Clone)]
pub struct RegistrationDraft {
    pub tenant: TenantId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub procedure_id: ProcedureId,
    pub list_id: PriorityListId,
    pub confirmed_at: DateTime<Utc>,
}

/// A confirmed seat. Only allocation passes create these; nothing in the
/// engine ever deletes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedRegistration {
    pub id: RegistrationId,
    pub tenant: TenantId,
    pub user_id: UserId,
    pub event_id: EventId,
    pub procedure_id: ProcedureId,
    /// The list whose item won the seat.
    pub list_id: PriorityListId,
    pub confirmed_at: DateTime<Utc>,
}

impl ConfirmedRegistration {
    pub fn from_draft(id: RegistrationId, draft: RegistrationDraft) -> Self {
        Self {
            id,
            tenant: draft.tenant,
            user_id: draft.user_id,
            event_id: draft.event_id,
            procedure_id: draft.procedure_id,
            list_id: draft.list_id,
            confirmed_at: draft.confirmed_at,
        }
    }
}
