// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::core::entity::ids::{EventId, TenantId};

/// A course event with a bounded number of seats.
///
/// `max_participants` is the configured capacity. The live seat count is
/// tracked separately by the seat ledger; the entity itself stays a plain
/// record so detached copies never carry stale occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub tenant: TenantId,
    pub title: String,
    pub max_participants: u32,
}

impl Event {
    pub fn new(id: EventId, tenant: TenantId, title: impl Into<String>, max_participants: u32) -> Self {
        Self {
            id,
            tenant,
            title: title.into(),
            max_participants,
        }
    }
}
