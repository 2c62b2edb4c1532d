// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

use crate::core::entity::ids::{CampaignId, EventId, TenantId};

/// A registration campaign: the administrative bracket around a set of
/// events and the procedures that hand out their seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant: TenantId,
    pub name: String,
    pub event_ids: Vec<EventId>,
}

impl Campaign {
    pub fn new(id: CampaignId, tenant: TenantId, name: impl Into<String>, event_ids: Vec<EventId>) -> Self {
        Self {
            id,
            tenant,
            name: name.into(),
            event_ids,
        }
    }

    pub fn contains_event(&self, event: EventId) -> bool {
        self.event_ids.contains(&event)
    }
}
