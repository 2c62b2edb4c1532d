// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ranked wish lists.
//!
//! A priority list is a user's ranked selection of events for one procedure.
//! The list as a whole carries a status (pending, allocated, expired); each
//! item additionally carries a per-draw resolution used by the lottery to
//! record losses rank by rank. FIFO only ever touches the winning item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::entity::ids::{EventId, PriorityListId, ProcedureId, TenantId, UserId};

/// Status of the list as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListStatus {
    /// Still waiting for a seat.
    Pending,
    /// Exactly one of its items produced a confirmed registration.
    Allocated,
    /// The procedure terminated without this list being served.
    Expired,
}

impl fmt::Display for ListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListStatus::Pending => "pending",
            ListStatus::Allocated => "allocated",
            ListStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Per-item outcome, written during allocation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemResolution {
    Unresolved,
    Granted,
    Failed,
}

/// One ranked entry of a priority list. Lower rank = higher preference;
/// ranks start at 1 and are unique within a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityListItem {
    pub event_id: EventId,
    pub rank: u32,
    pub resolution: ItemResolution,
}

impl PriorityListItem {
    pub fn new(event_id: EventId, rank: u32) -> Self {
        Self {
            event_id,
            rank,
            resolution: ItemResolution::Unresolved,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.resolution == ItemResolution::Unresolved
    }
}

/// Payload for inserting a new list; the repository assigns the id.
#[derive(Debug, Clone)]
pub struct NewPriorityList {
    pub tenant: TenantId,
    pub procedure_id: ProcedureId,
    pub user_id: UserId,
    pub submitted_at: DateTime<Utc>,
    pub items: Vec<PriorityListItem>,
}

/// A persisted priority list. Items are kept sorted by rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityList {
    pub id: PriorityListId,
    pub tenant: TenantId,
    pub procedure_id: ProcedureId,
    pub user_id: UserId,
    pub submitted_at: DateTime<Utc>,
    pub status: ListStatus,
    pub items: Vec<PriorityListItem>,
}

impl PriorityList {
    pub fn from_new(id: PriorityListId, mut new: NewPriorityList) -> Self {
        new.items.sort_by_key(|i| i.rank);
        Self {
            id,
            tenant: new.tenant,
            procedure_id: new.procedure_id,
            user_id: new.user_id,
            submitted_at: new.submitted_at,
            status: ListStatus::Pending,
            items: new.items,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ListStatus::Pending
    }

    /// Highest-preference item that has not been resolved yet.
    pub fn current_unresolved(&self) -> Option<&PriorityListItem> {
        self.items.iter().find(|i| i.is_unresolved())
    }

    pub fn item_mut(&mut self, event_id: EventId) -> Option<&mut PriorityListItem> {
        self.items.iter_mut().find(|i| i.event_id == event_id)
    }

    pub fn references_event(&self, event_id: EventId) -> bool {
        self.items.iter().any(|i| i.event_id == event_id)
    }
}
