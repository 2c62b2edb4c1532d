// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed identifiers for every persisted entity.
//!
//! Each id is a newtype over `u64` so that a `UserId` can never be handed to
//! an API expecting an `EventId`. Ids serialize transparently as plain
//! integers.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

entity_id!(
    /// Tenant owning a slice of the data set.
    TenantId
);
entity_id!(
    /// A student account. Provisioned by the surrounding identity system.
    UserId
);
entity_id!(
    /// A course of study a user is enrolled in.
    StudyCourseId
);
entity_id!(
    /// A registration campaign grouping events and procedures.
    CampaignId
);
entity_id!(
    /// A course event with bounded capacity.
    EventId
);
entity_id!(
    /// A registration procedure inside a campaign.
    ProcedureId
);
entity_id!(
    /// A user-submitted ranked wish list.
    PriorityListId
);
entity_id!(
    /// A confirmed seat.
    RegistrationId
);
entity_id!(
    /// A rule set attached to a (campaign, event, tenant) triple.
    RuleSetId
);
