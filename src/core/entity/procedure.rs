// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registration procedures and their lifecycle.
//!
//! A procedure owns a time window `[starts_at, ends_at)` and an allocation
//! kind. Its lifecycle is the three-state machine Scheduled, Active,
//! Terminated; the state only ever moves forward. [`Procedure::lifecycle_at`]
//! derives the target state from a clock reading while preserving
//! monotonicity against the stored state, so a skewed clock can never pull a
//! procedure backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::entity::ids::{CampaignId, ProcedureId, TenantId};

/// Which allocation algorithm hands out this procedure's seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureKind {
    /// Continuous first-come-first-served allocation while the window is open.
    Fifo,
    /// Single randomized draw once the submission window has closed.
    Lottery,
}

impl ProcedureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureKind::Fifo => "fifo",
            ProcedureKind::Lottery => "lottery",
        }
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a procedure. Declaration order is the lifecycle order;
/// the derived `Ord` is what makes the forward-only checks cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureState {
    Scheduled,
    Active,
    Terminated,
}

impl fmt::Display for ProcedureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcedureState::Scheduled => "scheduled",
            ProcedureState::Active => "active",
            ProcedureState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// A registration procedure inside a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: ProcedureId,
    pub tenant: TenantId,
    pub campaign_id: CampaignId,
    pub kind: ProcedureKind,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Cap on the number of lists one user may submit for this procedure.
    pub max_lists_per_user: u32,
    /// Cap on the number of ranked items per list.
    pub max_items_per_list: u32,
    pub state: ProcedureState,
}

impl Procedure {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ProcedureId,
        tenant: TenantId,
        campaign_id: CampaignId,
        kind: ProcedureKind,
        name: impl Into<String>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        max_lists_per_user: u32,
        max_items_per_list: u32,
    ) -> Self {
        Self {
            id,
            tenant,
            campaign_id,
            kind,
            name: name.into(),
            starts_at,
            ends_at,
            max_lists_per_user,
            max_items_per_list,
            state: ProcedureState::Scheduled,
        }
    }

    /// Target lifecycle state at `now`, never behind the stored state.
    pub fn lifecycle_at(&self, now: DateTime<Utc>) -> ProcedureState {
        let by_clock = if now < self.starts_at {
            ProcedureState::Scheduled
        } else if now < self.ends_at {
            ProcedureState::Active
        } else {
            ProcedureState::Terminated
        };
        self.state.max(by_clock)
    }

    /// Whether new priority lists are accepted at `now`.
    pub fn submission_open_at(&self, now: DateTime<Utc>) -> bool {
        self.state != ProcedureState::Terminated && now >= self.starts_at && now < self.ends_at
    }

    /// Whether the submission window has closed at `now`.
    pub fn window_closed_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }

    /// Move the stored state forward. Returns `false` (and changes nothing)
    /// if `next` is not strictly ahead of the current state.
    pub fn advance_state(&mut self, next: ProcedureState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn procedure(starts_in_ms: i64, runs_for_ms: i64) -> Procedure {
        let start = Utc::now() + Duration::milliseconds(starts_in_ms);
        Procedure::new(
            ProcedureId::new(1),
            TenantId::new(1),
            CampaignId::new(1),
            ProcedureKind::Fifo,
            "intro seminars",
            start,
            start + Duration::milliseconds(runs_for_ms),
            1,
            5,
        )
    }

    #[test]
    fn lifecycle_follows_the_window() {
        let p = procedure(1_000, 1_000);
        assert_eq!(p.lifecycle_at(p.starts_at - Duration::milliseconds(1)), ProcedureState::Scheduled);
        assert_eq!(p.lifecycle_at(p.starts_at), ProcedureState::Active);
        assert_eq!(p.lifecycle_at(p.ends_at - Duration::milliseconds(1)), ProcedureState::Active);
        assert_eq!(p.lifecycle_at(p.ends_at), ProcedureState::Terminated);
    }

    #[test]
    fn lifecycle_never_moves_backwards() {
        let mut p = procedure(10_000, 10_000);
        assert!(p.advance_state(ProcedureState::Terminated));
        // Clock says Scheduled, stored state wins.
        assert_eq!(p.lifecycle_at(Utc::now()), ProcedureState::Terminated);
        assert!(!p.advance_state(ProcedureState::Active));
        assert_eq!(p.state, ProcedureState::Terminated);
    }

    #[test]
    fn submission_window_is_half_open() {
        let p = procedure(-1_000, 2_000);
        assert!(p.submission_open_at(Utc::now()));
        assert!(!p.submission_open_at(p.ends_at));
        assert!(!p.submission_open_at(p.starts_at - Duration::milliseconds(1)));
    }

    #[test]
    fn terminated_procedure_rejects_submissions_even_inside_window() {
        let mut p = procedure(-1_000, 60_000);
        p.advance_state(ProcedureState::Terminated);
        assert!(!p.submission_open_at(Utc::now()));
    }

    #[test]
    fn kind_round_trips_through_serde() {
        let json = serde_json::to_string(&ProcedureKind::Lottery).unwrap();
        assert_eq!(json, "\"lottery\"");
        let back: ProcedureKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProcedureKind::Lottery);
    }
}
