// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event eligibility filtering.
//!
//! ## Overview
//!
//! Given a candidate set of events, a user and a procedure, the filter
//! returns the events the user could still meaningfully put on a priority
//! list. An event is excluded when any of these holds:
//!
//! * it is on the caller-supplied blacklist,
//! * it already appears on one of the user's lists for this procedure,
//! * the user already holds a confirmed seat in it,
//! * it has no free seat left (per the seat ledger, not the detached row),
//! * the rule engine denies the user registration for it.
//!
//! The checks are independent; failing one never hides another event. Each
//! candidate is refreshed from the store before the checks run. A candidate
//! that cannot be fetched gets one retry; if it still cannot be resolved the
//! whole call escalates with a stale-reference error, because at that point
//! the caller's candidate set itself can no longer be trusted.

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::context::EngineContext;
use crate::core::entity::{Event, EventId, Procedure, User};
use crate::core::error::{EngineError, EngineResult};
use crate::core::persistence::FetchSession;

#[derive(Debug)]
pub struct EventEligibilityFilter {
    ctx: Arc<EngineContext>,
}

impl EventEligibilityFilter {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Filter `candidates` down to the events `user` may still list in
    /// `procedure`. Returns fresh copies in the input order.
    pub fn filter_event_list(
        &self,
        candidates: &[Event],
        user: &User,
        procedure: &Procedure,
        blacklist: &[EventId],
    ) -> EngineResult<Vec<Event>> {
        let mut session = FetchSession::new(self.ctx.store.clone());

        let blacklisted: HashSet<EventId> = blacklist.iter().copied().collect();
        let already_listed: HashSet<EventId> = self
            .ctx
            .store
            .priority_lists
            .for_user_in_procedure(procedure.id, user.id)?
            .iter()
            .flat_map(|list| list.items.iter().map(|item| item.event_id))
            .collect();

        let mut eligible = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let fresh = self.refresh(&mut session, candidate.id)?;

            if blacklisted.contains(&fresh.id) {
                continue;
            }
            if already_listed.contains(&fresh.id) {
                continue;
            }
            if self
                .ctx
                .store
                .registrations
                .exists_for(user.id, fresh.id)?
            {
                continue;
            }
            self.ctx.seats.ensure_event(&fresh);
            if self.ctx.seats.has_free_seat(fresh.id) != Some(true) {
                continue;
            }
            if !self
                .ctx
                .rules
                .is_registration_allowed(user, procedure.campaign_id, &fresh)
            {
                continue;
            }
            eligible.push((*fresh).clone());
        }
        Ok(eligible)
    }

    /// Fresh copy of the candidate, with the single stale-reference retry.
    fn refresh(&self, session: &mut FetchSession, id: EventId) -> EngineResult<Arc<Event>> {
        if let Some(event) = session.event(id)? {
            return Ok(event);
        }
        match session.refetch_event(id)? {
            Some(event) => Ok(event),
            None => {
                log::error!("candidate event {id} not found after a fresh fetch; aborting filter");
                Err(EngineError::stale_reference("event", id.raw()))
            }
        }
    }
}
