// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared service context.
//!
//! One [`EngineContext`] is built per engine instance and handed (as an
//! `Arc`) to every component that does real work: allocators, the
//! eligibility filter and the scheduler. It bundles storage, the rule
//! engine, the seat ledger and the audit log so constructors stay short and
//! wiring stays explicit.

use std::sync::Arc;

use crate::core::error::EngineResult;
use crate::core::persistence::PersistenceHandle;
use crate::core::rule::RuleEngine;
use crate::core::allocation::seats::SeatLedger;
use crate::core::util::audit::AuditLog;

#[derive(Debug)]
pub struct EngineContext {
    pub store: PersistenceHandle,
    pub rules: Arc<RuleEngine>,
    pub seats: Arc<SeatLedger>,
    pub audit: Arc<AuditLog>,
}

impl EngineContext {
    pub fn new(
        store: PersistenceHandle,
        rules: Arc<RuleEngine>,
        seats: Arc<SeatLedger>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            rules,
            seats,
            audit,
        }
    }

    /// Context over a fresh in-memory store with default services. The seat
    /// ledger starts empty; callers that pre-load events should rebuild it.
    pub fn in_memory() -> Arc<Self> {
        let store = PersistenceHandle::in_memory();
        let rules = Arc::new(RuleEngine::new(store.rule_sets.clone()));
        Arc::new(Self::new(
            store,
            rules,
            Arc::new(SeatLedger::new()),
            Arc::new(AuditLog::new()),
        ))
    }

    /// Reset the seat ledger from storage: adopt every stored event and seed
    /// its confirmed counter from the registration rows.
    pub fn rebuild_seat_ledger(&self) -> EngineResult<()> {
        self.seats.clear();
        for event in self.store.events.all()? {
            let confirmed = self.store.registrations.count_for_event(event.id)?;
            self.seats.ensure_event(&event);
            self.seats.set_confirmed(event.id, confirmed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::{Event, EventId, TenantId};

    #[test]
    fn rebuild_adopts_events_and_counts() {
        let ctx = EngineContext::in_memory();
        ctx.store
            .events
            .save(Event::new(EventId::new(1), TenantId::new(1), "stats", 25))
            .unwrap();
        ctx.rebuild_seat_ledger().unwrap();
        assert_eq!(ctx.seats.capacity(EventId::new(1)), Some(25));
        assert_eq!(ctx.seats.confirmed(EventId::new(1)), Some(0));
    }
}
