// SPDX-License-Identifier: MIT OR Apache-2.0

//! The embedding surface.
//!
//! ## Overview
//!
//! [`RegistrationEngine`] wires storage, the rule engine, the seat ledger,
//! the audit log, the eligibility filter, the worker pool and the scheduler
//! into one handle. Embedders go through it for everything: loading entities,
//! accepting priority lists, asking eligibility questions and driving the
//! procedure lifecycle, either on the built-in timer or tick by tick.
//!
//! Submission is where request validation lives. A list is only accepted
//! while its procedure's window is open, with one to `max_items_per_list`
//! distinct events that all belong to the procedure's campaign, and only as
//! long as the user stays under `max_lists_per_user`. Everything past
//! submission (seats, duplicates, rules) is re-checked at allocation time, so
//! a list that was valid when submitted can still end up expired.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::core::allocation::{ProcedureLogic, ProcedureLogicRegistry};
use crate::core::config::EngineConfig;
use crate::core::context::EngineContext;
use crate::core::eligibility::EventEligibilityFilter;
use crate::core::entity::{
    Campaign, CampaignId, Event, EventId, NewPriorityList, PriorityList, PriorityListItem,
    Procedure, ProcedureId, RuleSetId, User, UserId,
};
use crate::core::error::{EngineError, EngineResult};
use crate::core::persistence::{PersistenceHandle, SnapshotService, SnapshotStore};
use crate::core::rule::{RegistrationRuleSet, RuleEngine};
use crate::core::scheduler::{ProcedureScheduler, SchedulerMetricsSnapshot};
use crate::core::util::audit::AuditLog;
use crate::core::util::executor::ExecutorService;
use crate::core::allocation::seats::SeatLedger;

#[derive(Debug)]
pub struct RegistrationEngine {
    config: EngineConfig,
    ctx: Arc<EngineContext>,
    filter: EventEligibilityFilter,
    snapshots: Option<SnapshotService>,
    // Declared before the executor so the timer thread is joined while the
    // worker pool still accepts its in-flight jobs.
    scheduler: ProcedureScheduler,
    executor: Arc<ExecutorService>,
}

impl RegistrationEngine {
    /// Engine over the given store, without snapshot support.
    pub fn new(config: EngineConfig, store: PersistenceHandle) -> EngineResult<Self> {
        Self::build(config, store, None)
    }

    /// Engine over the given store, persisting snapshots into `snapshots`.
    pub fn with_snapshots(
        config: EngineConfig,
        store: PersistenceHandle,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> EngineResult<Self> {
        Self::build(config, store, Some(snapshots))
    }

    /// Engine over fresh in-memory storage.
    pub fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        Self::new(config, PersistenceHandle::in_memory())
    }

    fn build(
        config: EngineConfig,
        store: PersistenceHandle,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let rules = Arc::new(RuleEngine::new(store.rule_sets.clone()));
        let ctx = Arc::new(EngineContext::new(
            store.clone(),
            rules,
            Arc::new(SeatLedger::new()),
            Arc::new(AuditLog::new()),
        ));
        ctx.rebuild_seat_ledger()?;
        let executor = Arc::new(ExecutorService::new(config.effective_worker_threads()));
        let registry = ProcedureLogicRegistry::with_defaults(config.lottery.draw_seed);
        let scheduler = ProcedureScheduler::new(
            Arc::clone(&ctx),
            registry,
            Arc::clone(&executor),
            config.tick_interval(),
        );
        let filter = EventEligibilityFilter::new(Arc::clone(&ctx));
        let snapshots = snapshots.map(|backend| SnapshotService::new(store, backend));
        log::info!(
            "registration engine ready: {} workers, tick every {:?}",
            config.effective_worker_threads(),
            config.tick_interval()
        );
        Ok(Self {
            config,
            ctx,
            filter,
            snapshots,
            scheduler,
            executor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> Arc<EngineContext> {
        Arc::clone(&self.ctx)
    }

    pub fn store(&self) -> &PersistenceHandle {
        &self.ctx.store
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.ctx.audit
    }

    // ---- entity intake -------------------------------------------------

    pub fn add_user(&self, user: User) -> EngineResult<()> {
        self.ctx.store.users.save(user)
    }

    pub fn add_campaign(&self, campaign: Campaign) -> EngineResult<()> {
        self.ctx.store.campaigns.save(campaign)
    }

    /// Save an event and adopt it into the seat ledger. Capacity changes take
    /// effect immediately; the confirmed counter is re-seeded from storage.
    pub fn add_event(&self, event: Event) -> EngineResult<()> {
        let id = event.id;
        self.ctx.store.events.save(event.clone())?;
        self.ctx.seats.ensure_event(&event);
        let confirmed = self.ctx.store.registrations.count_for_event(id)?;
        self.ctx.seats.set_confirmed(id, confirmed);
        Ok(())
    }

    pub fn add_procedure(&self, procedure: Procedure) -> EngineResult<()> {
        self.ctx.store.procedures.save(procedure)
    }

    pub fn add_rule_set(&self, set: RegistrationRuleSet) -> EngineResult<RuleSetId> {
        self.ctx.store.rule_sets.save(set)
    }

    // ---- submission ----------------------------------------------------

    /// Accept a ranked wish list for an open procedure. `ranked_events` is
    /// ordered by descending preference; ranks are assigned from it.
    pub fn submit_priority_list(
        &self,
        procedure_id: ProcedureId,
        user_id: UserId,
        ranked_events: &[EventId],
    ) -> EngineResult<PriorityList> {
        let procedure = self
            .ctx
            .store
            .procedures
            .find(procedure_id)?
            .ok_or_else(|| EngineError::missing("procedure", procedure_id.raw()))?;
        let user = self
            .ctx
            .store
            .users
            .find(user_id)?
            .ok_or_else(|| EngineError::missing("user", user_id.raw()))?;
        if user.tenant != procedure.tenant {
            return Err(EngineError::validation(
                "user and procedure belong to different tenants",
            ));
        }

        let now = Utc::now();
        if !procedure.submission_open_at(now) {
            return Err(EngineError::validation(format!(
                "submission window of procedure {procedure_id} is not open"
            )));
        }
        if ranked_events.is_empty() {
            return Err(EngineError::validation_field(
                "a priority list needs at least one event",
                "events",
            ));
        }
        if ranked_events.len() > procedure.max_items_per_list as usize {
            return Err(EngineError::validation_field(
                format!(
                    "a list for this procedure holds at most {} events",
                    procedure.max_items_per_list
                ),
                "events",
            ));
        }
        let distinct: HashSet<EventId> = ranked_events.iter().copied().collect();
        if distinct.len() != ranked_events.len() {
            return Err(EngineError::validation_field(
                "events on a list must be distinct",
                "events",
            ));
        }

        let campaign = self
            .ctx
            .store
            .campaigns
            .find(procedure.campaign_id)?
            .ok_or_else(|| EngineError::missing("campaign", procedure.campaign_id.raw()))?;
        for event_id in ranked_events {
            if !campaign.contains_event(*event_id) {
                return Err(EngineError::validation_field(
                    format!("event {event_id} is not part of campaign {}", campaign.id),
                    "events",
                ));
            }
        }

        let submitted = self
            .ctx
            .store
            .priority_lists
            .for_user_in_procedure(procedure_id, user_id)?;
        if submitted.len() >= procedure.max_lists_per_user as usize {
            return Err(EngineError::validation(format!(
                "user {user_id} already submitted {} list(s) for procedure {procedure_id}",
                submitted.len()
            )));
        }

        let items = ranked_events
            .iter()
            .enumerate()
            .map(|(i, &event_id)| PriorityListItem::new(event_id, i as u32 + 1))
            .collect();
        let list = self.ctx.store.priority_lists.insert(NewPriorityList {
            tenant: procedure.tenant,
            procedure_id,
            user_id,
            submitted_at: now,
            items,
        })?;
        log::info!(
            "user {user_id} submitted priority list {} ({} events) for procedure {procedure_id}",
            list.id,
            list.items.len()
        );
        Ok(list)
    }

    // ---- queries -------------------------------------------------------

    /// Whether the rule sets permit `user` to register for `event` within
    /// `campaign`. Storage failures propagate; rule failures veto.
    pub fn is_registration_allowed(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
        event_id: EventId,
    ) -> EngineResult<bool> {
        let user = self
            .ctx
            .store
            .users
            .find(user_id)?
            .ok_or_else(|| EngineError::missing("user", user_id.raw()))?;
        let event = self
            .ctx
            .store
            .events
            .find(event_id)?
            .ok_or_else(|| EngineError::missing("event", event_id.raw()))?;
        self.ctx.rules.check_registration(&user, campaign_id, &event)
    }

    /// The subset of `event_ids` that `user` may still list in `procedure`.
    /// Ids that do not resolve are skipped with a warning; order is kept.
    pub fn filter_event_list(
        &self,
        event_ids: &[EventId],
        user_id: UserId,
        procedure_id: ProcedureId,
        blacklist: &[EventId],
    ) -> EngineResult<Vec<Event>> {
        let user = self
            .ctx
            .store
            .users
            .find(user_id)?
            .ok_or_else(|| EngineError::missing("user", user_id.raw()))?;
        let procedure = self
            .ctx
            .store
            .procedures
            .find(procedure_id)?
            .ok_or_else(|| EngineError::missing("procedure", procedure_id.raw()))?;

        let mut candidates = Vec::with_capacity(event_ids.len());
        for &event_id in event_ids {
            match self.ctx.store.events.find(event_id)? {
                Some(event) => candidates.push(event),
                None => log::warn!("ignoring unknown event {event_id} in eligibility request"),
            }
        }
        self.filter
            .filter_event_list(&candidates, &user, &procedure, blacklist)
    }

    // ---- lifecycle -----------------------------------------------------

    /// Start the scheduler timer with the configured interval.
    pub fn start_timer(&self) -> EngineResult<()> {
        self.scheduler.start_timer()
    }

    pub fn start_timer_with_interval(&self, interval: std::time::Duration) -> EngineResult<()> {
        self.scheduler.start_timer_with_interval(interval)
    }

    pub fn stop_timer(&self) {
        self.scheduler.stop_timer();
    }

    pub fn set_timer_interval(&self, interval: std::time::Duration) -> EngineResult<()> {
        self.scheduler.set_timer_interval(interval)
    }

    pub fn is_checking_for_procedure_states(&self) -> bool {
        self.scheduler.is_checking_for_procedure_states()
    }

    pub fn set_procedure_logic_registry(&self, registry: ProcedureLogicRegistry) {
        self.scheduler.set_procedure_logic_registry(registry);
    }

    pub fn find_active_logic_by_procedure(
        &self,
        id: ProcedureId,
    ) -> Option<Arc<dyn ProcedureLogic>> {
        self.scheduler.find_active_logic_by_procedure(id)
    }

    /// Drive one scheduler pass on the calling thread.
    pub fn tick_now(&self) {
        self.scheduler.tick_now();
    }

    pub fn scheduler_metrics(&self) -> SchedulerMetricsSnapshot {
        self.scheduler.metrics()
    }

    // ---- snapshots -----------------------------------------------------

    /// Persist a snapshot of the whole store. Requires a snapshot store.
    pub fn persist_snapshot(&self) -> EngineResult<String> {
        self.snapshot_service()?.persist()
    }

    /// Restore the newest snapshot and rebuild the seat ledger from it.
    /// Returns `false` when no snapshot exists yet.
    pub fn restore_last_snapshot(&self) -> EngineResult<bool> {
        let restored = self.snapshot_service()?.restore_last()?;
        if restored {
            self.ctx.rebuild_seat_ledger()?;
        }
        Ok(restored)
    }

    fn snapshot_service(&self) -> EngineResult<&SnapshotService> {
        self.snapshots.as_ref().ok_or_else(|| {
            EngineError::configuration("engine was built without a snapshot store")
        })
    }

    /// Stop the timer and wind down the worker pool. Idempotent; also runs on
    /// drop.
    pub fn shutdown(&self) {
        self.scheduler.stop_timer();
        self.executor.shutdown();
        log::info!("registration engine shut down");
    }
}

impl Drop for RegistrationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::{ProcedureKind, StudyCourseId, TenantId};
    use crate::core::rule::Rule;
    use chrono::Duration as ChronoDuration;

    const TENANT: TenantId = TenantId::new(1);

    fn engine() -> RegistrationEngine {
        RegistrationEngine::in_memory(EngineConfig::default()).unwrap()
    }

    fn seed_campaign(engine: &RegistrationEngine, events: &[(u64, u32)]) -> CampaignId {
        let mut event_ids = Vec::new();
        for &(id, capacity) in events {
            let event = Event::new(EventId::new(id), TENANT, format!("event-{id}"), capacity);
            engine.add_event(event).unwrap();
            event_ids.push(EventId::new(id));
        }
        let campaign = Campaign::new(CampaignId::new(1), TENANT, "winter term", event_ids);
        engine.add_campaign(campaign).unwrap();
        CampaignId::new(1)
    }

    fn seed_open_procedure(engine: &RegistrationEngine, campaign: CampaignId) -> ProcedureId {
        let now = Utc::now();
        let procedure = Procedure::new(
            ProcedureId::new(1),
            TENANT,
            campaign,
            ProcedureKind::Fifo,
            "first come first served",
            now - ChronoDuration::minutes(1),
            now + ChronoDuration::minutes(10),
            2,
            3,
        );
        engine.add_procedure(procedure).unwrap();
        ProcedureId::new(1)
    }

    fn seed_user(engine: &RegistrationEngine, id: u64, term: u32) -> UserId {
        let user = User::new(
            UserId::new(id),
            TENANT,
            format!("user-{id}"),
            term,
            StudyCourseId::new(10),
        );
        engine.add_user(user).unwrap();
        UserId::new(id)
    }

    #[test]
    fn submit_accepts_a_valid_list() {
        let engine = engine();
        let campaign = seed_campaign(&engine, &[(10, 5), (20, 5)]);
        let procedure = seed_open_procedure(&engine, campaign);
        let user = seed_user(&engine, 1, 3);

        let list = engine
            .submit_priority_list(procedure, user, &[EventId::new(20), EventId::new(10)])
            .unwrap();
        assert!(list.is_pending());
        assert_eq!(list.items[0].event_id, EventId::new(20));
        assert_eq!(list.items[0].rank, 1);
        assert_eq!(list.items[1].rank, 2);
    }

    #[test]
    fn submit_rejects_structural_mistakes() {
        let engine = engine();
        let campaign = seed_campaign(&engine, &[(10, 5), (20, 5), (30, 5), (40, 5)]);
        let procedure = seed_open_procedure(&engine, campaign);
        let user = seed_user(&engine, 1, 3);

        // Empty list.
        assert!(engine.submit_priority_list(procedure, user, &[]).is_err());
        // Too many items (max is 3).
        assert!(engine
            .submit_priority_list(
                procedure,
                user,
                &[
                    EventId::new(10),
                    EventId::new(20),
                    EventId::new(30),
                    EventId::new(40)
                ]
            )
            .is_err());
        // Duplicate events.
        assert!(engine
            .submit_priority_list(procedure, user, &[EventId::new(10), EventId::new(10)])
            .is_err());
        // Event outside the campaign.
        assert!(engine
            .submit_priority_list(procedure, user, &[EventId::new(99)])
            .is_err());
        // Unknown user and unknown procedure.
        assert!(engine
            .submit_priority_list(procedure, UserId::new(99), &[EventId::new(10)])
            .is_err());
        assert!(engine
            .submit_priority_list(ProcedureId::new(99), user, &[EventId::new(10)])
            .is_err());
    }

    #[test]
    fn submit_enforces_the_per_user_list_cap() {
        let engine = engine();
        let campaign = seed_campaign(&engine, &[(10, 5), (20, 5)]);
        let procedure = seed_open_procedure(&engine, campaign);
        let user = seed_user(&engine, 1, 3);

        engine
            .submit_priority_list(procedure, user, &[EventId::new(10)])
            .unwrap();
        engine
            .submit_priority_list(procedure, user, &[EventId::new(20)])
            .unwrap();
        let err = engine
            .submit_priority_list(procedure, user, &[EventId::new(20)])
            .unwrap_err();
        assert!(err.to_string().contains("already submitted"), "got: {err}");
    }

    #[test]
    fn submit_rejects_closed_windows() {
        let engine = engine();
        let campaign = seed_campaign(&engine, &[(10, 5)]);
        let user = seed_user(&engine, 1, 3);
        let now = Utc::now();
        // Window entirely in the past.
        engine
            .add_procedure(Procedure::new(
                ProcedureId::new(7),
                TENANT,
                campaign,
                ProcedureKind::Fifo,
                "over",
                now - ChronoDuration::minutes(10),
                now - ChronoDuration::minutes(5),
                1,
                3,
            ))
            .unwrap();
        assert!(engine
            .submit_priority_list(ProcedureId::new(7), user, &[EventId::new(10)])
            .is_err());
        // Window not open yet.
        engine
            .add_procedure(Procedure::new(
                ProcedureId::new(8),
                TENANT,
                campaign,
                ProcedureKind::Fifo,
                "not yet",
                now + ChronoDuration::minutes(5),
                now + ChronoDuration::minutes(10),
                1,
                3,
            ))
            .unwrap();
        assert!(engine
            .submit_priority_list(ProcedureId::new(8), user, &[EventId::new(10)])
            .is_err());
    }

    #[test]
    fn registration_permission_follows_the_rule_sets() {
        let engine = engine();
        let campaign = seed_campaign(&engine, &[(10, 5)]);
        let user = seed_user(&engine, 1, 2);
        engine
            .add_rule_set(RegistrationRuleSet::new(
                TENANT,
                campaign,
                EventId::new(10),
                vec![Rule::MinimumTerm { min_term: 3 }],
            ))
            .unwrap();

        assert!(!engine
            .is_registration_allowed(user, campaign, EventId::new(10))
            .unwrap());
        let senior = seed_user(&engine, 2, 3);
        assert!(engine
            .is_registration_allowed(senior, campaign, EventId::new(10))
            .unwrap());
    }

    #[test]
    fn filter_facade_skips_unknown_events() {
        let engine = engine();
        let campaign = seed_campaign(&engine, &[(10, 5), (20, 5)]);
        let procedure = seed_open_procedure(&engine, campaign);
        let user = seed_user(&engine, 1, 3);

        let eligible = engine
            .filter_event_list(
                &[EventId::new(10), EventId::new(555), EventId::new(20)],
                user,
                procedure,
                &[],
            )
            .unwrap();
        let ids: Vec<EventId> = eligible.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![EventId::new(10), EventId::new(20)]);
    }

    #[test]
    fn add_event_adopts_capacity_into_the_ledger() {
        let engine = engine();
        engine
            .add_event(Event::new(EventId::new(10), TENANT, "db systems", 12))
            .unwrap();
        assert_eq!(engine.context().seats.capacity(EventId::new(10)), Some(12));
    }

    #[test]
    fn snapshots_require_a_store() {
        let engine = engine();
        assert!(engine.persist_snapshot().is_err());
        assert!(engine.restore_last_snapshot().is_err());
    }
}
