// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory repository implementations.
//!
//! Thread-safe via `RwLock`-guarded maps. Repositories that assign ids keep a
//! monotonically increasing sequence. These back the default engine wiring
//! and the test suites.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::core::entity::{
    Campaign, CampaignId, ConfirmedRegistration, Event, EventId, NewPriorityList, PriorityList,
    PriorityListId, Procedure, ProcedureId, RegistrationDraft, RegistrationId, RuleSetId,
    TenantId, User, UserId,
};
use crate::core::error::{EngineError, EngineResult};
use crate::core::persistence::{
    CampaignRepository, EventRepository, PriorityListRepository, ProcedureRepository,
    RegistrationInsert, RegistrationRepository, RuleSetRepository, UserRepository,
};
use crate::core::rule::RegistrationRuleSet;

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    rows: RwLock<HashMap<UserId, User>>,
}

impl UserRepository for InMemoryUserRepository {
    fn find(&self, id: UserId) -> EngineResult<Option<User>> {
        Ok(self.rows.read().unwrap().get(&id).cloned())
    }

    fn save(&self, user: User) -> EngineResult<()> {
        self.rows.write().unwrap().insert(user.id, user);
        Ok(())
    }

    fn all(&self) -> EngineResult<Vec<User>> {
        let mut rows: Vec<User> = self.rows.read().unwrap().values().cloned().collect();
        rows.sort_by_key(|u| u.id);
        Ok(rows)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCampaignRepository {
    rows: RwLock<HashMap<CampaignId, Campaign>>,
}

impl CampaignRepository for InMemoryCampaignRepository {
    fn find(&self, id: CampaignId) -> EngineResult<Option<Campaign>> {
        Ok(self.rows.read().unwrap().get(&id).cloned())
    }

    fn save(&self, campaign: Campaign) -> EngineResult<()> {
        self.rows.write().unwrap().insert(campaign.id, campaign);
        Ok(())
    }

    fn all(&self) -> EngineResult<Vec<Campaign>> {
        let mut rows: Vec<Campaign> = self.rows.read().unwrap().values().cloned().collect();
        rows.sort_by_key(|c| c.id);
        Ok(rows)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    rows: RwLock<HashMap<EventId, Event>>,
}

impl EventRepository for InMemoryEventRepository {
    fn find(&self, id: EventId) -> EngineResult<Option<Event>> {
        Ok(self.rows.read().unwrap().get(&id).cloned())
    }

    fn save(&self, event: Event) -> EngineResult<()> {
        self.rows.write().unwrap().insert(event.id, event);
        Ok(())
    }

    fn all(&self) -> EngineResult<Vec<Event>> {
        let mut rows: Vec<Event> = self.rows.read().unwrap().values().cloned().collect();
        rows.sort_by_key(|e| e.id);
        Ok(rows)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProcedureRepository {
    rows: RwLock<HashMap<ProcedureId, Procedure>>,
}

impl ProcedureRepository for InMemoryProcedureRepository {
    fn find(&self, id: ProcedureId) -> EngineResult<Option<Procedure>> {
        Ok(self.rows.read().unwrap().get(&id).cloned())
    }

    fn save(&self, procedure: Procedure) -> EngineResult<()> {
        self.rows.write().unwrap().insert(procedure.id, procedure);
        Ok(())
    }

    fn all(&self) -> EngineResult<Vec<Procedure>> {
        let mut rows: Vec<Procedure> = self.rows.read().unwrap().values().cloned().collect();
        rows.sort_by_key(|p| p.id);
        Ok(rows)
    }
}

#[derive(Debug)]
pub struct InMemoryPriorityListRepository {
    rows: RwLock<HashMap<PriorityListId, PriorityList>>,
    seq: AtomicU64,
}

impl Default for InMemoryPriorityListRepository {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(1),
        }
    }
}

impl PriorityListRepository for InMemoryPriorityListRepository {
    fn insert(&self, new: NewPriorityList) -> EngineResult<PriorityList> {
        let id = PriorityListId::new(self.seq.fetch_add(1, Ordering::SeqCst));
        let list = PriorityList::from_new(id, new);
        self.rows.write().unwrap().insert(id, list.clone());
        Ok(list)
    }

    fn update(&self, list: &PriorityList) -> EngineResult<()> {
        let mut rows = self.rows.write().unwrap();
        if !rows.contains_key(&list.id) {
            return Err(EngineError::missing("priority list", list.id.raw()));
        }
        rows.insert(list.id, list.clone());
        Ok(())
    }

    fn find(&self, id: PriorityListId) -> EngineResult<Option<PriorityList>> {
        Ok(self.rows.read().unwrap().get(&id).cloned())
    }

    fn pending_for_procedure(&self, procedure: ProcedureId) -> EngineResult<Vec<PriorityList>> {
        let mut rows: Vec<PriorityList> = self
            .rows
            .read()
            .unwrap()
            .values()
            .filter(|l| l.procedure_id == procedure && l.is_pending())
            .cloned()
            .collect();
        rows.sort_by_key(|l| (l.submitted_at, l.id));
        Ok(rows)
    }

    fn for_user_in_procedure(
        &self,
        procedure: ProcedureId,
        user: UserId,
    ) -> EngineResult<Vec<PriorityList>> {
        let mut rows: Vec<PriorityList> = self
            .rows
            .read()
            .unwrap()
            .values()
            .filter(|l| l.procedure_id == procedure && l.user_id == user)
            .cloned()
            .collect();
        rows.sort_by_key(|l| (l.submitted_at, l.id));
        Ok(rows)
    }

    fn all_for_procedure(&self, procedure: ProcedureId) -> EngineResult<Vec<PriorityList>> {
        let mut rows: Vec<PriorityList> = self
            .rows
            .read()
            .unwrap()
            .values()
            .filter(|l| l.procedure_id == procedure)
            .cloned()
            .collect();
        rows.sort_by_key(|l| (l.submitted_at, l.id));
        Ok(rows)
    }

    fn all(&self) -> EngineResult<Vec<PriorityList>> {
        let mut rows: Vec<PriorityList> = self.rows.read().unwrap().values().cloned().collect();
        rows.sort_by_key(|l| l.id);
        Ok(rows)
    }

    fn restore(&self, list: PriorityList) -> EngineResult<()> {
        // Keep the sequence ahead of restored ids.
        self.seq.fetch_max(list.id.raw() + 1, Ordering::SeqCst);
        self.rows.write().unwrap().insert(list.id, list);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RegistrationRows {
    rows: HashMap<RegistrationId, ConfirmedRegistration>,
    by_user_event: HashSet<(UserId, EventId)>,
}

#[derive(Debug)]
pub struct InMemoryRegistrationRepository {
    inner: RwLock<RegistrationRows>,
    seq: AtomicU64,
}

impl Default for InMemoryRegistrationRepository {
    fn default() -> Self {
        Self {
            inner: RwLock::new(RegistrationRows::default()),
            seq: AtomicU64::new(1),
        }
    }
}

impl RegistrationRepository for InMemoryRegistrationRepository {
    fn insert(&self, draft: RegistrationDraft) -> EngineResult<RegistrationInsert> {
        let mut inner = self.inner.write().unwrap();
        let key = (draft.user_id, draft.event_id);
        if inner.by_user_event.contains(&key) {
            return Ok(RegistrationInsert::DuplicateUserEvent);
        }
        let id = RegistrationId::new(self.seq.fetch_add(1, Ordering::SeqCst));
        let registration = ConfirmedRegistration::from_draft(id, draft);
        inner.by_user_event.insert(key);
        inner.rows.insert(id, registration.clone());
        Ok(RegistrationInsert::Created(registration))
    }

    fn exists_for(&self, user: UserId, event: EventId) -> EngineResult<bool> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .by_user_event
            .contains(&(user, event)))
    }

    fn count_for_event(&self, event: EventId) -> EngineResult<u32> {
        let count = self
            .inner
            .read()
            .unwrap()
            .rows
            .values()
            .filter(|r| r.event_id == event)
            .count();
        Ok(count as u32)
    }

    fn for_event(&self, event: EventId) -> EngineResult<Vec<ConfirmedRegistration>> {
        let mut rows: Vec<ConfirmedRegistration> = self
            .inner
            .read()
            .unwrap()
            .rows
            .values()
            .filter(|r| r.event_id == event)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    fn for_user(&self, user: UserId) -> EngineResult<Vec<ConfirmedRegistration>> {
        let mut rows: Vec<ConfirmedRegistration> = self
            .inner
            .read()
            .unwrap()
            .rows
            .values()
            .filter(|r| r.user_id == user)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    fn all(&self) -> EngineResult<Vec<ConfirmedRegistration>> {
        let mut rows: Vec<ConfirmedRegistration> =
            self.inner.read().unwrap().rows.values().cloned().collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    fn restore(&self, registration: ConfirmedRegistration) -> EngineResult<()> {
        let mut inner = self.inner.write().unwrap();
        self.seq
            .fetch_max(registration.id.raw() + 1, Ordering::SeqCst);
        inner
            .by_user_event
            .insert((registration.user_id, registration.event_id));
        inner.rows.insert(registration.id, registration);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RuleSetRows {
    rows: HashMap<RuleSetId, RegistrationRuleSet>,
    by_triple: HashMap<(CampaignId, EventId, TenantId), RuleSetId>,
}

#[derive(Debug)]
pub struct InMemoryRuleSetRepository {
    inner: RwLock<RuleSetRows>,
    seq: AtomicU64,
}

impl Default for InMemoryRuleSetRepository {
    fn default() -> Self {
        Self {
            inner: RwLock::new(RuleSetRows::default()),
            seq: AtomicU64::new(1),
        }
    }
}

impl RuleSetRepository for InMemoryRuleSetRepository {
    fn find(&self, id: RuleSetId) -> EngineResult<Option<RegistrationRuleSet>> {
        Ok(self.inner.read().unwrap().rows.get(&id).cloned())
    }

    fn find_for(
        &self,
        campaign: CampaignId,
        event: EventId,
        tenant: TenantId,
    ) -> EngineResult<Option<RegistrationRuleSet>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .by_triple
            .get(&(campaign, event, tenant))
            .and_then(|id| inner.rows.get(id))
            .cloned())
    }

    fn save(&self, mut set: RegistrationRuleSet) -> EngineResult<RuleSetId> {
        let mut inner = self.inner.write().unwrap();
        let triple = (set.campaign_id, set.event_id, set.tenant);
        if set.id.raw() == 0 {
            set.id = RuleSetId::new(self.seq.fetch_add(1, Ordering::SeqCst));
        } else {
            self.seq.fetch_max(set.id.raw() + 1, Ordering::SeqCst);
        }
        match inner.by_triple.get(&triple) {
            Some(existing) if *existing != set.id => {
                return Err(EngineError::validation(format!(
                    "rule set {existing} already governs campaign {}, event {}, tenant {}",
                    triple.0, triple.1, triple.2
                )));
            }
            _ => {}
        }
        // The triple is part of the set; updating a set under a new triple
        // must also drop the old index entry.
        let old_triple = inner
            .rows
            .get(&set.id)
            .map(|p| (p.campaign_id, p.event_id, p.tenant));
        if let Some(old) = old_triple {
            if old != triple {
                inner.by_triple.remove(&old);
            }
        }
        let id = set.id;
        inner.by_triple.insert(triple, id);
        inner.rows.insert(id, set);
        Ok(id)
    }

    fn all(&self) -> EngineResult<Vec<RegistrationRuleSet>> {
        let mut rows: Vec<RegistrationRuleSet> =
            self.inner.read().unwrap().rows.values().cloned().collect();
        rows.sort_by_key(|s| s.id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::PriorityListItem;
    use crate::core::rule::Rule;
    use chrono::{Duration, Utc};

    fn new_list(user: u64, procedure: u64, offset_ms: i64) -> NewPriorityList {
        NewPriorityList {
            tenant: TenantId::new(1),
            procedure_id: ProcedureId::new(procedure),
            user_id: UserId::new(user),
            submitted_at: Utc::now() + Duration::milliseconds(offset_ms),
            items: vec![PriorityListItem::new(EventId::new(1), 1)],
        }
    }

    #[test]
    fn list_insert_assigns_increasing_ids() {
        let repo = InMemoryPriorityListRepository::default();
        let a = repo.insert(new_list(1, 1, 0)).unwrap();
        let b = repo.insert(new_list(2, 1, 0)).unwrap();
        assert!(a.id < b.id);
    }

    #[test]
    fn pending_lists_come_back_in_submission_order() {
        let repo = InMemoryPriorityListRepository::default();
        let late = repo.insert(new_list(1, 7, 500)).unwrap();
        let early = repo.insert(new_list(2, 7, -500)).unwrap();
        let other_procedure = repo.insert(new_list(3, 8, -900)).unwrap();

        let pending = repo.pending_for_procedure(ProcedureId::new(7)).unwrap();
        let ids: Vec<PriorityListId> = pending.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
        assert!(!ids.contains(&other_procedure.id));
    }

    #[test]
    fn equal_timestamps_tie_break_by_id() {
        let repo = InMemoryPriorityListRepository::default();
        let at = Utc::now();
        let mut first = new_list(1, 7, 0);
        first.submitted_at = at;
        let mut second = new_list(2, 7, 0);
        second.submitted_at = at;
        let a = repo.insert(first).unwrap();
        let b = repo.insert(second).unwrap();

        let pending = repo.pending_for_procedure(ProcedureId::new(7)).unwrap();
        assert_eq!(pending[0].id, a.id);
        assert_eq!(pending[1].id, b.id);
    }

    #[test]
    fn update_unknown_list_is_an_error() {
        let repo = InMemoryPriorityListRepository::default();
        let mut ghost = PriorityList::from_new(PriorityListId::new(99), new_list(1, 1, 0));
        ghost.id = PriorityListId::new(99);
        assert!(repo.update(&ghost).is_err());
    }

    fn draft(user: u64, event: u64) -> RegistrationDraft {
        RegistrationDraft {
            tenant: TenantId::new(1),
            user_id: UserId::new(user),
            event_id: EventId::new(event),
            procedure_id: ProcedureId::new(1),
            list_id: PriorityListId::new(1),
            confirmed_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_user_event_is_reported_not_inserted() {
        let repo = InMemoryRegistrationRepository::default();
        match repo.insert(draft(5, 9)).unwrap() {
            RegistrationInsert::Created(r) => assert_eq!(r.user_id, UserId::new(5)),
            other => panic!("expected Created, got {other:?}"),
        }
        assert_eq!(
            repo.insert(draft(5, 9)).unwrap(),
            RegistrationInsert::DuplicateUserEvent
        );
        assert_eq!(repo.count_for_event(EventId::new(9)).unwrap(), 1);
        assert!(repo.exists_for(UserId::new(5), EventId::new(9)).unwrap());
    }

    #[test]
    fn same_user_may_register_for_different_events() {
        let repo = InMemoryRegistrationRepository::default();
        repo.insert(draft(5, 9)).unwrap();
        match repo.insert(draft(5, 10)).unwrap() {
            RegistrationInsert::Created(_) => {}
            other => panic!("expected Created, got {other:?}"),
        }
        assert_eq!(repo.for_user(UserId::new(5)).unwrap().len(), 2);
    }

    fn rule_set(id: u64, campaign: u64, event: u64) -> RegistrationRuleSet {
        RegistrationRuleSet {
            id: RuleSetId::new(id),
            tenant: TenantId::new(1),
            campaign_id: CampaignId::new(campaign),
            event_id: EventId::new(event),
            rules: vec![Rule::MinimumTerm { min_term: 2 }],
        }
    }

    #[test]
    fn rule_set_triple_is_unique() {
        let repo = InMemoryRuleSetRepository::default();
        let id = repo.save(rule_set(0, 1, 1)).unwrap();
        assert!(id.raw() > 0);
        // Same id again: update is fine.
        repo.save(rule_set(id.raw(), 1, 1)).unwrap();
        // Different set on the same triple: rejected.
        assert!(repo.save(rule_set(0, 1, 1)).is_err());
        // Same structure, different event: fine.
        repo.save(rule_set(0, 1, 2)).unwrap();
    }

    #[test]
    fn rule_set_lookup_by_triple() {
        let repo = InMemoryRuleSetRepository::default();
        repo.save(rule_set(0, 3, 4)).unwrap();
        let found = repo
            .find_for(CampaignId::new(3), EventId::new(4), TenantId::new(1))
            .unwrap();
        assert!(found.is_some());
        let missing = repo
            .find_for(CampaignId::new(3), EventId::new(4), TenantId::new(2))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn restore_keeps_sequence_ahead() {
        let repo = InMemoryPriorityListRepository::default();
        let mut list = PriorityList::from_new(PriorityListId::new(1), new_list(1, 1, 0));
        list.id = PriorityListId::new(41);
        repo.restore(list).unwrap();
        let next = repo.insert(new_list(2, 1, 0)).unwrap();
        assert!(next.id.raw() > 41);
    }
}
