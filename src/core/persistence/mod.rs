// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage abstraction.
//!
//! ## Overview
//!
//! One repository trait per entity, bundled into a [`PersistenceHandle`] that
//! is constructed explicitly and passed to every service that needs storage.
//! There is no global store; tests and embedders wire their own handle.
//!
//! Repositories hand out owned copies of their rows. Detached copies are the
//! norm here: a fetched `Event` says nothing about current seat occupancy,
//! which is why the seat ledger exists.
//!
//! The bundled in-memory implementations ([`in_memory`]) are complete and
//! thread-safe; they back the engine out of the box and are what the test
//! suites run against.

pub mod in_memory;
pub mod session;
pub mod snapshot;

use std::fmt;
use std::sync::Arc;

use crate::core::entity::{
    Campaign, CampaignId, ConfirmedRegistration, Event, EventId, NewPriorityList, PriorityList,
    PriorityListId, Procedure, ProcedureId, RegistrationDraft, RuleSetId, TenantId, User, UserId,
};
use crate::core::error::EngineResult;
use crate::core::rule::RegistrationRuleSet;

pub use session::FetchSession;
pub use snapshot::{
    FileSnapshotStore, InMemorySnapshotStore, SnapshotService, SnapshotStore, StoreSnapshot,
};

/// Outcome of inserting a confirmed registration.
///
/// Duplicate (user, event) pairs are an expected race under concurrent
/// allocation, not a storage failure, so they are modelled as an outcome the
/// caller compensates for rather than as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationInsert {
    Created(ConfirmedRegistration),
    DuplicateUserEvent,
}

pub trait UserRepository: fmt::Debug + Send + Sync {
    fn find(&self, id: UserId) -> EngineResult<Option<User>>;
    fn save(&self, user: User) -> EngineResult<()>;
    fn all(&self) -> EngineResult<Vec<User>>;
}

pub trait CampaignRepository: fmt::Debug + Send + Sync {
    fn find(&self, id: CampaignId) -> EngineResult<Option<Campaign>>;
    fn save(&self, campaign: Campaign) -> EngineResult<()>;
    fn all(&self) -> EngineResult<Vec<Campaign>>;
}

pub trait EventRepository: fmt::Debug + Send + Sync {
    fn find(&self, id: EventId) -> EngineResult<Option<Event>>;
    fn save(&self, event: Event) -> EngineResult<()>;
    fn all(&self) -> EngineResult<Vec<Event>>;
}

pub trait ProcedureRepository: fmt::Debug + Send + Sync {
    fn find(&self, id: ProcedureId) -> EngineResult<Option<Procedure>>;
    fn save(&self, procedure: Procedure) -> EngineResult<()>;
    fn all(&self) -> EngineResult<Vec<Procedure>>;
}

pub trait PriorityListRepository: fmt::Debug + Send + Sync {
    /// Insert a new list and assign its id.
    fn insert(&self, new: NewPriorityList) -> EngineResult<PriorityList>;
    /// Persist status and item resolutions of an existing list.
    fn update(&self, list: &PriorityList) -> EngineResult<()>;
    fn find(&self, id: PriorityListId) -> EngineResult<Option<PriorityList>>;
    /// Pending lists of a procedure in submission order: ascending
    /// `submitted_at`, ties broken by ascending list id.
    fn pending_for_procedure(&self, procedure: ProcedureId) -> EngineResult<Vec<PriorityList>>;
    /// Every list a user has submitted for a procedure, regardless of status.
    fn for_user_in_procedure(
        &self,
        procedure: ProcedureId,
        user: UserId,
    ) -> EngineResult<Vec<PriorityList>>;
    fn all_for_procedure(&self, procedure: ProcedureId) -> EngineResult<Vec<PriorityList>>;
    fn all(&self) -> EngineResult<Vec<PriorityList>>;
    /// Re-insert a list under its existing id. Snapshot restore only.
    fn restore(&self, list: PriorityList) -> EngineResult<()>;
}

pub trait RegistrationRepository: fmt::Debug + Send + Sync {
    /// Insert a confirmed seat, enforcing at most one registration per
    /// (user, event) pair.
    fn insert(&self, draft: RegistrationDraft) -> EngineResult<RegistrationInsert>;
    fn exists_for(&self, user: UserId, event: EventId) -> EngineResult<bool>;
    fn count_for_event(&self, event: EventId) -> EngineResult<u32>;
    fn for_event(&self, event: EventId) -> EngineResult<Vec<ConfirmedRegistration>>;
    fn for_user(&self, user: UserId) -> EngineResult<Vec<ConfirmedRegistration>>;
    fn all(&self) -> EngineResult<Vec<ConfirmedRegistration>>;
    /// Re-insert a registration under its existing id. Snapshot restore only.
    fn restore(&self, registration: ConfirmedRegistration) -> EngineResult<()>;
}

pub trait RuleSetRepository: fmt::Debug + Send + Sync {
    fn find(&self, id: RuleSetId) -> EngineResult<Option<RegistrationRuleSet>>;
    /// The rule set governing one (campaign, event, tenant) triple, if any.
    fn find_for(
        &self,
        campaign: CampaignId,
        event: EventId,
        tenant: TenantId,
    ) -> EngineResult<Option<RegistrationRuleSet>>;
    /// Insert or update. A set with id 0 is assigned a fresh id. Two distinct
    /// sets may never share a (campaign, event, tenant) triple.
    fn save(&self, set: RegistrationRuleSet) -> EngineResult<RuleSetId>;
    fn all(&self) -> EngineResult<Vec<RegistrationRuleSet>>;
}

/// Bundle of repository handles, cloned freely across services and threads.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    pub users: Arc<dyn UserRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub events: Arc<dyn EventRepository>,
    pub procedures: Arc<dyn ProcedureRepository>,
    pub priority_lists: Arc<dyn PriorityListRepository>,
    pub registrations: Arc<dyn RegistrationRepository>,
    pub rule_sets: Arc<dyn RuleSetRepository>,
}

impl PersistenceHandle {
    /// A handle backed entirely by the in-memory repositories.
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(in_memory::InMemoryUserRepository::default()),
            campaigns: Arc::new(in_memory::InMemoryCampaignRepository::default()),
            events: Arc::new(in_memory::InMemoryEventRepository::default()),
            procedures: Arc::new(in_memory::InMemoryProcedureRepository::default()),
            priority_lists: Arc::new(in_memory::InMemoryPriorityListRepository::default()),
            registrations: Arc::new(in_memory::InMemoryRegistrationRepository::default()),
            rule_sets: Arc::new(in_memory::InMemoryRuleSetRepository::default()),
        }
    }
}
