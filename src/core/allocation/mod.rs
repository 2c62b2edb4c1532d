// SPDX-License-Identifier: MIT OR Apache-2.0

//! Allocation logic: the lifecycle contract, the factory registry and the
//! grant path shared by every algorithm.
//!
//! ## Overview
//!
//! Each procedure kind maps to a [`ProcedureLogicFactory`] held in a
//! [`ProcedureLogicRegistry`]. When the scheduler activates a procedure it
//! asks the registry for a live [`ProcedureLogic`] instance and drives it
//! through three hooks:
//!
//! * `before_active` once, on the transition into Active,
//! * `while_active` on every tick spent Active,
//! * `after_active` once, on the transition into Terminated.
//!
//! Hook implementations return errors instead of panicking; the scheduler
//! logs them and keeps ticking.
//!
//! The free function [`try_allocate`] is the one place a priority list item
//! turns into a confirmed registration. Both algorithms call it, so rule
//! checks, duplicate checks, seat reservation and compensation behave
//! identically under FIFO and lottery.

pub mod fifo;
pub mod lottery;
pub mod seats;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;

use crate::core::context::EngineContext;
use crate::core::entity::{
    ConfirmedRegistration, Event, PriorityList, PriorityListItem, Procedure, ProcedureId,
    ProcedureKind, RegistrationDraft, User,
};
use crate::core::error::{EngineError, EngineResult};
use crate::core::persistence::{FetchSession, RegistrationInsert};
use crate::core::allocation::seats::ReserveOutcome;

pub use fifo::FifoLogicFactory;
pub use lottery::LotteryLogicFactory;
pub use seats::SeatLedger;

/// Where a logic instance is in its own run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, `before_active` not yet finished.
    Scheduled,
    /// Between `before_active` and `after_active`.
    Running,
    /// `after_active` finished; every further hook call is a no-op.
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Scheduled => "scheduled",
            RunState::Running => "running",
            RunState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Live allocation logic bound to one procedure.
pub trait ProcedureLogic: fmt::Debug + Send + Sync {
    fn procedure_id(&self) -> ProcedureId;

    fn kind(&self) -> ProcedureKind;

    fn run_state(&self) -> RunState;

    /// Runs once when the procedure turns Active.
    fn before_active(&self) -> EngineResult<()>;

    /// Runs on every scheduler tick while the procedure is Active.
    fn while_active(&self) -> EngineResult<()>;

    /// Runs once when the procedure terminates. After this returns the
    /// instance is Done and must not allocate anything ever again.
    fn after_active(&self) -> EngineResult<()>;
}

/// Builds logic instances for one procedure kind.
pub trait ProcedureLogicFactory: fmt::Debug + Send + Sync {
    fn kind(&self) -> ProcedureKind;

    fn create(&self, procedure: &Procedure, ctx: Arc<EngineContext>) -> Arc<dyn ProcedureLogic>;

    fn clone_box(&self) -> Box<dyn ProcedureLogicFactory>;
}

impl Clone for Box<dyn ProcedureLogicFactory> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Maps procedure kinds to logic factories.
///
/// The scheduler holds one registry; swapping it at runtime re-routes every
/// *future* activation while instances already running keep their logic.
#[derive(Debug, Clone, Default)]
pub struct ProcedureLogicRegistry {
    factories: HashMap<ProcedureKind, Box<dyn ProcedureLogicFactory>>,
}

impl ProcedureLogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with both built-in algorithms. `draw_seed` parameterizes the
    /// lottery, see [`LotteryLogicFactory`].
    pub fn with_defaults(draw_seed: Option<u64>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(FifoLogicFactory));
        registry.register(Box::new(LotteryLogicFactory::new(draw_seed)));
        registry
    }

    /// Register or replace the factory for its kind.
    pub fn register(&mut self, factory: Box<dyn ProcedureLogicFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn has_kind(&self, kind: ProcedureKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn registered_kinds(&self) -> Vec<ProcedureKind> {
        let mut kinds: Vec<ProcedureKind> = self.factories.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Instantiate logic for `procedure`, erroring if its kind has no
    /// registered factory.
    pub fn create_for(
        &self,
        procedure: &Procedure,
        ctx: Arc<EngineContext>,
    ) -> EngineResult<Arc<dyn ProcedureLogic>> {
        match self.factories.get(&procedure.kind) {
            Some(factory) => Ok(factory.create(procedure, ctx)),
            None => Err(EngineError::configuration_for(
                format!("no allocation logic registered for kind '{}'", procedure.kind),
                procedure.id,
            )),
        }
    }
}

/// Outcome of one allocation attempt for one list item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    /// The item won a seat.
    Granted(ConfirmedRegistration),
    /// The event is at capacity.
    Full,
    /// Rules denied the user, or the user row is gone.
    Vetoed,
    /// The user already holds a seat in this event.
    AlreadyRegistered,
    /// The referenced event vanished and a fresh fetch did not bring it back.
    StaleEvent,
}

/// Try to turn `item` of `list` into a confirmed registration.
///
/// The sequence is fixed: resolve entities, re-check rules at the moment of
/// processing, pre-check (user, event) uniqueness, reserve a seat in the
/// ledger, persist. A reserved seat is handed back if the insert loses a
/// race or the store fails, so the ledger never leaks capacity.
pub(crate) fn try_allocate(
    ctx: &EngineContext,
    session: &mut FetchSession,
    procedure: &Procedure,
    list: &PriorityList,
    item: &PriorityListItem,
) -> EngineResult<AllocationOutcome> {
    let event = match resolve_event(session, item)? {
        Some(event) => event,
        None => {
            log::warn!(
                "event {} referenced by list {} is gone even after a fresh fetch",
                item.event_id,
                list.id
            );
            return Ok(AllocationOutcome::StaleEvent);
        }
    };

    let user: Arc<User> = match session.user(list.user_id)? {
        Some(user) => user,
        None => {
            log::warn!(
                "user {} of list {} no longer exists; denying the item",
                list.user_id,
                list.id
            );
            return Ok(AllocationOutcome::Vetoed);
        }
    };

    // Eligibility may have changed since submission; the decision that
    // counts is the one made now.
    if !ctx
        .rules
        .is_registration_allowed(&user, procedure.campaign_id, &event)
    {
        return Ok(AllocationOutcome::Vetoed);
    }

    if ctx.store.registrations.exists_for(user.id, event.id)? {
        return Ok(AllocationOutcome::AlreadyRegistered);
    }

    ctx.seats.ensure_event(&event);
    match ctx.seats.try_reserve(event.id) {
        ReserveOutcome::Reserved => {}
        ReserveOutcome::Full => return Ok(AllocationOutcome::Full),
        ReserveOutcome::UntrackedEvent => {
            // ensure_event above makes this unreachable in practice.
            return Ok(AllocationOutcome::Full);
        }
    }

    let draft = RegistrationDraft {
        tenant: list.tenant,
        user_id: user.id,
        event_id: event.id,
        procedure_id: procedure.id,
        list_id: list.id,
        confirmed_at: Utc::now(),
    };
    match ctx.store.registrations.insert(draft) {
        Ok(RegistrationInsert::Created(registration)) => {
            ctx.audit
                .record_grant(procedure.id, user.id, list.id, event.id, item.rank);
            log::debug!(
                "granted event {} to user {} via list {} (rank {})",
                event.id,
                user.id,
                list.id,
                item.rank
            );
            Ok(AllocationOutcome::Granted(registration))
        }
        Ok(RegistrationInsert::DuplicateUserEvent) => {
            // Lost a race against another pass; the seat goes back.
            ctx.seats.release(event.id);
            Ok(AllocationOutcome::AlreadyRegistered)
        }
        Err(e) => {
            ctx.seats.release(event.id);
            Err(e)
        }
    }
}

fn resolve_event(
    session: &mut FetchSession,
    item: &PriorityListItem,
) -> EngineResult<Option<Arc<Event>>> {
    if let Some(event) = session.event(item.event_id)? {
        return Ok(Some(event));
    }
    // One fresh fetch before giving up on the reference.
    session.refetch_event(item.event_id)
}
