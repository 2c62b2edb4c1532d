// SPDX-License-Identifier: MIT OR Apache-2.0

//! First-come-first-served allocation.
//!
//! ## Overview
//!
//! Every tick spent Active walks the procedure's pending lists in submission
//! order (earliest `submitted_at` first, ties by lowest list id). For each
//! list the scan runs down the ranks and grants the first item that is
//! allocatable *right now*; one grant closes the list. Lists that cannot be
//! served this tick stay pending and compete again on the next tick, so a
//! seat freed later can still reach an early submitter.
//!
//! On termination every list still pending is marked expired; nothing is
//! allocated past that point.

use std::sync::{Arc, Mutex};

use crate::core::allocation::{
    try_allocate, AllocationOutcome, ProcedureLogic, ProcedureLogicFactory, RunState,
};
use crate::core::context::EngineContext;
use crate::core::entity::{
    ItemResolution, ListStatus, Procedure, ProcedureId, ProcedureKind,
};
use crate::core::error::EngineResult;
use crate::core::persistence::FetchSession;

/// Factory for [`FifoProcedureLogic`]. Stateless; one instance serves every
/// FIFO procedure.
#[derive(Debug, Clone)]
pub struct FifoLogicFactory;

impl ProcedureLogicFactory for FifoLogicFactory {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::Fifo
    }

    fn create(&self, procedure: &Procedure, ctx: Arc<EngineContext>) -> Arc<dyn ProcedureLogic> {
        Arc::new(FifoProcedureLogic {
            procedure: procedure.clone(),
            ctx,
            state: Mutex::new(RunState::Scheduled),
        })
    }

    fn clone_box(&self) -> Box<dyn ProcedureLogicFactory> {
        Box::new(self.clone())
    }
}

#[derive(Debug)]
pub struct FifoProcedureLogic {
    procedure: Procedure,
    ctx: Arc<EngineContext>,
    state: Mutex<RunState>,
}

impl FifoProcedureLogic {
    /// One pass over the pending lists. Returns the number of grants.
    fn allocation_pass(&self) -> EngineResult<u32> {
        let mut session = FetchSession::new(self.ctx.store.clone());
        let pending = self
            .ctx
            .store
            .priority_lists
            .pending_for_procedure(self.procedure.id)?;
        let mut grants = 0u32;

        for mut list in pending {
            let mut pos = 0;
            while pos < list.items.len() {
                if !list.items[pos].is_unresolved() {
                    pos += 1;
                    continue;
                }
                let item = list.items[pos].clone();
                match try_allocate(&self.ctx, &mut session, &self.procedure, &list, &item)? {
                    AllocationOutcome::Granted(_) => {
                        list.items[pos].resolution = ItemResolution::Granted;
                        list.status = ListStatus::Allocated;
                        self.ctx.store.priority_lists.update(&list)?;
                        grants += 1;
                        // One seat per list: the rest of the ranks are moot.
                        break;
                    }
                    AllocationOutcome::StaleEvent => {
                        // Items pointing at vanished events never become
                        // allocatable; resolve them so later ticks skip the
                        // redundant fetch.
                        list.items[pos].resolution = ItemResolution::Failed;
                        self.ctx.store.priority_lists.update(&list)?;
                        pos += 1;
                    }
                    AllocationOutcome::Full
                    | AllocationOutcome::Vetoed
                    | AllocationOutcome::AlreadyRegistered => {
                        // Not allocatable right now; the item keeps
                        // competing on later ticks.
                        pos += 1;
                    }
                }
            }
        }

        if grants > 0 {
            log::info!(
                "fifo procedure {}: granted {grants} seat(s) this tick",
                self.procedure.id
            );
        }
        Ok(grants)
    }

    fn expire_pending(&self) -> EngineResult<u32> {
        let pending = self
            .ctx
            .store
            .priority_lists
            .pending_for_procedure(self.procedure.id)?;
        let mut expired = 0u32;
        for mut list in pending {
            list.status = ListStatus::Expired;
            self.ctx.store.priority_lists.update(&list)?;
            self.ctx
                .audit
                .record_expiry(self.procedure.id, list.user_id, list.id);
            expired += 1;
        }
        Ok(expired)
    }
}

impl ProcedureLogic for FifoProcedureLogic {
    fn procedure_id(&self) -> ProcedureId {
        self.procedure.id
    }

    fn kind(&self) -> ProcedureKind {
        ProcedureKind::Fifo
    }

    fn run_state(&self) -> RunState {
        *self.state.lock().unwrap()
    }

    fn before_active(&self) -> EngineResult<()> {
        *self.state.lock().unwrap() = RunState::Running;
        log::info!("fifo procedure {} is active", self.procedure.id);
        Ok(())
    }

    fn while_active(&self) -> EngineResult<()> {
        match self.run_state() {
            RunState::Running => {}
            RunState::Scheduled => {
                // Tolerate a missed before_active, e.g. after an engine
                // restart mid-window.
                *self.state.lock().unwrap() = RunState::Running;
            }
            RunState::Done => {
                log::debug!(
                    "fifo procedure {}: while_active after termination ignored",
                    self.procedure.id
                );
                return Ok(());
            }
        }
        self.allocation_pass()?;
        Ok(())
    }

    fn after_active(&self) -> EngineResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == RunState::Done {
                return Ok(());
            }
            *state = RunState::Done;
        }
        let expired = self.expire_pending()?;
        log::info!(
            "fifo procedure {} terminated; {expired} pending list(s) expired",
            self.procedure.id
        );
        Ok(())
    }
}
