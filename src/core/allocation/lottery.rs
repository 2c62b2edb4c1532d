// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lottery allocation.
//!
//! ## Overview
//!
//! A lottery procedure collects lists for its whole window and allocates
//! nothing while submissions are open. Once the window closes, a single draw
//! resolves everything in rounds:
//!
//! 1. Group every pending list by the event of its highest-ranked unresolved
//!    item. Lists whose items are all resolved drop out.
//! 2. For each contested event (ascending event id), shuffle the competitors
//!    uniformly and walk the shuffled order, granting seats until the event
//!    runs out of capacity. Competitors that do not get a seat, or that the
//!    rules veto, have that item marked failed.
//! 3. Repeat. Lists that lost a round compete in the next one with their
//!    next rank, so second choices are only considered after first choices
//!    everywhere have been resolved.
//!
//! The draw ends when no unresolved items remain; a round that resolves
//! nothing ends it early as a stall guard. Each list wins at most one seat,
//! and the draw runs at most once per procedure no matter how often the
//! hooks fire around it.
//!
//! Randomness comes from a seedable RNG. With a configured base seed every
//! procedure derives its own deterministic stream, which makes draws
//! reproducible for audits and tests; without one the draw uses OS entropy.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::core::allocation::{
    try_allocate, AllocationOutcome, ProcedureLogic, ProcedureLogicFactory, RunState,
};
use crate::core::context::EngineContext;
use crate::core::entity::{
    EventId, ItemResolution, ListStatus, PriorityList, Procedure, ProcedureId, ProcedureKind,
};
use crate::core::error::EngineResult;
use crate::core::persistence::FetchSession;

/// Factory for [`LotteryProcedureLogic`].
///
/// Carries the optional base seed. A procedure's draw seed is the base seed
/// XORed with the procedure id, so two lotteries under the same base seed
/// still shuffle independently.
#[derive(Debug, Clone)]
pub struct LotteryLogicFactory {
    draw_seed: Option<u64>,
}

impl LotteryLogicFactory {
    pub fn new(draw_seed: Option<u64>) -> Self {
        Self { draw_seed }
    }
}

impl ProcedureLogicFactory for LotteryLogicFactory {
    fn kind(&self) -> ProcedureKind {
        ProcedureKind::Lottery
    }

    fn create(&self, procedure: &Procedure, ctx: Arc<EngineContext>) -> Arc<dyn ProcedureLogic> {
        Arc::new(LotteryProcedureLogic {
            procedure: procedure.clone(),
            ctx,
            state: Mutex::new(RunState::Scheduled),
            draw_done: AtomicBool::new(false),
            draw_seed: self.draw_seed,
        })
    }

    fn clone_box(&self) -> Box<dyn ProcedureLogicFactory> {
        Box::new(self.clone())
    }
}

#[derive(Debug)]
pub struct LotteryProcedureLogic {
    procedure: Procedure,
    ctx: Arc<EngineContext>,
    state: Mutex<RunState>,
    draw_done: AtomicBool,
    draw_seed: Option<u64>,
}

impl LotteryProcedureLogic {
    fn rng(&self) -> StdRng {
        match self.draw_seed {
            Some(base) => StdRng::seed_from_u64(base ^ self.procedure.id.raw()),
            None => StdRng::from_entropy(),
        }
    }

    /// Run the draw if it has not run yet. The compare-exchange makes this
    /// idempotent across while_active and after_active.
    fn run_draw_once(&self) -> EngineResult<()> {
        if self
            .draw_done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.run_draw()
    }

    fn run_draw(&self) -> EngineResult<()> {
        let mut rng = self.rng();
        let mut session = FetchSession::new(self.ctx.store.clone());
        let mut lists: Vec<PriorityList> = self
            .ctx
            .store
            .priority_lists
            .pending_for_procedure(self.procedure.id)?;

        log::info!(
            "lottery procedure {}: drawing over {} pending list(s)",
            self.procedure.id,
            lists.len()
        );

        let mut round = 0u32;
        let mut total_grants = 0u32;
        loop {
            round += 1;
            // Competitors for this round: list index grouped by the event of
            // the list's current item. BTreeMap fixes the event order, so a
            // seeded draw is fully deterministic.
            let mut competitors: BTreeMap<EventId, Vec<usize>> = BTreeMap::new();
            for (idx, list) in lists.iter().enumerate() {
                if list.status != ListStatus::Pending {
                    continue;
                }
                if let Some(item) = list.current_unresolved() {
                    competitors.entry(item.event_id).or_default().push(idx);
                }
            }
            if competitors.is_empty() {
                break;
            }

            let mut resolved_this_round = 0u32;
            let mut grants_this_round = 0u32;
            for (event_id, mut indices) in competitors {
                indices.shuffle(&mut rng);
                for idx in indices {
                    let list = &mut lists[idx];
                    let item = match list.current_unresolved() {
                        Some(item) if item.event_id == event_id => item.clone(),
                        // Resolved or moved since grouping; next round picks
                        // it up again.
                        _ => continue,
                    };
                    match try_allocate(&self.ctx, &mut session, &self.procedure, list, &item)? {
                        AllocationOutcome::Granted(_) => {
                            if let Some(won) = list.item_mut(event_id) {
                                won.resolution = ItemResolution::Granted;
                            }
                            list.status = ListStatus::Allocated;
                            self.ctx.store.priority_lists.update(list)?;
                            grants_this_round += 1;
                            resolved_this_round += 1;
                        }
                        AllocationOutcome::Full
                        | AllocationOutcome::Vetoed
                        | AllocationOutcome::AlreadyRegistered
                        | AllocationOutcome::StaleEvent => {
                            // Lost at this rank; the next round tries the
                            // next one.
                            if let Some(lost) = list.item_mut(event_id) {
                                lost.resolution = ItemResolution::Failed;
                            }
                            self.ctx.store.priority_lists.update(list)?;
                            resolved_this_round += 1;
                        }
                    }
                }
            }

            total_grants += grants_this_round;
            log::info!(
                "lottery procedure {}: round {round} granted {grants_this_round}, resolved {resolved_this_round}",
                self.procedure.id
            );
            if resolved_this_round == 0 {
                // Every competing list was skipped; nothing can change
                // anymore.
                log::warn!(
                    "lottery procedure {}: round {round} resolved nothing, stopping the draw",
                    self.procedure.id
                );
                break;
            }
        }

        log::info!(
            "lottery procedure {}: draw finished after {round} round(s) with {total_grants} grant(s)",
            self.procedure.id
        );
        Ok(())
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

impl ProcedureLogic for LotteryProcedureLogic {
    fn procedure_id(&self) -> ProcedureId {
        self.procedure.id
    }

    fn kind(&self) -> ProcedureKind {
        ProcedureKind::Lottery
    }

    fn run_state(&self) -> RunState {
        *self.state.lock().unwrap()
    }

    fn before_active(&self) -> EngineResult<()> {
        *self.state.lock().unwrap() = RunState::Running;
        log::info!(
            "lottery procedure {} is active, collecting lists until {}",
            self.procedure.id,
            self.procedure.ends_at
        );
        Ok(())
    }

    fn while_active(&self) -> EngineResult<()> {
        match self.run_state() {
            RunState::Running => {}
            RunState::Scheduled => {
                *self.state.lock().unwrap() = RunState::Running;
            }
            RunState::Done => return Ok(()),
        }
        // While the window is open the lottery only collects; ticks are
        // deliberate no-ops. The draw belongs to the moment the window
        // closes.
        if self.procedure.window_closed_at(Utc::now()) {
            self.run_draw_once()?;
        }
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
        // Termination can arrive without a closing tick in between; the
        // draw still has to happen exactly once.
        self.run_draw_once()?;
        let expired = self.expire_pending()?;
        log::info!(
            "lottery procedure {} terminated; {expired} list(s) expired unserved",
            self.procedure.id
        );
        Ok(())
    }
}
