// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timer-driven procedure lifecycle management.
//!
//! ## Overview
//!
//! The [`ProcedureScheduler`] owns a single polling thread. Every tick it
//! compares each stored procedure's state with the state its time window
//! implies and advances forward only, Scheduled to Active to Terminated:
//!
//! * into Active: instantiate the procedure's logic via the registry, run
//!   `before_active` once, then `while_active`,
//! * every further tick spent Active: run `while_active`,
//! * into Terminated: persist the terminal state, run `after_active` once,
//!   deregister the instance.
//!
//! A procedure whose window is already over when it is first seen jumps
//! straight from Scheduled to Terminated; only `after_active` runs for it.
//!
//! Hooks never run on the polling thread. Each procedure's hook work is
//! handed to the shared worker pool, guarded by a per-procedure in-flight
//! flag: while one tick's work is still running, later ticks skip that
//! procedure instead of piling up. Hook errors and panics are contained per
//! procedure, logged with procedure and phase, and stop neither the timer
//! nor the rest of the pass.
//!
//! Procedures whose kind has no registered factory are skipped with a
//! configuration error on every tick until [`set_procedure_logic_registry`]
//! (or a fixed deployment) supplies one.
//!
//! [`set_procedure_logic_registry`]: ProcedureScheduler::set_procedure_logic_registry

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use crossbeam_utils::CachePadded;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::allocation::{ProcedureLogic, ProcedureLogicRegistry};
use crate::core::context::EngineContext;
use crate::core::entity::{Procedure, ProcedureId, ProcedureState};
use crate::core::error::{EngineError, EngineResult};

/// Point-in-time view of the scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerMetricsSnapshot {
    pub ticks: u64,
    pub activated: u64,
    pub terminated: u64,
    pub hook_errors: u64,
    pub skipped_in_flight: u64,
    pub config_errors: u64,
}

#[derive(Debug, Default)]
struct SchedulerMetrics {
    ticks: CachePadded<AtomicU64>,
    activated: CachePadded<AtomicU64>,
    terminated: CachePadded<AtomicU64>,
    hook_errors: CachePadded<AtomicU64>,
    skipped_in_flight: CachePadded<AtomicU64>,
    config_errors: CachePadded<AtomicU64>,
}

impl SchedulerMetrics {
    fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            activated: self.activated.load(Ordering::Relaxed),
            terminated: self.terminated.load(Ordering::Relaxed),
            hook_errors: self.hook_errors.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped_in_flight.load(Ordering::Relaxed),
            config_errors: self.config_errors.load(Ordering::Relaxed),
        }
    }
}

/// Live bookkeeping for one managed procedure.
#[derive(Debug, Clone)]
struct ActiveEntry {
    logic: Arc<dyn ProcedureLogic>,
    /// Set while a worker is running this procedure's hooks.
    in_flight: Arc<AtomicBool>,
    /// `before_active` has been issued for this instance.
    before_done: Arc<AtomicBool>,
    /// `after_active` has been issued for this instance.
    after_done: Arc<AtomicBool>,
}

impl ActiveEntry {
    fn new(logic: Arc<dyn ProcedureLogic>) -> Self {
        Self {
            logic,
            in_flight: Arc::new(AtomicBool::new(false)),
            before_done: Arc::new(AtomicBool::new(false)),
            after_done: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Clears the in-flight flag when the job ends, panics included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct SchedulerInner {
    ctx: Arc<EngineContext>,
    executor: Arc<crate::core::util::executor::ExecutorService>,
    registry: RwLock<Arc<ProcedureLogicRegistry>>,
    interval: Mutex<Duration>,
    running: AtomicBool,
    stop_tx: Mutex<Option<Sender<()>>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    active: DashMap<ProcedureId, ActiveEntry>,
    metrics: SchedulerMetrics,
}

#[derive(Debug)]
pub struct ProcedureScheduler {
    inner: Arc<SchedulerInner>,
}

impl ProcedureScheduler {
    pub fn new(
        ctx: Arc<EngineContext>,
        registry: ProcedureLogicRegistry,
        executor: Arc<crate::core::util::executor::ExecutorService>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                ctx,
                executor,
                registry: RwLock::new(Arc::new(registry)),
                interval: Mutex::new(tick_interval),
                running: AtomicBool::new(false),
                stop_tx: Mutex::new(None),
                loop_handle: Mutex::new(None),
                active: DashMap::new(),
                metrics: SchedulerMetrics::default(),
            }),
        }
    }

    /// Start the polling thread with the configured interval. Starting an
    /// already running scheduler is a no-op.
    pub fn start_timer(&self) -> EngineResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            log::debug!("scheduler timer already running");
            return Ok(());
        }
        let (tx, rx) = bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("procedure-scheduler".into())
            .spawn(move || {
                log::info!("procedure scheduler started");
                loop {
                    let interval = *inner.interval.lock().unwrap();
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => drive(&inner, Utc::now(), false),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("procedure scheduler stopped");
            });
        match spawned {
            Ok(handle) => {
                *self.inner.stop_tx.lock().unwrap() = Some(tx);
                *self.inner.loop_handle.lock().unwrap() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                Err(EngineError::runtime(format!(
                    "failed to spawn scheduler thread: {e}"
                )))
            }
        }
    }

    /// Set the interval, then start.
    pub fn start_timer_with_interval(&self, interval: Duration) -> EngineResult<()> {
        self.set_timer_interval(interval)?;
        self.start_timer()
    }

    /// Stop the polling thread and wait for it to exit. Hook jobs already
    /// handed to the worker pool keep running.
    pub fn stop_timer(&self) {
        if let Some(tx) = self.inner.stop_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.inner.loop_handle.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("scheduler thread terminated abnormally");
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Change the polling interval. Takes effect from the next tick.
    pub fn set_timer_interval(&self, interval: Duration) -> EngineResult<()> {
        if interval.is_zero() {
            return Err(EngineError::validation("timer interval must be non-zero"));
        }
        *self.inner.interval.lock().unwrap() = interval;
        Ok(())
    }

    pub fn timer_interval(&self) -> Duration {
        *self.inner.interval.lock().unwrap()
    }

    /// Whether the polling thread is running.
    pub fn is_checking_for_procedure_states(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Swap the logic registry. Procedures activated from now on use the new
    /// mapping; instances already live keep the logic they were built with.
    pub fn set_procedure_logic_registry(&self, registry: ProcedureLogicRegistry) {
        *self.inner.registry.write().unwrap() = Arc::new(registry);
        log::info!("procedure logic registry replaced");
    }

    /// The live logic instance for a procedure, while it has one.
    pub fn find_active_logic_by_procedure(
        &self,
        id: ProcedureId,
    ) -> Option<Arc<dyn ProcedureLogic>> {
        self.inner.active.get(&id).map(|e| Arc::clone(&e.logic))
    }

    /// Ids of all procedures with live logic instances.
    pub fn active_procedures(&self) -> Vec<ProcedureId> {
        let mut ids: Vec<ProcedureId> = self.inner.active.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn metrics(&self) -> SchedulerMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Run one full polling pass on the calling thread, hooks included.
    /// This is how embedders without the timer (and the test suites) drive
    /// the lifecycle deterministically.
    pub fn tick_now(&self) {
        drive(&self.inner, Utc::now(), true);
    }
}

impl Drop for ProcedureScheduler {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

/// One polling pass at `now`. With `inline` set the hook work runs on the
/// calling thread instead of the worker pool.
fn drive(inner: &Arc<SchedulerInner>, now: DateTime<Utc>, inline: bool) {
    inner.metrics.ticks.fetch_add(1, Ordering::Relaxed);
    let procedures = match inner.ctx.store.procedures.all() {
        Ok(procedures) => procedures,
        Err(e) => {
            log::error!("scheduler tick aborted, procedure scan failed: {e}");
            return;
        }
    };
    for procedure in procedures {
        if procedure.state == ProcedureState::Terminated {
            continue;
        }
        match procedure.lifecycle_at(now) {
            ProcedureState::Scheduled => {}
            ProcedureState::Active => dispatch(inner, procedure, false, inline),
            ProcedureState::Terminated => dispatch(inner, procedure, true, inline),
        }
    }
}

/// Look up or create the live entry for `procedure`. The entry slot is held
/// across creation so concurrent passes can never build two instances for
/// the same procedure.
fn ensure_entry(inner: &Arc<SchedulerInner>, procedure: &Procedure) -> Option<ActiveEntry> {
    match inner.active.entry(procedure.id) {
        Entry::Occupied(live) => Some(live.get().clone()),
        Entry::Vacant(slot) => {
            let registry = Arc::clone(&inner.registry.read().unwrap());
            match registry.create_for(procedure, Arc::clone(&inner.ctx)) {
                Ok(logic) => {
                    let entry = ActiveEntry::new(logic);
                    slot.insert(entry.clone());
                    Some(entry)
                }
                Err(e) => {
                    inner.metrics.config_errors.fetch_add(1, Ordering::Relaxed);
                    log::error!("procedure {} skipped this tick: {e}", procedure.id);
                    None
                }
            }
        }
    }
}

fn dispatch(inner: &Arc<SchedulerInner>, procedure: Procedure, terminate: bool, inline: bool) {
    let entry = match ensure_entry(inner, &procedure) {
        Some(entry) => entry,
        None => return,
    };
    if entry
        .in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        inner.metrics.skipped_in_flight.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "procedure {}: previous tick still in flight, skipping",
            procedure.id
        );
        return;
    }

    let work_inner = Arc::clone(inner);
    let work_entry = entry.clone();
    let work = move || {
        let _guard = InFlightGuard(Arc::clone(&work_entry.in_flight));
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            run_phase(&work_inner, &procedure, &work_entry, terminate)
        }));
        if let Err(panic) = outcome {
            work_inner.metrics.hook_errors.fetch_add(1, Ordering::Relaxed);
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            log::error!("procedure {} hook panicked: {message}", procedure.id);
            if terminate {
                // The terminal state is already persisted; the instance must
                // still deregister even though `after_active` blew up.
                work_inner.active.remove(&procedure.id);
            }
        }
    };

    if inline {
        work();
        return;
    }
    let accepted = inner.executor.execute(work);
    if !accepted {
        // Pool is shutting down; free the flag so a later start can retry.
        entry.in_flight.store(false, Ordering::SeqCst);
    }
}

fn run_phase(inner: &SchedulerInner, procedure: &Procedure, entry: &ActiveEntry, terminate: bool) {
    if terminate {
        if entry.after_done.swap(true, Ordering::SeqCst) {
            return;
        }
        persist_state(inner, procedure.id, ProcedureState::Terminated);
        run_hook(inner, procedure.id, "after_active", || {
            entry.logic.after_active()
        });
        inner.active.remove(&procedure.id);
        inner.metrics.terminated.fetch_add(1, Ordering::Relaxed);
        log::info!("procedure {} terminated and deregistered", procedure.id);
    } else {
        if !entry.before_done.swap(true, Ordering::SeqCst) {
            persist_state(inner, procedure.id, ProcedureState::Active);
            inner.metrics.activated.fetch_add(1, Ordering::Relaxed);
            run_hook(inner, procedure.id, "before_active", || {
                entry.logic.before_active()
            });
        }
        run_hook(inner, procedure.id, "while_active", || {
            entry.logic.while_active()
        });
    }
}

/// Advance the stored state, re-reading the row so concurrent admin edits to
/// other fields survive.
fn persist_state(inner: &SchedulerInner, id: ProcedureId, state: ProcedureState) {
    let mut stored = match inner.ctx.store.procedures.find(id) {
        Ok(Some(procedure)) => procedure,
        Ok(None) => {
            log::warn!("procedure {id} vanished before reaching state '{state}'");
            return;
        }
        Err(e) => {
            log::error!("could not load procedure {id} to persist '{state}': {e}");
            return;
        }
    };
    if stored.advance_state(state) {
        if let Err(e) = inner.ctx.store.procedures.save(stored) {
            log::error!("could not persist state '{state}' of procedure {id}: {e}");
        }
    }
}

/// Hook errors are contained here: counted, logged with procedure and phase,
/// never propagated into the timer.
fn run_hook<F>(inner: &SchedulerInner, procedure: ProcedureId, phase: &'static str, hook: F)
where
    F: FnOnce() -> EngineResult<()>,
{
    if let Err(e) = hook() {
        inner.metrics.hook_errors.fetch_add(1, Ordering::Relaxed);
        let boundary = EngineError::hook(procedure, phase, e.to_string());
        log::error!("{boundary}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::allocation::{ProcedureLogicFactory, RunState};
    use crate::core::entity::{CampaignId, ProcedureKind, TenantId};
    use crate::core::util::executor::ExecutorService;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Default)]
    struct Probe {
        before: AtomicU32,
        while_ticks: AtomicU32,
        after: AtomicU32,
    }

    #[derive(Debug)]
    struct ProbeLogic {
        id: ProcedureId,
        probe: Arc<Probe>,
        fail_while: bool,
        state: Mutex<RunState>,
    }

    impl ProcedureLogic for ProbeLogic {
        fn procedure_id(&self) -> ProcedureId {
            self.id
        }

        fn kind(&self) -> ProcedureKind {
            ProcedureKind::Fifo
        }

        fn run_state(&self) -> RunState {
            *self.state.lock().unwrap()
        }

        fn before_active(&self) -> EngineResult<()> {
            self.probe.before.fetch_add(1, Ordering::SeqCst);
            *self.state.lock().unwrap() = RunState::Running;
            Ok(())
        }

        fn while_active(&self) -> EngineResult<()> {
            self.probe.while_ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail_while {
                return Err(EngineError::runtime("probe hook failure"));
            }
            Ok(())
        }

        fn after_active(&self) -> EngineResult<()> {
            self.probe.after.fetch_add(1, Ordering::SeqCst);
            *self.state.lock().unwrap() = RunState::Done;
            Ok(())
        }
    }

    #[derive(Debug, Clone)]
    struct ProbeFactory {
        probe: Arc<Probe>,
        fail_while: bool,
    }

    impl ProcedureLogicFactory for ProbeFactory {
        fn kind(&self) -> ProcedureKind {
            ProcedureKind::Fifo
        }

        fn create(
            &self,
            procedure: &Procedure,
            _ctx: Arc<EngineContext>,
        ) -> Arc<dyn ProcedureLogic> {
            Arc::new(ProbeLogic {
                id: procedure.id,
                probe: Arc::clone(&self.probe),
                fail_while: self.fail_while,
                state: Mutex::new(RunState::Scheduled),
            })
        }

        fn clone_box(&self) -> Box<dyn ProcedureLogicFactory> {
            Box::new(self.clone())
        }
    }

    struct Harness {
        ctx: Arc<EngineContext>,
        scheduler: ProcedureScheduler,
        probe: Arc<Probe>,
    }

    fn harness(fail_while: bool) -> Harness {
        let ctx = EngineContext::in_memory();
        let probe = Arc::new(Probe::default());
        let mut registry = ProcedureLogicRegistry::new();
        registry.register(Box::new(ProbeFactory {
            probe: Arc::clone(&probe),
            fail_while,
        }));
        let scheduler = ProcedureScheduler::new(
            Arc::clone(&ctx),
            registry,
            Arc::new(ExecutorService::new(2)),
            Duration::from_millis(50),
        );
        Harness {
            ctx,
            scheduler,
            probe,
        }
    }

    fn save_procedure(ctx: &EngineContext, id: u64, start_ms: i64, end_ms: i64) -> Procedure {
        let now = Utc::now();
        let procedure = Procedure::new(
            ProcedureId::new(id),
            TenantId::new(1),
            CampaignId::new(1),
            ProcedureKind::Fifo,
            "probe",
            now + ChronoDuration::milliseconds(start_ms),
            now + ChronoDuration::milliseconds(end_ms),
            1,
            5,
        );
        ctx.store.procedures.save(procedure.clone()).unwrap();
        procedure
    }

    #[test]
    fn scheduled_procedures_are_left_alone() {
        let h = harness(false);
        save_procedure(&h.ctx, 1, 60_000, 120_000);
        h.scheduler.tick_now();
        assert_eq!(h.probe.before.load(Ordering::SeqCst), 0);
        assert!(h
            .scheduler
            .find_active_logic_by_procedure(ProcedureId::new(1))
            .is_none());
        let stored = h.ctx.store.procedures.find(ProcedureId::new(1)).unwrap().unwrap();
        assert_eq!(stored.state, ProcedureState::Scheduled);
    }

    #[test]
    fn activation_runs_before_once_then_while_every_tick() {
        let h = harness(false);
        save_procedure(&h.ctx, 1, -1_000, 60_000);

        h.scheduler.tick_now();
        assert_eq!(h.probe.before.load(Ordering::SeqCst), 1);
        assert_eq!(h.probe.while_ticks.load(Ordering::SeqCst), 1);

        h.scheduler.tick_now();
        h.scheduler.tick_now();
        assert_eq!(h.probe.before.load(Ordering::SeqCst), 1);
        assert_eq!(h.probe.while_ticks.load(Ordering::SeqCst), 3);

        let stored = h.ctx.store.procedures.find(ProcedureId::new(1)).unwrap().unwrap();
        assert_eq!(stored.state, ProcedureState::Active);
        assert!(h
            .scheduler
            .find_active_logic_by_procedure(ProcedureId::new(1))
            .is_some());
    }

    #[test]
    fn termination_runs_after_once_and_deregisters() {
        let h = harness(false);
        save_procedure(&h.ctx, 1, -2_000, 60_000);
        h.scheduler.tick_now();
        assert_eq!(h.probe.while_ticks.load(Ordering::SeqCst), 1);

        // Window over: rewrite the procedure with an end in the past.
        save_procedure(&h.ctx, 1, -2_000, -1);
        h.scheduler.tick_now();
        assert_eq!(h.probe.after.load(Ordering::SeqCst), 1);
        assert!(h
            .scheduler
            .find_active_logic_by_procedure(ProcedureId::new(1))
            .is_none());
        let stored = h.ctx.store.procedures.find(ProcedureId::new(1)).unwrap().unwrap();
        assert_eq!(stored.state, ProcedureState::Terminated);

        // Ticks after termination change nothing.
        h.scheduler.tick_now();
        assert_eq!(h.probe.after.load(Ordering::SeqCst), 1);
        assert_eq!(h.probe.while_ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missed_window_jumps_straight_to_terminated() {
        let h = harness(false);
        save_procedure(&h.ctx, 1, -10_000, -5_000);
        h.scheduler.tick_now();

        assert_eq!(h.probe.before.load(Ordering::SeqCst), 0);
        assert_eq!(h.probe.while_ticks.load(Ordering::SeqCst), 0);
        assert_eq!(h.probe.after.load(Ordering::SeqCst), 1);
        let stored = h.ctx.store.procedures.find(ProcedureId::new(1)).unwrap().unwrap();
        assert_eq!(stored.state, ProcedureState::Terminated);
    }

    #[test]
    fn hook_errors_are_counted_and_do_not_stop_ticking() {
        let h = harness(true);
        save_procedure(&h.ctx, 1, -1_000, 60_000);
        h.scheduler.tick_now();
        h.scheduler.tick_now();
        assert_eq!(h.probe.while_ticks.load(Ordering::SeqCst), 2);
        assert_eq!(h.scheduler.metrics().hook_errors, 2);
    }

    #[derive(Debug)]
    struct PanickyLogic {
        id: ProcedureId,
        probe: Arc<Probe>,
    }

    impl ProcedureLogic for PanickyLogic {
        fn procedure_id(&self) -> ProcedureId {
            self.id
        }

        fn kind(&self) -> ProcedureKind {
            ProcedureKind::Fifo
        }

        fn run_state(&self) -> RunState {
            RunState::Running
        }

        fn before_active(&self) -> EngineResult<()> {
            self.probe.before.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn while_active(&self) -> EngineResult<()> {
            self.probe.while_ticks.fetch_add(1, Ordering::SeqCst);
            panic!("hook exploded");
        }

        fn after_active(&self) -> EngineResult<()> {
            self.probe.after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Clone)]
    struct PanickyFactory {
        probe: Arc<Probe>,
    }

    impl ProcedureLogicFactory for PanickyFactory {
        fn kind(&self) -> ProcedureKind {
            ProcedureKind::Fifo
        }

        fn create(
            &self,
            procedure: &Procedure,
            _ctx: Arc<EngineContext>,
        ) -> Arc<dyn ProcedureLogic> {
            Arc::new(PanickyLogic {
                id: procedure.id,
                probe: Arc::clone(&self.probe),
            })
        }

        fn clone_box(&self) -> Box<dyn ProcedureLogicFactory> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn panicking_hook_does_not_abort_the_pass() {
        let ctx = EngineContext::in_memory();
        let probe = Arc::new(Probe::default());
        let mut registry = ProcedureLogicRegistry::new();
        registry.register(Box::new(PanickyFactory {
            probe: Arc::clone(&probe),
        }));
        let scheduler = ProcedureScheduler::new(
            Arc::clone(&ctx),
            registry,
            Arc::new(ExecutorService::new(2)),
            Duration::from_millis(50),
        );
        save_procedure(&ctx, 1, -1_000, 60_000);
        save_procedure(&ctx, 2, -1_000, 60_000);

        scheduler.tick_now();
        // Both procedures got their tick despite the first one's panic.
        assert_eq!(probe.while_ticks.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.metrics().hook_errors, 2);

        // The pass stays usable afterwards.
        scheduler.tick_now();
        assert_eq!(probe.while_ticks.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.metrics().hook_errors, 4);
    }

    #[test]
    fn unknown_kind_is_skipped_until_a_registry_supplies_it() {
        let h = harness(false);
        // Replace the registry with an empty one.
        h.scheduler
            .set_procedure_logic_registry(ProcedureLogicRegistry::new());
        save_procedure(&h.ctx, 1, -1_000, 60_000);

        h.scheduler.tick_now();
        assert!(h.scheduler.metrics().config_errors >= 1);
        let stored = h.ctx.store.procedures.find(ProcedureId::new(1)).unwrap().unwrap();
        assert_eq!(stored.state, ProcedureState::Scheduled);

        // Registry arrives; the next tick activates the procedure.
        let mut registry = ProcedureLogicRegistry::new();
        registry.register(Box::new(ProbeFactory {
            probe: Arc::clone(&h.probe),
            fail_while: false,
        }));
        h.scheduler.set_procedure_logic_registry(registry);
        h.scheduler.tick_now();
        assert_eq!(h.probe.before.load(Ordering::SeqCst), 1);
        let stored = h.ctx.store.procedures.find(ProcedureId::new(1)).unwrap().unwrap();
        assert_eq!(stored.state, ProcedureState::Active);
    }

    #[test]
    fn interval_must_be_positive() {
        let h = harness(false);
        assert!(h.scheduler.set_timer_interval(Duration::ZERO).is_err());
        assert!(h
            .scheduler
            .set_timer_interval(Duration::from_millis(10))
            .is_ok());
        assert_eq!(h.scheduler.timer_interval(), Duration::from_millis(10));
    }

    #[test]
    fn timer_flag_tracks_start_and_stop() {
        let h = harness(false);
        assert!(!h.scheduler.is_checking_for_procedure_states());
        h.scheduler.start_timer().unwrap();
        assert!(h.scheduler.is_checking_for_procedure_states());
        // Idempotent start.
        h.scheduler.start_timer().unwrap();
        h.scheduler.stop_timer();
        assert!(!h.scheduler.is_checking_for_procedure_states());
    }
}
