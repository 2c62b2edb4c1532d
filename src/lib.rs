// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seat allocation engine for course registration campaigns.
//!
//! Students submit ranked priority lists of events during a procedure's
//! submission window; the engine hands out bounded seats either in
//! first-come-first-served order or by lottery once the window closes. A
//! timer-driven scheduler walks every procedure through its lifecycle
//! (scheduled, active, terminated) and runs the matching allocation logic's
//! hooks; pluggable rule sets veto registrations per (campaign, event,
//! tenant).
//!
//! The main modules under [`core`]:
//!
//! - [`core::engine`]: the embedding surface, [`RegistrationEngine`].
//! - [`core::entity`]: users, events, campaigns, procedures, priority lists
//!   and confirmed registrations, all with typed ids.
//! - [`core::persistence`]: repository traits, the in-memory implementations
//!   and bincode snapshots.
//! - [`core::rule`]: the extensible registration rule engine.
//! - [`core::eligibility`]: the event eligibility filter.
//! - [`core::allocation`]: FIFO and lottery procedure logic, the logic
//!   registry and the seat ledger.
//! - [`core::scheduler`]: the timer loop driving procedure lifecycles.
//!
//! Allocation never oversells: seat grants go through an atomic ledger and a
//! unique (user, event) constraint, and every grant or expiry lands in a
//! hash-chained audit log.

pub mod core;

pub use crate::core::config::EngineConfig;
pub use crate::core::engine::RegistrationEngine;
pub use crate::core::error::{EngineError, EngineResult};
pub use crate::core::persistence::PersistenceHandle;
