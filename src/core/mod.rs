// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core engine modules.

pub mod allocation;
pub mod config;
pub mod context;
pub mod eligibility;
pub mod engine;
pub mod entity;
pub mod error;
pub mod persistence;
pub mod rule;
pub mod scheduler;
pub mod util;

pub use config::EngineConfig;
pub use context::EngineContext;
pub use engine::RegistrationEngine;
pub use error::{EngineError, EngineResult};
