// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared runtime utilities: the audit trail and the worker pool.

pub mod audit;
pub mod executor;

pub use audit::{AuditAction, AuditLog, AuditRecord};
pub use executor::ExecutorService;
