// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the allocation engine.
//!
//! Every fallible operation in the crate returns [`EngineResult`]. The
//! variants mirror the failure classes that actually occur at runtime:
//! configuration mistakes, request validation, rule evaluation, stale or
//! missing entity references, storage failures and hook failures raised by
//! procedure logic. Helper constructors keep call sites short.

use thiserror::Error;

use crate::core::entity::ids::ProcedureId;

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Unified error type for the allocation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine or procedure configuration is unusable, e.g. a procedure kind
    /// with no registered logic factory.
    #[error("Configuration error: {message}{}", procedure.map(|p| format!(" (procedure {p})")).unwrap_or_default())]
    Configuration {
        message: String,
        procedure: Option<ProcedureId>,
    },

    /// A caller-supplied request failed validation before it reached storage.
    #[error("Validation error: {message}{}", field.as_ref().map(|f| format!(" (field '{f}')")).unwrap_or_default())]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// A registration rule could not be evaluated. At the permission surface
    /// this is downgraded to a veto; it only propagates as an error from the
    /// internal checked APIs.
    #[error("Rule evaluation error: {message}{}", rule.as_ref().map(|r| format!(" (rule '{r}')")).unwrap_or_default())]
    RuleEvaluation {
        message: String,
        rule: Option<String>,
    },

    /// An entity reference resolved at the start of a unit of work no longer
    /// resolves, even after a fresh fetch.
    #[error("Stale reference: {entity} {id} disappeared mid-operation")]
    StaleReference { entity: &'static str, id: u64 },

    /// An entity that the caller named does not exist at all.
    #[error("Unknown {entity}: {id}")]
    MissingEntity { entity: &'static str, id: u64 },

    /// The storage layer failed.
    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A lifecycle hook raised an error. Produced at the scheduler boundary
    /// so the phase and procedure survive into the log.
    #[error("Hook '{phase}' failed for procedure {procedure}: {message}")]
    Hook {
        procedure: ProcedureId,
        phase: &'static str,
        message: String,
    },

    /// Failures of the runtime plumbing itself (thread spawn, executor
    /// shutdown races) that do not fit a more specific class.
    #[error("Runtime error: {message}")]
    Runtime { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration {
            message: message.into(),
            procedure: None,
        }
    }

    pub fn configuration_for(message: impl Into<String>, procedure: ProcedureId) -> Self {
        EngineError::Configuration {
            message: message.into(),
            procedure: Some(procedure),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn rule_evaluation(message: impl Into<String>) -> Self {
        EngineError::RuleEvaluation {
            message: message.into(),
            rule: None,
        }
    }

    pub fn rule(message: impl Into<String>, rule: impl Into<String>) -> Self {
        EngineError::RuleEvaluation {
            message: message.into(),
            rule: Some(rule.into()),
        }
    }

    pub fn stale_reference(entity: &'static str, id: u64) -> Self {
        EngineError::StaleReference { entity, id }
    }

    pub fn missing(entity: &'static str, id: u64) -> Self {
        EngineError::MissingEntity { entity, id }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        EngineError::Persistence {
            message: message.into(),
            source: None,
        }
    }

    pub fn persistence_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        EngineError::Persistence {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn hook(procedure: ProcedureId, phase: &'static str, message: impl Into<String>) -> Self {
        EngineError::Hook {
            procedure,
            phase,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        EngineError::Runtime {
            message: message.into(),
        }
    }

    /// True for failures that a later tick may clear without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Persistence { .. } | EngineError::Io(_) | EngineError::Runtime { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_display_includes_procedure() {
        let err = EngineError::configuration_for("no logic registered for kind 'lottery'", ProcedureId::new(7));
        let text = err.to_string();
        assert!(text.contains("no logic registered"), "got: {text}");
        assert!(text.contains("procedure 7"), "got: {text}");
    }

    #[test]
    fn validation_display_includes_field() {
        let err = EngineError::validation_field("must not be empty", "items");
        assert_eq!(
            err.to_string(),
            "Validation error: must not be empty (field 'items')"
        );
    }

    #[test]
    fn stale_reference_display() {
        let err = EngineError::stale_reference("event", 42);
        assert_eq!(
            err.to_string(),
            "Stale reference: event 42 disappeared mid-operation"
        );
    }

    #[test]
    fn persistence_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = EngineError::persistence_with("snapshot write failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn retryable_classification() {
        assert!(EngineError::persistence("boom").is_retryable());
        assert!(!EngineError::validation("bad").is_retryable());
        assert!(!EngineError::missing("user", 1).is_retryable());
    }
}
