// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registration rules and their evaluator.
//!
//! ## Overview
//!
//! A [`RegistrationRuleSet`] attaches a list of [`Rule`]s to a
//! (campaign, event, tenant) triple. The [`RuleEngine`] answers one question:
//! may this user register for this event in this campaign right now?
//!
//! The engine is deliberately fail-open: an event with no rule set is open to
//! everyone. A rule that cannot be evaluated behaves as a veto for the user
//! being checked, is logged, and never aborts the surrounding pass.
//!
//! Rule kinds are dispatched through an evaluator registry keyed by
//! [`RuleKind`], so embedders can replace a built-in evaluator or tighten its
//! semantics without touching the engine.
//!
//! # Example
//!
//! ```
//! use seatalloc::core::rule::RuleEngine;
//! use seatalloc::core::persistence::PersistenceHandle;
//!
//! let store = PersistenceHandle::in_memory();
//! let _engine = RuleEngine::new(store.rule_sets.clone());
//! // No rule set stored for a triple: fail-open, everyone may register.
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::entity::{CampaignId, Event, EventId, RuleSetId, StudyCourseId, TenantId, User};
use crate::core::error::{EngineError, EngineResult};
use crate::core::persistence::RuleSetRepository;

/// Discriminant of a rule, used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    MinimumTerm,
    StudyCourse,
    AllOf,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::MinimumTerm => "minimum_term",
            RuleKind::StudyCourse => "study_course",
            RuleKind::AllOf => "all_of",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single registration rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Vetoes users whose term is below `min_term`.
    MinimumTerm { min_term: u32 },
    /// Restricts the event to one course of study.
    StudyCourse { study_course: StudyCourseId },
    /// Passes only if every nested rule passes. An empty conjunction passes.
    AllOf { rules: Vec<Rule> },
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::MinimumTerm { .. } => RuleKind::MinimumTerm,
            Rule::StudyCourse { .. } => RuleKind::StudyCourse,
            Rule::AllOf { .. } => RuleKind::AllOf,
        }
    }
}

/// Rules governing one (campaign, event, tenant) triple. All rules must pass
/// for a registration to be permitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRuleSet {
    pub id: RuleSetId,
    pub tenant: TenantId,
    pub campaign_id: CampaignId,
    pub event_id: EventId,
    pub rules: Vec<Rule>,
}

impl RegistrationRuleSet {
    /// A new, not yet persisted set; the repository assigns the real id on
    /// save.
    pub fn new(tenant: TenantId, campaign_id: CampaignId, event_id: EventId, rules: Vec<Rule>) -> Self {
        Self {
            id: RuleSetId::new(0),
            tenant,
            campaign_id,
            event_id,
            rules,
        }
    }
}

/// Everything an evaluator may inspect.
#[derive(Debug)]
pub struct RuleContext<'a> {
    pub user: &'a User,
    pub campaign_id: CampaignId,
    pub event: &'a Event,
}

/// Evaluates one rule kind. `Ok(true)` permits, `Ok(false)` vetoes, `Err`
/// means the rule could not be evaluated at all.
pub trait RuleEvaluator: fmt::Debug + Send + Sync {
    fn kind(&self) -> RuleKind;

    fn evaluate(&self, rule: &Rule, ctx: &RuleContext<'_>, engine: &RuleEngine)
        -> EngineResult<bool>;
}

#[derive(Debug)]
struct MinimumTermEvaluator;

impl RuleEvaluator for MinimumTermEvaluator {
    fn kind(&self) -> RuleKind {
        RuleKind::MinimumTerm
    }

    fn evaluate(
        &self,
        rule: &Rule,
        ctx: &RuleContext<'_>,
        _engine: &RuleEngine,
    ) -> EngineResult<bool> {
        match rule {
            // Vetoes exactly when the requirement exceeds the user's term;
            // a user in term N passes `min_term = N`.
            Rule::MinimumTerm { min_term } => Ok(ctx.user.term >= *min_term),
            other => Err(mismatched(self.kind(), other)),
        }
    }
}

#[derive(Debug)]
struct StudyCourseEvaluator;

impl RuleEvaluator for StudyCourseEvaluator {
    fn kind(&self) -> RuleKind {
        RuleKind::StudyCourse
    }

    fn evaluate(
        &self,
        rule: &Rule,
        ctx: &RuleContext<'_>,
        _engine: &RuleEngine,
    ) -> EngineResult<bool> {
        match rule {
            Rule::StudyCourse { study_course } => Ok(ctx.user.study_course == *study_course),
            other => Err(mismatched(self.kind(), other)),
        }
    }
}

#[derive(Debug)]
struct ConjunctionEvaluator;

impl RuleEvaluator for ConjunctionEvaluator {
    fn kind(&self) -> RuleKind {
        RuleKind::AllOf
    }

    fn evaluate(
        &self,
        rule: &Rule,
        ctx: &RuleContext<'_>,
        engine: &RuleEngine,
    ) -> EngineResult<bool> {
        match rule {
            Rule::AllOf { rules } => {
                for nested in rules {
                    if !engine.evaluate_rule(nested, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            other => Err(mismatched(self.kind(), other)),
        }
    }
}

fn mismatched(expected: RuleKind, got: &Rule) -> EngineError {
    EngineError::rule(
        format!("evaluator for '{expected}' received a '{}' rule", got.kind()),
        expected.as_str(),
    )
}

type EvaluatorCtor = fn() -> Box<dyn RuleEvaluator>;

static BUILTIN_EVALUATORS: Lazy<Vec<EvaluatorCtor>> = Lazy::new(|| {
    vec![
        || Box::new(MinimumTermEvaluator) as Box<dyn RuleEvaluator>,
        || Box::new(StudyCourseEvaluator) as Box<dyn RuleEvaluator>,
        || Box::new(ConjunctionEvaluator) as Box<dyn RuleEvaluator>,
    ]
});

/// Evaluates rule sets against users.
#[derive(Debug)]
pub struct RuleEngine {
    rule_sets: Arc<dyn RuleSetRepository>,
    evaluators: HashMap<RuleKind, Box<dyn RuleEvaluator>>,
}

impl RuleEngine {
    /// Engine with all built-in evaluators registered.
    pub fn new(rule_sets: Arc<dyn RuleSetRepository>) -> Self {
        let mut engine = Self {
            rule_sets,
            evaluators: HashMap::new(),
        };
        for ctor in BUILTIN_EVALUATORS.iter() {
            engine.register_evaluator(ctor());
        }
        engine
    }

    /// Register or replace the evaluator for its kind.
    pub fn register_evaluator(&mut self, evaluator: Box<dyn RuleEvaluator>) {
        self.evaluators.insert(evaluator.kind(), evaluator);
    }

    pub fn has_evaluator(&self, kind: RuleKind) -> bool {
        self.evaluators.contains_key(&kind)
    }

    /// Evaluate one rule. `Err` here means the rule itself was unusable; the
    /// permission surfaces translate that into a veto.
    pub fn evaluate_rule(&self, rule: &Rule, ctx: &RuleContext<'_>) -> EngineResult<bool> {
        match self.evaluators.get(&rule.kind()) {
            Some(evaluator) => evaluator.evaluate(rule, ctx, self),
            None => Err(EngineError::rule(
                "no evaluator registered",
                rule.kind().as_str(),
            )),
        }
    }

    /// Checked permission query. Storage failures propagate; rules that fail
    /// to evaluate veto the user and are logged, without aborting the caller.
    pub fn check_registration(
        &self,
        user: &User,
        campaign_id: CampaignId,
        event: &Event,
    ) -> EngineResult<bool> {
        let set = self
            .rule_sets
            .find_for(campaign_id, event.id, event.tenant)?;
        let set = match set {
            Some(set) => set,
            // No rule set: the event is open.
            None => return Ok(true),
        };
        let ctx = RuleContext {
            user,
            campaign_id,
            event,
        };
        for rule in &set.rules {
            match self.evaluate_rule(rule, &ctx) {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(e) => {
                    log::warn!(
                        "rule '{}' of set {} failed for user {} on event {}: {e}; treating as veto",
                        rule.kind(),
                        set.id,
                        user.id,
                        event.id
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Boolean permission surface used by the allocators and the filter.
    /// Never errors: storage failures deny and are logged.
    pub fn is_registration_allowed(&self, user: &User, campaign_id: CampaignId, event: &Event) -> bool {
        match self.check_registration(user, campaign_id, event) {
            Ok(allowed) => allowed,
            Err(e) => {
                log::error!(
                    "rule lookup failed for user {} on event {}: {e}; denying",
                    user.id,
                    event.id
                );
                false
            }
        }
    }
}
