//! Caller-supplied rule hooks and the pipeline that invokes them.
//!
//! The engine calls at most one hook per [`HookName`] at each fixed call site.
//! A missing hook and a hook returning `Ok(None)` both decline to participate,
//! which leaves every multiplier at its identity. A hook returning `Err` is
//! contained here: the round keeps going with a single diagnostic log line and
//! a `ruleError` flag in place of the hook's contribution.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::warn;

use crate::output::{Effect, LogEntry, LogKind};
use crate::provenance::Trace;
use crate::snapshot::{CombatSnapshot, Combatant};
use crate::status::StatusChange;

pub const FLAG_RULE_ERROR: &str = "ruleError";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rule hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new<M: Into<String>>(message: M) -> Self {
        Self(message.into())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookName {
    Realm,
    Skill,
    Status,
    Ai,
}

impl HookName {
    pub fn as_str(self) -> &'static str {
        match self {
            HookName::Realm => "realm",
            HookName::Skill => "skill",
            HookName::Status => "status",
            HookName::Ai => "ai",
        }
    }
}

/// Call site a hook is being invoked from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HookPhase {
    Suppression,
    PlayerStatus,
    SkillCost,
    OnHit { damage: i64 },
    MonsterStatus,
    MonsterDecision,
}

/// Read-only view handed to a hook.
#[derive(Clone, Copy, Debug)]
pub struct HookInput<'a> {
    pub phase: HookPhase,
    pub round: u32,
    pub actor: &'a Combatant,
    pub target: Option<&'a Combatant>,
    pub snapshot: &'a CombatSnapshot,
    pub skill_id: Option<&'a str>,
}

/// Monster action chosen by the `ai` hook.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AiDecision {
    #[default]
    Basic,
    Defend,
    SwitchTarget,
    Skill,
}

/// Contribution of one hook call.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleResult {
    pub damage_mult: Option<f64>,
    pub taken_mult: Option<f64>,
    pub mp_cost_mult: Option<f64>,
    pub flat_damage: Option<f64>,
    pub decision: Option<AiDecision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_changes: Vec<StatusChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, Value>,
    #[serde(rename = "_trace")]
    pub trace: Option<Trace>,
}

pub type HookFn =
    dyn Fn(&HookInput<'_>) -> Result<Option<RuleResult>, HookError> + Send + Sync + 'static;

/// A named hook. The name becomes the `rule` half of the provenance trace.
#[derive(Clone)]
pub struct Hook {
    name: String,
    call: Arc<HookFn>,
}

impl Hook {
    pub fn new<N, F>(name: N, call: F) -> Self
    where
        N: Into<String>,
        F: Fn(&HookInput<'_>) -> Result<Option<RuleResult>, HookError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuleHooks {
    pub realm: Option<Hook>,
    pub skill: Option<Hook>,
    pub status: Option<Hook>,
    pub ai: Option<Hook>,
}

impl RuleHooks {
    pub fn get(&self, name: HookName) -> Option<&Hook> {
        match name {
            HookName::Realm => self.realm.as_ref(),
            HookName::Skill => self.skill.as_ref(),
            HookName::Status => self.status.as_ref(),
            HookName::Ai => self.ai.as_ref(),
        }
    }
}

/// Invoke the hook registered under `name`, if any. Errors never escape.
pub fn call_rule(hooks: &RuleHooks, name: HookName, input: &HookInput<'_>) -> Option<RuleResult> {
    let hook = hooks.get(name)?;
    let trace = Trace::new(name.as_str(), hook.name());
    match (hook.call)(input) {
        Ok(Some(mut result)) => {
            if result.trace.is_none() {
                result.trace = Some(trace);
            }
            Some(result)
        }
        Ok(None) => None,
        Err(err) => {
            warn!(hook = name.as_str(), rule = hook.name(), %err, "rule hook failed; using identity");
            let mut flags = BTreeMap::new();
            flags.insert(FLAG_RULE_ERROR.to_string(), Value::Bool(true));
            let log = LogEntry::new(
                LogKind::Rule,
                "rule_error",
                format!("{} hook '{}' failed: {}", name.as_str(), hook.name(), err.0),
                input.round,
            );
            Some(RuleResult {
                logs: vec![log],
                flags,
                trace: Some(trace),
                ..RuleResult::default()
            })
        }
    }
}

/// Multiplier stack accumulated from hook results.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Multipliers {
    pub damage_mult: f64,
    pub taken_mult: f64,
    pub mp_cost_mult: f64,
    pub flat_damage: f64,
}

impl Default for Multipliers {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Multipliers {
    pub const IDENTITY: Multipliers = Multipliers {
        damage_mult: 1.0,
        taken_mult: 1.0,
        mp_cost_mult: 1.0,
        flat_damage: 0.0,
    };

    /// Fold a hook result in. `None` is the identity element.
    pub fn absorb(&mut self, result: Option<&RuleResult>) {
        let Some(result) = result else {
            return;
        };
        if let Some(mult) = result.damage_mult.filter(|v| v.is_finite()) {
            self.damage_mult *= mult;
        }
        if let Some(mult) = result.taken_mult.filter(|v| v.is_finite()) {
            self.taken_mult *= mult;
        }
        if let Some(mult) = result.mp_cost_mult.filter(|v| v.is_finite()) {
            self.mp_cost_mult *= mult;
        }
        if let Some(flat) = result.flat_damage.filter(|v| v.is_finite()) {
            self.flat_damage += flat;
        }
    }
}

/// Round-level accumulators for side artifacts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Artifacts {
    pub logs: Vec<LogEntry>,
    pub status_changes: Vec<StatusChange>,
    pub effects: Vec<Effect>,
    pub flags: BTreeMap<String, Value>,
}

impl Artifacts {
    pub fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    pub fn status(&mut self, change: StatusChange) {
        self.status_changes.push(change);
    }

    pub fn flag<K: Into<String>>(&mut self, key: K, value: Value) {
        self.flags.insert(key.into(), value);
    }
}

/// Move every artifact of `result` into `acc`, stamping each entry with the
/// hook's trace unless it already carries one.
pub fn merge_rule_artifacts(acc: &mut Artifacts, result: Option<&RuleResult>) {
    let Some(result) = result else {
        return;
    };
    let trace = result.trace.as_ref();
    for log in &result.logs {
        let mut log = log.clone();
        if log.trace.is_none() {
            log.trace = trace.cloned();
        }
        acc.logs.push(log);
    }
    for change in &result.status_changes {
        let mut change = change.clone();
        if change.trace.is_none() {
            change.trace = trace.cloned();
        }
        acc.status_changes.push(change);
    }
    for effect in &result.effects {
        let mut effect = effect.clone();
        if effect.trace.is_none() {
            effect.trace = trace.cloned();
        }
        acc.effects.push(effect);
    }
    for (key, value) in &result.flags {
        acc.flags.insert(key.clone(), value.clone());
    }
}
