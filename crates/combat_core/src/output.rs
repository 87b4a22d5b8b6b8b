use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::delta::RoundDelta;
use crate::provenance::Trace;
use crate::snapshot::CombatSnapshot;
use crate::status::StatusChange;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Damage,
    Heal,
    Status,
    Action,
    System,
    Rule,
}

/// One line of the combat log.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub tag: String,
    pub text: String,
    pub round: u32,
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    #[serde(rename = "_trace")]
    pub trace: Option<Trace>,
}

impl LogEntry {
    pub fn new<T: Into<String>, X: Into<String>>(kind: LogKind, tag: T, text: X, round: u32) -> Self {
        Self {
            kind,
            tag: tag.into(),
            text: text.into(),
            round,
            source_id: None,
            target_id: None,
            meta: BTreeMap::new(),
            trace: None,
        }
    }

    pub fn between(mut self, source: &str, target: &str) -> Self {
        self.source_id = Some(source.to_string());
        self.target_id = Some(target.to_string());
        self
    }

    pub fn with_meta<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Request to mutate persistent state outside the encounter, applied by the
/// caller at the state-application boundary.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    pub target: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    pub delta_key: Option<String>,
    #[serde(rename = "_trace")]
    pub trace: Option<Trace>,
}

impl Effect {
    pub fn new<T: Into<String>, K: Into<String>>(target: T, kind: K, value: f64) -> Self {
        Self {
            target: target.into(),
            kind: kind.into(),
            value,
            meta: BTreeMap::new(),
            delta_key: None,
            trace: None,
        }
    }

    pub fn external(mut self) -> Self {
        self.meta.insert("external".to_string(), Value::Bool(true));
        self
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundResult {
    Win,
    Lose,
    Draw,
}

impl RoundResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RoundResult::Draw)
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputMeta {
    pub source: String,
    pub delta_key: Option<String>,
    pub engine: String,
    pub round: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rng_draws: Vec<String>,
}

/// Everything one round produced. Persistent state may only change through
/// `delta` and `effects`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundOutput {
    pub result: RoundResult,
    pub delta: RoundDelta,
    pub logs: Vec<LogEntry>,
    pub effects: Vec<Effect>,
    pub status_changes: Vec<StatusChange>,
    pub flags: BTreeMap<String, Value>,
    pub meta: OutputMeta,
    pub next_snapshot: CombatSnapshot,
}

impl RoundOutput {
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).and_then(Value::as_bool).unwrap_or(false)
    }
}
