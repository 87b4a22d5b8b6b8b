use std::fmt;

use serde::{Deserialize, Serialize};

/// Provenance stamp attached to every artifact a rule hook emits.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Trace {
    pub source: String,
    pub rule: String,
}

impl Trace {
    pub fn new<S: Into<String>, R: Into<String>>(source: S, rule: R) -> Self {
        Self {
            source: source.into(),
            rule: rule.into(),
        }
    }
}

/// Family of state transition a provenance key is drawn for. Each family has
/// its own monotonically increasing counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaKind {
    Combat,
    Story,
    World,
    Time,
}

impl DeltaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeltaKind::Combat => "combat",
            DeltaKind::Story => "story",
            DeltaKind::World => "world",
            DeltaKind::Time => "time",
        }
    }
}

/// Unique identifier of one externally visible state transition request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct DeltaKey(String);

impl DeltaKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeltaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<DeltaKey> for String {
    fn from(key: DeltaKey) -> Self {
        key.0
    }
}

/// Per-family sequence counters. Persisted with the game state so that a
/// resumed save keeps issuing fresh keys.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeqCounters {
    #[serde(default)]
    pub combat: u64,
    #[serde(default)]
    pub story: u64,
    #[serde(default)]
    pub world: u64,
    #[serde(default)]
    pub time: u64,
}

impl SeqCounters {
    pub fn issue(&mut self, kind: DeltaKind) -> DeltaKey {
        let counter = match kind {
            DeltaKind::Combat => &mut self.combat,
            DeltaKind::Story => &mut self.story,
            DeltaKind::World => &mut self.world,
            DeltaKind::Time => &mut self.time,
        };
        *counter += 1;
        DeltaKey(format!("{}:{}", kind.as_str(), counter))
    }
}
