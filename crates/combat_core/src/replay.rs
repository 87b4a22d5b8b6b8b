//! Replay recording.
//!
//! Every externally observable request made of the controller becomes one
//! [`ReplayAction`]. The seed, a baseline state and the ordered actions are
//! enough to reproduce every state hash of the original session.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::engine::ActionChoice;
use crate::provenance::DeltaKey;
use crate::snapshot::{Combatant, Environment};
use crate::world::GameState;

pub const ACTION_ENCOUNTER: &str = "encounter";
pub const ACTION_ROUND: &str = "round";
pub const ACTION_STORY: &str = "story";
pub const ACTION_TICK: &str = "tick";

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("action seq {found} does not follow seq {previous}")]
    NonMonotonic { previous: u64, found: u64 },
    #[error("payload of '{kind}' action is not a JSON object")]
    PayloadNotObject { kind: String },
    #[error("payload of '{kind}' action could not be encoded")]
    Encode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown action type '{0}'")]
    UnknownAction(String),
    #[error("replay log has no baseline state")]
    MissingBaseline,
}

/// One recorded request. Immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayAction {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub delta_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncounterPayload {
    pub monsters: Vec<Combatant>,
    #[serde(default)]
    pub env: Environment,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundPayload {
    #[serde(default)]
    pub action: ActionChoice,
    #[serde(default)]
    pub enable_realm_suppression: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickPayload {}

#[derive(Clone, Debug)]
pub struct ReplayRecorder {
    baseline: GameState,
    actions: Vec<ReplayAction>,
}

impl ReplayRecorder {
    /// Start recording on top of `baseline`, the state replays restore first.
    pub fn new(baseline: GameState) -> Self {
        Self {
            baseline,
            actions: Vec::new(),
        }
    }

    pub fn record<P: Serialize>(
        &mut self,
        kind: &str,
        payload: &P,
        key: &DeltaKey,
    ) -> Result<&ReplayAction, ReplayError> {
        let payload = serde_json::to_value(payload).map_err(|source| ReplayError::Encode {
            kind: kind.to_string(),
            source,
        })?;
        if !payload.is_object() {
            return Err(ReplayError::PayloadNotObject {
                kind: kind.to_string(),
            });
        }
        let seq = self.actions.len() as u64 + 1;
        self.actions.push(ReplayAction {
            seq,
            kind: kind.to_string(),
            payload,
            delta_key: key.to_string(),
        });
        Ok(&self.actions[self.actions.len() - 1])
    }

    pub fn actions(&self) -> &[ReplayAction] {
        &self.actions
    }

    pub fn finish(self) -> ReplayLog {
        ReplayLog {
            seed: self.baseline.seed,
            baseline: Some(self.baseline),
            actions: self.actions,
        }
    }
}

/// Persisted, replayable session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayLog {
    pub seed: u32,
    #[serde(default)]
    pub baseline: Option<GameState>,
    #[serde(default)]
    pub actions: Vec<ReplayAction>,
}

impl ReplayLog {
    pub fn baseline(&self) -> Result<&GameState, ReplayError> {
        self.baseline.as_ref().ok_or(ReplayError::MissingBaseline)
    }

    /// Check the structural invariants: a baseline, 1-based contiguous
    /// sequence numbers, object payloads.
    pub fn validate(&self) -> Result<(), ReplayError> {
        self.baseline()?;
        let mut previous = 0;
        for action in &self.actions {
            if action.seq != previous + 1 {
                return Err(ReplayError::NonMonotonic {
                    previous,
                    found: action.seq,
                });
            }
            if !action.payload.is_object() {
                return Err(ReplayError::PayloadNotObject {
                    kind: action.kind.clone(),
                });
            }
            previous = action.seq;
        }
        Ok(())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open replay log {:?}", path))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to read replay log {:?}", path))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let log: Self = serde_json::from_reader(reader).context("invalid replay log json")?;
        log.validate()?;
        Ok(log)
    }

    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{DeltaKind, SeqCounters};
    use serde_json::json;

    fn recorder() -> ReplayRecorder {
        let state = GameState::new(9, Combatant::new("hero", 100, 10.0)).unwrap();
        ReplayRecorder::new(state)
    }

    #[test]
    fn sequence_numbers_start_at_one() {
        let mut seq = SeqCounters::default();
        let mut recorder = recorder();
        let key = seq.issue(DeltaKind::Time);
        let first = recorder.record(ACTION_TICK, &TickPayload {}, &key).unwrap().seq;
        let key = seq.issue(DeltaKind::Time);
        let second = recorder.record(ACTION_TICK, &TickPayload {}, &key).unwrap().seq;
        assert_eq!((first, second), (1, 2));
        assert_eq!(recorder.actions()[1].delta_key, "time:2");
        assert_eq!(recorder.actions()[0].payload, json!({}));
    }

    #[test]
    fn scalar_payloads_are_refused() {
        let mut seq = SeqCounters::default();
        let mut recorder = recorder();
        let err = recorder
            .record(ACTION_STORY, &5, &seq.issue(DeltaKind::Story))
            .unwrap_err();
        assert!(matches!(err, ReplayError::PayloadNotObject { .. }));
        assert!(recorder.actions().is_empty());
    }

    #[test]
    fn gaps_in_sequence_fail_validation() {
        let mut log = recorder().finish();
        log.actions.push(ReplayAction {
            seq: 2,
            kind: ACTION_TICK.to_string(),
            payload: json!({}),
            delta_key: "time:1".to_string(),
        });
        assert!(matches!(
            log.validate(),
            Err(ReplayError::NonMonotonic { previous: 0, found: 2 })
        ));
    }

    #[test]
    fn log_round_trips_through_reader() {
        let mut seq = SeqCounters::default();
        let mut recorder = recorder();
        let payload = RoundPayload {
            action: ActionChoice::NamedSkill("ember".to_string()),
            enable_realm_suppression: true,
        };
        recorder
            .record(ACTION_ROUND, &payload, &seq.issue(DeltaKind::Combat))
            .unwrap();
        let log = recorder.finish();
        let text = serde_json::to_string(&log).unwrap();
        let back = ReplayLog::from_reader(text.as_bytes()).unwrap();
        assert_eq!(back, log);
        let decoded: RoundPayload = serde_json::from_value(back.actions[0].payload.clone()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn missing_baseline_is_rejected() {
        let text = r#"{"seed": 3, "actions": []}"#;
        assert!(ReplayLog::from_reader(text.as_bytes()).is_err());
    }
}
