//! Result of a narrative event, as handed to the state-application boundary.
//!
//! Event scripts live outside this crate. Whatever they decide, numeric changes
//! to the player arrive as `effects`; only item counts travel in `delta`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::output::{Effect, LogEntry};
use crate::status::StatusChange;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventDelta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inventory_delta: BTreeMap<String, i64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EventFlags {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub story: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub world: BTreeMap<String, Value>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventExport {
    pub event_type: String,
    pub event_id: String,
    pub option_id: Option<String>,
    pub delta_key: Option<String>,
    pub source: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventResult {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub delta: EventDelta,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub status_changes: Vec<StatusChange>,
    #[serde(default)]
    pub flags: EventFlags,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    pub exported: Option<EventExport>,
}

/// Story flag that moves the story onto a named branch.
pub const STORY_BRANCH_FLAG: &str = "branch";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_event_deserializes() {
        let json = r#"{
            "result": "ok",
            "effects": [{"target": "player", "type": "hp", "value": -4, "meta": {"external": true}}],
            "flags": {"story": {"met_hermit": true}},
            "exported": {"eventType": "encounter", "eventId": "hermit"}
        }"#;
        let event: EventResult = serde_json::from_str(json).unwrap();
        assert_eq!(event.effects.len(), 1);
        assert_eq!(event.effects[0].value, -4.0);
        assert!(event.delta.inventory_delta.is_empty());
        assert_eq!(event.flags.story.get("met_hermit"), Some(&Value::Bool(true)));
        assert_eq!(event.exported.map(|e| e.event_id), Some("hermit".to_string()));
    }
}
