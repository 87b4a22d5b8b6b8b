use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provenance::SeqCounters;
use crate::rng::{Lcg, RngError, RngState};
use crate::snapshot::{CombatSnapshot, Combatant};

pub const ITEM_TALISMAN: &str = "talisman";
pub const FLAG_LAST_ENCOUNTER: &str = "last_encounter";

/// Slow-moving world descriptors shifted by encounter outcomes and events.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    #[serde(default)]
    pub tendency: f64,
    #[serde(default)]
    pub map_id: String,
    #[serde(default)]
    pub difficulty: u32,
    /// Additive numeric gauges other than the tendency.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryState {
    #[serde(default)]
    pub flags: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Everything that persists between calls. Owned by one controller; the
/// engine only ever sees snapshots derived from it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub seed: u32,
    pub rng: RngState,
    #[serde(default)]
    pub seq: SeqCounters,
    #[serde(default)]
    pub time: u64,
    pub player: Combatant,
    #[serde(default)]
    pub world: WorldState,
    #[serde(default)]
    pub story: StoryState,
    #[serde(default)]
    pub inventory: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<CombatSnapshot>,
}

impl GameState {
    pub fn new(seed: u32, player: Combatant) -> Result<Self, RngError> {
        let rng = Lcg::from_seed(seed)?;
        Ok(Self {
            seed,
            rng: rng.snapshot(),
            seq: SeqCounters::default(),
            time: 0,
            player,
            world: WorldState::default(),
            story: StoryState::default(),
            inventory: BTreeMap::new(),
            encounter: None,
        })
    }

    pub fn item_count(&self, item: &str) -> i64 {
        self.inventory.get(item).copied().unwrap_or(0)
    }

    pub fn in_encounter(&self) -> bool {
        self.encounter.is_some()
    }
}
