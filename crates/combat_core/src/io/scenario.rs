use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::rng::seed_from_phrase;
use crate::snapshot::{Combatant, Environment};
use crate::world::GameState;

/// Starting point of a session: the hero, their pack and the foes they may
/// meet.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub seed: Option<u32>,
    #[serde(default)]
    pub seed_phrase: Option<String>,
    pub player: Combatant,
    #[serde(default)]
    pub inventory: BTreeMap<String, i64>,
    pub encounters: Vec<EncounterTemplate>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterTemplate {
    pub monsters: Vec<Combatant>,
    #[serde(default)]
    pub env: Environment,
}

impl Scenario {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open scenario {:?}", path))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let scenario: Self = serde_json::from_reader(reader).context("invalid scenario json")?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.encounters.is_empty(),
            "scenario '{}' defines no encounters",
            self.name
        );
        for (index, encounter) in self.encounters.iter().enumerate() {
            ensure!(
                !encounter.monsters.is_empty(),
                "encounter {} of scenario '{}' has no monsters",
                index,
                self.name
            );
        }
        Ok(())
    }

    /// Seed precedence: explicit override, then `seed`, then `seedPhrase`,
    /// then the scenario name.
    pub fn resolve_seed(&self, seed_override: Option<u32>) -> u32 {
        seed_override
            .or(self.seed)
            .filter(|&seed| seed != 0)
            .unwrap_or_else(|| seed_from_phrase(self.seed_phrase.as_deref().unwrap_or(&self.name)))
    }
}

/// Realise the initial [`GameState`] of a scenario.
pub fn build_state(scenario: &Scenario, seed_override: Option<u32>) -> Result<GameState> {
    let seed = scenario.resolve_seed(seed_override);
    let mut state = GameState::new(seed, scenario.player.clone())?;
    state.inventory = scenario
        .inventory
        .iter()
        .filter(|&(_, &count)| count > 0)
        .map(|(item, &count)| (item.clone(), count))
        .collect();
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const MINIMAL: &str = r#"{
        "name": "cellar",
        "player": {"id": "hero", "hp": 80, "maxHp": 80, "atk": 9},
        "inventory": {"talisman": 1, "ash": 0},
        "encounters": [{"monsters": [{"id": "rat", "hp": 12, "maxHp": 12, "atk": 2}]}]
    }"#;

    #[test]
    fn repository_scenarios_deserialize() {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let dir = manifest_dir.join("../../testdata/scenarios");
        for name in ["ridge_ambush.json", "ember_trial.json"] {
            let path = dir.join(name);
            let scenario = Scenario::load_from_path(&path)
                .unwrap_or_else(|err| panic!("failed to load {:?}: {}", path, err));
            let state = build_state(&scenario, None).unwrap();
            assert_ne!(state.seed, 0);
            assert!(state.player.is_alive(), "scenario {:?} starts dead", path);
        }
    }

    #[test]
    fn empty_stacks_are_not_carried() {
        let scenario = Scenario::from_reader(MINIMAL.as_bytes()).unwrap();
        let state = build_state(&scenario, Some(11)).unwrap();
        assert_eq!(state.seed, 11);
        assert_eq!(state.item_count("talisman"), 1);
        assert!(!state.inventory.contains_key("ash"));
    }

    #[test]
    fn name_seeds_when_nothing_else_does() {
        let scenario = Scenario::from_reader(MINIMAL.as_bytes()).unwrap();
        assert_eq!(scenario.resolve_seed(None), seed_from_phrase("cellar"));
        assert_eq!(scenario.resolve_seed(Some(0)), seed_from_phrase("cellar"));
    }

    #[test]
    fn monsterless_encounter_is_rejected() {
        let text = r#"{
            "name": "void",
            "player": {"id": "hero", "hp": 10, "maxHp": 10},
            "encounters": [{"monsters": []}]
        }"#;
        assert!(Scenario::from_reader(text.as_bytes()).is_err());
    }
}
