use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::damage::{DamageSpec, DamageType};

/// Tunable constants of one engine revision. Every field has a default, so a
/// JSON document only needs the fields it changes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub revision: String,
    /// Player basic attack template.
    pub basic: DamageSpec,
    /// Monster basic attack template.
    pub monster_basic: DamageSpec,
    /// Monster skill template, scaled by `monster_skill_mult`.
    pub monster_skill: DamageSpec,
    pub monster_skill_mult: f64,
    /// Template for standing summoned allies.
    pub summon: DamageSpec,
    /// Mana restored by a basic attack. Fixed, not suppression-scaled.
    pub basic_mp_regen: i64,
    pub burn_fraction: f64,
    pub burn_rounds: u32,
    pub burn_max_stacks: u32,
    pub suppression_slope: f64,
    pub suppression_min: f64,
    pub suppression_max: f64,
    pub guard_factor: f64,
    pub enrage_mult: f64,
    pub elite_mult: f64,
    pub spirit_physical_mult: f64,
    pub drain_fraction: f64,
    pub summon_rounds: u32,
    pub summon_power: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            revision: "baseline".to_string(),
            basic: DamageSpec::new(DamageType::Physical, 0.0).weights(1.0, 0.0, 0.0),
            monster_basic: DamageSpec::new(DamageType::Physical, 0.0).weights(1.0, 0.0, 0.0),
            monster_skill: DamageSpec::new(DamageType::Spell, 0.0).weights(1.0, 0.0, 0.0),
            monster_skill_mult: 1.5,
            summon: DamageSpec::new(DamageType::Technique, 0.0)
                .weights(1.0, 0.0, 0.0)
                .crit(false)
                .dodge(false),
            basic_mp_regen: 5,
            burn_fraction: 0.05,
            burn_rounds: 2,
            burn_max_stacks: 3,
            suppression_slope: 0.5,
            suppression_min: 0.5,
            suppression_max: 1.5,
            guard_factor: 0.5,
            enrage_mult: 1.5,
            elite_mult: 1.2,
            spirit_physical_mult: 0.5,
            drain_fraction: 0.5,
            summon_rounds: 3,
            summon_power: 0.5,
        }
    }
}

impl EngineConfig {
    /// Load an engine configuration document from disk.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open engine config {:?}", path))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Deserialize and validate a configuration from an arbitrary reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Self = serde_json::from_reader(reader).context("invalid engine config json")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let scalars = [
            ("monsterSkillMult", self.monster_skill_mult),
            ("burnFraction", self.burn_fraction),
            ("suppressionSlope", self.suppression_slope),
            ("suppressionMin", self.suppression_min),
            ("suppressionMax", self.suppression_max),
            ("guardFactor", self.guard_factor),
            ("enrageMult", self.enrage_mult),
            ("eliteMult", self.elite_mult),
            ("spiritPhysicalMult", self.spirit_physical_mult),
            ("drainFraction", self.drain_fraction),
            ("summonPower", self.summon_power),
        ];
        for (name, value) in scalars {
            ensure!(value.is_finite(), "engine config {} must be finite", name);
            ensure!(value >= 0.0, "engine config {} must be non-negative", name);
        }
        ensure!(
            self.suppression_min <= self.suppression_max,
            "suppressionMin {} exceeds suppressionMax {}",
            self.suppression_min,
            self.suppression_max
        );
        ensure!(self.basic_mp_regen >= 0, "basicMpRegen must be non-negative");
        Ok(())
    }
}
