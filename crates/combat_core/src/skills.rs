use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::damage::DamageSpec;

/// Behavior switches carried by a skill. Each tag maps to exactly one
/// deterministic behavior and tags stack freely.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkillTag {
    /// Strike every living monster instead of the target.
    Area,
    /// Strike each target twice.
    DoubleHit,
    /// Conjure a standing ally.
    Summon,
    /// Flip the sign of the environment polarity.
    PolarityInvert,
    /// Heal the caster for part of the damage dealt.
    Drain,
    /// Set every monster hit on fire.
    Burn,
    /// Guard the caster for the next round.
    Shield,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mp_cost: i64,
    #[serde(default)]
    pub hp_cost: i64,
    pub spec: DamageSpec,
    #[serde(default)]
    pub tags: BTreeSet<SkillTag>,
}

impl Skill {
    pub fn new<I: Into<String>>(id: I, mp_cost: i64, spec: DamageSpec) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            mp_cost,
            hp_cost: 0,
            spec,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tag(mut self, tag: SkillTag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn with_hp_cost(mut self, hp_cost: i64) -> Self {
        self.hp_cost = hp_cost;
        self
    }

    pub fn has(&self, tag: SkillTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn hits_per_target(&self) -> usize {
        if self.has(SkillTag::DoubleHit) {
            2
        } else {
            1
        }
    }
}
