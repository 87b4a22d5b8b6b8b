use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::skills::Skill;

pub const TAG_SPIRIT: &str = "spirit";
pub const TAG_ELITE: &str = "elite";
pub const TAG_ENRAGE: &str = "enrage";
pub const TAG_UNDYING_ONCE: &str = "undying_once";

/// Timed condition on a combatant. `id` is the uniqueness key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEffect {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "one")]
    pub stacks: u32,
    pub duration: u32,
}

fn one() -> u32 {
    1
}

impl StatusEffect {
    pub fn new<I: Into<String>>(id: I, duration: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            stacks: 1,
            duration,
        }
    }

    pub fn with_stacks(mut self, stacks: u32) -> Self {
        self.stacks = stacks;
        self
    }
}

/// Standing ally conjured by a summon skill.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Summon {
    pub id: String,
    pub name: String,
    pub atk: f64,
    pub rounds: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Combatant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub hp: i64,
    pub max_hp: i64,
    #[serde(default)]
    pub mp: i64,
    #[serde(default)]
    pub max_mp: i64,
    #[serde(default)]
    pub atk: f64,
    #[serde(default)]
    pub matk: f64,
    #[serde(default)]
    pub spell: f64,
    #[serde(default)]
    pub def: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub crit_rate: f64,
    #[serde(default = "default_crit_mult")]
    pub crit_mult: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_reduction: Option<f64>,
    #[serde(default)]
    pub bonus_pct: f64,
    #[serde(default)]
    pub realm: u32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub statuses: Vec<StatusEffect>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<Skill>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summons: Vec<Summon>,
}

fn default_crit_mult() -> f64 {
    1.5
}

impl Combatant {
    pub fn new<I: Into<String>>(id: I, hp: i64, atk: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            hp,
            max_hp: hp,
            mp: 0,
            max_mp: 0,
            atk,
            matk: 0.0,
            spell: 0.0,
            def: 0.0,
            speed: 0.0,
            crit_rate: 0.0,
            crit_mult: default_crit_mult(),
            damage_reduction: None,
            bonus_pct: 0.0,
            realm: 0,
            tags: BTreeSet::new(),
            statuses: Vec::new(),
            skills: Vec::new(),
            summons: Vec::new(),
        }
    }

    pub fn with_mana(mut self, mp: i64, max_mp: i64) -> Self {
        self.mp = mp;
        self.max_mp = max_mp;
        self
    }

    pub fn with_tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_status(mut self, status: StatusEffect) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_skill(mut self, skill: Skill) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn status(&self, id: &str) -> Option<&StatusEffect> {
        self.statuses.iter().find(|status| status.id == id)
    }

    pub fn has_status(&self, id: &str) -> bool {
        self.status(id).is_some()
    }

    pub fn skill(&self, name: &str) -> Option<&Skill> {
        self.skills
            .iter()
            .find(|skill| skill.id == name || skill.name == name)
    }

    /// Relative strength used for realm suppression.
    pub fn power_index(&self) -> f64 {
        f64::from(self.realm) * 100.0
            + self.atk
            + self.matk
            + self.spell
            + self.def
            + self.max_hp as f64 / 10.0
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default)]
    pub map_id: String,
    #[serde(default)]
    pub difficulty: u32,
    #[serde(default)]
    pub polarity: f64,
    #[serde(default)]
    pub world_tag: String,
}

/// Immutable view of one encounter at a round boundary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CombatSnapshot {
    pub round: u32,
    pub player: Combatant,
    pub monsters: Vec<Combatant>,
    #[serde(default)]
    pub env: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_target: Option<String>,
}

impl CombatSnapshot {
    pub fn new(player: Combatant, monsters: Vec<Combatant>, env: Environment) -> Self {
        Self {
            round: 0,
            player,
            monsters,
            env,
            active_target: None,
        }
    }

    pub fn monster_index(&self, id: &str) -> Option<usize> {
        self.monsters.iter().position(|monster| monster.id == id)
    }

    /// Index of the monster the player should strike: the active target when
    /// it is alive, otherwise the first living monster in list order.
    pub fn select_target(&self) -> Option<usize> {
        self.active_target
            .as_deref()
            .and_then(|id| self.monster_index(id))
            .filter(|&index| self.monsters[index].is_alive())
            .or_else(|| self.monsters.iter().position(Combatant::is_alive))
    }

    pub fn living_monsters(&self) -> Vec<usize> {
        self.monsters
            .iter()
            .enumerate()
            .filter(|(_, monster)| monster.is_alive())
            .map(|(index, _)| index)
            .collect()
    }

    pub fn all_defeated(&self) -> bool {
        self.monsters.iter().all(|monster| !monster.is_alive())
    }
}
