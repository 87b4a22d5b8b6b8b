use serde::{Deserialize, Serialize};

use crate::snapshot::CombatSnapshot;

/// Signed health change of one monster.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonsterDelta {
    pub id: String,
    pub hp_delta: i64,
}

/// Numeric differences produced by one round. Never absolute values.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoundDelta {
    pub player_hp: i64,
    pub player_mp: i64,
    pub monster_hp: i64,
    #[serde(default)]
    pub monsters: Vec<MonsterDelta>,
}

impl RoundDelta {
    /// Difference between two snapshots of the same encounter. Monsters keep
    /// the order of `before`.
    pub fn between(before: &CombatSnapshot, after: &CombatSnapshot) -> Self {
        let mut delta = RoundDelta {
            player_hp: after.player.hp - before.player.hp,
            player_mp: after.player.mp - before.player.mp,
            ..RoundDelta::default()
        };
        for monster in &before.monsters {
            if let Some(index) = after.monster_index(&monster.id) {
                delta.record_monster_delta(&monster.id, after.monsters[index].hp - monster.hp);
            }
        }
        delta
    }

    pub fn record_monster_delta(&mut self, id: &str, hp_delta: i64) {
        if hp_delta == 0 {
            return;
        }
        self.monster_hp += hp_delta;
        match self.monsters.iter().position(|entry| entry.id == id) {
            Some(idx) => {
                let entry = &mut self.monsters[idx];
                entry.hp_delta += hp_delta;
                if entry.hp_delta == 0 {
                    self.monsters.remove(idx);
                }
            }
            None => self.monsters.push(MonsterDelta {
                id: id.to_string(),
                hp_delta,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.player_hp == 0 && self.player_mp == 0 && self.monsters.is_empty()
    }
}
