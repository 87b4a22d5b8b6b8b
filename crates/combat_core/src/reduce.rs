//! State-application boundary. The only place persistent state changes.

use thiserror::Error;
use tracing::error;

use crate::event::{EventResult, STORY_BRANCH_FLAG};
use crate::fixed::commit_resource_delta;
use crate::output::{Effect, RoundOutput};
use crate::snapshot::Combatant;
use crate::status::{apply_op, apply_status_changes, StatusTarget};
use crate::world::GameState;

pub const TARGET_PLAYER: &str = "player";
pub const TARGET_WORLD: &str = "world";
pub const TARGET_INVENTORY: &str = "inventory";
pub const WORLD_TENDENCY: &str = "tendency";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApplyError {
    #[error("rejected non-finite value {value} for {target}.{field}")]
    NonFinite {
        target: String,
        field: String,
        value: f64,
    },
    #[error("unknown effect target {target}.{field}")]
    UnknownTarget { target: String, field: String },
}

impl ApplyError {
    fn unknown(effect: &Effect) -> Self {
        ApplyError::UnknownTarget {
            target: effect.target.clone(),
            field: effect.kind.clone(),
        }
    }
}

/// Commit one round: resource deltas and the resulting status list to the
/// persistent player, the next snapshot to the encounter slot, then the
/// round's effects.
pub fn apply_round(state: &mut GameState, output: &RoundOutput) -> Vec<ApplyError> {
    let player = &mut state.player;
    player.hp = commit_resource_delta(player.hp, output.delta.player_hp, player.max_hp);
    player.mp = commit_resource_delta(player.mp, output.delta.player_mp, player.max_mp);
    // Consumed statuses (revive) must not come back with the next encounter.
    player.statuses = output.next_snapshot.player.statuses.clone();
    state.encounter = Some(output.next_snapshot.clone());
    apply_effects(state, &output.effects)
}

/// Commit a narrative event result.
pub fn apply_story(state: &mut GameState, event: &EventResult) -> Vec<ApplyError> {
    for (item, amount) in &event.delta.inventory_delta {
        add_item(state, item, *amount);
    }
    for (key, value) in &event.flags.story {
        if key == STORY_BRANCH_FLAG {
            if let Some(branch) = value.as_str() {
                state.story.branch = Some(branch.to_string());
            }
        }
        state.story.flags.insert(key.clone(), value.clone());
    }
    for (key, value) in &event.flags.world {
        state.world.flags.insert(key.clone(), value.clone());
    }

    for change in &event.status_changes {
        if change.target == StatusTarget::Player {
            apply_op(&mut state.player.statuses, change.op, &change.status);
        }
    }
    if let Some(encounter) = state.encounter.as_mut() {
        *encounter = apply_status_changes(encounter, &event.status_changes);
    }

    apply_effects(state, &event.effects)
}

/// Apply each effect independently. Rejected effects are dropped whole and
/// returned; the rest still apply.
pub fn apply_effects(state: &mut GameState, effects: &[Effect]) -> Vec<ApplyError> {
    let mut rejected = Vec::new();
    for effect in effects {
        if let Err(err) = apply_effect(state, effect) {
            error!(
                effect_target = %effect.target,
                kind = %effect.kind,
                delta_key = effect.delta_key.as_deref().unwrap_or("-"),
                %err,
                "state mutation rejected"
            );
            rejected.push(err);
        }
    }
    rejected
}

pub fn apply_effect(state: &mut GameState, effect: &Effect) -> Result<(), ApplyError> {
    if !effect.value.is_finite() {
        return Err(ApplyError::NonFinite {
            target: effect.target.clone(),
            field: effect.kind.clone(),
            value: effect.value,
        });
    }
    let value = effect.value;
    match effect.target.as_str() {
        TARGET_PLAYER => {
            let update =
                player_update(&effect.kind, value).ok_or_else(|| ApplyError::unknown(effect))?;
            update(&mut state.player);
            if let Some(encounter) = state.encounter.as_mut() {
                update(&mut encounter.player);
            }
        }
        TARGET_WORLD => {
            if effect.kind == WORLD_TENDENCY {
                state.world.tendency += value;
            } else {
                *state.world.gauges.entry(effect.kind.clone()).or_insert(0.0) += value;
            }
        }
        TARGET_INVENTORY => add_item(state, &effect.kind, whole(value)),
        _ => return Err(ApplyError::unknown(effect)),
    }
    Ok(())
}

fn whole(value: f64) -> i64 {
    value.trunc() as i64
}

type PlayerUpdate = Box<dyn Fn(&mut Combatant)>;

fn player_update(field: &str, value: f64) -> Option<PlayerUpdate> {
    let amount = whole(value);
    let update: PlayerUpdate = match field {
        "hp" => Box::new(move |p| p.hp = commit_resource_delta(p.hp, amount, p.max_hp)),
        "mp" => Box::new(move |p| p.mp = commit_resource_delta(p.mp, amount, p.max_mp)),
        "maxHp" => Box::new(move |p| {
            p.max_hp = p.max_hp.saturating_add(amount).max(1);
            p.hp = p.hp.min(p.max_hp);
        }),
        "maxMp" => Box::new(move |p| {
            p.max_mp = p.max_mp.saturating_add(amount).max(0);
            p.mp = p.mp.min(p.max_mp);
        }),
        "realm" => Box::new(move |p| {
            p.realm = (i64::from(p.realm) + amount).clamp(0, i64::from(u32::MAX)) as u32;
        }),
        "atk" => Box::new(move |p| p.atk += value),
        "matk" => Box::new(move |p| p.matk += value),
        "spell" => Box::new(move |p| p.spell += value),
        "def" => Box::new(move |p| p.def += value),
        "speed" => Box::new(move |p| p.speed += value),
        "critRate" => Box::new(move |p| p.crit_rate = (p.crit_rate + value).clamp(0.0, 1.0)),
        "bonusPct" => Box::new(move |p| p.bonus_pct += value),
        _ => return None,
    };
    Some(update)
}

fn add_item(state: &mut GameState, item: &str, amount: i64) {
    let count = state.item_count(item).saturating_add(amount).max(0);
    if count == 0 {
        state.inventory.remove(item);
    } else {
        state.inventory.insert(item.to_string(), count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventFlags;
    use crate::snapshot::{CombatSnapshot, Environment, StatusEffect};
    use crate::status::{StatusChange, StatusOp};
    use serde_json::Value;

    fn state() -> GameState {
        GameState::new(7, Combatant::new("hero", 100, 10.0)).unwrap()
    }

    #[test]
    fn non_finite_effect_is_dropped_whole() {
        let mut state = state();
        let before = state.clone();
        let rejected = apply_effects(
            &mut state,
            &[
                Effect::new(TARGET_PLAYER, "hp", f64::NAN),
                Effect::new(TARGET_WORLD, WORLD_TENDENCY, f64::INFINITY),
            ],
        );
        assert_eq!(rejected.len(), 2);
        assert_eq!(state, before);
    }

    #[test]
    fn good_effects_survive_a_bad_neighbor() {
        let mut state = state();
        state.player.hp = 50;
        let rejected = apply_effects(
            &mut state,
            &[
                Effect::new(TARGET_PLAYER, "hp", f64::NAN),
                Effect::new(TARGET_PLAYER, "hp", 20.0),
                Effect::new("moon", "phase", 1.0),
            ],
        );
        assert_eq!(state.player.hp, 70);
        assert!(matches!(rejected[1], ApplyError::UnknownTarget { .. }));
    }

    #[test]
    fn player_effects_mirror_into_the_encounter() {
        let mut state = state();
        state.encounter = Some(CombatSnapshot::new(
            state.player.clone(),
            vec![Combatant::new("m1", 10, 1.0)],
            Environment::default(),
        ));
        apply_effect(&mut state, &Effect::new(TARGET_PLAYER, "hp", -30.0)).unwrap();
        assert_eq!(state.player.hp, 70);
        assert_eq!(state.encounter.as_ref().map(|e| e.player.hp), Some(70));
    }

    #[test]
    fn inventory_never_goes_negative() {
        let mut state = state();
        apply_effect(&mut state, &Effect::new(TARGET_INVENTORY, "talisman", 1.0)).unwrap();
        apply_effect(&mut state, &Effect::new(TARGET_INVENTORY, "talisman", -3.0)).unwrap();
        assert!(!state.inventory.contains_key("talisman"));
    }

    #[test]
    fn story_events_set_flags_branch_and_statuses() {
        let mut state = state();
        let mut event = EventResult {
            flags: EventFlags::default(),
            ..EventResult::default()
        };
        event
            .flags
            .story
            .insert(STORY_BRANCH_FLAG.to_string(), Value::from("ridge"));
        event.delta.inventory_delta.insert("herb".to_string(), 2);
        event.status_changes.push(StatusChange::new(
            StatusTarget::Player,
            StatusOp::Add,
            StatusEffect::new("blessed", 3),
        ));
        event.effects.push(Effect::new(TARGET_WORLD, WORLD_TENDENCY, -0.5).external());

        assert!(apply_story(&mut state, &event).is_empty());
        assert_eq!(state.story.branch.as_deref(), Some("ridge"));
        assert_eq!(state.item_count("herb"), 2);
        assert!(state.player.has_status("blessed"));
        assert_eq!(state.world.tendency, -0.5);
    }

    #[test]
    fn story_statuses_reach_the_player_mid_encounter() {
        let mut state = state();
        state.encounter = Some(CombatSnapshot::new(
            state.player.clone(),
            vec![Combatant::new("m1", 10, 1.0)],
            Environment::default(),
        ));
        let mut event = EventResult::default();
        event.status_changes.push(StatusChange::new(
            StatusTarget::Player,
            StatusOp::Add,
            StatusEffect::new("blessed", 9),
        ));
        event.status_changes.push(StatusChange::new(
            StatusTarget::Monster("m1".to_string()),
            StatusOp::Add,
            StatusEffect::new("marked", 2),
        ));

        assert!(apply_story(&mut state, &event).is_empty());
        assert!(state.player.has_status("blessed"));
        let encounter = state.encounter.as_ref().unwrap();
        assert!(encounter.player.has_status("blessed"));
        assert!(encounter.monsters[0].has_status("marked"));

        state.encounter = None;
        assert!(state.player.has_status("blessed"));
    }
}
