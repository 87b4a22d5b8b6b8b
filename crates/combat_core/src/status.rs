//! Status effect state machine.
//!
//! Resolution logic never edits a status list in place. It emits
//! [`StatusChange`] operations which are applied in order, after the round,
//! by [`apply_status_changes`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::provenance::Trace;
use crate::snapshot::{CombatSnapshot, StatusEffect};

pub const STATUS_BURN: &str = "burn";
pub const STATUS_GUARD: &str = "guard";
pub const STATUS_REVIVE: &str = "revive";
pub const STATUS_IMMUNE: &str = "immune";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusOp {
    Add,
    Refresh,
    Tick,
    Remove,
    Expire,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StatusTarget {
    Player,
    Monster(String),
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub target: StatusTarget,
    pub op: StatusOp,
    pub status: StatusEffect,
    #[serde(rename = "_trace")]
    pub trace: Option<Trace>,
}

impl StatusChange {
    pub fn new(target: StatusTarget, op: StatusOp, status: StatusEffect) -> Self {
        Self {
            target,
            op,
            status,
            trace: None,
        }
    }
}

/// Apply one operation to one status list.
pub fn apply_op(statuses: &mut Vec<StatusEffect>, op: StatusOp, status: &StatusEffect) {
    let existing = statuses.iter().position(|entry| entry.id == status.id);
    match (op, existing) {
        (StatusOp::Add, None) => statuses.push(status.clone()),
        (StatusOp::Add, Some(_)) => {}
        (StatusOp::Remove | StatusOp::Expire, Some(index)) => {
            statuses.remove(index);
        }
        (StatusOp::Remove | StatusOp::Expire, None) => {}
        (StatusOp::Refresh | StatusOp::Tick, Some(index)) => statuses[index] = status.clone(),
        (StatusOp::Refresh | StatusOp::Tick, None) => statuses.push(status.clone()),
    }
}

/// Apply `ops` in order and return the resulting snapshot. Operations whose
/// target no longer resolves are skipped.
pub fn apply_status_changes(snapshot: &CombatSnapshot, ops: &[StatusChange]) -> CombatSnapshot {
    let mut next = snapshot.clone();
    for change in ops {
        let statuses = match &change.target {
            StatusTarget::Player => &mut next.player.statuses,
            StatusTarget::Monster(id) => match next.monster_index(id) {
                Some(index) => &mut next.monsters[index].statuses,
                None => continue,
            },
        };
        apply_op(statuses, change.op, &change.status);
    }
    next
}

/// End-of-round decay for every status no operation in `changes` touched:
/// one round off the duration, or an expiry when that would reach zero.
pub fn decay_untouched(snapshot: &CombatSnapshot, changes: &[StatusChange]) -> Vec<StatusChange> {
    let touched: BTreeSet<(&StatusTarget, &str)> = changes
        .iter()
        .map(|change| (&change.target, change.status.id.as_str()))
        .collect();

    let player = std::iter::once((StatusTarget::Player, &snapshot.player.statuses));
    let monsters = snapshot
        .monsters
        .iter()
        .map(|monster| (StatusTarget::Monster(monster.id.clone()), &monster.statuses));

    let mut decay = Vec::new();
    for (target, statuses) in player.chain(monsters) {
        for status in statuses {
            if touched.contains(&(&target, status.id.as_str())) {
                continue;
            }
            let change = if status.duration <= 1 {
                StatusChange::new(target.clone(), StatusOp::Expire, status.clone())
            } else {
                let mut ticked = status.clone();
                ticked.duration -= 1;
                StatusChange::new(target.clone(), StatusOp::Tick, ticked)
            };
            decay.push(change);
        }
    }
    decay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Combatant, Environment};
    use proptest::prelude::*;

    fn snapshot_with(status: StatusEffect) -> CombatSnapshot {
        CombatSnapshot::new(
            Combatant::new("hero", 100, 10.0).with_status(status),
            vec![Combatant::new("m1", 50, 5.0)],
            Environment::default(),
        )
    }

    #[test]
    fn add_does_not_overwrite() {
        let mut statuses = vec![StatusEffect::new("guard", 3)];
        apply_op(&mut statuses, StatusOp::Add, &StatusEffect::new("guard", 1));
        assert_eq!(statuses[0].duration, 3);
    }

    #[test]
    fn refresh_replaces_or_inserts() {
        let mut statuses = vec![StatusEffect::new("guard", 3)];
        apply_op(&mut statuses, StatusOp::Refresh, &StatusEffect::new("guard", 1));
        apply_op(&mut statuses, StatusOp::Refresh, &StatusEffect::new("burn", 2));
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].duration, 1);
    }

    #[test]
    fn later_ops_for_same_key_win() {
        let snapshot = snapshot_with(StatusEffect::new("guard", 2));
        let ops = vec![
            StatusChange::new(StatusTarget::Player, StatusOp::Remove, StatusEffect::new("guard", 0)),
            StatusChange::new(StatusTarget::Player, StatusOp::Add, StatusEffect::new("guard", 5)),
        ];
        let next = apply_status_changes(&snapshot, &ops);
        assert_eq!(next.player.status("guard").map(|s| s.duration), Some(5));
    }

    #[test]
    fn unknown_monster_target_is_a_no_op() {
        let snapshot = snapshot_with(StatusEffect::new("guard", 2));
        let ops = vec![StatusChange::new(
            StatusTarget::Monster("ghost".to_string()),
            StatusOp::Add,
            StatusEffect::new("burn", 2),
        )];
        assert_eq!(apply_status_changes(&snapshot, &ops), snapshot);
    }

    #[test]
    fn untouched_single_round_status_expires() {
        let snapshot = snapshot_with(StatusEffect::new("guard", 1));
        let decay = decay_untouched(&snapshot, &[]);
        assert_eq!(decay.len(), 1);
        assert_eq!(decay[0].op, StatusOp::Expire);
        let next = apply_status_changes(&snapshot, &decay);
        assert!(next.player.statuses.is_empty());
    }

    #[test]
    fn untouched_status_ticks_down() {
        let snapshot = snapshot_with(StatusEffect::new("guard", 3));
        let next = apply_status_changes(&snapshot, &decay_untouched(&snapshot, &[]));
        assert_eq!(next.player.status("guard").map(|s| s.duration), Some(2));
    }

    #[test]
    fn refreshed_status_is_not_ticked() {
        let snapshot = snapshot_with(StatusEffect::new("guard", 1));
        let refresh = vec![StatusChange::new(
            StatusTarget::Player,
            StatusOp::Refresh,
            StatusEffect::new("guard", 2),
        )];
        assert!(decay_untouched(&snapshot, &refresh).is_empty());
    }

    proptest! {
        #[test]
        fn expire_is_idempotent(duration in 0u32..10, extra in 0usize..4) {
            let mut statuses: Vec<StatusEffect> = (0..extra)
                .map(|i| StatusEffect::new(format!("s{i}"), 2))
                .collect();
            statuses.push(StatusEffect::new("target", duration));
            let expire = StatusEffect::new("target", 0);
            apply_op(&mut statuses, StatusOp::Expire, &expire);
            let once = statuses.clone();
            apply_op(&mut statuses, StatusOp::Expire, &expire);
            prop_assert_eq!(once, statuses);
        }
    }
}
