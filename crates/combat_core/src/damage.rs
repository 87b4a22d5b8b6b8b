//! Single-hit damage formula.
//!
//! `pre = base + Σ weight·stat + flat`. Non-positive potential short-circuits
//! to zero damage without touching the random source; otherwise the value is
//! scaled by the system multiplier and attacker bonus, optionally rolled for a
//! critical, mitigated by the defender (except for true damage), floored and
//! clamped to at least one.

use serde::{Deserialize, Serialize};

use crate::fixed::{
    clamp_f64, floor_amount, DEFENSE_SOFTENING, DERIVED_REDUCTION_MAX, EXPLICIT_REDUCTION_MAX,
    MIN_HIT_DAMAGE,
};
use crate::rng::RandomSource;
use crate::snapshot::Combatant;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Physical,
    Technique,
    Spell,
    True,
}

/// Weighted description of one hit. Built from a skill or an engine template.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DamageSpec {
    pub damage_type: DamageType,
    #[serde(default)]
    pub base: f64,
    #[serde(default)]
    pub melee: f64,
    #[serde(default)]
    pub technique: f64,
    #[serde(default)]
    pub spell: f64,
    #[serde(default = "enabled")]
    pub can_crit: bool,
    #[serde(default = "enabled")]
    pub can_dodge: bool,
}

fn enabled() -> bool {
    true
}

impl DamageSpec {
    pub fn new(damage_type: DamageType, base: f64) -> Self {
        Self {
            damage_type,
            base,
            melee: 0.0,
            technique: 0.0,
            spell: 0.0,
            can_crit: true,
            can_dodge: true,
        }
    }

    pub fn weights(mut self, melee: f64, technique: f64, spell: f64) -> Self {
        self.melee = clamp_f64(melee, 0.0, 1.0);
        self.technique = clamp_f64(technique, 0.0, 1.0);
        self.spell = clamp_f64(spell, 0.0, 1.0);
        self
    }

    pub fn crit(mut self, can_crit: bool) -> Self {
        self.can_crit = can_crit;
        self
    }

    pub fn dodge(mut self, can_dodge: bool) -> Self {
        self.can_dodge = can_dodge;
        self
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    NoDamage,
    Normal,
    Crit,
}

/// Every intermediate quantity of one hit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DamageBreakdown {
    pub kind: HitKind,
    pub damage_type: DamageType,
    pub pre_mult: f64,
    pub system_mult: f64,
    pub bonus_pct: f64,
    pub scaled: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crit_roll: Option<f64>,
    pub crit_mult: f64,
    pub damage_reduction: f64,
    pub mitigated: f64,
    pub dodge_eligible: bool,
    pub damage: i64,
}

impl DamageBreakdown {
    fn none(spec: &DamageSpec, pre_mult: f64, system_mult: f64) -> Self {
        Self {
            kind: HitKind::NoDamage,
            damage_type: spec.damage_type,
            pre_mult,
            system_mult,
            bonus_pct: 0.0,
            scaled: 0.0,
            crit_roll: None,
            crit_mult: 1.0,
            damage_reduction: 0.0,
            mitigated: 0.0,
            dodge_eligible: spec.can_dodge,
            damage: 0,
        }
    }
}

/// Mitigation fraction of a defender: explicit reduction clamped to
/// `[0, 0.8]`, otherwise `def / (def + 100)` clamped to `[0, 0.6]`.
pub fn damage_reduction(defender: &Combatant) -> f64 {
    match defender.damage_reduction {
        Some(explicit) => clamp_f64(explicit, 0.0, EXPLICIT_REDUCTION_MAX),
        None => {
            let def = if defender.def.is_finite() {
                defender.def.max(0.0)
            } else {
                0.0
            };
            clamp_f64(def / (def + DEFENSE_SOFTENING), 0.0, DERIVED_REDUCTION_MAX)
        }
    }
}

/// Potential of a hit before any multiplier.
pub fn pre_multiplier(attacker: &Combatant, spec: &DamageSpec, flat_add: f64) -> f64 {
    spec.base
        + spec.melee * attacker.atk
        + spec.technique * attacker.matk
        + spec.spell * attacker.spell
        + flat_add
}

/// Compute one hit. Draws from `rng` (as `tag`) only when the hit has positive
/// potential and `spec.can_crit` is set.
pub fn compute_damage(
    attacker: &Combatant,
    defender: &Combatant,
    spec: &DamageSpec,
    system_mult: f64,
    flat_add: f64,
    rng: &mut dyn RandomSource,
    tag: &str,
) -> DamageBreakdown {
    let pre_mult = pre_multiplier(attacker, spec, flat_add);
    // NaN potential falls through here as well.
    if !(pre_mult > 0.0) {
        return DamageBreakdown::none(spec, pre_mult, system_mult);
    }

    let scaled = pre_mult * system_mult * (1.0 + attacker.bonus_pct);
    let mut value = scaled;
    let mut kind = HitKind::Normal;
    let mut crit_roll = None;
    let mut crit_mult = 1.0;
    if spec.can_crit {
        let roll = rng.next_f64(tag);
        crit_roll = Some(roll);
        if roll < attacker.crit_rate {
            kind = HitKind::Crit;
            crit_mult = attacker.crit_mult;
            value *= crit_mult;
        }
    }

    let reduction = if spec.damage_type == DamageType::True {
        0.0
    } else {
        damage_reduction(defender)
    };
    let mitigated = value * (1.0 - reduction);
    let damage = floor_amount(mitigated).max(MIN_HIT_DAMAGE);

    DamageBreakdown {
        kind,
        damage_type: spec.damage_type,
        pre_mult,
        system_mult,
        bonus_pct: attacker.bonus_pct,
        scaled,
        crit_roll,
        crit_mult,
        damage_reduction: reduction,
        mitigated,
        dodge_eligible: spec.can_dodge,
        damage,
    }
}
