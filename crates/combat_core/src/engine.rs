//! Round resolution.
//!
//! [`Engine::resolve`] turns one [`CombatSnapshot`] into a [`RoundOutput`]
//! without touching anything the caller owns. All work happens on a private
//! copy of the snapshot; status mutations are collected as operations and
//! applied once the round is over.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::config::EngineConfig;
use crate::damage::{compute_damage, DamageBreakdown, DamageSpec, DamageType, HitKind};
use crate::delta::RoundDelta;
use crate::fixed::{clamp_f64, commit_resource_delta, floor_amount};
use crate::output::{LogEntry, LogKind, OutputMeta, RoundOutput, RoundResult};
use crate::rng::{DrawLedger, RandomSource};
use crate::rules::{
    call_rule, merge_rule_artifacts, AiDecision, Artifacts, HookInput, HookName, HookPhase,
    Multipliers, RuleHooks, RuleResult,
};
use crate::skills::{Skill, SkillTag};
use crate::snapshot::{
    CombatSnapshot, Combatant, StatusEffect, Summon, TAG_ELITE, TAG_ENRAGE, TAG_SPIRIT,
    TAG_UNDYING_ONCE,
};
use crate::status::{
    apply_status_changes, decay_untouched, StatusChange, StatusOp, StatusTarget, STATUS_BURN,
    STATUS_GUARD, STATUS_IMMUNE, STATUS_REVIVE,
};

pub const FLAG_INVALID_RNG: &str = "invalidRng";
pub const FLAG_REVIVED: &str = "revived";

/// What the player does this round.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum ActionChoice {
    #[default]
    Basic,
    SkillOverride(Skill),
    NamedSkill(String),
}

/// Provenance seed for one call.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallTrace {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub action: ActionChoice,
    pub rules: RuleHooks,
    pub trace: CallTrace,
    pub enable_realm_suppression: bool,
}

/// Seam between callers and a concrete engine revision. Replay analysis swaps
/// implementations behind this trait.
pub trait ResolutionEngine: Send + Sync {
    fn revision(&self) -> &str;

    fn resolve(
        &self,
        snapshot: &CombatSnapshot,
        rng: Option<&mut dyn RandomSource>,
        options: &RunOptions,
    ) -> RoundOutput;
}

#[derive(Clone, Debug, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl ResolutionEngine for Engine {
    fn revision(&self) -> &str {
        &self.config.revision
    }

    fn resolve(
        &self,
        snapshot: &CombatSnapshot,
        rng: Option<&mut dyn RandomSource>,
        options: &RunOptions,
    ) -> RoundOutput {
        let meta = OutputMeta {
            source: if options.trace.source.is_empty() {
                "combat".to_string()
            } else {
                options.trace.source.clone()
            },
            delta_key: options.trace.delta_key.clone(),
            engine: self.config.revision.clone(),
            round: snapshot.round + 1,
            rng_draws: Vec::new(),
        };
        let Some(rng) = rng else {
            error!(round = meta.round, "round resolution called without a random source");
            return invalid_rng(snapshot, meta);
        };
        let output = Round::new(&self.config, options, snapshot, rng, meta).resolve();
        debug!(
            round = output.meta.round,
            result = ?output.result,
            draws = output.meta.rng_draws.len(),
            "round resolved"
        );
        output
    }
}

/// Resolve one round with the default engine configuration.
pub fn run(
    snapshot: &CombatSnapshot,
    rng: Option<&mut dyn RandomSource>,
    options: &RunOptions,
) -> RoundOutput {
    Engine::default().resolve(snapshot, rng, options)
}

fn invalid_rng(snapshot: &CombatSnapshot, meta: OutputMeta) -> RoundOutput {
    let mut flags = BTreeMap::new();
    flags.insert(FLAG_INVALID_RNG.to_string(), Value::Bool(true));
    RoundOutput {
        result: RoundResult::Draw,
        delta: RoundDelta::default(),
        logs: vec![LogEntry::new(
            LogKind::System,
            "invalid_rng",
            "no random source supplied; round not resolved",
            meta.round,
        )],
        effects: Vec::new(),
        status_changes: Vec::new(),
        flags,
        meta,
        next_snapshot: snapshot.clone(),
    }
}

#[derive(Clone, Copy, Debug)]
enum Side {
    Player,
    Monster(usize),
}

fn side(snapshot: &CombatSnapshot, side: Side) -> &Combatant {
    match side {
        Side::Player => &snapshot.player,
        Side::Monster(index) => &snapshot.monsters[index],
    }
}

fn breakdown_value(hit: &DamageBreakdown) -> Value {
    serde_json::to_value(hit).unwrap_or(Value::Null)
}

/// Working state of one round in flight.
struct Round<'a> {
    config: &'a EngineConfig,
    options: &'a RunOptions,
    origin: &'a CombatSnapshot,
    work: CombatSnapshot,
    rng: DrawLedger<'a>,
    acc: Artifacts,
    meta: OutputMeta,
    round: u32,
}

impl<'a> Round<'a> {
    fn new(
        config: &'a EngineConfig,
        options: &'a RunOptions,
        origin: &'a CombatSnapshot,
        rng: &'a mut dyn RandomSource,
        meta: OutputMeta,
    ) -> Self {
        Self {
            config,
            options,
            origin,
            work: origin.clone(),
            rng: DrawLedger::new(rng),
            acc: Artifacts::default(),
            round: meta.round,
            meta,
        }
    }

    fn resolve(mut self) -> RoundOutput {
        self.tick_burns();

        let result = match self.work.select_target() {
            None => RoundResult::Win,
            Some(target) => {
                self.work.active_target = Some(self.work.monsters[target].id.clone());
                let suppression = self.suppression(target);
                let player = self.player_turn(target, &suppression);
                self.summon_turn();
                if self.work.all_defeated() {
                    RoundResult::Win
                } else {
                    self.monster_phase(&player);
                    self.defeat_check()
                }
            }
        };
        if result == RoundResult::Win {
            self.log(LogEntry::new(LogKind::System, "victory", "all monsters defeated", self.round));
        }
        self.finish(result)
    }

    fn log(&mut self, entry: LogEntry) {
        self.acc.log(entry);
    }

    fn consult(
        &mut self,
        name: HookName,
        phase: HookPhase,
        actor: Side,
        target: Option<Side>,
        skill_id: Option<&str>,
    ) -> Option<RuleResult> {
        let input = HookInput {
            phase,
            round: self.round,
            actor: side(&self.work, actor),
            target: target.map(|t| side(&self.work, t)),
            snapshot: &self.work,
            skill_id,
        };
        let result = call_rule(&self.options.rules, name, &input);
        merge_rule_artifacts(&mut self.acc, result.as_ref());
        result
    }

    fn tick_burns(&mut self) {
        for index in 0..self.work.monsters.len() {
            let monster = &self.work.monsters[index];
            if !monster.is_alive() {
                continue;
            }
            let Some(burn) = monster.status(STATUS_BURN) else {
                continue;
            };
            let raw = monster.max_hp as f64 * self.config.burn_fraction * f64::from(burn.stacks);
            let damage = floor_amount(raw).max(1);
            let id = monster.id.clone();
            let clung = self.wound_monster(index, damage);
            self.log(
                LogEntry::new(LogKind::Damage, "burn", format!("{} burns for {}", id, damage), self.round)
                    .between(STATUS_BURN, &id)
                    .with_meta("damage", damage),
            );
            if clung {
                self.log_undying(&id);
            }
        }
    }

    /// Take `damage` off a monster. An `undying_once` monster keeps 1 hp the
    /// first time a wound would drop it; returns whether that happened.
    fn wound_monster(&mut self, index: usize, damage: i64) -> bool {
        let monster = &mut self.work.monsters[index];
        let mut hp = monster.hp - damage;
        let mut clung = false;
        if hp <= 0 && monster.has_tag(TAG_UNDYING_ONCE) {
            hp = 1;
            monster.tags.remove(TAG_UNDYING_ONCE);
            clung = true;
        }
        monster.hp = hp.max(0);
        clung
    }

    fn log_undying(&mut self, id: &str) {
        self.log(
            LogEntry::new(LogKind::Status, "undying", format!("{} refuses to fall", id), self.round)
                .between(id, id),
        );
    }

    fn suppression(&mut self, target: usize) -> Multipliers {
        if !self.options.enable_realm_suppression {
            return Multipliers::IDENTITY;
        }
        let hooked = self.consult(
            HookName::Realm,
            HookPhase::Suppression,
            Side::Player,
            Some(Side::Monster(target)),
            None,
        );
        if let Some(result) = hooked {
            let mut mults = Multipliers::IDENTITY;
            mults.absorb(Some(&result));
            return mults;
        }

        let player = self.work.player.power_index();
        let monster = self.work.monsters[target].power_index();
        let gap = (player - monster) / monster.max(1.0);
        let slope = self.config.suppression_slope;
        let (min, max) = (self.config.suppression_min, self.config.suppression_max);
        Multipliers {
            damage_mult: clamp_f64(1.0 + gap * slope, min, max),
            taken_mult: clamp_f64(1.0 - gap * slope, min, max),
            ..Multipliers::IDENTITY
        }
    }

    /// Player status hook, then the chosen action. Returns the player's
    /// multiplier stack for the rest of the round.
    fn player_turn(&mut self, target: usize, suppression: &Multipliers) -> Multipliers {
        let status = self.consult(
            HookName::Status,
            HookPhase::PlayerStatus,
            Side::Player,
            Some(Side::Monster(target)),
            None,
        );
        let mut mults = *suppression;
        mults.absorb(status.as_ref());

        let options = self.options;
        let skill = match &options.action {
            ActionChoice::Basic => None,
            ActionChoice::SkillOverride(skill) => Some(skill.clone()),
            ActionChoice::NamedSkill(name) => match self.work.player.skill(name) {
                Some(skill) => Some(skill.clone()),
                None => {
                    self.log(LogEntry::new(
                        LogKind::System,
                        "unknown_skill",
                        format!("unknown skill '{}'; using basic attack", name),
                        self.round,
                    ));
                    None
                }
            },
        };

        match skill {
            None => self.basic_attack(target, &mults),
            Some(skill) => {
                let cost_hook = self.consult(
                    HookName::Skill,
                    HookPhase::SkillCost,
                    Side::Player,
                    Some(Side::Monster(target)),
                    Some(&skill.id),
                );
                let mut cast = mults;
                cast.absorb(cost_hook.as_ref());
                let mp_cost = (skill.mp_cost as f64 * cast.mp_cost_mult).ceil().max(0.0) as i64;
                let player = &self.work.player;
                let hp_cost = skill.hp_cost.max(0);
                if player.mp < mp_cost || (hp_cost > 0 && player.hp <= hp_cost) {
                    self.log(
                        LogEntry::new(
                            LogKind::System,
                            "insufficient_resources",
                            format!("cannot afford {}; using basic attack", skill.name),
                            self.round,
                        )
                        .with_meta("mpCost", mp_cost),
                    );
                    self.basic_attack(target, &mults);
                } else {
                    self.cast(&skill, target, &cast, mp_cost, hp_cost);
                }
            }
        }
        mults
    }

    fn basic_attack(&mut self, target: usize, mults: &Multipliers) {
        let attacker = self.work.player.clone();
        let spec = self.config.basic.clone();
        let hit = self.strike_monster(&attacker, target, &spec, mults, "player.basic.crit");
        self.on_hit(target, hit.damage, None);

        let player = &mut self.work.player;
        player.mp = commit_resource_delta(player.mp, self.config.basic_mp_regen, player.max_mp);
    }

    fn cast(&mut self, skill: &Skill, target: usize, mults: &Multipliers, mp_cost: i64, hp_cost: i64) {
        self.work.player.mp -= mp_cost;
        self.work.player.hp -= hp_cost;
        let player_id = self.work.player.id.clone();
        self.log(
            LogEntry::new(LogKind::Action, "cast", format!("{} casts {}", player_id, skill.name), self.round)
                .with_meta("skill", skill.id.as_str())
                .with_meta("mpCost", mp_cost),
        );

        let targets = if skill.has(SkillTag::Area) {
            self.work.living_monsters()
        } else {
            vec![target]
        };
        let tag = format!("player.skill.{}.crit", skill.id);
        let mut dealt = 0;
        for index in targets {
            let mut landed = false;
            for _ in 0..skill.hits_per_target() {
                if !self.work.monsters[index].is_alive() {
                    break;
                }
                let attacker = self.work.player.clone();
                let hit = self.strike_monster(&attacker, index, &skill.spec, mults, &tag);
                dealt += hit.damage;
                landed |= hit.damage > 0;
                self.on_hit(index, hit.damage, Some(&skill.id));
            }
            if landed && skill.has(SkillTag::Burn) {
                self.ignite(index);
            }
        }

        if skill.has(SkillTag::Drain) && dealt > 0 {
            let heal = floor_amount(dealt as f64 * self.config.drain_fraction);
            let player = &mut self.work.player;
            player.hp = commit_resource_delta(player.hp, heal, player.max_hp);
            self.log(
                LogEntry::new(LogKind::Heal, "drain", format!("{} drains {}", player_id, heal), self.round)
                    .with_meta("heal", heal),
            );
        }
        if skill.has(SkillTag::Summon) {
            let power = self.work.player.atk.max(self.work.player.matk) * self.config.summon_power;
            let summon = Summon {
                id: format!("{}-{}", skill.id, self.round),
                name: skill.name.clone(),
                atk: power,
                rounds: self.config.summon_rounds,
            };
            self.log(LogEntry::new(
                LogKind::Action,
                "summon",
                format!("{} answers the call", summon.name),
                self.round,
            ));
            self.work.player.summons.push(summon);
        }
        if skill.has(SkillTag::PolarityInvert) {
            self.work.env.polarity = -self.work.env.polarity;
            self.log(
                LogEntry::new(LogKind::Action, "polarity_invert", "the field's polarity flips", self.round)
                    .with_meta("polarity", self.work.env.polarity),
            );
        }
        if skill.has(SkillTag::Shield) {
            self.acc.status(StatusChange::new(
                StatusTarget::Player,
                StatusOp::Refresh,
                StatusEffect::new(STATUS_GUARD, 1),
            ));
        }
    }

    fn ignite(&mut self, index: usize) {
        let monster = &self.work.monsters[index];
        let stacks = monster
            .status(STATUS_BURN)
            .map_or(1, |burn| burn.stacks + 1)
            .min(self.config.burn_max_stacks.max(1));
        let burn = StatusEffect::new(STATUS_BURN, self.config.burn_rounds).with_stacks(stacks);
        self.acc.status(StatusChange::new(
            StatusTarget::Monster(monster.id.clone()),
            StatusOp::Refresh,
            burn,
        ));
    }

    fn on_hit(&mut self, target: usize, damage: i64, skill_id: Option<&str>) {
        // Only artifacts are taken from on-hit calls.
        self.consult(
            HookName::Status,
            HookPhase::OnHit { damage },
            Side::Player,
            Some(Side::Monster(target)),
            skill_id,
        );
    }

    /// One hit from the player's side against a monster, including the
    /// monster's defensive modifiers.
    fn strike_monster(
        &mut self,
        attacker: &Combatant,
        index: usize,
        spec: &DamageSpec,
        mults: &Multipliers,
        tag: &str,
    ) -> DamageBreakdown {
        let defender = &self.work.monsters[index];
        let mut system = mults.damage_mult;
        if spec.damage_type == DamageType::Physical && defender.has_tag(TAG_SPIRIT) {
            system *= self.config.spirit_physical_mult;
        }
        if defender.has_status(STATUS_GUARD) {
            system *= self.config.guard_factor;
        }
        let hit = compute_damage(attacker, defender, spec, system, mults.flat_damage, &mut self.rng, tag);

        let round = self.round;
        let clung = self.wound_monster(index, hit.damage);
        let target_id = self.work.monsters[index].id.clone();

        let verb = if hit.kind == HitKind::Crit { "critically hits" } else { "hits" };
        self.log(
            LogEntry::new(
                LogKind::Damage,
                tag.trim_end_matches(".crit"),
                format!("{} {} {} for {}", attacker.id, verb, target_id, hit.damage),
                round,
            )
            .between(&attacker.id, &target_id)
            .with_meta("damage", hit.damage)
            .with_meta("breakdown", breakdown_value(&hit)),
        );
        if clung {
            self.log_undying(&target_id);
        }
        hit
    }

    fn summon_turn(&mut self) {
        let standing = self.origin.player.summons.len();
        let spec = self.config.summon.clone();
        for index in 0..standing {
            let Some(target) = self.work.select_target() else {
                break;
            };
            let summon = &self.work.player.summons[index];
            let attacker = Combatant::new(summon.id.clone(), 1, summon.atk);
            let tag = format!("summon.{}.crit", summon.id);
            self.strike_monster(&attacker, target, &spec, &Multipliers::IDENTITY, &tag);
            let summon = &mut self.work.player.summons[index];
            summon.rounds = summon.rounds.saturating_sub(1);
        }
    }

    fn monster_phase(&mut self, player: &Multipliers) {
        let guarded = self.origin.player.has_status(STATUS_GUARD);
        let immune = self.origin.player.has_status(STATUS_IMMUNE);

        for index in 0..self.work.monsters.len() {
            if !self.work.player.is_alive() {
                break;
            }
            if !self.work.monsters[index].is_alive() {
                continue;
            }
            let mut mults = self.scripted(index);
            let status = self.consult(
                HookName::Status,
                HookPhase::MonsterStatus,
                Side::Monster(index),
                Some(Side::Player),
                None,
            );
            mults.absorb(status.as_ref());
            let ai = self.consult(
                HookName::Ai,
                HookPhase::MonsterDecision,
                Side::Monster(index),
                Some(Side::Player),
                None,
            );
            mults.absorb(ai.as_ref());
            let decision = ai.and_then(|result| result.decision).unwrap_or_default();

            let id = self.work.monsters[index].id.clone();
            match decision {
                AiDecision::Basic => {
                    let spec = self.config.monster_basic.clone();
                    self.monster_attack(index, &spec, 1.0, &mults, player, guarded, immune);
                }
                AiDecision::Skill => {
                    let spec = self.config.monster_skill.clone();
                    let extra = self.config.monster_skill_mult;
                    self.monster_attack(index, &spec, extra, &mults, player, guarded, immune);
                }
                AiDecision::Defend => {
                    self.acc.status(StatusChange::new(
                        StatusTarget::Monster(id.clone()),
                        StatusOp::Refresh,
                        StatusEffect::new(STATUS_GUARD, 1),
                    ));
                    self.log(LogEntry::new(LogKind::Action, "defend", format!("{} braces", id), self.round));
                }
                AiDecision::SwitchTarget => {
                    self.work.active_target = Some(id.clone());
                    self.log(LogEntry::new(
                        LogKind::Action,
                        "switch_target",
                        format!("{} draws attention", id),
                        self.round,
                    ));
                }
            }
        }
    }

    /// Tag-driven offensive behavior of a monster.
    fn scripted(&mut self, index: usize) -> Multipliers {
        let monster = &self.work.monsters[index];
        let mut mults = Multipliers::IDENTITY;
        if monster.has_tag(TAG_ELITE) {
            mults.damage_mult *= self.config.elite_mult;
        }
        if monster.has_tag(TAG_ENRAGE) && monster.hp * 2 < monster.max_hp {
            mults.damage_mult *= self.config.enrage_mult;
            let id = monster.id.clone();
            self.log(LogEntry::new(LogKind::Status, "enrage", format!("{} is enraged", id), self.round));
        }
        mults
    }

    #[allow(clippy::too_many_arguments)]
    fn monster_attack(
        &mut self,
        index: usize,
        spec: &DamageSpec,
        extra: f64,
        mults: &Multipliers,
        player: &Multipliers,
        guarded: bool,
        immune: bool,
    ) {
        let id = self.work.monsters[index].id.clone();
        let player_id = self.work.player.id.clone();
        if immune {
            self.log(
                LogEntry::new(LogKind::Status, "immune", format!("{} is untouchable", player_id), self.round)
                    .between(&id, &player_id),
            );
            return;
        }
        let mut system = mults.damage_mult * extra * player.taken_mult;
        if guarded {
            system *= self.config.guard_factor;
        }
        let tag = format!("monster.{}.crit", id);
        let hit = compute_damage(
            &self.work.monsters[index],
            &self.work.player,
            spec,
            system,
            mults.flat_damage,
            &mut self.rng,
            &tag,
        );
        let player = &mut self.work.player;
        player.hp = (player.hp - hit.damage).max(0);
        let verb = if hit.kind == HitKind::Crit { "critically hits" } else { "hits" };
        self.log(
            LogEntry::new(
                LogKind::Damage,
                format!("monster.{}", id),
                format!("{} {} {} for {}", id, verb, player_id, hit.damage),
                self.round,
            )
            .between(&id, &player_id)
            .with_meta("damage", hit.damage)
            .with_meta("breakdown", breakdown_value(&hit)),
        );
    }

    fn defeat_check(&mut self) -> RoundResult {
        if self.work.player.is_alive() {
            return RoundResult::Draw;
        }
        let Some(revive) = self.work.player.status(STATUS_REVIVE).cloned() else {
            self.log(LogEntry::new(LogKind::System, "defeat", "the player falls", self.round));
            return RoundResult::Lose;
        };
        self.acc.status(StatusChange::new(StatusTarget::Player, StatusOp::Remove, revive));
        self.acc.status(StatusChange::new(
            StatusTarget::Player,
            StatusOp::Add,
            StatusEffect::new(STATUS_IMMUNE, 1),
        ));
        self.work.player.hp = 1;
        self.acc.flag(FLAG_REVIVED, Value::Bool(true));
        self.log(LogEntry::new(LogKind::Status, "revive", "the player rises again", self.round));
        RoundResult::Draw
    }

    fn finish(mut self, result: RoundResult) -> RoundOutput {
        let mut changes = std::mem::take(&mut self.acc.status_changes);
        let decay = decay_untouched(&self.work, &changes);
        changes.extend(decay);
        let mut next = apply_status_changes(&self.work, &changes);
        next.round = self.round;
        next.player.summons.retain(|summon| summon.rounds > 0);

        let delta = RoundDelta::between(self.origin, &next);
        let mut meta = self.meta;
        meta.rng_draws = self.rng.into_tags();
        let mut effects = self.acc.effects;
        if let Some(key) = &meta.delta_key {
            for effect in effects.iter_mut().filter(|effect| effect.delta_key.is_none()) {
                effect.delta_key = Some(key.clone());
            }
        }
        RoundOutput {
            result,
            delta,
            logs: self.acc.logs,
            effects,
            status_changes: changes,
            flags: self.acc.flags,
            meta,
            next_snapshot: next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::damage::DamageType;
    use crate::output::Effect;
    use crate::rng::{FixedSource, Lcg};
    use crate::rules::{Hook, HookError, FLAG_RULE_ERROR};
    use crate::snapshot::Environment;

    fn duel() -> CombatSnapshot {
        CombatSnapshot::new(
            Combatant::new("hero", 100, 10.0),
            vec![Combatant::new("m1", 50, 5.0)],
            Environment::default(),
        )
    }

    fn resolve(snapshot: &CombatSnapshot, options: &RunOptions) -> RoundOutput {
        let mut rng = FixedSource::new(0.99);
        run(snapshot, Some(&mut rng), options)
    }

    #[test]
    fn basic_exchange_is_a_draw() {
        let output = resolve(&duel(), &RunOptions::default());
        assert_eq!(output.result, RoundResult::Draw);
        assert_eq!(output.delta.player_hp, -5);
        assert_eq!(output.delta.monster_hp, -10);
        assert_eq!(output.next_snapshot.round, 1);
        assert_eq!(output.meta.rng_draws, vec!["player.basic.crit", "monster.m1.crit"]);
    }

    #[test]
    fn defeated_roster_wins_without_monster_logs() {
        let mut snapshot = duel();
        snapshot.monsters[0].hp = 0;
        let output = resolve(&snapshot, &RunOptions::default());
        assert_eq!(output.result, RoundResult::Win);
        assert!(output
            .logs
            .iter()
            .all(|log| log.source_id.as_deref() != Some("m1")));
        assert!(output.meta.rng_draws.is_empty());
    }

    #[test]
    fn killing_blow_skips_monster_phase() {
        let mut snapshot = duel();
        snapshot.monsters[0].hp = 10;
        let output = resolve(&snapshot, &RunOptions::default());
        assert_eq!(output.result, RoundResult::Win);
        assert_eq!(output.delta.player_hp, 0);
    }

    #[test]
    fn single_round_status_expires() {
        let mut snapshot = duel();
        snapshot.player.statuses.push(StatusEffect::new("focus", 1));
        let output = resolve(&snapshot, &RunOptions::default());
        assert!(!output.next_snapshot.player.has_status("focus"));
        assert!(output
            .status_changes
            .iter()
            .any(|change| change.op == StatusOp::Expire && change.status.id == "focus"));
    }

    #[test]
    fn missing_rng_is_reported_not_raised() {
        let snapshot = duel();
        let output = run(&snapshot, None, &RunOptions::default());
        assert!(output.flag(FLAG_INVALID_RNG));
        assert_eq!(output.logs.len(), 1);
        assert_eq!(output.next_snapshot, snapshot);
        assert!(output.delta.is_empty());
    }

    #[test]
    fn resolution_is_pure() {
        let snapshot = duel();
        let before = snapshot.clone();
        let mut first_rng = Lcg::from_seed(17).unwrap();
        let mut second_rng = Lcg::from_seed(17).unwrap();
        let first = run(&snapshot, Some(&mut first_rng), &RunOptions::default());
        let second = run(&snapshot, Some(&mut second_rng), &RunOptions::default());
        assert_eq!(snapshot, before);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn failing_hook_does_not_abort_the_round() {
        let options = RunOptions {
            rules: RuleHooks {
                status: Some(Hook::new("cursed", |_| Err(HookError::new("bad table")))),
                ..RuleHooks::default()
            },
            ..RunOptions::default()
        };
        let output = resolve(&duel(), &options);
        assert_eq!(output.result, RoundResult::Draw);
        assert!(output.flag(FLAG_RULE_ERROR));
        assert_eq!(output.delta.monster_hp, -10);
        assert!(output.logs.iter().any(|log| log.kind == LogKind::Rule));
    }

    #[test]
    fn hook_effects_carry_trace_and_delta_key() {
        let options = RunOptions {
            rules: RuleHooks {
                status: Some(Hook::new("loot", |input| {
                    if !matches!(input.phase, HookPhase::PlayerStatus) {
                        return Ok(None);
                    }
                    Ok(Some(RuleResult {
                        effects: vec![Effect::new("player", "gold", 2.0)],
                        ..RuleResult::default()
                    }))
                })),
                ..RuleHooks::default()
            },
            trace: CallTrace {
                source: "combat".to_string(),
                delta_key: Some("combat:7".to_string()),
            },
            ..RunOptions::default()
        };
        let output = resolve(&duel(), &options);
        assert_eq!(output.effects.len(), 1);
        assert_eq!(output.effects[0].delta_key.as_deref(), Some("combat:7"));
        assert_eq!(output.effects[0].trace.as_ref().map(|t| t.rule.as_str()), Some("loot"));
    }

    #[test]
    fn revive_status_saves_the_player_once() {
        let mut snapshot = duel();
        snapshot.player.hp = 3;
        snapshot.player.statuses.push(StatusEffect::new(STATUS_REVIVE, 5));
        let output = resolve(&snapshot, &RunOptions::default());
        assert_eq!(output.result, RoundResult::Draw);
        assert!(output.flag(FLAG_REVIVED));
        let player = &output.next_snapshot.player;
        assert_eq!(player.hp, 1);
        assert!(!player.has_status(STATUS_REVIVE));
        assert!(player.has_status(STATUS_IMMUNE));
    }

    #[test]
    fn defeat_without_revive_loses() {
        let mut snapshot = duel();
        snapshot.player.hp = 3;
        let output = resolve(&snapshot, &RunOptions::default());
        assert_eq!(output.result, RoundResult::Lose);
        assert_eq!(output.next_snapshot.player.hp, 0);
    }

    #[test]
    fn immune_player_takes_no_damage() {
        let mut snapshot = duel();
        snapshot.player.statuses.push(StatusEffect::new(STATUS_IMMUNE, 1));
        let output = resolve(&snapshot, &RunOptions::default());
        assert_eq!(output.delta.player_hp, 0);
        assert!(!output.next_snapshot.player.has_status(STATUS_IMMUNE));
    }

    #[test]
    fn unaffordable_skill_falls_back_to_basic() {
        let skill = Skill::new("nova", 10, DamageSpec::new(DamageType::Spell, 50.0));
        let options = RunOptions {
            action: ActionChoice::SkillOverride(skill),
            ..RunOptions::default()
        };
        let output = resolve(&duel(), &options);
        assert_eq!(output.delta.monster_hp, -10);
        assert!(output.logs.iter().any(|log| log.tag == "insufficient_resources"));
    }

    #[test]
    fn double_hit_burn_skill_stacks_behaviors() {
        let skill = Skill::new("twin-flame", 4, DamageSpec::new(DamageType::Spell, 6.0).crit(false))
            .with_tag(SkillTag::DoubleHit)
            .with_tag(SkillTag::Burn);
        let mut snapshot = duel();
        snapshot.player = snapshot.player.with_mana(10, 10).with_skill(skill);
        let options = RunOptions {
            action: ActionChoice::NamedSkill("twin-flame".to_string()),
            ..RunOptions::default()
        };
        let output = resolve(&snapshot, &options);
        assert_eq!(output.delta.monster_hp, -12);
        assert_eq!(output.delta.player_mp, -4);
        let burn = output.next_snapshot.monsters[0].status(STATUS_BURN).unwrap();
        assert_eq!(burn.duration, 2);

        let next = resolve(&output.next_snapshot, &RunOptions::default());
        // 50 max hp at 5% is 2, then a 10 point basic attack.
        assert_eq!(next.delta.monster_hp, -12);
    }

    #[test]
    fn undying_monster_survives_first_lethal_hit() {
        let mut snapshot = duel();
        snapshot.monsters[0] = Combatant::new("m1", 5, 5.0).with_tag(TAG_UNDYING_ONCE);
        let output = resolve(&snapshot, &RunOptions::default());
        let monster = &output.next_snapshot.monsters[0];
        assert_eq!(monster.hp, 1);
        assert!(!monster.has_tag(TAG_UNDYING_ONCE));
        assert_eq!(output.result, RoundResult::Draw);
    }

    #[test]
    fn defend_halves_the_next_hit() {
        let options = RunOptions {
            rules: RuleHooks {
                ai: Some(Hook::new("turtle", |_| {
                    Ok(Some(RuleResult {
                        decision: Some(AiDecision::Defend),
                        ..RuleResult::default()
                    }))
                })),
                ..RuleHooks::default()
            },
            ..RunOptions::default()
        };
        let first = resolve(&duel(), &options);
        assert_eq!(first.delta.player_hp, 0);
        assert!(first.next_snapshot.monsters[0].has_status(STATUS_GUARD));

        let second = resolve(&first.next_snapshot, &RunOptions::default());
        assert_eq!(second.delta.monster_hp, -5);
        assert!(!second.next_snapshot.monsters[0].has_status(STATUS_GUARD));
    }

    #[test]
    fn summons_attack_from_the_following_round() {
        let call = Skill::new("wolf", 0, DamageSpec::new(DamageType::Technique, 0.0))
            .with_tag(SkillTag::Summon);
        let mut snapshot = duel();
        snapshot.monsters[0] = Combatant::new("m1", 500, 5.0);
        let options = RunOptions {
            action: ActionChoice::SkillOverride(call),
            ..RunOptions::default()
        };
        let first = resolve(&snapshot, &options);
        assert_eq!(first.delta.monster_hp, 0);
        assert_eq!(first.next_snapshot.player.summons.len(), 1);

        let second = resolve(&first.next_snapshot, &RunOptions::default());
        // Basic 10 plus a summon at half the player's attack.
        assert_eq!(second.delta.monster_hp, -15);
        assert_eq!(second.next_snapshot.player.summons[0].rounds, 2);
    }

    #[test]
    fn suppression_scales_both_directions() {
        let mut snapshot = duel();
        snapshot.player.realm = 1;
        let options = RunOptions {
            enable_realm_suppression: true,
            ..RunOptions::default()
        };
        let output = resolve(&snapshot, &options);
        assert_eq!(output.delta.monster_hp, -15);
        assert_eq!(output.delta.player_hp, -2);
    }

    fn cast_once(snapshot: &CombatSnapshot, skill: Skill) -> RoundOutput {
        let options = RunOptions {
            action: ActionChoice::SkillOverride(skill),
            ..RunOptions::default()
        };
        resolve(snapshot, &options)
    }

    fn ai_options(decide: fn(&Combatant) -> AiDecision) -> RunOptions {
        RunOptions {
            rules: RuleHooks {
                ai: Some(Hook::new("script", move |input| {
                    Ok(Some(RuleResult {
                        decision: Some(decide(input.actor)),
                        ..RuleResult::default()
                    }))
                })),
                ..RuleHooks::default()
            },
            ..RunOptions::default()
        }
    }

    fn spell(id: &str, base: f64) -> Skill {
        Skill::new(id, 0, DamageSpec::new(DamageType::Spell, base).crit(false))
    }

    #[test]
    fn area_skill_hits_every_living_monster() {
        let mut snapshot = duel();
        snapshot.monsters.push(Combatant::new("m2", 50, 5.0));
        snapshot.monsters.push(Combatant::new("m3", 0, 5.0));
        let output = cast_once(&snapshot, spell("sweep", 8.0).with_tag(SkillTag::Area));
        let hp: Vec<i64> = output.next_snapshot.monsters.iter().map(|m| m.hp).collect();
        assert_eq!(hp, vec![42, 42, 0]);
        assert_eq!(output.delta.player_hp, -10);
    }

    #[test]
    fn drain_heals_half_the_damage_dealt() {
        let mut snapshot = duel();
        snapshot.player.hp = 60;
        let output = cast_once(&snapshot, spell("leech", 20.0).with_tag(SkillTag::Drain));
        // 60 + 10 drained - 5 taken.
        assert_eq!(output.next_snapshot.player.hp, 65);
        assert_eq!(output.next_snapshot.monsters[0].hp, 30);
        assert!(output.logs.iter().any(|log| log.tag == "drain"));
    }

    #[test]
    fn polarity_invert_flips_the_field() {
        let mut snapshot = duel();
        snapshot.env.polarity = 0.5;
        let output = cast_once(&snapshot, spell("mirror", 1.0).with_tag(SkillTag::PolarityInvert));
        assert_eq!(output.next_snapshot.env.polarity, -0.5);
        assert_eq!(snapshot.env.polarity, 0.5);
    }

    #[test]
    fn shield_guards_the_player_next_round() {
        let output = cast_once(&duel(), spell("ward", 1.0).with_tag(SkillTag::Shield));
        assert_eq!(output.delta.player_hp, -5);
        assert!(output.next_snapshot.player.has_status(STATUS_GUARD));

        let next = resolve(&output.next_snapshot, &RunOptions::default());
        assert_eq!(next.delta.player_hp, -2);
        assert!(!next.next_snapshot.player.has_status(STATUS_GUARD));
    }

    #[test]
    fn hp_cost_is_paid_on_cast() {
        let output = cast_once(&duel(), spell("blood", 12.0).with_hp_cost(8));
        assert_eq!(output.delta.player_hp, -13);
        assert_eq!(output.delta.monster_hp, -12);

        let mut frail = duel();
        frail.player.hp = 8;
        let output = cast_once(&frail, spell("blood", 12.0).with_hp_cost(8));
        assert!(output.logs.iter().any(|log| log.tag == "insufficient_resources"));
        assert_eq!(output.delta.monster_hp, -10);
    }

    #[test]
    fn spirit_monsters_shrug_off_physical_hits() {
        let mut snapshot = duel();
        snapshot.monsters[0] = Combatant::new("wisp", 50, 5.0).with_tag(TAG_SPIRIT);
        let basic = resolve(&snapshot, &RunOptions::default());
        assert_eq!(basic.delta.monster_hp, -5);

        let magic = cast_once(&snapshot, spell("bolt", 10.0));
        assert_eq!(magic.delta.monster_hp, -10);
    }

    #[test]
    fn elite_monsters_hit_harder() {
        let mut snapshot = duel();
        snapshot.monsters[0] = Combatant::new("captain", 50, 5.0).with_tag(TAG_ELITE);
        let output = resolve(&snapshot, &RunOptions::default());
        assert_eq!(output.delta.player_hp, -6);
    }

    #[test]
    fn enrage_kicks_in_below_half_health() {
        let mut snapshot = duel();
        snapshot.monsters[0] = Combatant::new("boar", 50, 5.0).with_tag(TAG_ENRAGE);
        let calm = resolve(&snapshot, &RunOptions::default());
        assert_eq!(calm.delta.player_hp, -5);
        assert!(calm.logs.iter().all(|log| log.tag != "enrage"));

        snapshot.monsters[0].hp = 20;
        let angry = resolve(&snapshot, &RunOptions::default());
        assert_eq!(angry.delta.player_hp, -7);
        assert!(angry.logs.iter().any(|log| log.tag == "enrage"));
    }

    #[test]
    fn ai_skill_uses_the_monster_skill_multiplier() {
        let output = resolve(&duel(), &ai_options(|_| AiDecision::Skill));
        assert_eq!(output.delta.player_hp, -7);
    }

    #[test]
    fn switch_target_draws_the_next_player_attack() {
        let mut snapshot = duel();
        snapshot.monsters.push(Combatant::new("m2", 50, 5.0));
        let options = ai_options(|actor| {
            if actor.id == "m2" {
                AiDecision::SwitchTarget
            } else {
                AiDecision::Basic
            }
        });
        let first = resolve(&snapshot, &options);
        assert_eq!(first.delta.player_hp, -5);
        assert_eq!(first.next_snapshot.active_target.as_deref(), Some("m2"));
        assert!(first.logs.iter().any(|log| log.tag == "switch_target"));

        let second = resolve(&first.next_snapshot, &RunOptions::default());
        assert_eq!(second.next_snapshot.monsters[0].hp, 40);
        assert_eq!(second.next_snapshot.monsters[1].hp, 40);
    }

    #[test]
    fn realm_hook_replaces_default_suppression() {
        let mut snapshot = duel();
        snapshot.player.realm = 1;
        let options = RunOptions {
            enable_realm_suppression: true,
            rules: RuleHooks {
                realm: Some(Hook::new("flat_realm", |input| {
                    assert!(matches!(input.phase, HookPhase::Suppression));
                    Ok(Some(RuleResult {
                        damage_mult: Some(2.0),
                        ..RuleResult::default()
                    }))
                })),
                ..RuleHooks::default()
            },
            ..RunOptions::default()
        };
        let output = resolve(&snapshot, &options);
        assert_eq!(output.delta.monster_hp, -20);
        assert_eq!(output.delta.player_hp, -5);
    }

    #[test]
    fn burn_cannot_finish_an_undying_monster() {
        let mut snapshot = duel();
        let mut monster = Combatant::new("m1", 50, 5.0)
            .with_tag(TAG_UNDYING_ONCE)
            .with_status(StatusEffect::new(STATUS_BURN, 2));
        monster.hp = 2;
        snapshot.monsters[0] = monster;
        let output = resolve(&snapshot, &RunOptions::default());
        let tags: Vec<&str> = output.logs.iter().map(|log| log.tag.as_str()).collect();
        let burn = tags.iter().position(|tag| *tag == "burn").unwrap();
        assert_eq!(tags[burn + 1], "undying");
        // The burn left it at 1; the basic attack then lands.
        assert_eq!(output.result, RoundResult::Win);
        assert!(!output.next_snapshot.monsters[0].has_tag(TAG_UNDYING_ONCE));
    }
}
