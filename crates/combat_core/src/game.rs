//! Game controller.
//!
//! The [`Controller`] is the single owner of the persistent [`GameState`].
//! Every public entry point issues a provenance key, performs exactly one state
//! transition through the application boundary in [`crate::reduce`], and
//! appends one replay action when recording is active.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::{ActionChoice, CallTrace, Engine, ResolutionEngine, RunOptions};
use crate::event::EventResult;
use crate::fixed::{floor_amount, TALISMAN_REVIVE_FRACTION};
use crate::hash::hash_value;
use crate::output::{Effect, RoundOutput, RoundResult};
use crate::provenance::{DeltaKey, DeltaKind};
use crate::reduce::{
    apply_effects, apply_round, apply_story, ApplyError, TARGET_INVENTORY, TARGET_PLAYER,
    TARGET_WORLD, WORLD_TENDENCY,
};
use crate::replay::{
    EncounterPayload, ReplayAction, ReplayError, ReplayLog, ReplayRecorder, RoundPayload,
    TickPayload, ACTION_ENCOUNTER, ACTION_ROUND, ACTION_STORY, ACTION_TICK,
};
use crate::rng::Lcg;
use crate::rules::RuleHooks;
use crate::snapshot::{CombatSnapshot, Combatant, Environment};
use crate::world::{GameState, FLAG_LAST_ENCOUNTER, ITEM_TALISMAN};

/// Rounds an encounter may last before it is called off.
pub const DEFAULT_MAX_ROUNDS: u32 = 200;

pub struct Controller {
    state: GameState,
    engine: Arc<dyn ResolutionEngine>,
    hooks: RuleHooks,
    recorder: Option<ReplayRecorder>,
    captured: Vec<String>,
    max_rounds: u32,
}

impl Controller {
    pub fn new(state: GameState) -> Self {
        Self::with_engine(state, Arc::new(Engine::default()))
    }

    pub fn with_engine(state: GameState, engine: Arc<dyn ResolutionEngine>) -> Self {
        Self {
            state,
            engine,
            hooks: RuleHooks::default(),
            recorder: None,
            captured: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn hooks(mut self, hooks: RuleHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn engine(&self) -> &Arc<dyn ResolutionEngine> {
        &self.engine
    }

    pub fn state_hash(&self) -> Result<String> {
        hash_value(&self.state).context("game state is not serializable")
    }

    /// Combat and story log lines captured since the last drain.
    pub fn drain_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.captured)
    }

    pub fn start_recording(&mut self) {
        self.recorder = Some(ReplayRecorder::new(self.state.clone()));
    }

    pub fn finish_recording(&mut self) -> Option<ReplayLog> {
        self.recorder.take().map(ReplayRecorder::finish)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    fn record<P: Serialize>(&mut self, kind: &str, payload: &P, key: &DeltaKey) -> Result<()> {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(kind, payload, key)?;
        }
        Ok(())
    }

    fn report_rejections(&mut self, rejected: Vec<ApplyError>) {
        for err in rejected {
            self.captured.push(format!("rejected: {}", err));
        }
    }

    pub fn begin_encounter(&mut self, monsters: Vec<Combatant>, env: Environment) -> Result<DeltaKey> {
        ensure!(!monsters.is_empty(), "an encounter needs at least one monster");
        ensure!(
            self.state.encounter.is_none(),
            "an encounter is already in progress"
        );
        let key = self.state.seq.issue(DeltaKind::Combat);
        let payload = EncounterPayload { monsters, env };
        let snapshot = CombatSnapshot::new(
            self.state.player.clone(),
            payload.monsters.clone(),
            payload.env.clone(),
        );
        self.state.world.map_id = snapshot.env.map_id.clone();
        self.state.world.difficulty = snapshot.env.difficulty;
        self.state.encounter = Some(snapshot);
        self.captured.push(format!(
            "encounter begins against {} foe(s)",
            payload.monsters.len()
        ));
        self.record(ACTION_ENCOUNTER, &payload, &key)?;
        Ok(key)
    }

    /// Resolve one round of the active encounter and commit it.
    pub fn combat_round(
        &mut self,
        action: ActionChoice,
        enable_realm_suppression: bool,
    ) -> Result<RoundOutput> {
        let Some(snapshot) = self.state.encounter.clone() else {
            bail!("no encounter in progress");
        };
        let key = self.state.seq.issue(DeltaKind::Combat);
        let mut rng = Lcg::restore(self.state.rng.clone())?;
        let payload = RoundPayload {
            action,
            enable_realm_suppression,
        };
        let options = RunOptions {
            action: payload.action.clone(),
            rules: self.hooks.clone(),
            trace: CallTrace {
                source: "combat".to_string(),
                delta_key: Some(key.to_string()),
            },
            enable_realm_suppression,
        };
        let output = self.engine.resolve(&snapshot, Some(&mut rng), &options);
        self.state.rng = rng.snapshot();

        let rejected = apply_round(&mut self.state, &output);
        self.report_rejections(rejected);
        self.captured.extend(output.logs.iter().map(|log| log.text.clone()));

        match output.result {
            RoundResult::Win => self.conclude_win(&output.next_snapshot),
            RoundResult::Lose => self.conclude_loss(),
            RoundResult::Draw if output.next_snapshot.round >= self.max_rounds => {
                warn!(round = output.next_snapshot.round, "encounter exceeded its round budget");
                self.captured.push("the fight is called off".to_string());
                self.end_encounter("stalemate");
            }
            RoundResult::Draw => {}
        }

        self.record(ACTION_ROUND, &payload, &key)?;
        Ok(output)
    }

    fn end_encounter(&mut self, outcome: &str) {
        self.state.encounter = None;
        self.state
            .story
            .flags
            .insert(FLAG_LAST_ENCOUNTER.to_string(), Value::from(outcome));
    }

    fn conclude_win(&mut self, last: &CombatSnapshot) {
        let key = self.state.seq.issue(DeltaKind::World);
        let mut shift = Effect::new(TARGET_WORLD, WORLD_TENDENCY, last.env.polarity);
        shift.delta_key = Some(key.to_string());
        let rejected = apply_effects(&mut self.state, &[shift]);
        self.report_rejections(rejected);
        self.end_encounter("win");
    }

    fn conclude_loss(&mut self) {
        if self.state.item_count(ITEM_TALISMAN) <= 0 {
            self.end_encounter("lose");
            return;
        }
        let key = self.state.seq.issue(DeltaKind::World);
        let player = &self.state.player;
        let restored = floor_amount(player.max_hp as f64 * TALISMAN_REVIVE_FRACTION).max(1);
        let mut effects = vec![
            Effect::new(TARGET_INVENTORY, ITEM_TALISMAN, -1.0),
            Effect::new(TARGET_PLAYER, "hp", (restored - player.hp) as f64),
        ];
        for effect in &mut effects {
            effect.delta_key = Some(key.to_string());
        }
        let rejected = apply_effects(&mut self.state, &effects);
        self.report_rejections(rejected);
        self.captured.push("the talisman crumbles and the fight goes on".to_string());
    }

    pub fn apply_story_event(&mut self, mut event: EventResult) -> Result<DeltaKey> {
        let key = self.state.seq.issue(DeltaKind::Story);
        for effect in event.effects.iter_mut().filter(|e| e.delta_key.is_none()) {
            effect.delta_key = Some(key.to_string());
        }
        if let Some(export) = event.exported.as_mut() {
            export.delta_key.get_or_insert_with(|| key.to_string());
        }
        let rejected = apply_story(&mut self.state, &event);
        self.report_rejections(rejected);
        self.captured.extend(event.logs.iter().map(|log| log.text.clone()));
        self.record(ACTION_STORY, &event, &key)?;
        Ok(key)
    }

    /// Advance the clock by one tick.
    pub fn advance_time(&mut self) -> Result<DeltaKey> {
        let key = self.state.seq.issue(DeltaKind::Time);
        self.state.time += 1;
        self.record(ACTION_TICK, &TickPayload {}, &key)?;
        Ok(key)
    }

    /// Re-drive the entry point a recorded action came from.
    pub fn dispatch(&mut self, action: &ReplayAction) -> Result<()> {
        debug!(seq = action.seq, kind = %action.kind, key = %action.delta_key, "replaying action");
        let issued = match action.kind.as_str() {
            ACTION_ENCOUNTER => {
                let payload: EncounterPayload = decode(action)?;
                self.begin_encounter(payload.monsters, payload.env)?.to_string()
            }
            ACTION_ROUND => {
                let payload: RoundPayload = decode(action)?;
                let output = self.combat_round(payload.action, payload.enable_realm_suppression)?;
                output.meta.delta_key.unwrap_or_default()
            }
            ACTION_STORY => self.apply_story_event(decode(action)?)?.to_string(),
            ACTION_TICK => self.advance_time()?.to_string(),
            other => return Err(ReplayError::UnknownAction(other.to_string()).into()),
        };
        if issued != action.delta_key {
            debug!(recorded = %action.delta_key, %issued, "provenance key drifted");
        }
        Ok(())
    }

    /// Swap in `baseline` (and optionally another engine) for an analysis
    /// pass. The live state, engine, recorder and captured logs come back when
    /// the returned guard drops, however the pass ends.
    pub fn live_pass(
        &mut self,
        baseline: &GameState,
        engine: Option<Arc<dyn ResolutionEngine>>,
    ) -> LivePass<'_> {
        let engine = engine.unwrap_or_else(|| self.engine.clone());
        let saved = Saved {
            state: std::mem::replace(&mut self.state, baseline.clone()),
            engine: std::mem::replace(&mut self.engine, engine),
            recorder: self.recorder.take(),
            captured: std::mem::take(&mut self.captured),
        };
        debug!(engine = self.engine.revision(), "analysis pass started");
        LivePass {
            controller: self,
            saved: Some(saved),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(action: &ReplayAction) -> Result<T> {
    serde_json::from_value(action.payload.clone())
        .with_context(|| format!("malformed payload in action {} ({})", action.seq, action.kind))
}

struct Saved {
    state: GameState,
    engine: Arc<dyn ResolutionEngine>,
    recorder: Option<ReplayRecorder>,
    captured: Vec<String>,
}

pub struct LivePass<'c> {
    controller: &'c mut Controller,
    saved: Option<Saved>,
}

impl Deref for LivePass<'_> {
    type Target = Controller;

    fn deref(&self) -> &Controller {
        self.controller
    }
}

impl DerefMut for LivePass<'_> {
    fn deref_mut(&mut self) -> &mut Controller {
        self.controller
    }
}

impl Drop for LivePass<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.controller.state = saved.state;
            self.controller.engine = saved.engine;
            self.controller.recorder = saved.recorder;
            self.controller.captured = saved.captured;
            debug!("live state restored");
        }
    }
}
