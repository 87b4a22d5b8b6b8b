//! Offline replay analysis.
//!
//! All three passes run inside [`Controller::live_pass`], so the controller's
//! live state is back in place when they return, including on error.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::{debug, info, warn};

use crate::engine::ResolutionEngine;
use crate::game::Controller;
use crate::hash::hash_json;
use crate::replay::{ReplayAction, ReplayLog, ACTION_TICK};
use crate::world::GameState;

/// State after one `tick` action.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineFrame {
    pub tick: u64,
    /// Sequence numbers of every action since the previous tick, this one
    /// included.
    pub actions: Vec<u64>,
    pub logs: Vec<String>,
    pub delta_key: String,
    pub hash: String,
    /// Hash of each top-level state field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceCause {
    Rng,
    Sequence,
    Time,
    Branch,
    World,
    Unknown,
}

impl DivergenceCause {
    fn of_field(field: &str) -> Option<Self> {
        match field {
            "rng" | "seed" => Some(DivergenceCause::Rng),
            "seq" => Some(DivergenceCause::Sequence),
            "time" => Some(DivergenceCause::Time),
            "story" => Some(DivergenceCause::Branch),
            "player" | "world" | "inventory" | "encounter" => Some(DivergenceCause::World),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            DivergenceCause::Rng => 0,
            DivergenceCause::Sequence => 1,
            DivergenceCause::Time => 2,
            DivergenceCause::Branch => 3,
            DivergenceCause::World => 4,
            DivergenceCause::Unknown => 5,
        }
    }

    /// Most specific cause among the differing top-level fields.
    pub fn classify<'a, I: IntoIterator<Item = &'a str>>(fields: I) -> Self {
        fields
            .into_iter()
            .filter_map(Self::of_field)
            .min_by_key(|cause| cause.rank())
            .unwrap_or(DivergenceCause::Unknown)
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub field: String,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MismatchReport {
    pub mismatch_tick: u64,
    pub last_good_tick: Option<u64>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub diff: Vec<FieldDiff>,
    pub cause: DivergenceCause,
    pub expected_rng_tag: Option<String>,
    pub actual_rng_tag: Option<String>,
    pub detail: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShadowReport {
    pub engine_a: String,
    pub engine_b: String,
    pub ticks: usize,
    pub mismatch: Option<MismatchReport>,
}

impl ShadowReport {
    pub fn is_match(&self) -> bool {
        self.mismatch.is_none()
    }
}

fn state_value(state: &GameState) -> Result<Value> {
    serde_json::to_value(state).context("game state is not serializable")
}

fn make_frame(
    controller: &mut Controller,
    action: &ReplayAction,
    pending: &mut Vec<u64>,
) -> Result<TimelineFrame> {
    let value = state_value(controller.state())?;
    let fields = match &value {
        Value::Object(map) => map
            .iter()
            .map(|(field, inner)| (field.clone(), hash_json(inner)))
            .collect(),
        _ => BTreeMap::new(),
    };
    Ok(TimelineFrame {
        tick: controller.state().time,
        actions: std::mem::take(pending),
        logs: controller.drain_logs(),
        delta_key: action.delta_key.clone(),
        hash: hash_json(&value),
        fields,
    })
}

/// Dispatch `actions` in order, handing each completed frame to `visit`.
/// Stops early when `visit` returns `false`.
fn drive<F>(controller: &mut Controller, actions: &[ReplayAction], mut visit: F) -> Result<()>
where
    F: FnMut(&mut Controller, TimelineFrame) -> Result<bool>,
{
    let mut pending = Vec::new();
    for action in actions {
        controller
            .dispatch(action)
            .with_context(|| format!("replay failed at action {}", action.seq))?;
        pending.push(action.seq);
        if action.kind == ACTION_TICK {
            let frame = make_frame(controller, action, &mut pending)?;
            debug!(tick = frame.tick, hash = %frame.hash, "frame reconstructed");
            if !visit(controller, frame)? {
                break;
            }
        }
    }
    Ok(())
}

/// Replay `log` from its baseline with the controller's engine and index the
/// state at every tick.
pub fn build_replay_timeline(controller: &mut Controller, log: &ReplayLog) -> Result<Vec<TimelineFrame>> {
    timeline_with(controller, log, None)
}

fn timeline_with(
    controller: &mut Controller,
    log: &ReplayLog,
    engine: Option<Arc<dyn ResolutionEngine>>,
) -> Result<Vec<TimelineFrame>> {
    let baseline = log.baseline()?;
    let mut pass = controller.live_pass(baseline, engine);
    let mut frames = Vec::new();
    drive(&mut pass, &log.actions, |_, frame| {
        frames.push(frame);
        Ok(true)
    })?;
    Ok(frames)
}

/// Replay `log` and stop at the first tick whose hash disagrees with
/// `expected`. `Ok(None)` means every expected tick matched.
pub fn verify_replay_mismatch(
    controller: &mut Controller,
    log: &ReplayLog,
    expected: &[TimelineFrame],
) -> Result<Option<MismatchReport>> {
    verify_with(controller, log, expected, None)
}

fn verify_with(
    controller: &mut Controller,
    log: &ReplayLog,
    expected: &[TimelineFrame],
    engine: Option<Arc<dyn ResolutionEngine>>,
) -> Result<Option<MismatchReport>> {
    let by_tick: BTreeMap<u64, &TimelineFrame> =
        expected.iter().map(|frame| (frame.tick, frame)).collect();
    let baseline = log.baseline()?;
    let mut pass = controller.live_pass(baseline, engine);

    let mut last_good = None;
    let mut report = None;
    let outcome = drive(&mut pass, &log.actions, |controller, frame| {
        let want = by_tick.get(&frame.tick).copied();
        if want.map(|w| w.hash.as_str()) == Some(frame.hash.as_str()) {
            last_good = Some(frame.tick);
            return Ok(true);
        }
        report = Some(mismatch(controller, &frame, want, last_good)?);
        Ok(false)
    });

    if let Err(err) = outcome {
        // A replay that cannot continue has diverged at the next expected tick.
        warn!(%err, "replay aborted during verification");
        let tick = by_tick
            .keys()
            .copied()
            .find(|&tick| Some(tick) > last_good)
            .unwrap_or_else(|| pass.state().time);
        let actual = pass.state();
        return Ok(Some(MismatchReport {
            mismatch_tick: tick,
            last_good_tick: last_good,
            expected_hash: by_tick.get(&tick).map(|frame| frame.hash.clone()),
            actual_hash: None,
            diff: Vec::new(),
            cause: DivergenceCause::Branch,
            expected_rng_tag: None,
            actual_rng_tag: actual.rng.last_tag.clone(),
            detail: Some(format!("{:#}", err)),
        }));
    }
    if report.is_none() {
        if let Some(missing) = by_tick.keys().copied().find(|&tick| Some(tick) > last_good) {
            report = Some(MismatchReport {
                mismatch_tick: missing,
                last_good_tick: last_good,
                expected_hash: by_tick.get(&missing).map(|frame| frame.hash.clone()),
                actual_hash: None,
                diff: Vec::new(),
                cause: DivergenceCause::Time,
                expected_rng_tag: None,
                actual_rng_tag: pass.state().rng.last_tag.clone(),
                detail: Some("replay ended before reaching this tick".to_string()),
            });
        }
    }
    Ok(report)
}

fn mismatch(
    controller: &Controller,
    frame: &TimelineFrame,
    want: Option<&TimelineFrame>,
    last_good: Option<u64>,
) -> Result<MismatchReport> {
    let actual = state_value(controller.state())?;
    let Some(want) = want else {
        return Ok(MismatchReport {
            mismatch_tick: frame.tick,
            last_good_tick: last_good,
            expected_hash: None,
            actual_hash: Some(frame.hash.clone()),
            diff: Vec::new(),
            cause: DivergenceCause::Time,
            expected_rng_tag: None,
            actual_rng_tag: controller.state().rng.last_tag.clone(),
            detail: Some("tick was not expected".to_string()),
        });
    };

    let mut names: Vec<&String> = want.fields.keys().chain(frame.fields.keys()).collect();
    names.sort();
    names.dedup();
    let diff: Vec<FieldDiff> = names
        .into_iter()
        .filter(|name| want.fields.get(*name) != frame.fields.get(*name))
        .map(|name| FieldDiff {
            field: name.clone(),
            expected_hash: want.fields.get(name).cloned(),
            actual_hash: frame.fields.get(name).cloned(),
            expected: None,
            actual: actual.get(name.as_str()).cloned(),
        })
        .collect();
    let cause = DivergenceCause::classify(diff.iter().map(|d| d.field.as_str()));
    Ok(MismatchReport {
        mismatch_tick: frame.tick,
        last_good_tick: last_good,
        expected_hash: Some(want.hash.clone()),
        actual_hash: Some(frame.hash.clone()),
        diff,
        cause,
        expected_rng_tag: None,
        actual_rng_tag: controller.state().rng.last_tag.clone(),
        detail: None,
    })
}

/// State the engine reaches at `tick` when replaying `log`.
fn state_at_tick(
    controller: &mut Controller,
    log: &ReplayLog,
    engine: Arc<dyn ResolutionEngine>,
    tick: u64,
) -> Result<Option<GameState>> {
    let baseline = log.baseline()?;
    let mut pass = controller.live_pass(baseline, Some(engine));
    let mut found = None;
    drive(&mut pass, &log.actions, |controller, frame| {
        if frame.tick == tick {
            found = Some(controller.state().clone());
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(found)
}

/// Replay `log` under `engine_a` to build the expected timeline, then under
/// `engine_b` to find the first tick where the two revisions disagree.
pub fn shadow_run(
    controller: &mut Controller,
    log: &ReplayLog,
    engine_a: Arc<dyn ResolutionEngine>,
    engine_b: Arc<dyn ResolutionEngine>,
) -> Result<ShadowReport> {
    let expected = timeline_with(controller, log, Some(engine_a.clone()))?;
    let mut mismatch = verify_with(controller, log, &expected, Some(engine_b.clone()))?;

    if let Some(report) = mismatch.as_mut() {
        if let Some(state) = state_at_tick(controller, log, engine_a.clone(), report.mismatch_tick)? {
            let value = state_value(&state)?;
            for diff in &mut report.diff {
                diff.expected = value.get(diff.field.as_str()).cloned();
            }
            report.expected_rng_tag = state.rng.last_tag.clone();
        }
        info!(
            engine_a = engine_a.revision(),
            engine_b = engine_b.revision(),
            tick = report.mismatch_tick,
            cause = ?report.cause,
            "shadow run diverged"
        );
    } else {
        info!(
            engine_a = engine_a.revision(),
            engine_b = engine_b.revision(),
            ticks = expected.len(),
            "shadow run matched"
        );
    }

    Ok(ShadowReport {
        engine_a: engine_a.revision().to_string(),
        engine_b: engine_b.revision().to_string(),
        ticks: expected.len(),
        mismatch,
    })
}
