use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use combat_core::config::EngineConfig;
use combat_core::engine::{ActionChoice, Engine, ResolutionEngine};
use combat_core::event::EventResult;
use combat_core::game::Controller;
use combat_core::io::frame::{read_frames_from_path, write_frames, write_frames_to_path};
use combat_core::io::scenario::{build_state, Scenario};
use combat_core::replay::ReplayLog;
use combat_core::rng::seed_from_phrase;
use combat_core::timeline::{build_replay_timeline, shadow_run, verify_replay_mismatch};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "combatstep",
    about = "Record, reconstruct and compare deterministic combat sessions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a scripted-random session from a scenario and save its replay log.
    Record(RecordArgs),
    /// Rebuild the per-tick timeline of a replay log as NDJSON.
    Timeline(TimelineArgs),
    /// Check a replay log against a previously built timeline.
    Verify(VerifyArgs),
    /// Replay a log under two engine revisions and report the first divergence.
    Shadow(ShadowArgs),
    /// Generate many random sessions and check each replays faithfully.
    Soak(SoakArgs),
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Path to the scenario JSON document.
    #[arg(long, value_name = "PATH")]
    scenario: PathBuf,

    /// Override the game seed.
    #[arg(long, value_name = "NUMBER", conflicts_with = "seed_phrase")]
    seed: Option<u32>,

    /// Derive the game seed from a phrase.
    #[arg(long = "seed-phrase", value_name = "TEXT")]
    seed_phrase: Option<String>,

    /// Rounds to play per session.
    #[arg(long, default_value_t = 20)]
    rounds: u32,

    /// Engine configuration; defaults to the built-in revision.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl SessionArgs {
    fn seed_override(&self) -> Option<u32> {
        self.seed
            .or_else(|| self.seed_phrase.as_deref().map(seed_from_phrase))
    }
}

#[derive(Args, Debug)]
struct RecordArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Output replay log path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct TimelineArgs {
    #[arg(long, value_name = "PATH")]
    log: PathBuf,

    /// Output NDJSON path; stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    #[arg(long, value_name = "PATH")]
    log: PathBuf,

    /// NDJSON timeline to check against.
    #[arg(long, value_name = "PATH")]
    expected: PathBuf,

    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ShadowArgs {
    #[arg(long, value_name = "PATH")]
    log: PathBuf,

    /// Configuration of the reference revision.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Configuration of the candidate revision.
    #[arg(long = "alt-config", value_name = "PATH")]
    alt_config: PathBuf,
}

#[derive(Args, Debug)]
struct SoakArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Number of sessions to generate.
    #[arg(long, default_value_t = 16)]
    sessions: u32,

    /// Also shadow every session against this configuration.
    #[arg(long = "alt-config", value_name = "PATH")]
    alt_config: Option<PathBuf>,
}

fn load_engine(path: Option<&Path>) -> Result<Arc<dyn ResolutionEngine>> {
    let config = match path {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    Ok(Arc::new(Engine::new(config)))
}

/// Analysis controller. Its own state is never used; passes swap in the
/// log's baseline.
fn analysis_controller(log: &ReplayLog, engine: Arc<dyn ResolutionEngine>) -> Result<Controller> {
    Ok(Controller::with_engine(log.baseline()?.clone(), engine))
}

/// Drive a recorded session with actions picked from `chooser`.
fn play_session(
    scenario: &Scenario,
    seed: Option<u32>,
    rounds: u32,
    engine: Arc<dyn ResolutionEngine>,
    chooser: &mut ChaCha8Rng,
) -> Result<(ReplayLog, String)> {
    let state = build_state(scenario, seed)?;
    let mut game = Controller::with_engine(state, engine);
    game.start_recording();
    let mut next_encounter = 0usize;

    for _ in 0..rounds {
        if !game.state().player.is_alive() {
            break;
        }
        if !game.state().in_encounter() {
            let template = &scenario.encounters[next_encounter % scenario.encounters.len()];
            next_encounter += 1;
            game.begin_encounter(template.monsters.clone(), template.env.clone())?;
        }
        let action = pick_action(&game, chooser);
        let output = game.combat_round(action, chooser.gen_bool(0.5))?;
        if output.result.is_terminal() {
            debug!(round = output.meta.round, result = ?output.result, "encounter concluded");
        }
        if chooser.gen_ratio(1, 6) {
            game.apply_story_event(forage(chooser))?;
        }
        game.advance_time()?;
    }

    let hash = game.state_hash()?;
    for line in game.drain_logs() {
        debug!(%line, "session log");
    }
    let log = game
        .finish_recording()
        .context("recording stopped before the session ended")?;
    Ok((log, hash))
}

fn pick_action(game: &Controller, chooser: &mut ChaCha8Rng) -> ActionChoice {
    let skills = &game.state().player.skills;
    if skills.is_empty() || chooser.gen_bool(0.5) {
        return ActionChoice::Basic;
    }
    let skill = &skills[chooser.gen_range(0..skills.len())];
    ActionChoice::NamedSkill(skill.id.clone())
}

fn forage(chooser: &mut ChaCha8Rng) -> EventResult {
    let mut event = EventResult {
        result: "forage".to_string(),
        ..EventResult::default()
    };
    event
        .delta
        .inventory_delta
        .insert("herb".to_string(), chooser.gen_range(1..=2));
    event
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, value)?;
    handle.write_all(b"\n")?;
    Ok(())
}

fn record(args: RecordArgs) -> Result<ExitCode> {
    let scenario = Scenario::load_from_path(&args.session.scenario)?;
    let engine = load_engine(args.session.config.as_deref())?;
    let seed = args.session.seed_override();
    let mut chooser = ChaCha8Rng::seed_from_u64(u64::from(scenario.resolve_seed(seed)));
    let (log, hash) = play_session(&scenario, seed, args.session.rounds, engine, &mut chooser)?;
    log.write_to_path(&args.out)?;
    info!(actions = log.actions.len(), %hash, out = ?args.out, "session recorded");
    Ok(ExitCode::SUCCESS)
}

fn timeline(args: TimelineArgs) -> Result<ExitCode> {
    let log = ReplayLog::load_from_path(&args.log)?;
    let mut controller = analysis_controller(&log, load_engine(args.config.as_deref())?)?;
    let frames = build_replay_timeline(&mut controller, &log)?;
    match &args.out {
        Some(path) => write_frames_to_path(path, &frames)?,
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            write_frames(&mut writer, &frames)?;
            writer.flush()?;
        }
    }
    info!(frames = frames.len(), "timeline written");
    Ok(ExitCode::SUCCESS)
}

fn verify(args: VerifyArgs) -> Result<ExitCode> {
    let log = ReplayLog::load_from_path(&args.log)?;
    let expected = read_frames_from_path(&args.expected)?;
    let mut controller = analysis_controller(&log, load_engine(args.config.as_deref())?)?;
    match verify_replay_mismatch(&mut controller, &log, &expected)? {
        None => {
            info!(frames = expected.len(), "replay verified");
            Ok(ExitCode::SUCCESS)
        }
        Some(report) => {
            print_json(&report)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn shadow(args: ShadowArgs) -> Result<ExitCode> {
    let log = ReplayLog::load_from_path(&args.log)?;
    let reference = load_engine(args.config.as_deref())?;
    let candidate = load_engine(Some(&args.alt_config))?;
    let mut controller = analysis_controller(&log, reference.clone())?;
    let report = shadow_run(&mut controller, &log, reference, candidate)?;
    print_json(&report)?;
    Ok(if report.is_match() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn soak(args: SoakArgs) -> Result<ExitCode> {
    let scenario = Scenario::load_from_path(&args.session.scenario)?;
    let engine = load_engine(args.session.config.as_deref())?;
    let alt = args
        .alt_config
        .as_deref()
        .map(|path| load_engine(Some(path)))
        .transpose()?;
    let base_seed = scenario.resolve_seed(args.session.seed_override());
    let mut chooser = ChaCha8Rng::seed_from_u64(u64::from(base_seed));

    let mut failures = 0u32;
    let mut divergent = 0u32;
    for session in 0..args.sessions {
        let seed = chooser.gen_range(1..=u32::MAX);
        let (log, live_hash) =
            play_session(&scenario, Some(seed), args.session.rounds, engine.clone(), &mut chooser)?;
        let mut controller = analysis_controller(&log, engine.clone())?;

        let first = build_replay_timeline(&mut controller, &log)?;
        let second = build_replay_timeline(&mut controller, &log)?;
        let replayed = first.last().map(|frame| frame.hash.as_str());
        if first != second || (!first.is_empty() && replayed != Some(live_hash.as_str())) {
            warn!(session, seed, "session did not replay deterministically");
            failures += 1;
            continue;
        }

        if let Some(alt) = &alt {
            let report = shadow_run(&mut controller, &log, engine.clone(), alt.clone())?;
            if let Some(mismatch) = &report.mismatch {
                info!(session, seed, tick = mismatch.mismatch_tick, cause = ?mismatch.cause, "revisions diverged");
                divergent += 1;
            }
        }
    }

    info!(sessions = args.sessions, failures, divergent, "soak finished");
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match Cli::parse().command {
        Command::Record(args) => record(args),
        Command::Timeline(args) => timeline(args),
        Command::Verify(args) => verify(args),
        Command::Shadow(args) => shadow(args),
        Command::Soak(args) => soak(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_requires_an_alternate_config() {
        assert!(Cli::try_parse_from(["combatstep", "shadow", "--log", "a.json"]).is_err());
        let cli = Cli::try_parse_from([
            "combatstep",
            "shadow",
            "--log",
            "a.json",
            "--alt-config",
            "b.json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Shadow(ShadowArgs { config: None, .. })));
    }

    #[test]
    fn seed_and_phrase_conflict() {
        let parsed = Cli::try_parse_from([
            "combatstep",
            "soak",
            "--scenario",
            "s.json",
            "--seed",
            "7",
            "--seed-phrase",
            "ash",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn phrase_seeds_the_session() {
        let cli = Cli::try_parse_from([
            "combatstep",
            "record",
            "--scenario",
            "s.json",
            "--seed-phrase",
            "ash",
            "--out",
            "log.json",
        ])
        .unwrap();
        let Command::Record(args) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(args.session.seed_override(), Some(seed_from_phrase("ash")));
        assert_eq!(args.session.rounds, 20);
    }

    #[test]
    fn sessions_replay_to_their_live_hash() {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let path = manifest_dir.join("../../testdata/scenarios/ember_trial.json");
        let scenario = Scenario::load_from_path(&path).unwrap();
        let engine: Arc<dyn ResolutionEngine> = Arc::new(Engine::default());
        let mut chooser = ChaCha8Rng::seed_from_u64(5);
        let (log, hash) = play_session(&scenario, Some(31), 12, engine.clone(), &mut chooser).unwrap();
        let mut controller = analysis_controller(&log, engine).unwrap();
        let frames = build_replay_timeline(&mut controller, &log).unwrap();
        assert_eq!(frames.last().map(|frame| frame.hash.clone()), Some(hash));
    }
}
