//! Deterministic turn-based combat.
//!
//! A round is resolved by a pure engine ([`engine`]) from an immutable
//! snapshot and a seeded random source. The [`game::Controller`] owns the
//! persistent state, commits round outputs through [`reduce`] and records
//! every request into a replay log. The log is enough to rebuild the session
//! tick by tick ([`timeline`]) and to compare two engine revisions against
//! each other.

pub mod config;
pub mod damage;
pub mod delta;
pub mod engine;
pub mod event;
pub mod fixed;
pub mod game;
pub mod hash;
pub mod io;
pub mod output;
pub mod provenance;
pub mod reduce;
pub mod replay;
pub mod rng;
pub mod rules;
pub mod skills;
pub mod snapshot;
pub mod status;
#[cfg(any(test, feature = "proptest-support"))]
pub mod strategies;
pub mod timeline;
pub mod world;

pub use config::EngineConfig;
pub use engine::{run, ActionChoice, Engine, ResolutionEngine, RunOptions};
pub use game::Controller;
pub use hash::{hash_json, hash_value, stable_stringify};
pub use output::{RoundOutput, RoundResult};
pub use replay::{ReplayAction, ReplayLog, ReplayRecorder};
pub use rng::{Lcg, RandomSource};
pub use snapshot::{CombatSnapshot, Combatant, Environment};
pub use timeline::{
    build_replay_timeline, shadow_run, verify_replay_mismatch, DivergenceCause, MismatchReport,
    ShadowReport, TimelineFrame,
};
pub use world::GameState;
