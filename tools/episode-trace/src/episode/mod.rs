//! Recording and reading back one episode of an agent run.
//!
//! # Overview
//!
//! During a run the driving loop creates an [`EpisodeTrace`] per episode,
//! calls [`EpisodeTrace::record_step`] once per simulated step, then
//! [`EpisodeTrace::finalize`] and [`EpisodeTrace::persist`]. Afterwards
//! [`EpisodeTrace::load`] rebuilds the trace from the episode directory,
//! decoding every stream until its first invalid row and aligning the three
//! decoded streams on a single game-over step.

pub mod layout;
pub mod metadata;
pub mod trace;

pub use metadata::{EpisodeMeta, EpisodeTimes, LineFailures, RewardRecord, StepInfo};
pub use trace::{
    effective_game_over, EpisodeOutcome, EpisodeTrace, PersistenceTarget, StepRecord,
    TraceOptions, TraceParts, TraceSpaces,
};
