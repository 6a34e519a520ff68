//! Episode trace: three decoded streams, four raw streams and the episode
//! documents, recorded step by step during a run and read back afterwards.
//!
//! Step numbers in the recording API are 1-based. For step `t`:
//! - the action and the environment modification land in row `t - 1`,
//! - the observation lands in row `t` (row 0 holds the observation the
//!   agent received at reset), so row `i` of observations is what the agent
//!   saw before playing row `i` of actions,
//! - reward, duration, line failures and attack land in row `t - 1`.

use crate::array_store::ArrayStore;
use crate::buffer::SequenceBuffer;
use crate::codec::{require_encode, VectorCodec};
use crate::config::AppConfig;
use crate::environment::EnvironmentSource;
use crate::episode::layout::{self, EpisodePaths, SpaceDescriptions};
use crate::episode::metadata::{
    reward_record, rewards_from_json, rewards_to_json, EpisodeMeta, EpisodeTimes, LineFailures,
    RewardRecord, StepInfo,
};
use crate::errors::TraceError;
use crate::logging::{EventLogger, NullLogger};
use crate::runtime::{FileSystem, TraceRuntime};
use crate::storage::{RowStore, SeriesStore, StorageMode};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Codecs for the four spaces of an episode. The attack space is an action
/// space of its own, decoded with the action codec type.
#[derive(Debug, Clone)]
pub struct TraceSpaces<A, O, E = A> {
    pub action: A,
    pub observation: O,
    pub env_modification: E,
    pub attack: A,
}

impl<A: VectorCodec, O: VectorCodec, E: VectorCodec> TraceSpaces<A, O, E> {
    fn descriptions(&self) -> SpaceDescriptions {
        SpaceDescriptions {
            action: self.action.describe(),
            observation: self.observation.describe(),
            env_modification: self.env_modification.describe(),
            attack: self.attack.describe(),
        }
    }

    /// Rebuilds the codecs from the descriptions written at the agent root.
    pub fn from_root(fs: &dyn FileSystem, agent_root: &Path) -> Result<Self, TraceError> {
        let read = |name: &str| layout::read_json_document(fs, &agent_root.join(name));
        Ok(Self {
            action: A::from_description(&read(layout::ACTION_SPACE)?)?,
            observation: O::from_description(&read(layout::OBS_SPACE)?)?,
            env_modification: E::from_description(&read(layout::ENV_MODIF_SPACE)?)?,
            attack: A::from_description(&read(layout::ATTACK_SPACE)?)?,
        })
    }
}

/// Shape of a live recording.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceOptions {
    pub efficient: bool,
    pub max_timestep: usize,
    pub n_lines: usize,
    /// Row stored when a step reports line failures without a value.
    /// Defaults to all zeros ("no line failed").
    pub disc_lines_template: Option<Vec<f64>>,
}

impl TraceOptions {
    pub fn from_config(cfg: &AppConfig, n_lines: usize) -> Self {
        Self {
            efficient: cfg.storage.efficient,
            max_timestep: cfg.recording.max_timestep,
            n_lines,
            disc_lines_template: cfg.recording.disc_lines_template.clone(),
        }
    }

    fn mode(&self) -> StorageMode {
        StorageMode::from_flag(self.efficient, self.max_timestep)
    }

    fn template(&self) -> Result<Vec<f64>, TraceError> {
        match &self.disc_lines_template {
            Some(template) if template.len() != self.n_lines => Err(TraceError::RowWidth {
                buffer: "disc_lines_template".to_string(),
                expected: self.n_lines,
                actual: template.len(),
            }),
            Some(template) => Ok(template.clone()),
            None => Ok(vec![0.0; self.n_lines]),
        }
    }
}

/// Where a recording is written.
#[derive(Clone)]
pub struct PersistenceTarget {
    pub agent_root: PathBuf,
    pub file_system: Arc<dyn FileSystem>,
    pub array_store: Arc<dyn ArrayStore>,
}

impl PersistenceTarget {
    pub fn new(agent_root: impl Into<PathBuf>, runtime: &TraceRuntime) -> Self {
        Self {
            agent_root: agent_root.into(),
            file_system: Arc::clone(&runtime.file_system),
            array_store: Arc::clone(&runtime.array_store),
        }
    }
}

struct Persistence {
    paths: EpisodePaths,
    file_system: Arc<dyn FileSystem>,
    array_store: Arc<dyn ArrayStore>,
}

/// Everything a trace is built from.
pub struct TraceParts<A, O, E = A> {
    pub name: String,
    pub mode: StorageMode,
    pub spaces: TraceSpaces<A, O, E>,
    pub actions: RowStore,
    pub observations: RowStore,
    pub env_actions: RowStore,
    pub rewards: SeriesStore,
    pub durations: SeriesStore,
    pub line_failures: RowStore,
    pub attacks: RowStore,
    pub disc_lines_template: Vec<f64>,
    pub other_rewards: Vec<RewardRecord>,
    pub parameters: Option<Value>,
    pub meta: Option<EpisodeMeta>,
    pub times: Option<EpisodeTimes>,
}

/// One simulated step as reported by the driving loop.
pub struct StepRecord<'a, A, O, E> {
    /// 1-based.
    pub step: usize,
    pub duration: Duration,
    pub reward: f64,
    pub env_action: &'a E,
    pub action: &'a A,
    pub observation: &'a O,
    pub attack: Option<&'a A>,
    pub info: &'a StepInfo,
}

/// End-of-episode figures reported by the driving loop.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutcome {
    pub steps_played: u64,
    pub cumulative_reward: f64,
    pub env_seed: Option<u64>,
    pub agent_seed: Option<u64>,
    pub agent_time: Duration,
    pub wall_clock: Duration,
}

/// First game-over index across the three decoded streams.
pub fn effective_game_over(
    actions: Option<usize>,
    observations: Option<usize>,
    env_actions: Option<usize>,
) -> Option<usize> {
    [actions, observations, env_actions].into_iter().flatten().min()
}

pub struct EpisodeTrace<A: VectorCodec, O: VectorCodec, E: VectorCodec = A> {
    name: String,
    mode: StorageMode,
    actions: SequenceBuffer<A>,
    observations: SequenceBuffer<O>,
    env_actions: SequenceBuffer<E>,
    attack_codec: A,
    rewards: SeriesStore,
    durations: SeriesStore,
    line_failures: RowStore,
    attacks: RowStore,
    disc_lines_template: Vec<f64>,
    other_rewards: Vec<RewardRecord>,
    parameters: Option<Value>,
    meta: Option<EpisodeMeta>,
    times: Option<EpisodeTimes>,
    game_over: Option<usize>,
    episode_dir: Option<PathBuf>,
    persistence: Option<Persistence>,
}

impl<A: VectorCodec, O: VectorCodec, E: VectorCodec> fmt::Debug for EpisodeTrace<A, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpisodeTrace")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("actions", &self.actions.len())
            .field("observations", &self.observations.len())
            .field("env_actions", &self.env_actions.len())
            .field("game_over", &self.game_over)
            .field("recording", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

impl<A: VectorCodec, O: VectorCodec, E: VectorCodec> EpisodeTrace<A, O, E> {
    /// Builds a trace from raw parts, decodes the three streams and aligns
    /// their end indices. With a target, the episode directory is prepared
    /// and the trace accepts recordings.
    pub fn from_parts(
        parts: TraceParts<A, O, E>,
        target: Option<PersistenceTarget>,
        logger: &dyn EventLogger,
    ) -> Result<Self, TraceError> {
        let TraceParts {
            name,
            mode,
            spaces,
            actions,
            observations,
            env_actions,
            rewards,
            durations,
            line_failures,
            attacks,
            disc_lines_template,
            other_rewards,
            parameters,
            meta,
            times,
        } = parts;

        let persistence = match target {
            Some(target) => {
                let paths = EpisodePaths::new(&target.agent_root, &name);
                layout::prepare_episode_dirs(
                    target.file_system.as_ref(),
                    &paths,
                    &spaces.descriptions(),
                    logger,
                )?;
                Some(Persistence {
                    paths,
                    file_system: target.file_system,
                    array_store: target.array_store,
                })
            }
            None => None,
        };

        let TraceSpaces {
            action,
            observation,
            env_modification,
            attack,
        } = spaces;

        let mut trace = Self {
            actions: SequenceBuffer::new(actions, action, "actions")?,
            observations: SequenceBuffer::new(observations, observation, "observations")?,
            env_actions: SequenceBuffer::new(env_actions, env_modification, "env_actions")?,
            attack_codec: attack,
            name,
            mode,
            rewards,
            durations,
            line_failures,
            attacks,
            disc_lines_template,
            other_rewards,
            parameters,
            meta,
            times,
            game_over: None,
            episode_dir: persistence.as_ref().map(|p| p.paths.episode_dir.clone()),
            persistence,
        };
        trace.reconcile_game_over();
        Ok(trace)
    }

    /// Empty trace for a live run. Pre-allocated storage is NaN-filled so
    /// that steps never played read back as the end of the episode.
    pub fn create(
        name: impl Into<String>,
        spaces: TraceSpaces<A, O, E>,
        options: &TraceOptions,
        target: Option<PersistenceTarget>,
        logger: &dyn EventLogger,
    ) -> Result<Self, TraceError> {
        let mode = options.mode();
        let capacity = options.max_timestep;
        let parts = TraceParts {
            name: name.into(),
            mode,
            actions: RowStore::for_mode(mode, capacity, spaces.action.width(), f64::NAN),
            observations: RowStore::for_mode(
                mode,
                capacity + 1,
                spaces.observation.width(),
                f64::NAN,
            ),
            env_actions: RowStore::for_mode(
                mode,
                capacity,
                spaces.env_modification.width(),
                f64::NAN,
            ),
            rewards: SeriesStore::for_mode(mode, capacity, f64::NAN),
            durations: SeriesStore::for_mode(mode, capacity, f64::NAN),
            line_failures: RowStore::for_mode(mode, capacity, options.n_lines, f64::NAN),
            attacks: RowStore::for_mode(mode, capacity, spaces.attack.width(), 0.0),
            disc_lines_template: options.template()?,
            other_rewards: Vec::new(),
            parameters: None,
            meta: None,
            times: None,
            spaces,
        };
        Self::from_parts(parts, target, logger)
    }

    /// Reads a persisted episode. The result does not record or persist.
    pub fn load(
        agent_root: impl AsRef<Path>,
        name: &str,
        runtime: &TraceRuntime,
    ) -> Result<Self, TraceError> {
        let fs = runtime.file_system.as_ref();
        let store = runtime.array_store.as_ref();
        let paths = EpisodePaths::new(agent_root, name);
        let json = |file: &str| layout::read_json_document(fs, &paths.episode_file(file));

        let parameters = json(layout::PARAMS)?;
        let meta: EpisodeMeta = serde_json::from_value(json(layout::META)?)
            .map_err(|e| TraceError::InvalidMetadata(format!("{}: {e}", layout::META)))?;
        let times: EpisodeTimes = serde_json::from_value(json(layout::TIMES)?)
            .map_err(|e| TraceError::InvalidMetadata(format!("{}: {e}", layout::TIMES)))?;
        let other_rewards = rewards_from_json(&json(layout::OTHER_REWARDS)?)?;

        let durations = store.load_series(&paths.episode_file(layout::AG_EXEC_TIMES))?;
        let actions = store.load_rows(&paths.episode_file(layout::ACTIONS))?;
        let env_actions = store.load_rows(&paths.episode_file(layout::ENV_ACTIONS))?;
        let observations = store.load_rows(&paths.episode_file(layout::OBSERVATIONS))?;
        let line_failures = store.load_rows(&paths.episode_file(layout::LINES_FAILURES))?;
        let attacks = store.load_rows(&paths.episode_file(layout::ATTACK))?;
        let rewards = store.load_series(&paths.episode_file(layout::REWARDS))?;

        let spaces = TraceSpaces::from_root(fs, &paths.agent_root)?;
        let parts = TraceParts {
            name: name.to_string(),
            mode: StorageMode::Preallocated {
                capacity: actions.nrows(),
            },
            spaces,
            disc_lines_template: vec![0.0; line_failures.ncols()],
            actions: RowStore::Preallocated(actions),
            observations: RowStore::Preallocated(observations),
            env_actions: RowStore::Preallocated(env_actions),
            rewards: SeriesStore::Preallocated(rewards),
            durations: SeriesStore::Preallocated(durations),
            line_failures: RowStore::Preallocated(line_failures),
            attacks: RowStore::Preallocated(attacks),
            other_rewards,
            parameters: Some(parameters),
            meta: Some(meta),
            times: Some(times),
        };
        let mut trace = Self::from_parts(parts, None, &NullLogger)?;
        trace.episode_dir = Some(paths.episode_dir);
        Ok(trace)
    }

    /// Actions stop at the first game over; observations and environment
    /// modifications keep the row produced by that same step.
    fn reconcile_game_over(&mut self) {
        let Some(real) = effective_game_over(
            self.actions.end_index(),
            self.observations.end_index(),
            self.env_actions.end_index(),
        ) else {
            return;
        };
        self.actions.set_end_index(Some(real));
        self.observations.set_end_index(Some(real + 1));
        self.env_actions.set_end_index(Some(real + 1));
        self.game_over = Some(real);
    }

    pub fn is_recording(&self) -> bool {
        self.persistence.is_some()
    }

    /// Stores the observation returned by the reset, ahead of step 1.
    pub fn record_initial_observation(&mut self, observation: &O::Item) -> Result<(), TraceError> {
        if self.persistence.is_none() {
            return Ok(());
        }
        require_encode(self.observations.codec())?;
        let values = self.observations.codec().encode(observation)?;
        self.observations.update(1, &values)
    }

    /// Records one step. Every stream is encoded and checked before any of
    /// them is written, so a failed step leaves the trace unchanged.
    pub fn record_step(
        &mut self,
        record: StepRecord<'_, A::Item, O::Item, E::Item>,
    ) -> Result<(), TraceError> {
        if self.persistence.is_none() {
            return Ok(());
        }
        let step = record.step;
        require_encode(self.actions.codec())?;
        require_encode(self.env_actions.codec())?;
        require_encode(self.observations.codec())?;

        let action = self.actions.codec().encode(record.action)?;
        let env_action = self.env_actions.codec().encode(record.env_action)?;
        let observation = self.observations.codec().encode(record.observation)?;
        let attack = match record.attack {
            Some(attack) => {
                require_encode(&self.attack_codec)?;
                self.attack_codec.encode(attack)?
            }
            None => vec![0.0; self.attacks.width()],
        };
        let disc_lines = match &record.info.disc_lines {
            LineFailures::Absent => None,
            LineFailures::Unreported => Some(self.disc_lines_template.as_slice()),
            LineFailures::Flags(flags) => Some(flags.as_slice()),
        };

        self.actions.check_update(step, &action)?;
        self.env_actions.check_update(step, &env_action)?;
        self.observations.check_update(step + 1, &observation)?;
        self.durations.check_write(step, "agent_exec_times")?;
        self.rewards.check_write(step, "rewards")?;
        if let Some(row) = disc_lines {
            self.line_failures.check_write(step, row, "disc_lines")?;
        }
        self.attacks.check_write(step, &attack, "opponent_attack")?;

        self.actions.update(step, &action)?;
        self.env_actions.update(step, &env_action)?;
        self.observations.update(step + 1, &observation)?;
        self.durations
            .write(step, record.duration.as_secs_f64(), "agent_exec_times")?;
        self.rewards.write(step, record.reward, "rewards")?;
        if let Some(row) = disc_lines {
            self.line_failures.write(step, row, "disc_lines")?;
        }
        self.attacks.write(step, &attack, "opponent_attack")?;

        if let Some(rewards) = &record.info.rewards {
            self.other_rewards.push(reward_record(rewards));
        }
        Ok(())
    }

    pub fn set_parameters(&mut self, env: &dyn EnvironmentSource) {
        if self.persistence.is_some() {
            self.parameters = Some(env.parameters());
        }
    }

    pub fn set_meta(&mut self, env: &dyn EnvironmentSource, outcome: &EpisodeOutcome) {
        if self.persistence.is_some() {
            self.meta = Some(EpisodeMeta {
                chronics_path: env.chronics_id(),
                chronics_max_timestep: env.max_timestep(),
                grid_path: env.grid_path(),
                backend_type: env.backend_type(),
                env_type: env.env_type(),
                nb_timestep_played: outcome.steps_played,
                cumulative_reward: outcome.cumulative_reward,
                env_seed: outcome.env_seed,
                agent_seed: outcome.agent_seed,
            });
        }
    }

    pub fn set_episode_times(
        &mut self,
        env: &dyn EnvironmentSource,
        agent_time: Duration,
        wall_clock: Duration,
    ) {
        if self.persistence.is_some() {
            self.times = Some(EpisodeTimes::new(env.timings(), agent_time, wall_clock));
        }
    }

    pub fn finalize(&mut self, env: &dyn EnvironmentSource, outcome: &EpisodeOutcome) {
        self.set_parameters(env);
        self.set_meta(env, outcome);
        self.set_episode_times(env, outcome.agent_time, outcome.wall_clock);
    }

    /// Writes every document and container of the episode.
    pub fn persist(&self) -> Result<(), TraceError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let meta = self.meta.as_ref().ok_or_else(|| {
            TraceError::InvalidMetadata(format!("episode {} was not finalized", self.name))
        })?;
        let times = self.times.as_ref().ok_or_else(|| {
            TraceError::InvalidMetadata(format!("episode {} has no timings", self.name))
        })?;

        let fs = persistence.file_system.as_ref();
        let store = persistence.array_store.as_ref();
        let paths = &persistence.paths;
        let empty = Value::Object(serde_json::Map::new());

        fs.write_string(
            &paths.episode_file(layout::PARAMS),
            &layout::to_json_document(self.parameters.as_ref().unwrap_or(&empty))?,
        )?;
        fs.write_string(&paths.episode_file(layout::META), &layout::to_json_document(meta)?)?;
        fs.write_string(&paths.episode_file(layout::TIMES), &layout::to_json_document(times)?)?;
        fs.write_string(
            &paths.episode_file(layout::OTHER_REWARDS),
            &layout::to_json_document(&rewards_to_json(&self.other_rewards))?,
        )?;

        store.save_series(
            &paths.episode_file(layout::AG_EXEC_TIMES),
            &self.durations.to_array(),
        )?;
        self.actions.save(store, &paths.episode_file(layout::ACTIONS))?;
        self.env_actions
            .save(store, &paths.episode_file(layout::ENV_ACTIONS))?;
        self.observations
            .save(store, &paths.episode_file(layout::OBSERVATIONS))?;
        store.save_rows(
            &paths.episode_file(layout::LINES_FAILURES),
            &self.line_failures.to_array()?,
        )?;
        store.save_series(&paths.episode_file(layout::REWARDS), &self.rewards.to_array())?;
        store.save_rows(&paths.episode_file(layout::ATTACK), &self.attacks.to_array()?)?;
        Ok(())
    }

    /// Declared maximum number of steps of the episode.
    pub fn length(&self) -> Result<usize, TraceError> {
        let meta = self.meta.as_ref().ok_or_else(|| {
            TraceError::InvalidMetadata(format!("episode {} has no metadata", self.name))
        })?;
        usize::try_from(meta.chronics_max_timestep).map_err(|_| {
            TraceError::InvalidMetadata(format!(
                "episode {} has no bounded length ({})",
                self.name, meta.chronics_max_timestep
            ))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    pub fn episode_dir(&self) -> Option<&Path> {
        self.episode_dir.as_deref()
    }

    /// Index of the first step the three decoded streams no longer cover.
    /// Always `None` while recording: rows written by `record_step` are not
    /// decoded until the episode is loaded back.
    pub fn game_over(&self) -> Option<usize> {
        if self.is_recording() {
            None
        } else {
            self.game_over
        }
    }

    pub fn actions(&self) -> &SequenceBuffer<A> {
        &self.actions
    }

    pub fn observations(&self) -> &SequenceBuffer<O> {
        &self.observations
    }

    pub fn env_actions(&self) -> &SequenceBuffer<E> {
        &self.env_actions
    }

    pub fn attack_codec(&self) -> &A {
        &self.attack_codec
    }

    pub fn rewards(&self) -> &SeriesStore {
        &self.rewards
    }

    pub fn durations(&self) -> &SeriesStore {
        &self.durations
    }

    pub fn line_failures(&self) -> &RowStore {
        &self.line_failures
    }

    pub fn attacks(&self) -> &RowStore {
        &self.attacks
    }

    pub fn other_rewards(&self) -> &[RewardRecord] {
        &self.other_rewards
    }

    pub fn parameters(&self) -> Option<&Value> {
        self.parameters.as_ref()
    }

    pub fn meta(&self) -> Option<&EpisodeMeta> {
        self.meta.as_ref()
    }

    pub fn times(&self) -> Option<&EpisodeTimes> {
        self.times.as_ref()
    }
}
