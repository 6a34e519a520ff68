//! On-disk layout of an agent root.
//!
//! ```text
//! agent_root/
//!   dict_action_space.json            shared by every episode, written once
//!   dict_observation_space.json
//!   dict_env_modification_space.json
//!   dict_attack_space.json
//!   <episode>/
//!     _parameters.json  episode_meta.json  episode_times.json  other_rewards.json
//!     agent_exec_times.npz  actions.npz  env_modifications.npz  observations.npz
//!     disc_lines_cascading_failure.npz  opponent_attack.npz  rewards.npz
//! ```

use crate::errors::TraceError;
use crate::logging::{EventLogger, LogEvent};
use crate::runtime::FileSystem;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

pub const ACTION_SPACE: &str = "dict_action_space.json";
pub const OBS_SPACE: &str = "dict_observation_space.json";
pub const ENV_MODIF_SPACE: &str = "dict_env_modification_space.json";
pub const ATTACK_SPACE: &str = "dict_attack_space.json";

pub const PARAMS: &str = "_parameters.json";
pub const META: &str = "episode_meta.json";
pub const TIMES: &str = "episode_times.json";
pub const OTHER_REWARDS: &str = "other_rewards.json";

pub const AG_EXEC_TIMES: &str = "agent_exec_times.npz";
pub const ACTIONS: &str = "actions.npz";
pub const ENV_ACTIONS: &str = "env_modifications.npz";
pub const OBSERVATIONS: &str = "observations.npz";
pub const LINES_FAILURES: &str = "disc_lines_cascading_failure.npz";
pub const ATTACK: &str = "opponent_attack.npz";
pub const REWARDS: &str = "rewards.npz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodePaths {
    pub agent_root: PathBuf,
    pub episode_dir: PathBuf,
}

impl EpisodePaths {
    pub fn new(agent_root: impl AsRef<Path>, episode: &str) -> Self {
        let agent_root = agent_root.as_ref().to_path_buf();
        let episode_dir = agent_root.join(episode);
        Self {
            agent_root,
            episode_dir,
        }
    }

    pub fn root_file(&self, name: &str) -> PathBuf {
        self.agent_root.join(name)
    }

    pub fn episode_file(&self, name: &str) -> PathBuf {
        self.episode_dir.join(name)
    }
}

/// JSON descriptions of the four spaces, in the order they are written.
pub struct SpaceDescriptions {
    pub action: Value,
    pub observation: Value,
    pub env_modification: Value,
    pub attack: Value,
}

impl SpaceDescriptions {
    fn entries(&self) -> [(&'static str, &Value); 4] {
        [
            (ACTION_SPACE, &self.action),
            (OBS_SPACE, &self.observation),
            (ENV_MODIF_SPACE, &self.env_modification),
            (ATTACK_SPACE, &self.attack),
        ]
    }
}

/// Creates the agent root and episode directory and publishes any space
/// description that is not there yet. Safe to run from several episodes
/// sharing one root. Events are best-effort: a logger error never fails
/// the preparation.
pub fn prepare_episode_dirs(
    fs: &dyn FileSystem,
    paths: &EpisodePaths,
    spaces: &SpaceDescriptions,
    logger: &dyn EventLogger,
) -> Result<(), TraceError> {
    if fs.ensure_dir(&paths.agent_root)? {
        let _ = logger.log(&LogEvent::info(
            "agent_root_created",
            json!({ "path": paths.agent_root.display().to_string() }),
        ));
    }

    for (name, description) in spaces.entries() {
        let path = paths.root_file(name);
        if fs.exists(&path) {
            continue;
        }
        fs.write_if_absent(&path, &to_json_document(description)?)?;
    }

    if fs.ensure_dir(&paths.episode_dir)? {
        let _ = logger.log(&LogEvent::info(
            "episode_dir_created",
            json!({ "path": paths.episode_dir.display().to_string() }),
        ));
    }
    Ok(())
}

/// Pretty JSON with four-space indentation and sorted keys.
pub fn to_json_document<T: Serialize + ?Sized>(value: &T) -> Result<String, TraceError> {
    // Value objects are BTreeMap-backed, so the round trip sorts every key.
    let value = serde_json::to_value(value).map_err(|e| TraceError::Json(e.to_string()))?;
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| TraceError::Json(e.to_string()))?;
    String::from_utf8(out).map_err(|e| TraceError::Json(e.to_string()))
}

pub fn read_json_document(fs: &dyn FileSystem, path: &Path) -> Result<Value, TraceError> {
    let text = fs.read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| TraceError::Json(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLogger;
    use crate::runtime::FakeFileSystem;

    fn spaces(tag: &str) -> SpaceDescriptions {
        SpaceDescriptions {
            action: json!({ "name": format!("action-{tag}") }),
            observation: json!({ "name": format!("observation-{tag}") }),
            env_modification: json!({ "name": format!("env-{tag}") }),
            attack: json!({ "name": format!("attack-{tag}") }),
        }
    }

    #[test]
    fn json_documents_are_sorted_and_indented() {
        let text = to_json_document(&json!({"zeta": 1, "alpha": {"b": 2, "a": 1}})).expect("render");
        assert_eq!(
            text,
            "{\n    \"alpha\": {\n        \"a\": 1,\n        \"b\": 2\n    },\n    \"zeta\": 1\n}"
        );
    }

    #[test]
    fn space_files_are_written_once_per_root() {
        let fs = FakeFileSystem::default();
        let logger = MemoryLogger::default();
        let first = EpisodePaths::new("/agent", "episode_0");
        let second = EpisodePaths::new("/agent", "episode_1");

        prepare_episode_dirs(&fs, &first, &spaces("first"), &logger).expect("first");
        prepare_episode_dirs(&fs, &second, &spaces("second"), &logger).expect("second");

        let action = fs.file(Path::new("/agent/dict_action_space.json")).expect("action space");
        assert!(action.contains("action-first"));
        let space_writes = fs
            .writes()
            .iter()
            .filter(|p| p.parent() == Some(Path::new("/agent")))
            .count();
        assert_eq!(space_writes, 4);
        assert_eq!(
            logger.event_types(),
            vec!["agent_root_created", "episode_dir_created", "episode_dir_created"]
        );
    }

    struct BrokenLogger;

    impl EventLogger for BrokenLogger {
        fn log(&self, _event: &LogEvent<'_>) -> Result<(), TraceError> {
            Err(TraceError::Io("log disk full".to_string()))
        }
    }

    #[test]
    fn logger_failures_do_not_fail_preparation() {
        let fs = FakeFileSystem::default();
        let paths = EpisodePaths::new("/agent", "episode_0");
        prepare_episode_dirs(&fs, &paths, &spaces("a"), &BrokenLogger).expect("prepared");
        assert!(fs.exists(Path::new("/agent/episode_0")));
        assert!(fs.file(Path::new("/agent/dict_attack_space.json")).is_some());
    }

    #[test]
    fn preparing_the_same_episode_twice_is_not_an_error() {
        let fs = FakeFileSystem::default();
        let logger = MemoryLogger::default();
        let paths = EpisodePaths::new("/agent", "episode_0");
        prepare_episode_dirs(&fs, &paths, &spaces("a"), &logger).expect("first");
        prepare_episode_dirs(&fs, &paths, &spaces("b"), &logger).expect("second");
        assert_eq!(logger.event_types().len(), 2);
    }
}
