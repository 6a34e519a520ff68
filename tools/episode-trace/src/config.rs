use crate::errors::TraceError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub agent_root: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub recording: RecordingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub agent_root: Option<PathBuf>,
    /// Pre-allocate episode buffers instead of growing them step by step.
    pub efficient: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingConfig {
    pub max_timestep: usize,
    pub disc_lines_template: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                agent_root: None,
                efficient: true,
            },
            recording: RecordingConfig {
                max_timestep: 8064,
                disc_lines_template: None,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    storage: Option<PartialStorageConfig>,
    recording: Option<PartialRecordingConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialStorageConfig {
    agent_root: Option<PathBuf>,
    efficient: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecordingConfig {
    max_timestep: Option<usize>,
    disc_lines_template: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, TraceError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path).map_err(|e| match e {
            TraceError::MissingTraceFile { file } => {
                TraceError::InvalidConfig(format!("config file not found: {file}"))
            }
            other => other,
        })?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| TraceError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    resolve_paths(&mut cfg, process_cwd);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(storage) = partial.storage {
        if let Some(agent_root) = storage.agent_root {
            cfg.storage.agent_root = Some(agent_root);
        }
        if let Some(efficient) = storage.efficient {
            cfg.storage.efficient = efficient;
        }
    }

    if let Some(recording) = partial.recording {
        if let Some(value) = recording.max_timestep {
            cfg.recording.max_timestep = value;
        }
        if let Some(template) = recording.disc_lines_template {
            cfg.recording.disc_lines_template = Some(template);
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = Some(path);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(agent_root) = &overrides.agent_root {
        cfg.storage.agent_root = Some(agent_root.clone());
    }
    if let Some(log_path) = &overrides.log_path {
        cfg.logging.path = Some(log_path.clone());
    }
}

fn resolve_paths(cfg: &mut AppConfig, process_cwd: &Path) {
    if let Some(root) = &cfg.storage.agent_root {
        cfg.storage.agent_root = Some(absolutize_path(process_cwd, root));
    }
    if let Some(path) = &cfg.logging.path {
        cfg.logging.path = Some(absolutize_path(process_cwd, path));
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), TraceError> {
    if cfg.storage.efficient && cfg.recording.max_timestep == 0 {
        return Err(TraceError::InvalidConfig(
            "recording.max_timestep must be greater than zero when storage.efficient is set"
                .to_string(),
        ));
    }

    if let Some(template) = &cfg.recording.disc_lines_template {
        if template.iter().any(|v| v.is_nan()) {
            return Err(TraceError::InvalidConfig(
                "recording.disc_lines_template must not contain NaN".to_string(),
            ));
        }
    }

    if cfg.logging.max_payload_bytes < 16 {
        return Err(TraceError::InvalidConfig(
            "logging.max_payload_bytes must be at least 16".to_string(),
        ));
    }

    Ok(())
}
