pub mod array_store;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod environment;
pub mod episode;
pub mod errors;
pub mod inspect;
pub mod log_retention;
pub mod logging;
pub mod runtime;
pub mod storage;

use clap::{error::ErrorKind, Parser};
use codec::DenseCodec;
use config::{load_config, AppConfig, CliOverrides};
use episode::EpisodeTrace;
use errors::TraceError;
use logging::{EventLogger, JsonlLogger, LogEvent, NullLogger};
use runtime::TraceRuntime;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "episode-trace")]
#[command(about = "List and inspect recorded episode traces")]
pub struct Cli {
    /// Directory holding the space descriptions and one folder per episode.
    #[arg(long)]
    pub agent_root: Option<PathBuf>,
    /// Episode to load and summarize. Lists the episodes when omitted.
    #[arg(long)]
    pub episode: Option<String>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub type DenseTrace = EpisodeTrace<DenseCodec, DenseCodec, DenseCodec>;

pub fn run() -> Result<i32, TraceError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| TraceError::Io(e.to_string()))?;
    let runtime = TraceRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &std::path::Path,
    runtime: &TraceRuntime,
) -> Result<i32, TraceError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(TraceError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        agent_root: cli.agent_root.clone(),
        log_path: cli.log_file.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    let agent_root = cfg.storage.agent_root.clone().ok_or_else(|| {
        TraceError::Cli("an agent root is required (--agent-root or [storage] agent_root)".to_string())
    })?;
    // Events are best-effort; a failing log never changes the exit code.
    let logger = event_logger(&cfg);

    match cli.episode.as_deref() {
        None => {
            let episodes = inspect::list_episodes(runtime.file_system.as_ref(), &agent_root)?;
            let _ = logger.log(&LogEvent::info(
                "episodes_listed",
                json!({
                    "agent_root": agent_root.display().to_string(),
                    "count": episodes.len(),
                }),
            ));
            if cli.json {
                let text = serde_json::to_string_pretty(&episodes)
                    .map_err(|e| TraceError::Json(e.to_string()))?;
                runtime.terminal.write_line(&text)?;
            } else {
                for episode in &episodes {
                    runtime.terminal.write_line(episode)?;
                }
            }
        }
        Some(name) => {
            let trace = DenseTrace::load(&agent_root, name, runtime)?;
            let summary = inspect::summarize(&trace);
            let _ = logger.log(&LogEvent::info(
                "episode_inspected",
                json!({
                    "episode": name,
                    "game_over": summary.game_over,
                    "actions": trace.actions().len(),
                }),
            ));
            if cli.json {
                let text = serde_json::to_string_pretty(&summary)
                    .map_err(|e| TraceError::Json(e.to_string()))?;
                runtime.terminal.write_line(&text)?;
            } else {
                for line in inspect::render_summary(&summary) {
                    runtime.terminal.write_line(&line)?;
                }
            }
        }
    }
    Ok(0)
}

fn event_logger(cfg: &AppConfig) -> Box<dyn EventLogger> {
    match &cfg.logging.path {
        Some(path) => Box::new(JsonlLogger {
            path: path.clone(),
            max_payload_bytes: cfg.logging.max_payload_bytes,
            budget_bytes: cfg.logging.budget_bytes,
        }),
        None => Box::new(NullLogger),
    }
}
