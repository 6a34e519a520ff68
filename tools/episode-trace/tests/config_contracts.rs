use episode_trace::config::{load_config, AppConfig, CliOverrides};
use episode_trace::episode::TraceOptions;
use episode_trace::errors::TraceError;
use episode_trace::runtime::{FakeFileSystem, FileSystem};
use std::path::{Path, PathBuf};

fn overrides_with_config(path: &str) -> CliOverrides {
    CliOverrides {
        config_path: Some(PathBuf::from(path)),
        ..CliOverrides::default()
    }
}

#[test]
fn defaults_apply_without_a_config_file() {
    let fs = FakeFileSystem::default();
    let cfg = load_config(&CliOverrides::default(), Path::new("/work"), &fs).expect("config");
    assert_eq!(cfg, AppConfig::default());
    assert!(cfg.storage.efficient);
    assert_eq!(cfg.storage.agent_root, None);
}

#[test]
fn partial_file_overrides_only_the_keys_it_names() {
    let fs = FakeFileSystem::with_file(
        "/work/trace.toml",
        r#"
[storage]
agent_root = "runs/agent"
efficient = false

[recording]
disc_lines_template = [-1.0, -1.0, -1.0]
"#,
    );
    let cfg = load_config(&overrides_with_config("/work/trace.toml"), Path::new("/work"), &fs)
        .expect("config");

    assert_eq!(cfg.storage.agent_root, Some(PathBuf::from("/work/runs/agent")));
    assert!(!cfg.storage.efficient);
    assert_eq!(cfg.recording.max_timestep, AppConfig::default().recording.max_timestep);
    assert_eq!(cfg.recording.disc_lines_template, Some(vec![-1.0; 3]));
    assert_eq!(cfg.logging, AppConfig::default().logging);

    let options = TraceOptions::from_config(&cfg, 3);
    assert!(!options.efficient);
    assert_eq!(options.n_lines, 3);
    assert_eq!(options.disc_lines_template, Some(vec![-1.0; 3]));
}

#[test]
fn cli_flags_win_over_the_config_file() {
    let fs = FakeFileSystem::with_file(
        "/work/trace.toml",
        "[storage]\nagent_root = \"/from/file\"\n\n[logging]\npath = \"logs/trace.jsonl\"\n",
    );
    let overrides = CliOverrides {
        config_path: Some(PathBuf::from("/work/trace.toml")),
        agent_root: Some(PathBuf::from("cli-root")),
        log_path: None,
    };
    let cfg = load_config(&overrides, Path::new("/work"), &fs).expect("config");
    assert_eq!(cfg.storage.agent_root, Some(PathBuf::from("/work/cli-root")));
    assert_eq!(cfg.logging.path, Some(PathBuf::from("/work/logs/trace.jsonl")));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let fs = FakeFileSystem::with_file("/work/trace.toml", "[storage\nefficient = true");
    let err = load_config(&overrides_with_config("/work/trace.toml"), Path::new("/work"), &fs)
        .expect_err("parse");
    assert!(matches!(err, TraceError::ConfigParse(_)));
}

#[test]
fn efficient_storage_needs_a_positive_capacity() {
    let fs = FakeFileSystem::with_file("/work/trace.toml", "[recording]\nmax_timestep = 0\n");
    let err = load_config(&overrides_with_config("/work/trace.toml"), Path::new("/work"), &fs)
        .expect_err("invalid");
    assert!(matches!(err, TraceError::InvalidConfig(_)));

    fs.write_string(
        Path::new("/work/trace.toml"),
        "[storage]\nefficient = false\n\n[recording]\nmax_timestep = 0\n",
    )
    .expect("rewrite");
    let cfg = load_config(&overrides_with_config("/work/trace.toml"), Path::new("/work"), &fs)
        .expect("growable storage has no capacity");
    assert_eq!(cfg.recording.max_timestep, 0);
}

#[test]
fn tiny_payload_limit_is_rejected() {
    let fs = FakeFileSystem::with_file("/work/trace.toml", "[logging]\nmax_payload_bytes = 4\n");
    let err = load_config(&overrides_with_config("/work/trace.toml"), Path::new("/work"), &fs)
        .expect_err("invalid");
    assert!(matches!(err, TraceError::InvalidConfig(_)));
}

#[test]
fn missing_config_file_is_reported() {
    let fs = FakeFileSystem::default();
    let err = load_config(&overrides_with_config("/work/missing.toml"), Path::new("/work"), &fs)
        .expect_err("missing");
    assert_eq!(
        err.to_string(),
        "invalid config: config file not found: /work/missing.toml"
    );
}
