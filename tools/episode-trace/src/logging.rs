//! Event logging passed explicitly to the operations that report progress.

use crate::errors::TraceError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl<'a> LogEvent<'a> {
    pub fn info(event_type: &'a str, payload: Value) -> Self {
        Self {
            level: "info",
            event_type,
            payload,
        }
    }
}

pub trait EventLogger {
    fn log(&self, event: &LogEvent<'_>) -> Result<(), TraceError>;
}

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), TraceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| TraceError::Io(e.to_string()))?;
        }
        let line = render_line(event, self.max_payload_bytes)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TraceError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| TraceError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| TraceError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes, Some(self.path.as_path()))?;
        }

        Ok(())
    }
}

impl EventLogger for JsonlLogger {
    fn log(&self, event: &LogEvent<'_>) -> Result<(), TraceError> {
        self.append(event)
    }
}

pub struct NullLogger;

impl EventLogger for NullLogger {
    fn log(&self, _event: &LogEvent<'_>) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Keeps rendered lines in memory; used by tests.
#[derive(Default, Clone)]
pub struct MemoryLogger {
    lines: Arc<Mutex<Vec<Value>>>,
}

impl MemoryLogger {
    pub fn events(&self) -> Vec<Value> {
        self.lines.lock().expect("log lock").clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| event["event_type"].as_str().map(str::to_string))
            .collect()
    }
}

impl EventLogger for MemoryLogger {
    fn log(&self, event: &LogEvent<'_>) -> Result<(), TraceError> {
        let value = serde_json::to_value(event).map_err(|e| TraceError::Json(e.to_string()))?;
        self.lines.lock().expect("log lock").push(value);
        Ok(())
    }
}

fn render_line(event: &LogEvent<'_>, max_payload_bytes: usize) -> Result<String, TraceError> {
    let truncated = truncate_json(event.payload.clone(), max_payload_bytes);
    serde_json::to_string(&LogEvent {
        level: event.level,
        event_type: event.event_type,
        payload: truncated,
    })
    .map_err(|e| TraceError::Json(e.to_string()))
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}
