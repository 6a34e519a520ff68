use crate::errors::TraceError;
use std::fs;
use std::path::{Path, PathBuf};

// Trace containers and JSON documents may share the log directory.
const LOG_EXTENSION: &str = "jsonl";

/// Deletes the oldest `.jsonl` files in `dir` until their total size fits
/// `budget_bytes`. The `active` log counts toward the total but is kept, so a
/// single oversized log is left for the next rotation.
pub fn enforce_total_budget(
    dir: &Path,
    budget_bytes: u64,
    active: Option<&Path>,
) -> Result<Vec<PathBuf>, TraceError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| TraceError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_log_file(path))
        .collect::<Vec<_>>();

    let mut total = logs
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();
    if total <= budget_bytes {
        return Ok(Vec::new());
    }

    logs.retain(|path| Some(path.as_path()) != active);
    logs.sort_by_key(|path| fs::metadata(path).ok().and_then(|m| m.modified().ok()));

    let mut deleted = Vec::new();
    for path in logs {
        if total <= budget_bytes {
            break;
        }
        let len = fs::metadata(&path)
            .map_err(|e| TraceError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| TraceError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

fn is_log_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(LOG_EXTENSION)
}
