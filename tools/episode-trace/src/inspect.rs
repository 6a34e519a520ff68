//! Read-only views over persisted episodes, used by the command line.

use crate::codec::VectorCodec;
use crate::episode::layout;
use crate::episode::EpisodeTrace;
use crate::errors::TraceError;
use crate::runtime::FileSystem;
use crate::storage::RowStore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Names of the episodes under `agent_root`, in lexical order. A directory
/// counts as an episode once its metadata document exists.
pub fn list_episodes(fs: &dyn FileSystem, agent_root: &Path) -> Result<Vec<String>, TraceError> {
    let episodes = fs
        .list_dirs(agent_root)?
        .into_iter()
        .filter(|dir| fs.exists(&dir.join(layout::META)))
        .filter_map(|dir| {
            dir.file_name()
                .map(|name| name.to_string_lossy().to_string())
        })
        .collect();
    Ok(episodes)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BufferSummary {
    pub name: String,
    pub rows: usize,
    pub valid: usize,
    pub end_index: Option<usize>,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    pub name: String,
    pub game_over: Option<usize>,
    pub steps_played: Option<u64>,
    pub cumulative_reward: Option<f64>,
    pub declared_length: Option<usize>,
    pub reward_sum: f64,
    pub auxiliary_rewards: usize,
    pub buffers: Vec<BufferSummary>,
}

pub fn summarize<A: VectorCodec, O: VectorCodec, E: VectorCodec>(
    trace: &EpisodeTrace<A, O, E>,
) -> EpisodeSummary {
    let buffers = vec![
        BufferSummary {
            name: trace.actions().name().to_string(),
            rows: trace.actions().rows().row_count(),
            valid: trace.actions().len(),
            end_index: trace.actions().end_index(),
            fingerprint: fingerprint(trace.actions().rows()),
        },
        BufferSummary {
            name: trace.observations().name().to_string(),
            rows: trace.observations().rows().row_count(),
            valid: trace.observations().len(),
            end_index: trace.observations().end_index(),
            fingerprint: fingerprint(trace.observations().rows()),
        },
        BufferSummary {
            name: trace.env_actions().name().to_string(),
            rows: trace.env_actions().rows().row_count(),
            valid: trace.env_actions().len(),
            end_index: trace.env_actions().end_index(),
            fingerprint: fingerprint(trace.env_actions().rows()),
        },
    ];

    // Only rewards of played steps count; unplayed rows are NaN.
    let played = trace.game_over().unwrap_or(trace.rewards().len());
    let reward_sum: f64 = trace
        .rewards()
        .to_vec()
        .into_iter()
        .take(played)
        .filter(|value| value.is_finite())
        .sum();

    EpisodeSummary {
        name: trace.name().to_string(),
        game_over: trace.game_over(),
        steps_played: trace.meta().map(|meta| meta.nb_timestep_played),
        cumulative_reward: trace.meta().map(|meta| meta.cumulative_reward),
        declared_length: trace.length().ok(),
        reward_sum,
        auxiliary_rewards: trace.other_rewards().len(),
        buffers,
    }
}

/// Short sha256 of the raw rows, stable across storage modes.
pub fn fingerprint(rows: &RowStore) -> String {
    let mut hasher = Sha256::new();
    hasher.update((rows.width() as u64).to_le_bytes());
    for index in 0..rows.row_count() {
        if let Some(row) = rows.row(index) {
            for value in row.iter() {
                hasher.update(value.to_le_bytes());
            }
        }
    }
    let hash = hasher.finalize();
    hex_bytes(&hash[..8])
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn render_summary(summary: &EpisodeSummary) -> Vec<String> {
    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    let mut lines = vec![
        format!("episode: {}", summary.name),
        format!(
            "game over: {}",
            optional(summary.game_over.map(|v| v.to_string()))
        ),
        format!(
            "steps played: {} / {}",
            optional(summary.steps_played.map(|v| v.to_string())),
            optional(summary.declared_length.map(|v| v.to_string()))
        ),
        format!(
            "reward: {:.4} (recorded {})",
            summary.reward_sum,
            optional(summary.cumulative_reward.map(|v| format!("{v:.4}")))
        ),
        format!("auxiliary rewards: {}", summary.auxiliary_rewards),
    ];
    for buffer in &summary.buffers {
        lines.push(format!(
            "{}: {} valid of {} rows, end={} sha256:{}",
            buffer.name,
            buffer.valid,
            buffer.rows,
            optional(buffer.end_index.map(|v| v.to_string())),
            buffer.fingerprint
        ));
    }
    lines
}
