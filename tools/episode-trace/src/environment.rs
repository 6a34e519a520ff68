//! What a trace needs to know about the simulation when an episode ends.

use serde_json::Value;
use std::time::Duration;

/// Time the environment spent in each phase of its step loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvTimings {
    pub apply_action: Duration,
    pub powerflow: Duration,
    pub observation: Duration,
}

impl EnvTimings {
    pub fn total(&self) -> Duration {
        self.apply_action + self.powerflow + self.observation
    }
}

pub trait EnvironmentSource {
    /// Identifier of the time series the episode was played on.
    fn chronics_id(&self) -> String;
    /// Declared episode length; negative when the series is unbounded.
    fn max_timestep(&self) -> i64;
    fn grid_path(&self) -> String;
    fn backend_type(&self) -> String;
    fn env_type(&self) -> String;
    fn parameters(&self) -> Value;
    fn timings(&self) -> EnvTimings;
}

/// Snapshot of an environment, for callers that collect the values
/// themselves (and for tests).
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSnapshot {
    pub chronics_id: String,
    pub max_timestep: i64,
    pub grid_path: String,
    pub backend_type: String,
    pub env_type: String,
    pub parameters: Value,
    pub timings: EnvTimings,
}

impl EnvironmentSource for EnvironmentSnapshot {
    fn chronics_id(&self) -> String {
        self.chronics_id.clone()
    }

    fn max_timestep(&self) -> i64 {
        self.max_timestep
    }

    fn grid_path(&self) -> String {
        self.grid_path.clone()
    }

    fn backend_type(&self) -> String {
        self.backend_type.clone()
    }

    fn env_type(&self) -> String {
        self.env_type.clone()
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn timings(&self) -> EnvTimings {
        self.timings
    }
}
