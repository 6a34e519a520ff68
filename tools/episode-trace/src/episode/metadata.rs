//! Per-episode documents and the per-step side channel.

use crate::errors::TraceError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

// ── StepInfo ──────────────────────────────────────────────────────────────────

/// Line-failure report of one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LineFailures {
    /// The environment did not report line failures at all; nothing is stored.
    #[default]
    Absent,
    /// Reported without a value; the "no failure" template is stored.
    Unreported,
    Flags(Vec<f64>),
}

/// Extra data the environment returns with each step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    pub disc_lines: LineFailures,
    /// Secondary rewards by name. Values that are not numbers are kept as
    /// reported and converted when recorded.
    pub rewards: Option<BTreeMap<String, Value>>,
}

pub type RewardRecord = BTreeMap<String, f64>;

/// Numeric value of an auxiliary reward, `-inf` when it has none.
pub fn convert_to_float(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or(f64::NEG_INFINITY),
        Value::Bool(flag) => {
            if *flag {
                1.0
            } else {
                0.0
            }
        }
        Value::String(text) => text.trim().parse::<f64>().unwrap_or(f64::NEG_INFINITY),
        Value::Null | Value::Array(_) | Value::Object(_) => f64::NEG_INFINITY,
    }
}

pub fn reward_record(raw: &BTreeMap<String, Value>) -> RewardRecord {
    raw.iter()
        .map(|(name, value)| (name.clone(), convert_to_float(value)))
        .collect()
}

/// Non-finite rewards have no JSON form; they are written as `null`.
pub fn rewards_to_json(records: &[RewardRecord]) -> Value {
    Value::Array(
        records
            .iter()
            .map(|record| {
                Value::Object(
                    record
                        .iter()
                        .map(|(name, value)| {
                            let json = serde_json::Number::from_f64(*value)
                                .map(Value::Number)
                                .unwrap_or(Value::Null);
                            (name.clone(), json)
                        })
                        .collect(),
                )
            })
            .collect(),
    )
}

pub fn rewards_from_json(value: &Value) -> Result<Vec<RewardRecord>, TraceError> {
    let Value::Array(records) = value else {
        return Err(TraceError::InvalidMetadata(
            "other rewards must be a list".to_string(),
        ));
    };
    records
        .iter()
        .map(|record| match record {
            Value::Object(map) => Ok(map
                .iter()
                .map(|(name, value)| (name.clone(), convert_to_float(value)))
                .collect()),
            other => Err(TraceError::InvalidMetadata(format!(
                "other rewards entry must be an object, got {other}"
            ))),
        })
        .collect()
}

// ── EpisodeMeta ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMeta {
    pub chronics_path: String,
    /// Stored as text, like every path-ish identifier in this document.
    #[serde(
        serialize_with = "serialize_as_text",
        deserialize_with = "deserialize_text_or_int"
    )]
    pub chronics_max_timestep: i64,
    pub grid_path: String,
    pub backend_type: String,
    pub env_type: String,
    pub nb_timestep_played: u64,
    pub cumulative_reward: f64,
    pub env_seed: Option<u64>,
    pub agent_seed: Option<u64>,
}

fn serialize_as_text<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn deserialize_text_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrInt {
        Int(i64),
        Text(String),
    }

    match TextOrInt::deserialize(deserializer)? {
        TextOrInt::Int(value) => Ok(value),
        TextOrInt::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not an integer: {text:?}"))),
    }
}

// ── EpisodeTimes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeTimes {
    #[serde(rename = "Env")]
    pub env: EnvTimes,
    #[serde(rename = "Agent")]
    pub agent: AgentTimes,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvTimes {
    pub total: f64,
    pub apply_act: f64,
    pub powerflow_computation: f64,
    pub observation_computation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTimes {
    pub total: f64,
}

impl EpisodeTimes {
    pub fn new(env: crate::environment::EnvTimings, agent: Duration, wall_clock: Duration) -> Self {
        Self {
            env: EnvTimes {
                total: env.total().as_secs_f64(),
                apply_act: env.apply_action.as_secs_f64(),
                powerflow_computation: env.powerflow.as_secs_f64(),
                observation_computation: env.observation.as_secs_f64(),
            },
            agent: AgentTimes {
                total: agent.as_secs_f64(),
            },
            total: wall_clock.as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvTimings;
    use serde_json::json;

    #[test]
    fn unconvertible_rewards_become_negative_infinity() {
        let mut raw = BTreeMap::new();
        raw.insert("l2rpn".to_string(), json!("abc"));
        raw.insert("flat".to_string(), json!(2));
        raw.insert("text".to_string(), json!(" 1.5 "));
        raw.insert("flag".to_string(), json!(true));
        raw.insert("missing".to_string(), Value::Null);

        let record = reward_record(&raw);
        assert_eq!(record["l2rpn"], f64::NEG_INFINITY);
        assert_eq!(record["flat"], 2.0);
        assert_eq!(record["text"], 1.5);
        assert_eq!(record["flag"], 1.0);
        assert_eq!(record["missing"], f64::NEG_INFINITY);
    }

    #[test]
    fn negative_infinity_survives_json_as_null() {
        let mut record = RewardRecord::new();
        record.insert("l2rpn".to_string(), f64::NEG_INFINITY);
        record.insert("other".to_string(), 0.25);

        let json = rewards_to_json(&[record.clone()]);
        assert_eq!(json, json!([{"l2rpn": null, "other": 0.25}]));
        assert_eq!(rewards_from_json(&json).expect("parse"), vec![record]);
    }

    #[test]
    fn rewards_from_json_rejects_non_lists() {
        assert!(rewards_from_json(&json!({"a": 1})).is_err());
        assert!(rewards_from_json(&json!([1])).is_err());
    }

    #[test]
    fn max_timestep_is_written_as_text_and_read_from_either_form() {
        let meta = EpisodeMeta {
            chronics_path: "chronics/0000".to_string(),
            chronics_max_timestep: 288,
            grid_path: "grid.json".to_string(),
            backend_type: "PandaPowerBackend".to_string(),
            env_type: "Environment".to_string(),
            nb_timestep_played: 10,
            cumulative_reward: 12.5,
            env_seed: Some(7),
            agent_seed: None,
        };
        let value = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(value["chronics_max_timestep"], json!("288"));
        let back: EpisodeMeta = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, meta);

        let mut numeric = serde_json::to_value(&meta).expect("serialize");
        numeric["chronics_max_timestep"] = json!(-1);
        let unbounded: EpisodeMeta = serde_json::from_value(numeric).expect("deserialize");
        assert_eq!(unbounded.chronics_max_timestep, -1);
    }

    #[test]
    fn episode_times_use_capitalized_sections() {
        let times = EpisodeTimes::new(
            EnvTimings {
                apply_action: Duration::from_millis(100),
                powerflow: Duration::from_millis(200),
                observation: Duration::from_millis(300),
            },
            Duration::from_millis(50),
            Duration::from_secs(1),
        );
        let value = serde_json::to_value(&times).expect("serialize");
        assert!((value["Env"]["total"].as_f64().expect("total") - 0.6).abs() < 1e-9);
        assert_eq!(value["Agent"]["total"], json!(0.05));
        assert_eq!(value["total"], json!(1.0));
    }
}
