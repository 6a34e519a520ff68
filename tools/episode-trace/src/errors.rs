use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("array store error: {0}")]
    Storage(String),
    #[error("json error: {0}")]
    Json(String),
    #[error("codec `{codec}` must implement {capability}")]
    MissingCapability {
        codec: String,
        capability: &'static str,
    },
    #[error("trying to reach {element} {} but there are only {length} {element}s", .index + 1)]
    IndexOutOfRange {
        index: usize,
        element: String,
        length: usize,
    },
    #[error("row width mismatch for {buffer}: expected {expected}, got {actual}")]
    RowWidth {
        buffer: String,
        expected: usize,
        actual: usize,
    },
    #[error("episode trace file not found: {file}")]
    MissingTraceFile { file: String },
    #[error("invalid episode metadata: {0}")]
    InvalidMetadata(String),
}

#[cfg(test)]
mod tests {
    use super::TraceError;

    #[test]
    fn index_out_of_range_reports_one_based_position() {
        let err = TraceError::IndexOutOfRange {
            index: 2,
            element: "action".to_string(),
            length: 2,
        };
        assert_eq!(
            err.to_string(),
            "trying to reach action 3 but there are only 2 actions"
        );
    }

    #[test]
    fn missing_trace_file_names_the_file() {
        let err = TraceError::MissingTraceFile {
            file: "rewards.npz".to_string(),
        };
        assert!(err.to_string().contains("rewards.npz"));
    }
}
