//! Conversion between flat numeric vectors and domain objects.
//!
//! A trace never interprets the rows it stores. Every buffer is paired with a
//! [`VectorCodec`] that knows how to turn a row back into an action, an
//! observation or an environment modification, and that reports a row which
//! cannot be decoded as [`InvalidEncoding`]. An invalid row is how a trace
//! finds the point where the episode ended.

use crate::errors::TraceError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Marker returned by [`VectorCodec::decode`] for a row that does not encode a
/// valid object. This is the game-over signal, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEncoding {
    pub reason: String,
}

impl InvalidEncoding {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for InvalidEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid encoding: {}", self.reason)
    }
}

/// Which directions a codec supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapabilities {
    pub decode: bool,
    pub encode: bool,
}

impl CodecCapabilities {
    pub const FULL: Self = Self {
        decode: true,
        encode: true,
    };
}

impl Default for CodecCapabilities {
    fn default() -> Self {
        Self::FULL
    }
}

pub trait VectorCodec: Sized {
    type Item;

    /// Human readable name of the space, used in diagnostics.
    fn name(&self) -> &str;

    /// Number of values in one encoded row.
    fn width(&self) -> usize;

    fn capabilities(&self) -> CodecCapabilities {
        CodecCapabilities::FULL
    }

    fn decode(&self, row: &[f64]) -> Result<Self::Item, InvalidEncoding>;

    fn encode(&self, item: &Self::Item) -> Result<Vec<f64>, TraceError>;

    /// JSON description written once per agent root so a trace can be read
    /// back without the live environment.
    fn describe(&self) -> Value;

    fn from_description(description: &Value) -> Result<Self, TraceError>;
}

pub(crate) fn require_decode<C: VectorCodec>(codec: &C) -> Result<(), TraceError> {
    if codec.capabilities().decode {
        Ok(())
    } else {
        Err(TraceError::MissingCapability {
            codec: codec.name().to_string(),
            capability: "decode",
        })
    }
}

pub(crate) fn require_encode<C: VectorCodec>(codec: &C) -> Result<(), TraceError> {
    if codec.capabilities().encode {
        Ok(())
    } else {
        Err(TraceError::MissingCapability {
            codec: codec.name().to_string(),
            capability: "encode",
        })
    }
}

// ── DenseCodec ────────────────────────────────────────────────────────────────

/// A decoded row of a [`DenseCodec`] space.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseVector(pub Vec<f64>);

impl DenseVector {
    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

/// Fixed-width space whose objects are the vectors themselves.
///
/// A row is valid when it has the declared width and holds no NaN.
/// Pre-allocated trace storage is NaN-filled, so rows that were never
/// written decode as the end of the episode.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseCodec {
    name: String,
    width: usize,
    capabilities: CodecCapabilities,
}

#[derive(Debug, Deserialize)]
struct DenseDescription {
    kind: String,
    name: String,
    width: usize,
    #[serde(default)]
    capabilities: CodecCapabilities,
}

impl DenseCodec {
    pub const KIND: &'static str = "dense";

    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
            capabilities: CodecCapabilities::FULL,
        }
    }

    pub fn with_capabilities(mut self, capabilities: CodecCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl VectorCodec for DenseCodec {
    type Item = DenseVector;

    fn name(&self) -> &str {
        &self.name
    }

    fn width(&self) -> usize {
        self.width
    }

    fn capabilities(&self) -> CodecCapabilities {
        self.capabilities
    }

    fn decode(&self, row: &[f64]) -> Result<DenseVector, InvalidEncoding> {
        if row.len() != self.width {
            return Err(InvalidEncoding::new(format!(
                "{} expects {} values, got {}",
                self.name,
                self.width,
                row.len()
            )));
        }
        if let Some(pos) = row.iter().position(|v| v.is_nan()) {
            return Err(InvalidEncoding::new(format!(
                "{} has NaN at position {pos}",
                self.name
            )));
        }
        Ok(DenseVector(row.to_vec()))
    }

    fn encode(&self, item: &DenseVector) -> Result<Vec<f64>, TraceError> {
        if item.0.len() != self.width {
            return Err(TraceError::RowWidth {
                buffer: self.name.clone(),
                expected: self.width,
                actual: item.0.len(),
            });
        }
        Ok(item.0.clone())
    }

    fn describe(&self) -> Value {
        json!({
            "kind": Self::KIND,
            "name": self.name,
            "width": self.width,
            "capabilities": self.capabilities,
        })
    }

    fn from_description(description: &Value) -> Result<Self, TraceError> {
        let parsed: DenseDescription = serde_json::from_value(description.clone())
            .map_err(|e| TraceError::Json(e.to_string()))?;
        if parsed.kind != Self::KIND {
            return Err(TraceError::Json(format!(
                "space `{}` has kind `{}`, expected `{}`",
                parsed.name,
                parsed.kind,
                Self::KIND
            )));
        }
        Ok(Self {
            name: parsed.name,
            width: parsed.width,
            capabilities: parsed.capabilities,
        })
    }
}
