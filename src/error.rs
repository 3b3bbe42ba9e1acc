// ⚠️ Error Taxonomy
// Node/edge faults are recovered locally; only InvalidRequest aborts a trace.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    /// Malformed source record - skipped, aggregation continues
    #[error("data quality fault in {record}: {reason}")]
    DataQuality { record: String, reason: String },

    /// Graph accessor failed for one address - node marked incomplete
    #[error("accessor fault for {address}: {reason}")]
    Accessor { address: String, reason: String },

    /// Graph accessor exceeded its time budget for one address
    #[error("accessor timed out for {address} after {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    /// No rule matched an edge that should have matched one
    #[error("ambiguous classification for edge {edge}")]
    ClassificationAmbiguity { edge: String },

    /// Rejected before any work is attempted
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TraceError {
    /// Whether this fault aborts the whole operation
    pub fn is_fatal(&self) -> bool {
        matches!(self, TraceError::InvalidRequest(_))
    }

    /// Short machine-readable kind, used in logs and coverage reports
    pub fn kind(&self) -> &'static str {
        match self {
            TraceError::DataQuality { .. } => "data_quality",
            TraceError::Accessor { .. } => "accessor",
            TraceError::Timeout { .. } => "timeout",
            TraceError::ClassificationAmbiguity { .. } => "classification_ambiguity",
            TraceError::InvalidRequest(_) => "invalid_request",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
