/// Failures of the forecast path.
///
/// Every variant carries enough context to be logged with the lot id and a
/// stable [`kind`](ForecastError::kind) string.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    /// No artifact is deployed for the lot. Permanent.
    #[error("no forecast model deployed for lot {lot_id}")]
    ModelNotFound { lot_id: String },

    /// Fewer readings than the model window are stored. Clears once the
    /// ingestion job has accumulated enough history.
    #[error("lot {lot_id} has {available} of {required} required history steps")]
    InsufficientHistory {
        lot_id: String,
        required: usize,
        available: usize,
    },

    /// Database or blob store I/O failed, or the call timed out.
    #[error("{upstream} unavailable: {message}")]
    UpstreamUnavailable {
        upstream: &'static str,
        message: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The deployed artifact does not match the feature contract this
    /// service builds inputs for.
    #[error("artifact for lot {lot_id} rejected: {reason}")]
    SchemaMismatch { lot_id: String, reason: String },
}

impl ForecastError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            Self::InsufficientHistory { .. } => "INSUFFICIENT_HISTORY",
            Self::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
        }
    }

    /// Only transient I/O failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }

    pub(crate) fn database(err: sqlx::Error) -> Self {
        Self::UpstreamUnavailable {
            upstream: "database",
            message: err.to_string(),
        }
    }

    pub(crate) fn artifact_store(err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            upstream: "artifact store",
            message: err.to_string(),
        }
    }

    pub(crate) fn schema(lot_id: &str, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            lot_id: lot_id.to_string(),
            reason: reason.into(),
        }
    }
}
