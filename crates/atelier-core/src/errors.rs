use std::time::Duration;

/// Typed errors for the synthesis-engine boundary.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("engine unreachable: {0}")]
    EngineUnavailable(String),

    #[error("invalid synthesis request: {0}")]
    InvalidRequest(String),

    #[error("render failed: {0}")]
    RenderFailed(String),

    #[error("malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl SynthesisError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RenderFailed(_) => "render_failed",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code from the engine sidecar.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest(body),
            500..=599 => Self::RenderFailed(format!("engine returned {status}: {body}")),
            _ => Self::MalformedResponse(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(SynthesisError::Cancelled.error_kind(), "cancelled");
        assert_eq!(
            SynthesisError::EngineUnavailable("tcp".into()).error_kind(),
            "engine_unavailable"
        );
        assert_eq!(
            SynthesisError::Timeout(Duration::from_secs(30)).error_kind(),
            "timeout"
        );
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(
            SynthesisError::from_status(400, "bad".into()),
            SynthesisError::InvalidRequest(_)
        ));
        assert!(matches!(
            SynthesisError::from_status(422, "bad".into()),
            SynthesisError::InvalidRequest(_)
        ));
        assert!(matches!(
            SynthesisError::from_status(500, "boom".into()),
            SynthesisError::RenderFailed(_)
        ));
        assert!(matches!(
            SynthesisError::from_status(302, "weird".into()),
            SynthesisError::MalformedResponse(_)
        ));
    }
}
