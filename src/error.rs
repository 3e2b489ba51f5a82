// Clip Sentry Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed job: {0}")]
    MalformedJob(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid media name: {0}")]
    InvalidMediaName(String),

    #[error("Sampler error: {0}")]
    Sampler(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// Failure classes used when logging per-item errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lost a race or a file moved away; retried or skipped silently.
    Transient,
    /// Bad job payload or an unresolvable reference.
    MalformedInput,
    /// Sampler, detector or encoder failed or timed out.
    External,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::MalformedInput => "malformed",
            ErrorKind::External => "external",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl SentryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SentryError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::Transient,
            SentryError::MalformedJob(_)
            | SentryError::VideoNotFound(_)
            | SentryError::InvalidMediaName(_)
            | SentryError::Json(_) => ErrorKind::MalformedInput,
            SentryError::Sampler(_)
            | SentryError::Detector(_)
            | SentryError::Encoder(_)
            | SentryError::Timeout { .. } => ErrorKind::External,
            _ => ErrorKind::Unexpected,
        }
    }
}

pub type Result<T> = std::result::Result<T, SentryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(SentryError::Io(not_found).kind(), ErrorKind::Transient);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert_eq!(SentryError::Io(denied).kind(), ErrorKind::Unexpected);

        assert_eq!(SentryError::MalformedJob("x".into()).kind(), ErrorKind::MalformedInput);
        assert_eq!(SentryError::Encoder("exit 1".into()).kind(), ErrorKind::External);
        assert_eq!(
            SentryError::Timeout { tool: "ffmpeg".into(), secs: 5 }.kind(),
            ErrorKind::External
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = SentryError::Timeout { tool: "ffmpeg".into(), secs: 120 };
        assert_eq!(err.to_string(), "ffmpeg timed out after 120s");
    }
}
