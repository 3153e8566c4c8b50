// Typed errors with thiserror. Surface meaningful messages to JS.
// Geolocation and fetch failures are recoverable; nothing here is allowed to crash the view.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geolocation::Stage;

/// Viewer error types.
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ViewerError {
    fn from(err: serde_json::Error) -> Self {
        ViewerError::Serialization(err.to_string())
    }
}

/// Failure fetching or decoding the event feed. Recovered by keeping the last good list.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataFetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to fetch earthquake data: {status} {status_text}")]
    Http { status: u16, status_text: String },

    #[error("Malformed event feed: {0}")]
    MalformedFeed(String),
}

impl From<serde_json::Error> for DataFetchError {
    fn from(err: serde_json::Error) -> Self {
        DataFetchError::MalformedFeed(err.to_string())
    }
}

/// Outcome reasons for a geolocation cascade run that produced no location.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeolocationError {
    #[error("Location permission is blocked. Enable it in the browser site settings and retry.")]
    Denied,

    #[error("Location stage {stage:?} timed out")]
    Timeout { stage: Stage },

    #[error("Location stage {stage:?} failed: {message}")]
    StageFailed { stage: Stage, message: String },

    #[error("{0}")]
    Unavailable(String),

    #[error("Failed to get location. Please ensure Location Services are enabled for your OS and browser, then retry.")]
    Exhausted,
}

impl GeolocationError {
    /// Terminal errors end the current run; a timeout or a failed stage only advances the cascade.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            GeolocationError::Timeout { .. } | GeolocationError::StageFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ViewerError::InvalidConfig("missing field".to_string());
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn http_error_mentions_status() {
        let err = DataFetchError::Http {
            status: 503,
            status_text: "Service Unavailable".to_string(),
        };
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[test]
    fn only_stage_errors_are_recoverable() {
        assert!(!GeolocationError::Timeout { stage: Stage::PreciseFix }.is_terminal());
        assert!(!GeolocationError::StageFailed {
            stage: Stage::WatchFix,
            message: "position unavailable".into(),
        }
        .is_terminal());
        assert!(GeolocationError::Denied.is_terminal());
        assert!(GeolocationError::Exhausted.is_terminal());
        assert!(GeolocationError::Unavailable("no support".into()).is_terminal());
    }
}
