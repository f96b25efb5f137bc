//! Error types and handling for Elektra
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Elektra operations
pub type Result<T> = std::result::Result<T, ElektraError>;

/// Main error type for Elektra
#[derive(Debug, Error)]
pub enum ElektraError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// No credentials configured in the environment or options file
    #[error("Missing CEZ credentials in options or environment")]
    CredentialsMissing,

    /// Login/authentication errors (bad credentials, broken login flow)
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Portal is in a planned maintenance window; expected to self-resolve
    #[error("Portal maintenance: {message}")]
    Maintenance { message: String },

    /// Server rejected the session tokens (HTTP 401)
    #[error("Session expired: {message}")]
    SessionExpired { message: String },

    /// Report or feed fetch errors
    #[error("Fetch error: {message}")]
    Fetch { message: String },

    /// Tariff feed carried no signal entries
    #[error("No signals found in tariff feed")]
    NoSignalData,

    /// Tariff feed signal carried an empty schedule
    #[error("No time schedule found in signal data")]
    NoSchedule,

    /// MQTT publishing errors
    #[error("MQTT error: {message}")]
    Mqtt { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl ElektraError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        ElektraError::Config {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        ElektraError::Auth {
            message: message.into(),
        }
    }

    /// Create a new maintenance error
    pub fn maintenance<S: Into<String>>(message: S) -> Self {
        ElektraError::Maintenance {
            message: message.into(),
        }
    }

    /// Create a new session-expired error
    pub fn session_expired<S: Into<String>>(message: S) -> Self {
        ElektraError::SessionExpired {
            message: message.into(),
        }
    }

    /// Create a new fetch error
    pub fn fetch<S: Into<String>>(message: S) -> Self {
        ElektraError::Fetch {
            message: message.into(),
        }
    }

    /// Create a new MQTT error
    pub fn mqtt<S: Into<String>>(message: S) -> Self {
        ElektraError::Mqtt {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        ElektraError::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        ElektraError::Network {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        ElektraError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        ElektraError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        ElektraError::Generic {
            message: message.into(),
        }
    }

    /// Whether this error is the distinguishable session-expiry signal
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ElektraError::SessionExpired { .. })
    }

    /// Whether this error is the distinguishable maintenance signal
    pub fn is_maintenance(&self) -> bool {
        matches!(self, ElektraError::Maintenance { .. })
    }
}

impl From<std::io::Error> for ElektraError {
    fn from(err: std::io::Error) -> Self {
        ElektraError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for ElektraError {
    fn from(err: serde_yaml::Error) -> Self {
        ElektraError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ElektraError {
    fn from(err: serde_json::Error) -> Self {
        ElektraError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ElektraError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ElektraError::timeout(err.to_string())
        } else {
            ElektraError::network(err.to_string())
        }
    }
}

impl From<chrono::ParseError> for ElektraError {
    fn from(err: chrono::ParseError) -> Self {
        ElektraError::validation("datetime", &err.to_string())
    }
}
