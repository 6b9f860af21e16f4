//! Error types for flag definition, evaluation and payload transport.

use std::time::Duration;

use thiserror::Error;

/// Rejected cookie or header input during context extraction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("invalid {field}: {reason}")]
    InvalidIdentifier {
        field: &'static str,
        reason: &'static str,
    },
}

/// Errors raised when defining or looking up flags.
///
/// These are programming errors and surface immediately; evaluation itself
/// never returns one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlagError {
    #[error("invalid configuration for flag '{flag}': {reason}")]
    Configuration { flag: String, reason: String },

    #[error("flag '{0}' is already defined")]
    DuplicateFlag(String),

    #[error("flag '{0}' is not defined")]
    UnknownFlag(String),
}

impl FlagError {
    pub fn configuration(flag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            flag: flag.into(),
            reason: reason.into(),
        }
    }
}

/// A remote adapter did not produce an answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("adapter request failed: {0}")]
    Failed(String),

    #[error("adapter timed out after {0:?}")]
    Timeout(Duration),

    #[error("adapter task aborted: {0}")]
    Aborted(String),

    #[error("adapter unavailable: {0}")]
    Unavailable(String),
}

impl AdapterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Failure inside the offline evaluator. Always mapped to the safe fallback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OfflineEvaluationError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("custom logic failed: {0}")]
    CustomLogic(String),

    #[error("custom logic panicked")]
    CustomPanicked,

    #[error("policy produced a null value")]
    NullValue,
}

impl OfflineEvaluationError {
    /// Short label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::CustomLogic(_) | Self::CustomPanicked => "custom_logic",
            Self::NullValue => "null_value",
        }
    }
}

/// Rejected encryption secret.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret is too short: {length} characters, at least {minimum} required")]
    TooShort { length: usize, minimum: usize },

    #[error("secret contains characters outside the url-safe base64 alphabet")]
    BadCharset,

    #[error("key derivation failed")]
    KeyDerivation,
}

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// Malformed, foreign or tampered ciphertext.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("payload too short: {length} bytes")]
    TooShort { length: usize },

    #[error("authentication failed (wrong secret or tampered payload)")]
    Authentication,

    #[error("decrypted payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Invalid process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}'")]
    InvalidVar { name: &'static str, value: String },

    #[error("{name}: {source}")]
    Secret {
        name: &'static str,
        #[source]
        source: SecretError,
    },

    #[error("failed to read flag file {path}: {source}")]
    FlagFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse flag file {path}: {source}")]
    FlagFileFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Flag(#[from] FlagError),
}

/// Failure reported by an analytics sink.
#[derive(Debug, Error)]
#[error("analytics sink failed: {0}")]
pub struct AnalyticsError(pub String);
