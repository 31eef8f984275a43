//! Error types for each layer of chat-speaker.

use thiserror::Error;

/// Rule-set validation failures. Raised when a rule is added or edited,
/// never while filtering text.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("rule name must not be empty")]
    EmptyName,

    #[error("rule '{0}' has an empty pattern")]
    EmptyPattern(String),

    #[error("a rule named '{0}' already exists")]
    DuplicateName(String),

    #[error("invalid pattern for rule '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("no rule named '{0}'")]
    UnknownRule(String),
}

/// Failures talking to the SiliconFlow API.
#[derive(Debug, Error)]
pub enum SiliconFlowError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("API returned empty audio")]
    EmptyAudio,

    #[error("invalid voice name '{0}': use 1-64 ASCII letters, digits, '_' or '-'")]
    InvalidVoiceName(String),
}

/// Audio output failures.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    Output(String),

    #[error("failed to decode audio: {0}")]
    Decode(String),
}

/// Settings validation and persistence failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f32,
        max: f32,
        value: f32,
    },

    #[error("unsupported response format '{0}'")]
    ResponseFormat(String),

    #[error("API url must start with http:// or https://, got '{0}'")]
    InvalidUrl(String),

    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yml::Error,
    },

    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_yml::Error),
}

/// Anything that can go wrong between a speak request and the speaker.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error(transparent)]
    Synthesis(#[from] SiliconFlowError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}
