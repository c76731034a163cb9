//! Error types for isoreach.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Request errors
    #[error("Invalid travel mode: {0}")]
    InvalidMode(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Source has no fetch backend: {0}")]
    UnsupportedSource(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timezone lookup failed: {0}")]
    Timezone(String),

    // Cache errors
    #[error("Constraint failed, uid '{uid}' is already cached")]
    CacheConstraint { uid: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    // Engine errors
    #[error("Engine exited before it was ready")]
    EngineExited,

    #[error("Engine not ready after {minutes} minutes")]
    EngineTimeout { minutes: u64 },

    #[error("Engine build failed after {attempts} attempts")]
    EngineBuildFailed { attempts: u32 },

    #[error("Engine is not running")]
    EngineNotRunning,

    #[error("Container error: {0}")]
    Container(String),

    #[error("Engine configuration error: {0}")]
    Config(String),

    // Upstream errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Calibration failed: {0}")]
    Calibration(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a retry with cleanup may succeed.
    ///
    /// Engine exits, timeouts and transport failures are transient; cache
    /// integrity violations and invalid requests never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::EngineExited
                | Error::EngineTimeout { .. }
                | Error::Container(_)
                | Error::Network(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
