/*!
    Error types shared by the engine, ingest, playback and egress crates.
*/

use thiserror::Error;

use crate::Pts;

/**
    Error type for the media bridge.

    Construction-time failures ([`EngineError::InvalidSource`],
    [`EngineError::InitFailed`]) are returned synchronously to the caller.
    Everything else is raised on a background thread, logged there, and
    observed by the host as a degraded or not-ready pipeline.
*/
#[derive(Debug, Error)]
pub enum EngineError {
    /// The locator could not be resolved to a readable source or writable destination.
    #[error("invalid source '{locator}': {reason}")]
    InvalidSource { locator: String, reason: String },
    /// The engine could not reach its ready state.
    #[error("engine initialization failed: {reason}")]
    InitFailed { reason: String },
    /// Decode or encode failure after a successful start.
    #[error("engine runtime error: {message}")]
    Runtime { message: String },
    /// A bounded queue rejected a sample.
    #[error("{queue} queue overflow")]
    QueueOverflow { queue: &'static str },
    /// The engine refused a seek.
    #[error("seek to {position} failed")]
    SeekFailed { position: Pts },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn invalid_source(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    pub fn init_failed(reason: impl Into<String>) -> Self {
        Self::InitFailed {
            reason: reason.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /**
        Returns true if this error is fatal at construction time.
    */
    pub fn is_construction_error(&self) -> bool {
        matches!(self, Self::InvalidSource { .. } | Self::InitFailed { .. })
    }
}

/**
    Result type alias for the media bridge.
*/
pub type Result<T> = std::result::Result<T, EngineError>;
