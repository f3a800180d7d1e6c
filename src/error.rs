//! Error types for the relay.
//!
//! Only setup and negotiation failures are errors. Buffering faults
//! (overflow, underflow, holes) are counted in [`RelayStats`](crate::RelayStats)
//! and logged; they never surface here.

use crate::stream::Direction;

/// Result alias used throughout the crate.
pub type Result<T, E = RelayError> = core::result::Result<T, E>;

/// Fatal errors. The session cannot continue once one of these is raised.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The configuration can never produce a working relay.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with it.
        reason: String,
    },

    /// The engine reported a period size the rings cannot be built for.
    #[error("invalid period size: {frames} frames")]
    InvalidPeriod {
        /// The reported period size.
        frames: u32,
    },

    /// An endpoint could not be registered on the engine.
    #[error("unable to register port {port}: {source}")]
    PortRegistration {
        /// Short name of the port.
        port: String,
        /// Error reported by the engine.
        source: EngineError,
    },

    /// The connection to the audio service failed.
    #[error("unable to connect to the audio service: {0}")]
    ContextFailed(#[source] ServiceError),

    /// A stream could not be created or connected.
    #[error("unable to connect {direction} stream: {source}")]
    StreamConnect {
        /// Which stream.
        direction: Direction,
        /// Error reported by the service.
        source: ServiceError,
    },

    /// The playback sink's monitor source could not be looked up.
    #[error("unable to query the playback sink for its monitor source: {0}")]
    MonitorQuery(#[source] ServiceError),

    /// New buffer attributes were rejected by a ready stream.
    #[error("unable to reset {direction} buffer: {source}")]
    BufferAttr {
        /// Which stream.
        direction: Direction,
        /// Error reported by the service.
        source: ServiceError,
    },

    /// A live sample-rate update was rejected by a ready stream.
    #[error("unable to reset {direction} sample rate: {source}")]
    SampleRate {
        /// Which stream.
        direction: Direction,
        /// Error reported by the service.
        source: ServiceError,
    },

    /// Writing to the service failed.
    #[error("unable to write to {direction} buffer: {source}")]
    Write {
        /// Which stream.
        direction: Direction,
        /// Error reported by the service.
        source: ServiceError,
    },

    /// Reading from the service failed.
    #[error("unable to read from {direction} buffer: {source}")]
    Read {
        /// Which stream.
        direction: Direction,
        /// Error reported by the service.
        source: ServiceError,
    },

    /// Replacement rings piled up because the process callback is not running.
    #[error("process callback has not picked up {pending} pending ring sets")]
    SwapBacklog {
        /// Number of ring sets waiting.
        pending: usize,
    },
}

/// Error text reported by the variable-chunk audio service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    message: String,
}

impl ServiceError {
    /// Wraps the service's own description of what went wrong.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error text reported by the fixed-period engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Wraps the engine's own description of what went wrong.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
