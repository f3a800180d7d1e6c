//! Boundary with the fixed-period engine.
//!
//! The engine drives the relay through two handler traits, one per thread it
//! calls from:
//!
//! - [`ProcessHandler`] runs on the real-time thread, once per period.
//! - [`NotificationHandler`] runs on the engine's notification thread and
//!   receives period-size, sample-rate, and topology changes.
//!
//! The relay in turn drives the engine through [`GraphEngine`].

use crate::error::{EngineError, Result};

/// Whether a port receives or produces audio, from the engine's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortFlow {
    /// Audio flows into the port (the relay's playback endpoints).
    Input,
    /// Audio flows out of the port (the relay's capture and monitor endpoints).
    Output,
}

/// What the relay needs from the engine it is attached to.
///
/// Ports are addressed by full name (`client:port`).
pub trait GraphEngine: Send + Sync + 'static {
    /// Current frames per second.
    fn sample_rate(&self) -> u32;

    /// Current frames per period.
    fn buffer_size(&self) -> u32;

    /// Register a port owned by this client, returning its full name.
    fn register_port(&self, short_name: &str, flow: PortFlow) -> Result<String, EngineError>;

    /// Remove a port previously returned by [`register_port`](Self::register_port).
    fn unregister_port(&self, full_name: &str) -> Result<(), EngineError>;

    /// Route `source` into `destination`. Connecting twice is not an error.
    fn connect(&self, source: &str, destination: &str) -> Result<(), EngineError>;

    /// Undo [`connect`](Self::connect).
    fn disconnect(&self, source: &str, destination: &str) -> Result<(), EngineError>;
}

/// Per-channel sample arrays for one period, as handed out by the engine.
///
/// Every slice holds exactly `nframes` samples.
pub struct PeriodBuffers<'a, 'b> {
    /// Audio arriving on the relay's playback endpoints.
    pub playback: &'a [&'b [f32]],
    /// Audio to emit on the relay's capture endpoints.
    pub capture: &'a mut [&'b mut [f32]],
    /// Audio to emit on the relay's monitor endpoints.
    pub monitor: &'a mut [&'b mut [f32]],
}

/// Called on the real-time thread once per period. Must not block.
pub trait ProcessHandler: Send {
    fn process(&mut self, nframes: u32, buffers: &mut PeriodBuffers<'_, '_>);
}

/// Called on the engine's notification thread.
pub trait NotificationHandler: Send {
    /// The period size changed to `frames`.
    fn buffer_size(&mut self, frames: u32) -> Result<()>;

    /// The sample rate changed to `rate`.
    fn sample_rate(&mut self, rate: u32) -> Result<()>;

    /// `source` was connected to (or disconnected from) `destination`.
    fn port_connect(&mut self, source: &str, destination: &str, connected: bool);

    /// The engine is going away.
    fn shutdown(&mut self);

    /// The engine reported an error of its own.
    fn engine_error(&mut self, message: &str) {
        tracing::error!(message, "engine error");
    }
}

/// Port name without the `client:` prefix.
pub fn short_name(full_name: &str) -> &str {
    full_name
        .split_once(':')
        .map_or(full_name, |(_, short)| short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_client() {
        assert_eq!(short_name("system:capture_1"), "capture_1");
        assert_eq!(short_name("a2j:Midi Through [14]:port"), "Midi Through [14]:port");
        assert_eq!(short_name("bare"), "bare");
    }
}
