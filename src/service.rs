//! Boundary with the variable-chunk audio service.
//!
//! The service owns an event loop with its own lock. Every call into a
//! [`ServiceHandler`] happens with that lock held; in this crate the lock is
//! the mutex inside [`ServiceHandle`](crate::ServiceHandle).

use crate::error::{Result, ServiceError};
use crate::stream::{BufferAttr, Direction, SampleSpec};

/// Connection state of the service context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

/// One fragment peeked from a record stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Fragment<'a> {
    /// Captured bytes.
    Data(&'a [u8]),
    /// A gap of this many bytes with nothing behind it.
    Hole(usize),
    /// Nothing queued.
    Empty,
}

/// Operations shared by every stream.
pub trait StreamControl: Send {
    /// Whether the stream is connected and can take attribute updates.
    fn is_ready(&self) -> bool;

    /// Replace the stream's buffering attributes.
    fn set_buffer_attr(&mut self, attr: &BufferAttr) -> Result<(), ServiceError>;

    /// Change the stream's sample rate without reconnecting.
    fn update_sample_rate(&mut self, rate: u32) -> Result<(), ServiceError>;

    /// Disconnect from the server. Further calls are no-ops.
    fn disconnect(&mut self);
}

/// A stream the relay writes into.
pub trait PlaybackStream: StreamControl {
    /// Borrow the server's buffer for a write of about `nbytes` bytes.
    ///
    /// The server may hand back a different length; that length is what
    /// must be submitted.
    fn begin_write(&mut self, nbytes: usize) -> Result<&mut [u8], ServiceError>;

    /// Submit the first `nbytes` bytes of the buffer from [`begin_write`](Self::begin_write).
    fn write(&mut self, nbytes: usize) -> Result<(), ServiceError>;

    /// Index of the sink the stream currently plays to.
    fn device_index(&self) -> Option<u32>;
}

/// A stream the relay reads from.
pub trait RecordStream: StreamControl {
    /// Bytes waiting to be read.
    fn readable_size(&self) -> usize;

    /// Look at the next fragment without consuming it.
    fn peek(&mut self) -> Result<Fragment<'_>, ServiceError>;

    /// Consume the fragment returned by the last [`peek`](Self::peek).
    fn discard(&mut self) -> Result<(), ServiceError>;
}

/// Stream factory handed to [`ServiceHandler::context_state`] once the
/// connection is up.
pub trait ServiceContext {
    /// Create a stream named `name` and connect it for playback to the default sink.
    fn connect_playback(
        &mut self,
        name: &str,
        spec: &SampleSpec,
        attr: &BufferAttr,
    ) -> Result<Box<dyn PlaybackStream>, ServiceError>;

    /// Create a stream named `name` and connect it for recording from
    /// `source`, or from the default source when `None`.
    fn connect_record(
        &mut self,
        name: &str,
        spec: &SampleSpec,
        attr: &BufferAttr,
        source: Option<&str>,
    ) -> Result<Box<dyn RecordStream>, ServiceError>;

    /// Name of the monitor source paired with sink `sink_index`.
    fn monitor_source(&mut self, sink_index: u32) -> Result<String, ServiceError>;

    /// The error that put the context into [`ContextState::Failed`].
    fn last_error(&self) -> ServiceError;
}

/// Callbacks from the service's event loop.
pub trait ServiceHandler {
    /// The context changed state. On [`ContextState::Ready`] the streams are set up.
    fn context_state(&mut self, state: ContextState, context: &mut dyn ServiceContext) -> Result<()>;

    /// The playback stream can take `nbytes` more bytes.
    fn writable(&mut self, nbytes: usize) -> Result<()>;

    /// A record stream has data.
    fn readable(&mut self, direction: Direction) -> Result<()>;

    /// The server moved a stream to another device, resetting its buffer attributes.
    fn moved(&mut self, direction: Direction) -> Result<()>;
}
