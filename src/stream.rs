//! Per-direction stream description shared by both sides of the relay.

use core::fmt;

/// Size of one sample in bytes. Both sides exchange native-endian `f32`.
pub const SAMPLE_SIZE: usize = core::mem::size_of::<f32>();

/// The three audio paths the relay carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Engine output played back through the service.
    Playback,
    /// Service input delivered to the engine.
    Capture,
    /// The service's monitor of its own playback sink, delivered to the engine.
    Monitor,
}

impl Direction {
    /// Every direction, in setup order.
    pub const ALL: [Direction; 3] = [Direction::Playback, Direction::Capture, Direction::Monitor];

    /// Prefix of the engine endpoints for this direction (`playback_1`, ...).
    pub fn port_prefix(self) -> &'static str {
        match self {
            Direction::Playback => "playback",
            Direction::Capture => "capture",
            Direction::Monitor => "monitor",
        }
    }

    /// Whether audio flows from the service into the engine.
    pub fn is_record(self) -> bool {
        !matches!(self, Direction::Playback)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Playback => 0,
            Direction::Capture => 1,
            Direction::Monitor => 2,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.port_prefix())
    }
}

/// Sample format negotiated with the service: native `f32` at `rate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleSpec {
    /// Frames per second.
    pub rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
}

impl SampleSpec {
    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * SAMPLE_SIZE
    }
}

/// Buffering attributes requested from the service for one stream.
///
/// `None` means "let the server decide".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BufferAttr {
    /// Absolute maximum the server buffers.
    pub max_length: Option<u32>,
    /// Playback fill level the server aims for.
    pub target_length: Option<u32>,
    /// Bytes needed before playback starts.
    pub prebuffer: Option<u32>,
    /// Smallest write request the server sends.
    pub min_request: Option<u32>,
    /// Size of record fragments the server delivers.
    pub fragment_size: Option<u32>,
}

impl BufferAttr {
    /// Attributes for the playback stream: the server keeps one engine period queued.
    pub fn playback(period_bytes: u32) -> Self {
        Self {
            target_length: Some(period_bytes),
            ..Self::default()
        }
    }

    /// Attributes for record and monitor streams: one engine period per fragment.
    pub fn record(period_bytes: u32) -> Self {
        Self {
            fragment_size: Some(period_bytes),
            ..Self::default()
        }
    }

    /// Attributes for `direction`, sized for `period_bytes`.
    pub fn for_direction(direction: Direction, period_bytes: u32) -> Self {
        if direction.is_record() {
            Self::record(period_bytes)
        } else {
            Self::playback(period_bytes)
        }
    }
}

/// What the relay last negotiated for one direction.
///
/// Only the reconfiguration path mutates this, and only under the service lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamState {
    pub direction: Direction,
    pub sample_rate: u32,
    pub period_frames: u32,
    pub buffer_attr: BufferAttr,
}

impl StreamState {
    pub(crate) fn new(direction: Direction, sample_rate: u32, period_frames: u32, period_bytes: u32) -> Self {
        Self {
            direction,
            sample_rate,
            period_frames,
            buffer_attr: BufferAttr::for_direction(direction, period_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_attr_targets_one_period() {
        let attr = BufferAttr::playback(8192);
        assert_eq!(attr.target_length, Some(8192));
        assert_eq!(attr.fragment_size, None);
        assert_eq!(attr.max_length, None);
        assert_eq!(attr.prebuffer, None);
        assert_eq!(attr.min_request, None);
    }

    #[test]
    fn record_attr_fragments_by_period() {
        let attr = BufferAttr::for_direction(Direction::Monitor, 4096);
        assert_eq!(attr.fragment_size, Some(4096));
        assert_eq!(attr.target_length, None);
    }

    #[test]
    fn frame_bytes_for_stereo() {
        let spec = SampleSpec { rate: 48000, channels: 2 };
        assert_eq!(spec.frame_bytes(), 8);
    }
}
