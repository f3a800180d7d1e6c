//! Relay configuration.

use crate::error::{RelayError, Result};
use crate::stream::{Direction, SampleSpec, SAMPLE_SIZE};

/// Static settings for a relay session.
///
/// Use [`RelayConfig::default()`] and the `with_*` methods to adjust it:
///
/// ```
/// use klingt_relay::RelayConfig;
///
/// let config = RelayConfig::default()
///     .with_channels(2)
///     .with_fragments(3);
/// assert_eq!(config.ring_capacity(512), 512 * 2 * 4 * 3);
/// ```
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Name the relay presents to both subsystems.
    pub client_name: String,
    /// Channels per endpoint group. Default: 2
    pub channels: u16,
    /// Engine periods each ring can hold. Default: 2
    pub fragments: u32,
    /// Full-name prefix of hardware endpoints whose connections are mirrored.
    /// Default: `"system:"`
    pub hardware_prefix: String,
    /// Service stream names, indexed like [`Direction::ALL`].
    pub stream_names: [String; 3],
    /// Pending graph operations the callback can lag behind by. Default: 64
    pub graph_op_capacity: usize,
    /// Ring sets that can wait for the callback to install them. Default: 4
    pub swap_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            client_name: "JACK over PulseAudio".to_string(),
            channels: 2,
            fragments: 2,
            hardware_prefix: "system:".to_string(),
            stream_names: [
                "JACK playback".to_string(),
                "JACK record".to_string(),
                "JACK monitor".to_string(),
            ],
            graph_op_capacity: 64,
            swap_capacity: 4,
        }
    }
}

impl RelayConfig {
    /// Set the number of channels per endpoint group.
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Set how many engine periods each ring holds.
    pub fn with_fragments(mut self, fragments: u32) -> Self {
        self.fragments = fragments;
        self
    }

    /// Set the client name.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Set the prefix identifying hardware endpoints.
    pub fn with_hardware_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.hardware_prefix = prefix.into();
        self
    }

    /// Rejects settings that can never work.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.channels == 0 {
            "channels must be at least 1"
        } else if self.fragments == 0 {
            "fragments must be at least 1"
        } else if self.graph_op_capacity == 0 {
            "graph_op_capacity must be at least 1"
        } else if self.swap_capacity == 0 {
            "swap_capacity must be at least 1"
        } else {
            return Ok(());
        };
        Err(RelayError::InvalidConfig {
            reason: reason.to_string(),
        })
    }

    /// Service stream name for `direction`.
    pub fn stream_name(&self, direction: Direction) -> &str {
        &self.stream_names[direction.index()]
    }

    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * SAMPLE_SIZE
    }

    /// Bytes in one engine period of `frames` frames.
    pub fn period_bytes(&self, frames: u32) -> usize {
        frames as usize * self.frame_bytes()
    }

    /// Capacity in bytes of each ring for a period of `frames` frames.
    pub fn ring_capacity(&self, frames: u32) -> usize {
        self.period_bytes(frames) * self.fragments as usize
    }

    /// Sample spec for streams running at `rate`.
    pub fn sample_spec(&self, rate: u32) -> SampleSpec {
        SampleSpec {
            rate,
            channels: self.channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.channels, 2);
        assert_eq!(config.fragments, 2);
        assert_eq!(config.hardware_prefix, "system:");
        assert_eq!(config.stream_name(Direction::Monitor), "JACK monitor");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ring_capacity_for_512_frames() {
        let config = RelayConfig::default();
        assert_eq!(config.period_bytes(512), 4096);
        assert_eq!(config.ring_capacity(512), 8192);
    }

    #[test]
    fn test_validate_rejects_zero_channels() {
        let err = RelayConfig::default().with_channels(0).validate().unwrap_err();
        assert!(matches!(err, RelayError::InvalidConfig { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_fragments() {
        assert!(RelayConfig::default().with_fragments(0).validate().is_err());
    }
}
