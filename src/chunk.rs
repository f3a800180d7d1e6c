//! Variable-chunk side of the relay.
//!
//! [`ServiceSide`] owns the service streams and the service's ends of the
//! rings. The service calls into it from its event loop, always with the loop
//! lock held, asking for or delivering whatever byte count suits it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Sender;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::relay::Termination;
use crate::ring::{RingWriter, ServiceRings};
use crate::service::{
    ContextState, Fragment, PlaybackStream, RecordStream, ServiceContext, ServiceHandler,
};
use crate::stats::{CallbackXruns, RelayStats, Xrun};
use crate::stream::{Direction, StreamState};

/// Service-side state of a relay session.
pub struct ServiceSide {
    pub(crate) config: RelayConfig,
    pub(crate) playback: Option<Box<dyn PlaybackStream>>,
    pub(crate) record: Option<Box<dyn RecordStream>>,
    pub(crate) monitor: Option<Box<dyn RecordStream>>,
    pub(crate) states: [StreamState; 3],
    pub(crate) rings: ServiceRings,
    stats: Arc<RelayStats>,
    callback_xruns: CallbackXruns,
    termination: Sender<Termination>,
}

impl ServiceSide {
    pub(crate) fn new(
        config: RelayConfig,
        sample_rate: u32,
        period_frames: u32,
        rings: ServiceRings,
        stats: Arc<RelayStats>,
        termination: Sender<Termination>,
    ) -> Self {
        let period_bytes = config.period_bytes(period_frames) as u32;
        let states = Direction::ALL.map(|direction| StreamState::new(direction, sample_rate, period_frames, period_bytes));
        Self {
            config,
            playback: None,
            record: None,
            monitor: None,
            states,
            rings,
            stats,
            callback_xruns: CallbackXruns::default(),
            termination,
        }
    }

    /// What was last negotiated for `direction`.
    pub fn state(&self, direction: Direction) -> &StreamState {
        &self.states[direction.index()]
    }

    /// Capacity in bytes of the rings the service side currently uses.
    pub fn ring_capacity(&self) -> usize {
        self.rings.capacity()
    }

    /// Whether the streams have been set up.
    pub fn is_connected(&self) -> bool {
        self.playback.is_some()
    }

    fn connect_streams(&mut self, context: &mut dyn ServiceContext) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let spec = self.config.sample_spec(self.state(Direction::Playback).sample_rate);

        let playback_attr = self.state(Direction::Playback).buffer_attr;
        let playback = context
            .connect_playback(self.config.stream_name(Direction::Playback), &spec, &playback_attr)
            .map_err(|source| RelayError::StreamConnect {
                direction: Direction::Playback,
                source,
            })?;
        let sink = playback.device_index();
        self.playback = Some(playback);

        let record_attr = self.state(Direction::Capture).buffer_attr;
        let record = context
            .connect_record(self.config.stream_name(Direction::Capture), &spec, &record_attr, None)
            .map_err(|source| RelayError::StreamConnect {
                direction: Direction::Capture,
                source,
            })?;
        self.record = Some(record);

        // the monitor follows whatever sink playback landed on
        let monitor_source = match sink {
            Some(index) => context.monitor_source(index),
            None => Err(crate::error::ServiceError::new("playback stream has no sink")),
        }
        .map_err(RelayError::MonitorQuery)?;
        let monitor_attr = self.state(Direction::Monitor).buffer_attr;
        let monitor = context
            .connect_record(
                self.config.stream_name(Direction::Monitor),
                &spec,
                &monitor_attr,
                Some(&monitor_source),
            )
            .map_err(|source| RelayError::StreamConnect {
                direction: Direction::Monitor,
                source,
            })?;
        self.monitor = Some(monitor);

        tracing::info!(rate = spec.rate, channels = spec.channels, %monitor_source, "service streams connected");
        Ok(())
    }

    /// Log the faults the process callback counted since the last report.
    fn report_callback_xruns(&mut self) {
        for (direction, xrun, count) in self.callback_xruns.take_new(&self.stats) {
            match xrun {
                Xrun::Overflow => tracing::warn!(%direction, count, "playback buffer overflow"),
                _ => tracing::warn!(%direction, count, "record buffer underflow"),
            }
        }
    }

    /// Hand the playback stream exactly what it asks for: ring data if there
    /// is enough, silence for whatever is missing.
    fn fill_playback(&mut self, nbytes: usize) -> Result<()> {
        let Some(stream) = self.playback.as_deref_mut() else {
            return Ok(());
        };
        let frame_bytes = self.config.frame_bytes();
        let ring = &mut self.rings.playback;
        let available = ring.read_space();

        let buffer = stream.begin_write(nbytes).map_err(|source| RelayError::Write {
            direction: Direction::Playback,
            source,
        })?;
        let requested = buffer.len();
        let copied = if available >= requested {
            requested
        } else {
            available - available % frame_bytes
        };
        if let Some(vector) = ring.read_vector(copied) {
            vector.copy_to(&mut buffer[..copied]);
            vector.advance_all();
        }
        buffer[copied..].fill(0);

        if copied < requested {
            self.stats.record(Direction::Playback, Xrun::Underflow);
            tracing::warn!(available, requested, "playback buffer underflow");
        }

        stream.write(requested).map_err(|source| RelayError::Write {
            direction: Direction::Playback,
            source,
        })
    }

    /// Move every fragment the record stream holds into its ring.
    fn drain_record(&mut self, direction: Direction) -> Result<()> {
        let (stream, ring) = match direction {
            Direction::Capture => (self.record.as_deref_mut(), &mut self.rings.capture),
            Direction::Monitor => (self.monitor.as_deref_mut(), &mut self.rings.monitor),
            Direction::Playback => return Ok(()),
        };
        let Some(stream) = stream else {
            return Ok(());
        };
        let frame_bytes = self.config.frame_bytes();
        let read_error = |source| RelayError::Read { direction, source };

        while stream.readable_size() > 0 {
            match stream.peek().map_err(read_error)? {
                Fragment::Data(data) => {
                    if !push_fragment(ring, data, frame_bytes) {
                        self.stats.record(direction, Xrun::Overflow);
                        tracing::warn!(%direction, available = ring.write_space(), required = data.len(), "record buffer overflow");
                    }
                }
                Fragment::Hole(len) => {
                    self.stats.record(direction, Xrun::Hole);
                    self.stats.record(direction, Xrun::Overflow);
                    tracing::warn!(%direction, len, "record buffer overflow: hole");
                }
                Fragment::Empty => break,
            }
            stream.discard().map_err(read_error)?;
        }
        Ok(())
    }
}

/// Write `data` into `ring`. When it does not fit, write the whole frames that
/// do and return `false`.
fn push_fragment(ring: &mut RingWriter, data: &[u8], frame_bytes: usize) -> bool {
    if ring.write(data) {
        return true;
    }
    let space = ring.write_space();
    let fit = space - space % frame_bytes;
    ring.write(&data[..fit.min(data.len())]);
    false
}

impl ServiceHandler for ServiceSide {
    fn context_state(&mut self, state: ContextState, context: &mut dyn ServiceContext) -> Result<()> {
        match state {
            ContextState::Ready => self.connect_streams(context),
            ContextState::Failed => Err(RelayError::ContextFailed(context.last_error())),
            ContextState::Terminated => {
                tracing::info!("service connection terminated");
                let _ = self.termination.try_send(Termination::ServiceTerminated);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn writable(&mut self, nbytes: usize) -> Result<()> {
        self.report_callback_xruns();
        self.fill_playback(nbytes)
    }

    fn readable(&mut self, direction: Direction) -> Result<()> {
        self.report_callback_xruns();
        self.drain_record(direction)
    }

    fn moved(&mut self, direction: Direction) -> Result<()> {
        self.reapply_buffer_attr(direction)
    }
}

impl Drop for ServiceSide {
    fn drop(&mut self) {
        // reverse of connect order
        if let Some(stream) = self.monitor.as_deref_mut() {
            stream.disconnect();
        }
        if let Some(stream) = self.record.as_deref_mut() {
            stream.disconnect();
        }
        if let Some(stream) = self.playback.as_deref_mut() {
            stream.disconnect();
        }
    }
}

/// Shared access to a [`ServiceSide`], standing in for the service's event-loop lock.
///
/// The service's callback glue locks this before calling any
/// [`ServiceHandler`] method; the reconfiguration controller locks it before
/// touching stream attributes or rings. The process callback never does.
#[derive(Clone)]
pub struct ServiceHandle {
    inner: Arc<Mutex<ServiceSide>>,
}

impl ServiceHandle {
    pub(crate) fn new(side: ServiceSide) -> Self {
        Self {
            inner: Arc::new(Mutex::new(side)),
        }
    }

    /// Take the event-loop lock.
    pub fn lock(&self) -> MutexGuard<'_, ServiceSide> {
        // a panic elsewhere leaves the state usable; audio state has no invariants worth poisoning for
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
