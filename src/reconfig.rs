//! Reconfiguration: period and sample-rate changes, stream moves, and
//! connection mirroring.
//!
//! All of it runs on the engine's notification thread (or the service's
//! event loop for moves) and mutates shared state only under the service
//! lock. The process callback learns about new rings through a lock-free
//! queue and hands the old ones back the same way.

use crossbeam_channel::Sender;
use rtrb::{Consumer, Producer, PushError};

use crate::chunk::{ServiceHandle, ServiceSide};
use crate::engine::NotificationHandler;
use crate::error::{RelayError, Result, ServiceError};
use crate::graph_ops::{GraphOpSender, Mirror};
use crate::relay::Termination;
use crate::ring::{ring_set, EngineRings};
use crate::service::StreamControl;
use crate::stream::{BufferAttr, Direction};

impl ServiceSide {
    /// Adopt a new engine period: push new buffer attributes to every ready
    /// stream and replace the service's ring ends. Returns the matching
    /// engine ends, which the caller must hand to the process callback.
    pub(crate) fn apply_period(&mut self, frames: u32) -> Result<EngineRings> {
        if frames == 0 {
            return Err(RelayError::InvalidPeriod { frames });
        }
        let period_bytes = u32::try_from(self.config.period_bytes(frames))
            .map_err(|_| RelayError::InvalidPeriod { frames })?;

        for direction in Direction::ALL {
            let state = &mut self.states[direction.index()];
            state.period_frames = frames;
            state.buffer_attr = BufferAttr::for_direction(direction, period_bytes);
            self.push_buffer_attr(direction)?;
        }

        let (engine, service) = ring_set(self.config.ring_capacity(frames));
        self.rings = service;
        Ok(engine)
    }

    /// Adopt a new sample rate on every ready stream.
    pub(crate) fn apply_sample_rate(&mut self, rate: u32) -> Result<()> {
        for direction in Direction::ALL {
            self.states[direction.index()].sample_rate = rate;
            let applied = match direction {
                Direction::Playback => update_rate(self.playback.as_deref_mut(), rate),
                Direction::Capture => update_rate(self.record.as_deref_mut(), rate),
                Direction::Monitor => update_rate(self.monitor.as_deref_mut(), rate),
            };
            applied.map_err(|source| RelayError::SampleRate { direction, source })?;
        }
        Ok(())
    }

    /// The server moved the `direction` stream and reset its attributes;
    /// recompute them from the current period and push them to that stream only.
    pub(crate) fn reapply_buffer_attr(&mut self, direction: Direction) -> Result<()> {
        let state = &mut self.states[direction.index()];
        let period_bytes = self.config.period_bytes(state.period_frames) as u32;
        state.buffer_attr = BufferAttr::for_direction(direction, period_bytes);
        if self.push_buffer_attr(direction)? {
            tracing::debug!(%direction, "buffer attributes restored after move");
        }
        Ok(())
    }

    /// Push the recorded attributes of `direction` to its stream if it is
    /// ready. Returns whether they were applied.
    fn push_buffer_attr(&mut self, direction: Direction) -> Result<bool> {
        let attr = self.states[direction.index()].buffer_attr;
        let applied = match direction {
            Direction::Playback => set_attr(self.playback.as_deref_mut(), &attr),
            Direction::Capture => set_attr(self.record.as_deref_mut(), &attr),
            Direction::Monitor => set_attr(self.monitor.as_deref_mut(), &attr),
        };
        applied.map_err(|source| RelayError::BufferAttr { direction, source })
    }
}

fn set_attr<S: StreamControl + ?Sized>(stream: Option<&mut S>, attr: &BufferAttr) -> Result<bool, ServiceError> {
    match stream {
        Some(stream) if stream.is_ready() => stream.set_buffer_attr(attr).map(|()| true),
        _ => Ok(false),
    }
}

fn update_rate<S: StreamControl + ?Sized>(stream: Option<&mut S>, rate: u32) -> Result<(), ServiceError> {
    match stream {
        Some(stream) if stream.is_ready() => stream.update_sample_rate(rate),
        _ => Ok(()),
    }
}

/// The relay's handler for engine notifications.
pub struct EngineNotifications {
    service: ServiceHandle,
    swaps: Producer<EngineRings>,
    retired: Consumer<EngineRings>,
    graph_ops: GraphOpSender,
    mirror: Mirror,
    fragments: u32,
    termination: Sender<Termination>,
}

impl EngineNotifications {
    pub(crate) fn new(
        service: ServiceHandle,
        swaps: Producer<EngineRings>,
        retired: Consumer<EngineRings>,
        graph_ops: GraphOpSender,
        mirror: Mirror,
        fragments: u32,
        termination: Sender<Termination>,
    ) -> Self {
        Self {
            service,
            swaps,
            retired,
            graph_ops,
            mirror,
            fragments,
            termination,
        }
    }

    /// Free ring sets the process callback has replaced and log the graph ops
    /// it could not apply.
    fn collect_retired(&mut self) {
        self.graph_ops.report_failures();
        let mut freed = 0;
        while let Ok(rings) = self.retired.pop() {
            drop(rings);
            freed += 1;
        }
        if freed > 0 {
            tracing::debug!(freed, "released replaced rings");
        }
    }
}

impl NotificationHandler for EngineNotifications {
    fn buffer_size(&mut self, frames: u32) -> Result<()> {
        self.collect_retired();

        let mut service = self.service.lock();
        let rings = service.apply_period(frames)?;
        if let Err(PushError::Full(_)) = self.swaps.push(rings) {
            return Err(RelayError::SwapBacklog {
                pending: self.swaps.buffer().capacity(),
            });
        }
        let rate = service.state(Direction::Playback).sample_rate;
        drop(service);

        log_buffer_sizes(frames, self.fragments, rate);
        Ok(())
    }

    fn sample_rate(&mut self, rate: u32) -> Result<()> {
        self.collect_retired();
        self.service.lock().apply_sample_rate(rate)?;
        tracing::info!(rate, "sample rate changed");
        Ok(())
    }

    fn port_connect(&mut self, source: &str, destination: &str, connected: bool) {
        self.collect_retired();
        if connected {
            tracing::info!("{source} =====> {destination}");
        } else {
            tracing::info!("{source} ==X==> {destination}");
        }
        for op in self.mirror.mirror(source, destination, connected) {
            tracing::debug!(source = %op.source, destination = %op.destination, connect = op.connect, "mirroring");
            self.graph_ops.schedule(op);
        }
    }

    fn shutdown(&mut self) {
        tracing::info!("engine shut down");
        let _ = self.termination.try_send(Termination::EngineShutdown);
    }
}

fn log_buffer_sizes(frames: u32, fragments: u32, rate: u32) {
    let ms = |frames: u32| {
        if rate == 0 {
            0.0
        } else {
            frames as f64 * 1000.0 / rate as f64
        }
    };
    let relay_frames = frames.saturating_mul(fragments);
    tracing::info!(frames, ms = ms(frames), "engine buffer size");
    tracing::info!(frames = relay_frames, ms = ms(relay_frames), "relay buffer size");
    tracing::info!(frames, ms = ms(frames), "service buffer size");
}
