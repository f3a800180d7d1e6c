use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::chunk::{ServiceHandle, ServiceSide};
use crate::config::RelayConfig;
use crate::endpoints::{EndpointNames, Registration};
use crate::engine::GraphEngine;
use crate::error::{RelayError, Result};
use crate::graph_ops::{graph_op_queue, Mirror};
use crate::period::PeriodAdapter;
use crate::reconfig::EngineNotifications;
use crate::ring::ring_set;
use crate::stats::{RelayStats, StatsSnapshot};

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The engine shut the client down.
    EngineShutdown,
    /// The service connection went away.
    ServiceTerminated,
}

/// The handlers to install on the engine.
pub struct Handlers<G: GraphEngine> {
    /// Process callback, for the engine's real-time thread.
    pub process: PeriodAdapter<G>,
    /// Notification callback, for the engine's notification thread.
    pub notifications: EngineNotifications,
}

/// A relay session.
///
/// Dropping it releases what it acquired in reverse: the service streams
/// first, then the engine endpoints. Deactivate the engine (dropping the
/// [`Handlers`]) before dropping the session.
pub struct Relay<G: GraphEngine> {
    // field order is drop order
    service: ServiceHandle,
    endpoints: Registration<G>,
    stats: Arc<RelayStats>,
    termination: Receiver<Termination>,
}

impl<G: GraphEngine> Relay<G> {
    /// Register the relay's endpoints on `engine` and build the rings for its
    /// current period.
    ///
    /// The service streams are created later, when the service reports
    /// [`ContextState::Ready`](crate::ContextState::Ready) through
    /// [`ServiceHandle::lock`].
    pub fn new(config: RelayConfig, engine: Arc<G>) -> Result<(Self, Handlers<G>)> {
        config.validate()?;
        let sample_rate = engine.sample_rate();
        let frames = engine.buffer_size();
        if frames == 0 {
            return Err(RelayError::InvalidPeriod { frames });
        }

        let endpoints = Registration::register(engine.clone(), config.channels)?;

        let stats = Arc::new(RelayStats::new());
        let (termination_tx, termination_rx) = crossbeam_channel::bounded(2);
        let (op_tx, op_rx) = graph_op_queue(config.graph_op_capacity);
        let (swap_tx, swap_rx) = rtrb::RingBuffer::new(config.swap_capacity);
        let (retired_tx, retired_rx) = rtrb::RingBuffer::new(config.swap_capacity);
        let (engine_rings, service_rings) = ring_set(config.ring_capacity(frames));

        let mirror = Mirror::new(endpoints.names().clone(), config.hardware_prefix.clone());
        let channels = config.channels;
        let fragments = config.fragments;

        tracing::info!(
            client = %config.client_name,
            sample_rate,
            frames,
            channels,
            ring_bytes = config.ring_capacity(frames),
            "relay started"
        );

        let service = ServiceHandle::new(ServiceSide::new(
            config,
            sample_rate,
            frames,
            service_rings,
            stats.clone(),
            termination_tx.clone(),
        ));
        let process = PeriodAdapter::new(engine, op_rx, engine_rings, swap_rx, retired_tx, channels, stats.clone());
        let notifications =
            EngineNotifications::new(service.clone(), swap_tx, retired_rx, op_tx, mirror, fragments, termination_tx);

        let relay = Self {
            service,
            endpoints,
            stats,
            termination: termination_rx,
        };
        Ok((relay, Handlers { process, notifications }))
    }

    /// Handle for the service's event-loop glue.
    pub fn service(&self) -> &ServiceHandle {
        &self.service
    }

    /// Full names of the relay's engine endpoints.
    pub fn endpoints(&self) -> &EndpointNames {
        self.endpoints.names()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Block until either side ends the session.
    pub fn wait(&self) -> Option<Termination> {
        self.termination.recv().ok()
    }

    /// Whether either side has ended the session, without blocking.
    pub fn try_termination(&self) -> Option<Termination> {
        self.termination.try_recv().ok()
    }
}
