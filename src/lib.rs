//! Lock-free audio relay between a fixed-period graph engine and an
//! event-loop audio server.
//!
//! The engine calls [`PeriodAdapter`] once per period on its real-time thread
//! and the server calls into [`ServiceSide`] (through [`ServiceHandle`])
//! whenever it wants bytes or has some. Three byte rings sit in between:
//!
//! - **playback**: engine inputs to the server's playback stream
//! - **capture**: the server's default source to engine outputs
//! - **monitor**: the playback sink's monitor to engine outputs
//!
//! Each ring holds `fragments` engine periods. When the engine's period size
//! changes, [`EngineNotifications`] builds a fresh set of rings and hands it
//! to the callback without ever blocking it.
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "memory")] {
//! use std::sync::Arc;
//!
//! use klingt_relay::memory::{MemoryContext, MemoryEngine, PeriodIo};
//! use klingt_relay::{ContextState, Relay, RelayConfig, ServiceHandler};
//!
//! let engine = Arc::new(MemoryEngine::with_system_ports("relay", 48000, 256, 2));
//! let (relay, mut handlers) = Relay::new(RelayConfig::default(), engine).unwrap();
//!
//! let mut context = MemoryContext::new();
//! relay.service().lock().context_state(ContextState::Ready, &mut context).unwrap();
//!
//! let mut io = PeriodIo::new(2, 256);
//! io.run(&mut handlers.process);
//! relay.service().lock().writable(4096).unwrap();
//! # }
//! ```

mod chunk;
mod config;
mod endpoints;
mod engine;
mod error;
mod graph_ops;
mod period;
mod reconfig;
mod relay;
mod ring;
mod service;
mod stats;
mod stream;

#[cfg(feature = "memory")]
pub mod memory;

pub use crate::chunk::{ServiceHandle, ServiceSide};
pub use crate::config::RelayConfig;
pub use crate::endpoints::EndpointNames;
pub use crate::engine::{short_name, GraphEngine, NotificationHandler, PeriodBuffers, PortFlow, ProcessHandler};
pub use crate::error::{EngineError, RelayError, Result, ServiceError};
pub use crate::graph_ops::{graph_op_queue, GraphOpReceiver, GraphOpSender, Mirror, PendingGraphOp};
pub use crate::period::PeriodAdapter;
pub use crate::reconfig::EngineNotifications;
pub use crate::relay::{Handlers, Relay, Termination};
pub use crate::ring::{ring_set, ByteRing, EngineRings, ReadVector, RingReader, RingWriter, ServiceRings, WriteVector};
pub use crate::service::{
    ContextState, Fragment, PlaybackStream, RecordStream, ServiceContext, ServiceHandler, StreamControl,
};
pub use crate::stats::{DirectionStats, RelayStats, StatsSnapshot, Xrun};
pub use crate::stream::{BufferAttr, Direction, SampleSpec, StreamState, SAMPLE_SIZE};
