//! Deferred port connections.
//!
//! Connection changes are observed on the engine's notification thread, but
//! the engine only allows graph mutation from the process callback. Observers
//! push [`PendingGraphOp`]s into a bounded queue; the callback drains it in
//! FIFO order at the start of every period.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::endpoints::EndpointNames;
use crate::engine::{short_name, GraphEngine};
use crate::error::EngineError;
use crate::stream::Direction;

/// A connection to make or break on the next period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingGraphOp {
    /// Full name of the port audio flows out of.
    pub source: String,
    /// Full name of the port audio flows into.
    pub destination: String,
    /// `true` to connect, `false` to disconnect.
    pub connect: bool,
}

impl PendingGraphOp {
    pub fn apply<G: GraphEngine + ?Sized>(&self, engine: &G) -> Result<(), EngineError> {
        if self.connect {
            engine.connect(&self.source, &self.destination)
        } else {
            engine.disconnect(&self.source, &self.destination)
        }
    }
}

/// An operation the engine refused.
type Failure = (PendingGraphOp, EngineError);

/// Create a queue holding up to `capacity` pending operations.
pub fn graph_op_queue(capacity: usize) -> (GraphOpSender, GraphOpReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let (failures_tx, failures_rx) = crossbeam_channel::bounded(capacity);
    (
        GraphOpSender {
            tx,
            failures: failures_rx,
        },
        GraphOpReceiver {
            rx,
            failures: failures_tx,
        },
    )
}

/// Producer side. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct GraphOpSender {
    tx: Sender<PendingGraphOp>,
    failures: Receiver<Failure>,
}

impl GraphOpSender {
    /// Queue `op` for the next period. Returns `false` if it was dropped.
    pub fn schedule(&self, op: PendingGraphOp) -> bool {
        match self.tx.try_send(op) {
            Ok(()) => true,
            Err(TrySendError::Full(op)) => {
                tracing::warn!(source = %op.source, destination = %op.destination, "graph op queue full, dropping");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Log every operation the callback could not apply since the last call.
    /// Returns how many there were.
    pub fn report_failures(&self) -> usize {
        let mut reported = 0;
        while let Ok((op, err)) = self.failures.try_recv() {
            tracing::warn!(source = %op.source, destination = %op.destination, connect = op.connect, %err, "graph op failed");
            reported += 1;
        }
        reported
    }
}

/// Consumer side, owned by the process callback.
pub struct GraphOpReceiver {
    rx: Receiver<PendingGraphOp>,
    failures: Sender<Failure>,
}

impl GraphOpReceiver {
    /// Apply every queued operation, oldest first. Returns how many were taken.
    ///
    /// A failed operation is consumed and never retried. It is handed back
    /// to the senders for [`GraphOpSender::report_failures`], or dropped if
    /// too many are waiting there.
    pub fn apply_pending<G: GraphEngine + ?Sized>(&self, engine: &G) -> usize {
        let mut applied = 0;
        while let Ok(op) = self.rx.try_recv() {
            if let Err(err) = op.apply(engine) {
                let _ = self.failures.try_send((op, err));
            }
            applied += 1;
        }
        applied
    }

    /// Operations waiting for the next period.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Decides which connections the relay mirrors onto its own endpoints.
///
/// A hardware capture port feeding some port B is mirrored as the relay's
/// matching capture endpoint feeding B. Some port A feeding a hardware
/// playback port is mirrored as A feeding the relay's matching playback
/// endpoint. Matching is by short name only.
#[derive(Clone, Debug)]
pub struct Mirror {
    endpoints: EndpointNames,
    hardware_prefix: String,
}

impl Mirror {
    pub fn new(endpoints: EndpointNames, hardware_prefix: impl Into<String>) -> Self {
        Self {
            endpoints,
            hardware_prefix: hardware_prefix.into(),
        }
    }

    /// Operations that mirror `source -> destination` (at most two).
    pub fn mirror(&self, source: &str, destination: &str, connect: bool) -> impl Iterator<Item = PendingGraphOp> {
        let capture = self
            .hardware_short_name(source)
            .and_then(|short| self.endpoints.matching(Direction::Capture, short))
            .map(|own| PendingGraphOp {
                source: own.to_string(),
                destination: destination.to_string(),
                connect,
            });
        let playback = self
            .hardware_short_name(destination)
            .and_then(|short| self.endpoints.matching(Direction::Playback, short))
            .map(|own| PendingGraphOp {
                source: source.to_string(),
                destination: own.to_string(),
                connect,
            });
        capture.into_iter().chain(playback)
    }

    fn hardware_short_name<'n>(&self, full_name: &'n str) -> Option<&'n str> {
        full_name
            .starts_with(self.hardware_prefix.as_str())
            .then(|| short_name(full_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> EndpointNames {
        let mut names = EndpointNames::default();
        for direction in Direction::ALL {
            for ch in 1..=2 {
                names.push(direction, format!("relay:{}_{}", direction.port_prefix(), ch));
            }
        }
        names
    }

    #[test]
    fn hardware_capture_is_mirrored() {
        let mirror = Mirror::new(endpoints(), "system:");
        let ops: Vec<_> = mirror.mirror("system:capture_1", "synth:in", true).collect();
        assert_eq!(
            ops,
            vec![PendingGraphOp {
                source: "relay:capture_1".to_string(),
                destination: "synth:in".to_string(),
                connect: true,
            }]
        );
    }

    #[test]
    fn hardware_playback_is_mirrored_on_disconnect() {
        let mirror = Mirror::new(endpoints(), "system:");
        let ops: Vec<_> = mirror.mirror("synth:out_r", "system:playback_2", false).collect();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].source, "synth:out_r");
        assert_eq!(ops[0].destination, "relay:playback_2");
        assert!(!ops[0].connect);
    }

    #[test]
    fn non_hardware_ports_are_ignored() {
        let mirror = Mirror::new(endpoints(), "system:");
        assert_eq!(mirror.mirror("relay:capture_1", "synth:in", true).count(), 0);
        assert_eq!(mirror.mirror("synth:capture_1", "other:playback_1", true).count(), 0);
    }

    #[test]
    fn unknown_channels_are_ignored() {
        let mirror = Mirror::new(endpoints(), "system:");
        assert_eq!(mirror.mirror("system:capture_3", "synth:in", true).count(), 0);
    }

    #[test]
    fn hardware_loopback_mirrors_both_ends() {
        let mirror = Mirror::new(endpoints(), "system:");
        let ops: Vec<_> = mirror.mirror("system:capture_2", "system:playback_1", true).collect();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].source, "relay:capture_2");
        assert_eq!(ops[1].destination, "relay:playback_1");
    }

    struct RefusingEngine;

    impl GraphEngine for RefusingEngine {
        fn sample_rate(&self) -> u32 {
            48000
        }

        fn buffer_size(&self) -> u32 {
            256
        }

        fn register_port(&self, short_name: &str, _flow: crate::engine::PortFlow) -> Result<String, EngineError> {
            Ok(format!("relay:{short_name}"))
        }

        fn unregister_port(&self, _full_name: &str) -> Result<(), EngineError> {
            Ok(())
        }

        fn connect(&self, source: &str, _destination: &str) -> Result<(), EngineError> {
            Err(EngineError::new(format!("no such port: {source}")))
        }

        fn disconnect(&self, _source: &str, _destination: &str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn failed_ops_are_consumed_and_reported_once() {
        let (tx, rx) = graph_op_queue(4);
        tx.schedule(PendingGraphOp {
            source: "gone:out".to_string(),
            destination: "b:in".to_string(),
            connect: true,
        });
        tx.schedule(PendingGraphOp {
            source: "a:out".to_string(),
            destination: "b:in".to_string(),
            connect: false,
        });

        assert_eq!(rx.apply_pending(&RefusingEngine), 2);
        assert!(rx.is_empty());
        assert_eq!(tx.report_failures(), 1);
        assert_eq!(tx.report_failures(), 0);
    }

    #[test]
    fn full_queue_drops_new_ops() {
        let (tx, rx) = graph_op_queue(1);
        let op = PendingGraphOp {
            source: "a:out".to_string(),
            destination: "b:in".to_string(),
            connect: true,
        };
        assert!(tx.schedule(op.clone()));
        assert!(!tx.schedule(op));
        assert_eq!(rx.len(), 1);
    }
}
