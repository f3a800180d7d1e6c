//! Fixed-period side of the relay.
//!
//! [`PeriodAdapter`] is the engine's process callback. Every period it
//! applies deferred graph operations, installs replacement rings if the
//! period size changed, then moves one period of audio in each direction.
//! It never blocks, never takes the service lock, and never logs: faults are
//! only counted in [`RelayStats`], and the service side reports them.

use std::sync::Arc;

use rtrb::{Consumer, Producer};

use crate::engine::{GraphEngine, PeriodBuffers, ProcessHandler};
use crate::graph_ops::GraphOpReceiver;
use crate::ring::{EngineRings, ReadVector, RingReader, WriteVector};
use crate::stats::{RelayStats, Xrun};
use crate::stream::{Direction, SAMPLE_SIZE};

/// The relay's process callback.
pub struct PeriodAdapter<G: GraphEngine> {
    engine: Arc<G>,
    graph_ops: GraphOpReceiver,
    rings: EngineRings,
    /// Replacement ring sets sent by the reconfiguration controller.
    swaps: Consumer<EngineRings>,
    /// Replaced ring sets, freed by the controller off this thread.
    retired: Producer<EngineRings>,
    channels: usize,
    stats: Arc<RelayStats>,
}

impl<G: GraphEngine> PeriodAdapter<G> {
    pub(crate) fn new(
        engine: Arc<G>,
        graph_ops: GraphOpReceiver,
        rings: EngineRings,
        swaps: Consumer<EngineRings>,
        retired: Producer<EngineRings>,
        channels: u16,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            engine,
            graph_ops,
            rings,
            swaps,
            retired,
            channels: channels as usize,
            stats,
        }
    }

    /// Graph operations still waiting for the next period.
    pub fn pending_graph_ops(&self) -> usize {
        self.graph_ops.len()
    }

    /// Capacity in bytes of the rings currently in use.
    pub fn ring_capacity(&self) -> usize {
        self.rings.playback.capacity()
    }

    /// Swap in every ring set the controller sent. Returns whether anything changed.
    fn install_pending_rings(&mut self) -> bool {
        let mut installed = false;
        while let Ok(rings) = self.swaps.pop() {
            let old = core::mem::replace(&mut self.rings, rings);
            // if the controller is behind, the old set is freed here instead
            let _ = self.retired.push(old);
            self.stats.ring_swapped();
            installed = true;
        }
        installed
    }

    fn write_playback(&mut self, nframes: usize, inputs: &[&[f32]]) {
        let required = nframes * self.channels * SAMPLE_SIZE;
        match self.rings.playback.write_vector(required) {
            Some(mut vector) => {
                interleave(&mut vector, inputs, nframes, self.channels);
                vector.advance_all();
            }
            None => self.stats.record(Direction::Playback, Xrun::Overflow),
        }
    }

    fn read_record(&mut self, direction: Direction, nframes: usize, outputs: &mut [&mut [f32]]) {
        let ring = match direction {
            Direction::Capture => &mut self.rings.capture,
            Direction::Monitor => &mut self.rings.monitor,
            Direction::Playback => return,
        };
        if !read_period(ring, outputs, nframes, self.channels) {
            silence(outputs);
            self.stats.record(direction, Xrun::Underflow);
        }
    }
}

impl<G: GraphEngine> ProcessHandler for PeriodAdapter<G> {
    fn process(&mut self, nframes: u32, buffers: &mut PeriodBuffers<'_, '_>) {
        self.graph_ops.apply_pending(&*self.engine);
        self.stats.period_processed();

        // the period boundary moved: sit this one out on the fresh rings
        if self.install_pending_rings() {
            silence(buffers.capture);
            silence(buffers.monitor);
            return;
        }

        // the service already dropped these rings and the replacement is not here yet
        if self.rings.playback.is_abandoned() {
            silence(buffers.capture);
            silence(buffers.monitor);
            return;
        }

        let nframes = nframes as usize;
        self.write_playback(nframes, buffers.playback);
        self.read_record(Direction::Capture, nframes, buffers.capture);
        self.read_record(Direction::Monitor, nframes, buffers.monitor);
    }
}

/// Interleave `nframes` frames from per-channel `inputs` into `vector` as
/// native-endian `f32`. Missing channels are written as silence.
fn interleave(vector: &mut WriteVector<'_>, inputs: &[&[f32]], nframes: usize, channels: usize) {
    let samples = (0..nframes).flat_map(|frame| {
        (0..channels).map(move |ch| {
            inputs
                .get(ch)
                .and_then(|input| input.get(frame))
                .copied()
                .unwrap_or(0.0)
        })
    });
    for (slot, byte) in vector.bytes_mut().zip(samples.flat_map(f32::to_ne_bytes)) {
        *slot = byte;
    }
}

/// De-interleave one period from `ring` into `outputs`, or leave the ring
/// untouched and return `false` if less than a period is queued.
fn read_period(ring: &mut RingReader, outputs: &mut [&mut [f32]], nframes: usize, channels: usize) -> bool {
    let required = nframes * channels * SAMPLE_SIZE;
    match ring.read_vector(required) {
        Some(vector) => {
            deinterleave(&vector, outputs, nframes, channels);
            vector.advance_all();
            true
        }
        None => false,
    }
}

fn deinterleave(vector: &ReadVector<'_>, outputs: &mut [&mut [f32]], nframes: usize, channels: usize) {
    let mut bytes = vector.bytes();
    for frame in 0..nframes {
        for ch in 0..channels {
            let mut sample = [0u8; SAMPLE_SIZE];
            for byte in sample.iter_mut() {
                *byte = bytes.next().unwrap_or(0);
            }
            if let Some(slot) = outputs.get_mut(ch).and_then(|output| output.get_mut(frame)) {
                *slot = f32::from_ne_bytes(sample);
            }
        }
    }
}

fn silence(outputs: &mut [&mut [f32]]) {
    for output in outputs.iter_mut() {
        output.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PortFlow;
    use crate::error::EngineError;
    use crate::graph_ops::graph_op_queue;
    use crate::ring::{ring_set, ByteRing, ServiceRings};

    struct NullEngine;

    impl GraphEngine for NullEngine {
        fn sample_rate(&self) -> u32 {
            48000
        }

        fn buffer_size(&self) -> u32 {
            4
        }

        fn register_port(&self, short_name: &str, _flow: PortFlow) -> Result<String, EngineError> {
            Ok(format!("null:{short_name}"))
        }

        fn unregister_port(&self, _full_name: &str) -> Result<(), EngineError> {
            Ok(())
        }

        fn connect(&self, _source: &str, _destination: &str) -> Result<(), EngineError> {
            Ok(())
        }

        fn disconnect(&self, _source: &str, _destination: &str) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn adapter(stats: &Arc<RelayStats>) -> (PeriodAdapter<NullEngine>, ServiceRings) {
        let (_, graph_ops) = graph_op_queue(4);
        let (engine_rings, service_rings) = ring_set(256);
        let (_, swaps) = rtrb::RingBuffer::new(1);
        let (retired, _) = rtrb::RingBuffer::new(1);
        let adapter = PeriodAdapter::new(Arc::new(NullEngine), graph_ops, engine_rings, swaps, retired, 2, stats.clone());
        (adapter, service_rings)
    }

    fn run_period(adapter: &mut PeriodAdapter<NullEngine>) -> [f32; 4] {
        let input = [0.5f32; 4];
        let playback: [&[f32]; 2] = [&input, &input];
        let mut left = [9.0f32; 4];
        let mut right = [9.0f32; 4];
        let mut monitor_left = [9.0f32; 4];
        let mut monitor_right = [9.0f32; 4];
        let mut capture: [&mut [f32]; 2] = [&mut left, &mut right];
        let mut monitor: [&mut [f32]; 2] = [&mut monitor_left, &mut monitor_right];
        adapter.process(
            4,
            &mut PeriodBuffers {
                playback: &playback,
                capture: &mut capture,
                monitor: &mut monitor,
            },
        );
        assert_eq!(monitor_left, [0.0; 4]);
        left
    }

    #[test]
    fn live_rings_count_underflows() {
        let stats = Arc::new(RelayStats::new());
        let (mut adapter, service_rings) = adapter(&stats);
        assert_eq!(run_period(&mut adapter), [0.0; 4]);
        assert_eq!(service_rings.playback.read_space(), 32);
        assert_eq!(stats.count(Direction::Capture, Xrun::Underflow), 1);
        assert_eq!(stats.count(Direction::Monitor, Xrun::Underflow), 1);
    }

    #[test]
    fn abandoned_rings_are_skipped_without_xruns() {
        let stats = Arc::new(RelayStats::new());
        let (mut adapter, service_rings) = adapter(&stats);
        drop(service_rings);

        assert_eq!(run_period(&mut adapter), [0.0; 4]);
        assert_eq!(adapter.rings.playback.write_space(), 256);
        for direction in Direction::ALL {
            assert_eq!(stats.count(direction, Xrun::Overflow), 0);
            assert_eq!(stats.count(direction, Xrun::Underflow), 0);
        }
        assert_eq!(stats.snapshot().periods, 1);
    }

    #[test]
    fn interleave_is_frame_major() {
        let mut ring = ByteRing::new(64);
        let left = [1.0f32, 2.0];
        let right = [-1.0f32, -2.0];
        {
            let mut vector = ring.writer.write_vector(16).unwrap();
            interleave(&mut vector, &[&left[..], &right[..]], 2, 2);
            vector.advance_all();
        }
        let mut bytes = [0u8; 16];
        assert!(ring.reader.read(&mut bytes));
        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(samples, vec![1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn read_period_survives_wraparound() {
        // 3 frames of stereo in a ring that wraps mid-sample
        let mut ring = ByteRing::new(30);
        assert!(ring.writer.write(&[0u8; 11]));
        let mut skip = [0u8; 11];
        assert!(ring.reader.read(&mut skip));

        let samples = [0.5f32, -0.5, 0.25, -0.25, 0.125, -0.125];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        assert!(ring.writer.write(&bytes));

        let mut left = [0.0f32; 3];
        let mut right = [0.0f32; 3];
        let mut outputs: [&mut [f32]; 2] = [&mut left, &mut right];
        assert!(read_period(&mut ring.reader, &mut outputs, 3, 2));
        assert_eq!(left, [0.5, 0.25, 0.125]);
        assert_eq!(right, [-0.5, -0.25, -0.125]);
    }

    #[test]
    fn read_period_refuses_partial_period() {
        let mut ring = ByteRing::new(64);
        assert!(ring.writer.write(&[0u8; 12]));
        let mut left = [9.0f32; 2];
        let mut right = [9.0f32; 2];
        let mut outputs: [&mut [f32]; 2] = [&mut left, &mut right];
        assert!(!read_period(&mut ring.reader, &mut outputs, 2, 2));
        assert_eq!(ring.reader.read_space(), 12);
        assert_eq!(left, [9.0, 9.0]);
    }
}
