//! Lock-free byte rings, the only transport between the two sides.
//!
//! A [`ByteRing`] is split into a [`RingWriter`] and a [`RingReader`], each
//! owned by exactly one thread. Transfers go through [`WriteVector`] and
//! [`ReadVector`], which expose the (at most two, because of wraparound)
//! contiguous spans of the underlying buffer without copying through an
//! intermediate buffer. Nothing here blocks: callers ask for a vector of the
//! size they need and get `None` when the ring cannot provide it.

use delegate::delegate;
use rtrb::chunks::{ReadChunk, WriteChunk};
use rtrb::{Consumer, Producer, RingBuffer};

/// A fixed-capacity single-producer single-consumer byte ring.
///
/// Capacity never changes. Resizing means building a new ring.
pub struct ByteRing {
    pub writer: RingWriter,
    pub reader: RingReader,
}

impl ByteRing {
    /// Create a ring holding `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self {
            writer: RingWriter { producer },
            reader: RingReader { consumer },
        }
    }

    /// Split into the two ends.
    pub fn split(self) -> (RingWriter, RingReader) {
        (self.writer, self.reader)
    }
}

/// Producer end of a [`ByteRing`].
pub struct RingWriter {
    producer: Producer<u8>,
}

impl RingWriter {
    delegate! {
        to self.producer {
            /// Whether the reader has been dropped.
            pub fn is_abandoned(&self) -> bool;
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.producer.buffer().capacity()
    }

    /// Bytes that can be written right now.
    pub fn write_space(&self) -> usize {
        self.producer.slots()
    }

    /// Borrow exactly `len` writable bytes, or `None` if fewer are free.
    pub fn write_vector(&mut self, len: usize) -> Option<WriteVector<'_>> {
        self.producer.write_chunk(len).ok().map(|chunk| WriteVector { chunk })
    }

    /// Write all of `bytes`, or nothing if they don't fit.
    pub fn write(&mut self, bytes: &[u8]) -> bool {
        match self.write_vector(bytes.len()) {
            Some(mut vector) => {
                vector.copy_from(bytes);
                vector.advance_all();
                true
            }
            None => false,
        }
    }
}

/// Consumer end of a [`ByteRing`].
pub struct RingReader {
    consumer: Consumer<u8>,
}

impl RingReader {
    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.consumer.buffer().capacity()
    }

    /// Bytes that can be read right now.
    pub fn read_space(&self) -> usize {
        self.consumer.slots()
    }

    /// Borrow exactly `len` readable bytes, or `None` if fewer are queued.
    pub fn read_vector(&mut self, len: usize) -> Option<ReadVector<'_>> {
        self.consumer.read_chunk(len).ok().map(|chunk| ReadVector { chunk })
    }

    /// Fill all of `out`, or read nothing if not enough is queued.
    pub fn read(&mut self, out: &mut [u8]) -> bool {
        match self.read_vector(out.len()) {
            Some(vector) => {
                vector.copy_to(out);
                vector.advance_all();
                true
            }
            None => false,
        }
    }
}

/// Writable region of a ring. Nothing becomes visible to the reader until
/// [`advance`](Self::advance) commits it.
pub struct WriteVector<'a> {
    chunk: WriteChunk<'a, u8>,
}

impl WriteVector<'_> {
    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every byte of the region, in ring order.
    pub fn bytes_mut(&mut self) -> impl Iterator<Item = &mut u8> + '_ {
        let (first, second) = self.chunk.as_mut_slices();
        first.iter_mut().chain(second.iter_mut())
    }

    /// Copy `src` to the start of the region. `src` must not be longer than it.
    pub fn copy_from(&mut self, src: &[u8]) {
        let (first, second) = self.chunk.as_mut_slices();
        let head = src.len().min(first.len());
        first[..head].copy_from_slice(&src[..head]);
        let tail = &src[head..];
        second[..tail.len()].copy_from_slice(tail);
    }

    /// Commit the first `n` bytes.
    pub fn advance(self, n: usize) {
        self.chunk.commit(n);
    }

    /// Commit the whole region.
    pub fn advance_all(self) {
        self.chunk.commit_all();
    }
}

/// Readable region of a ring. Nothing is released to the writer until
/// [`advance`](Self::advance) commits it.
pub struct ReadVector<'a> {
    chunk: ReadChunk<'a, u8>,
}

impl ReadVector<'_> {
    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every byte of the region, in ring order.
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        let (first, second) = self.chunk.as_slices();
        first.iter().chain(second.iter()).copied()
    }

    /// Copy the start of the region into `out`. `out` must not be longer than it.
    pub fn copy_to(&self, out: &mut [u8]) {
        let (first, second) = self.chunk.as_slices();
        let head = out.len().min(first.len());
        out[..head].copy_from_slice(&first[..head]);
        let rest = out.len() - head;
        out[head..].copy_from_slice(&second[..rest]);
    }

    /// Release the first `n` bytes.
    pub fn advance(self, n: usize) {
        self.chunk.commit(n);
    }

    /// Release the whole region.
    pub fn advance_all(self) {
        self.chunk.commit_all();
    }
}

/// The fixed-period side's ends of the playback, capture, and monitor rings.
pub struct EngineRings {
    pub playback: RingWriter,
    pub capture: RingReader,
    pub monitor: RingReader,
}

/// The service side's ends of the playback, capture, and monitor rings.
pub struct ServiceRings {
    pub playback: RingReader,
    pub capture: RingWriter,
    pub monitor: RingWriter,
}

impl ServiceRings {
    /// Capacity shared by all three rings.
    pub fn capacity(&self) -> usize {
        self.playback.capacity()
    }
}

/// Build the three rings, each `capacity` bytes, and hand out both sides' ends.
pub fn ring_set(capacity: usize) -> (EngineRings, ServiceRings) {
    let (playback_writer, playback_reader) = ByteRing::new(capacity).split();
    let (capture_writer, capture_reader) = ByteRing::new(capacity).split();
    let (monitor_writer, monitor_reader) = ByteRing::new(capacity).split();
    (
        EngineRings {
            playback: playback_writer,
            capture: capture_reader,
            monitor: monitor_reader,
        },
        ServiceRings {
            playback: playback_reader,
            capture: capture_writer,
            monitor: monitor_writer,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_conserved(ring: &ByteRing) {
        assert_eq!(
            ring.writer.write_space() + ring.reader.read_space(),
            ring.writer.capacity()
        );
    }

    #[test]
    fn space_adds_up_to_capacity() {
        for frames in [1u32, 64, 256, 1024] {
            for channels in [1usize, 2, 6] {
                let capacity = frames as usize * channels * 4 * 2;
                let mut ring = ByteRing::new(capacity);
                assert_eq!(ring.reader.capacity(), capacity);
                assert_conserved(&ring);

                let half = capacity / 2;
                assert!(ring.writer.write(&vec![7u8; half]));
                assert_conserved(&ring);

                let mut out = vec![0u8; half / 2];
                assert!(ring.reader.read(&mut out));
                assert_conserved(&ring);
            }
        }
    }

    #[test]
    fn write_vector_refuses_oversized_requests() {
        let mut ring = ByteRing::new(16);
        assert!(ring.writer.write(&[1; 10]));
        assert!(ring.writer.write_vector(7).is_none());
        assert!(!ring.writer.write(&[2; 7]));
        // nothing was partially written
        assert_eq!(ring.reader.read_space(), 10);
    }

    #[test]
    fn wraparound_keeps_ring_order() {
        let mut ring = ByteRing::new(8);
        assert!(ring.writer.write(&[0; 6]));
        let mut sink = [0u8; 6];
        assert!(ring.reader.read(&mut sink));

        let mut vector = ring.writer.write_vector(5).unwrap();
        vector.copy_from(&[1, 2, 3, 4, 5]);
        vector.advance_all();

        let read = ring.reader.read_vector(5).unwrap();
        assert_eq!(read.bytes().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        read.advance(5);
        assert_conserved(&ring);
    }

    #[test]
    fn uncommitted_vector_changes_nothing() {
        let mut ring = ByteRing::new(8);
        {
            let mut vector = ring.writer.write_vector(4).unwrap();
            for byte in vector.bytes_mut() {
                *byte = 9;
            }
        }
        assert_eq!(ring.reader.read_space(), 0);
        assert_eq!(ring.writer.write_space(), 8);
    }

    #[test]
    fn ring_set_pairs_matching_ends() {
        let (mut engine, mut service) = ring_set(64);
        assert_eq!(service.capacity(), 64);
        assert!(engine.playback.write(&[1, 2, 3, 4]));
        assert!(service.capture.write(&[5, 6, 7, 8]));

        let mut out = [0u8; 4];
        assert!(service.playback.read(&mut out));
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(engine.capture.read(&mut out));
        assert_eq!(out, [5, 6, 7, 8]);
        assert_eq!(engine.monitor.read_space(), 0);
    }

    #[test]
    fn dropping_one_end_abandons_the_other() {
        let (writer, reader) = ByteRing::new(8).split();
        drop(reader);
        assert!(writer.is_abandoned());
    }
}
