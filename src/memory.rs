//! In-process engine and service.
//!
//! [`MemoryEngine`] keeps a port graph in a petgraph `StableGraph` and
//! [`MemoryContext`] hands out streams backed by plain byte queues. Together
//! with [`PeriodIo`] they drive a [`Relay`](crate::Relay) without any audio
//! hardware, which is what the tests, benches, and demo do.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;
use petgraph::stable_graph::{NodeIndex, StableGraph};

use crate::engine::{GraphEngine, PeriodBuffers, PortFlow, ProcessHandler};
use crate::error::{EngineError, ServiceError};
use crate::service::{Fragment, PlaybackStream, RecordStream, ServiceContext, StreamControl};
use crate::stream::{BufferAttr, SampleSpec};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PortGraph {
    graph: StableGraph<PortFlow, ()>,
    ports: HashMap<String, NodeIndex>,
    sample_rate: u32,
    buffer_size: u32,
}

impl PortGraph {
    fn index(&self, name: &str) -> Result<NodeIndex, EngineError> {
        self.ports
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::new(format!("no such port: {name}")))
    }

    fn add(&mut self, name: String, flow: PortFlow) -> Result<(), EngineError> {
        if self.ports.contains_key(&name) {
            return Err(EngineError::new(format!("port already exists: {name}")));
        }
        let idx = self.graph.add_node(flow);
        self.ports.insert(name, idx);
        Ok(())
    }

    fn edge(&self, source: &str, destination: &str) -> Result<(NodeIndex, NodeIndex), EngineError> {
        let from = self.index(source)?;
        let to = self.index(destination)?;
        match (self.graph[from], self.graph[to]) {
            (PortFlow::Output, PortFlow::Input) => Ok((from, to)),
            _ => Err(EngineError::new(format!("cannot connect {source} to {destination}"))),
        }
    }
}

/// An engine whose graph lives in memory.
pub struct MemoryEngine {
    client_name: String,
    state: Mutex<PortGraph>,
}

impl MemoryEngine {
    /// An engine that will register ports under `client_name`.
    pub fn new(client_name: impl Into<String>, sample_rate: u32, buffer_size: u32) -> Self {
        Self {
            client_name: client_name.into(),
            state: Mutex::new(PortGraph {
                graph: StableGraph::new(),
                ports: HashMap::new(),
                sample_rate,
                buffer_size,
            }),
        }
    }

    /// An engine with `channels` hardware capture and playback ports named
    /// like a sound card's (`system:capture_1`, `system:playback_1`, ...).
    pub fn with_system_ports(client_name: impl Into<String>, sample_rate: u32, buffer_size: u32, channels: u16) -> Self {
        let engine = Self::new(client_name, sample_rate, buffer_size);
        {
            let mut state = lock(&engine.state);
            for ch in 1..=channels {
                // fresh graph, names are unique
                let _ = state.add(format!("system:capture_{ch}"), PortFlow::Output);
                let _ = state.add(format!("system:playback_{ch}"), PortFlow::Input);
            }
        }
        engine
    }

    /// Add a port owned by some other client.
    pub fn add_foreign_port(&self, full_name: impl Into<String>, flow: PortFlow) -> Result<(), EngineError> {
        lock(&self.state).add(full_name.into(), flow)
    }

    /// Whether `source` currently feeds `destination`.
    pub fn is_connected(&self, source: &str, destination: &str) -> bool {
        let state = lock(&self.state);
        match (state.ports.get(source), state.ports.get(destination)) {
            (Some(&from), Some(&to)) => state.graph.contains_edge(from, to),
            _ => false,
        }
    }

    /// Number of connections in the whole graph.
    pub fn connection_count(&self) -> usize {
        lock(&self.state).graph.edge_count()
    }

    /// Every port name, sorted.
    pub fn port_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).ports.keys().cloned().collect();
        names.sort();
        names
    }

    /// Change the reported period size. The caller delivers the notification.
    pub fn set_buffer_size(&self, frames: u32) {
        lock(&self.state).buffer_size = frames;
    }

    /// Change the reported sample rate. The caller delivers the notification.
    pub fn set_sample_rate(&self, rate: u32) {
        lock(&self.state).sample_rate = rate;
    }
}

impl GraphEngine for MemoryEngine {
    fn sample_rate(&self) -> u32 {
        lock(&self.state).sample_rate
    }

    fn buffer_size(&self) -> u32 {
        lock(&self.state).buffer_size
    }

    fn register_port(&self, short_name: &str, flow: PortFlow) -> Result<String, EngineError> {
        let full_name = format!("{}:{}", self.client_name, short_name);
        lock(&self.state).add(full_name.clone(), flow)?;
        Ok(full_name)
    }

    fn unregister_port(&self, full_name: &str) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        let idx = state.index(full_name)?;
        state.graph.remove_node(idx);
        state.ports.remove(full_name);
        Ok(())
    }

    fn connect(&self, source: &str, destination: &str) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        let (from, to) = state.edge(source, destination)?;
        state.graph.update_edge(from, to, ());
        Ok(())
    }

    fn disconnect(&self, source: &str, destination: &str) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        let (from, to) = state.edge(source, destination)?;
        let edge = state
            .graph
            .find_edge(from, to)
            .ok_or_else(|| EngineError::new(format!("{source} is not connected to {destination}")))?;
        state.graph.remove_edge(edge);
        Ok(())
    }
}

/// Per-channel buffers for driving a process handler by hand.
pub struct PeriodIo {
    pub playback: Vec<Vec<f32>>,
    pub capture: Vec<Vec<f32>>,
    pub monitor: Vec<Vec<f32>>,
}

impl PeriodIo {
    pub fn new(channels: u16, frames: u32) -> Self {
        let group = || vec![vec![0.0; frames as usize]; channels as usize];
        Self {
            playback: group(),
            capture: group(),
            monitor: group(),
        }
    }

    /// Resize every channel to `frames` samples.
    pub fn resize(&mut self, frames: u32) {
        for channel in self.playback.iter_mut().chain(&mut self.capture).chain(&mut self.monitor) {
            channel.resize(frames as usize, 0.0);
        }
    }

    /// Run one period through `process`.
    pub fn run<P: ProcessHandler + ?Sized>(&mut self, process: &mut P) {
        let nframes = self.playback.first().map_or(0, Vec::len) as u32;
        let playback: Vec<&[f32]> = self.playback.iter().map(Vec::as_slice).collect();
        let mut capture: Vec<&mut [f32]> = self.capture.iter_mut().map(Vec::as_mut_slice).collect();
        let mut monitor: Vec<&mut [f32]> = self.monitor.iter_mut().map(Vec::as_mut_slice).collect();
        let mut buffers = PeriodBuffers {
            playback: &playback,
            capture: &mut capture,
            monitor: &mut monitor,
        };
        process.process(nframes, &mut buffers);
    }
}

enum Queued {
    Data(Vec<u8>),
    Hole(usize),
}

impl Queued {
    fn len(&self) -> usize {
        match self {
            Queued::Data(data) => data.len(),
            Queued::Hole(len) => *len,
        }
    }
}

struct StreamShared {
    name: String,
    ready: bool,
    connected: bool,
    buffer_attr: BufferAttr,
    attr_updates: usize,
    sample_rate: u32,
    device_index: Option<u32>,
    source: Option<String>,
    write_grant: Option<usize>,
    written: Vec<u8>,
    queued: VecDeque<Queued>,
}

/// A stream backed by in-memory queues.
///
/// Playback streams collect every submitted byte; record streams deliver
/// whatever fragments were pushed through their [`MemoryStreamHandle`].
pub struct MemoryStream {
    shared: Arc<Mutex<StreamShared>>,
    scratch: Vec<u8>,
    current: Option<Queued>,
}

/// Test-side view of a [`MemoryStream`].
#[derive(Clone)]
pub struct MemoryStreamHandle {
    shared: Arc<Mutex<StreamShared>>,
}

impl MemoryStreamHandle {
    pub fn name(&self) -> String {
        lock(&self.shared).name.clone()
    }

    /// Queue captured bytes for the relay to read.
    pub fn push_data(&self, bytes: &[u8]) {
        lock(&self.shared).queued.push_back(Queued::Data(bytes.to_vec()));
    }

    /// Queue a gap of `len` bytes.
    pub fn push_hole(&self, len: usize) {
        lock(&self.shared).queued.push_back(Queued::Hole(len));
    }

    /// Everything the relay has submitted so far, draining it.
    pub fn take_written(&self) -> Vec<u8> {
        core::mem::take(&mut lock(&self.shared).written)
    }

    /// Make `begin_write` hand out `len` bytes regardless of the request.
    pub fn grant_writes(&self, len: Option<usize>) {
        lock(&self.shared).write_grant = len;
    }

    pub fn buffer_attr(&self) -> BufferAttr {
        lock(&self.shared).buffer_attr
    }

    /// How often the attributes were replaced after connecting.
    pub fn attr_updates(&self) -> usize {
        lock(&self.shared).attr_updates
    }

    pub fn sample_rate(&self) -> u32 {
        lock(&self.shared).sample_rate
    }

    pub fn source(&self) -> Option<String> {
        lock(&self.shared).source.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).connected
    }

    pub fn set_ready(&self, ready: bool) {
        lock(&self.shared).ready = ready;
    }

    /// Pretend the server moved the stream, resetting its attributes.
    pub fn simulate_move(&self, device_index: u32) {
        let mut shared = lock(&self.shared);
        shared.device_index = Some(device_index);
        shared.buffer_attr = BufferAttr::default();
    }
}

impl MemoryStream {
    fn connect(name: &str, spec: &SampleSpec, attr: &BufferAttr, device_index: Option<u32>, source: Option<&str>) -> (Self, MemoryStreamHandle) {
        let shared = Arc::new(Mutex::new(StreamShared {
            name: name.to_string(),
            ready: true,
            connected: true,
            buffer_attr: *attr,
            attr_updates: 0,
            sample_rate: spec.rate,
            device_index,
            source: source.map(str::to_string),
            write_grant: None,
            written: Vec::new(),
            queued: VecDeque::new(),
        }));
        let stream = Self {
            shared: shared.clone(),
            scratch: Vec::new(),
            current: None,
        };
        (stream, MemoryStreamHandle { shared })
    }

    fn check_connected(&self) -> Result<(), ServiceError> {
        if lock(&self.shared).connected {
            Ok(())
        } else {
            Err(ServiceError::new("Bad state"))
        }
    }
}

impl StreamControl for MemoryStream {
    fn is_ready(&self) -> bool {
        let shared = lock(&self.shared);
        shared.connected && shared.ready
    }

    fn set_buffer_attr(&mut self, attr: &BufferAttr) -> Result<(), ServiceError> {
        self.check_connected()?;
        let mut shared = lock(&self.shared);
        shared.buffer_attr = *attr;
        shared.attr_updates += 1;
        Ok(())
    }

    fn update_sample_rate(&mut self, rate: u32) -> Result<(), ServiceError> {
        self.check_connected()?;
        lock(&self.shared).sample_rate = rate;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut shared = lock(&self.shared);
        shared.connected = false;
        shared.ready = false;
    }
}

impl PlaybackStream for MemoryStream {
    fn begin_write(&mut self, nbytes: usize) -> Result<&mut [u8], ServiceError> {
        self.check_connected()?;
        let len = lock(&self.shared).write_grant.unwrap_or(nbytes);
        // stale bytes, so anything the relay forgets to fill shows up
        self.scratch.clear();
        self.scratch.resize(len, 0x55);
        Ok(&mut self.scratch)
    }

    fn write(&mut self, nbytes: usize) -> Result<(), ServiceError> {
        self.check_connected()?;
        let submitted = self
            .scratch
            .get(..nbytes)
            .ok_or_else(|| ServiceError::new("Invalid argument"))?;
        lock(&self.shared).written.extend_from_slice(submitted);
        Ok(())
    }

    fn device_index(&self) -> Option<u32> {
        lock(&self.shared).device_index
    }
}

impl RecordStream for MemoryStream {
    fn readable_size(&self) -> usize {
        let queued: usize = lock(&self.shared).queued.iter().map(Queued::len).sum();
        queued + self.current.as_ref().map_or(0, Queued::len)
    }

    fn peek(&mut self) -> Result<Fragment<'_>, ServiceError> {
        self.check_connected()?;
        if self.current.is_none() {
            self.current = lock(&self.shared).queued.pop_front();
        }
        Ok(match &self.current {
            Some(Queued::Data(data)) => Fragment::Data(data),
            Some(Queued::Hole(len)) => Fragment::Hole(*len),
            None => Fragment::Empty,
        })
    }

    fn discard(&mut self) -> Result<(), ServiceError> {
        self.check_connected()?;
        self.current = None;
        Ok(())
    }
}

/// A service context with a single default sink.
pub struct MemoryContext {
    default_sink: u32,
    monitors: HashMap<u32, String>,
    streams: HashMap<String, MemoryStreamHandle>,
    error: ServiceError,
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContext {
    /// A context whose default sink is index 0, monitored by `memory_sink.monitor`.
    pub fn new() -> Self {
        let mut monitors = HashMap::new();
        monitors.insert(0, "memory_sink.monitor".to_string());
        Self {
            default_sink: 0,
            monitors,
            streams: HashMap::new(),
            error: ServiceError::new("Connection refused"),
        }
    }

    /// Add a sink and make it the default.
    pub fn set_default_sink(&mut self, index: u32, monitor: impl Into<String>) {
        self.monitors.insert(index, monitor.into());
        self.default_sink = index;
    }

    /// Forget the monitor of sink `index`, so looking it up fails.
    pub fn remove_sink(&mut self, index: u32) {
        self.monitors.remove(&index);
    }

    /// Error reported once the context fails.
    pub fn set_error(&mut self, error: ServiceError) {
        self.error = error;
    }

    /// The stream created under `name`.
    pub fn stream(&self, name: &str) -> Option<MemoryStreamHandle> {
        self.streams.get(name).cloned()
    }

    fn open(&mut self, name: &str, spec: &SampleSpec, attr: &BufferAttr, source: Option<&str>) -> Result<MemoryStream, ServiceError> {
        if spec.channels == 0 || spec.rate == 0 {
            return Err(ServiceError::new("Invalid sample specification"));
        }
        let (stream, handle) = MemoryStream::connect(name, spec, attr, Some(self.default_sink), source);
        self.streams.insert(name.to_string(), handle);
        Ok(stream)
    }
}

impl ServiceContext for MemoryContext {
    fn connect_playback(
        &mut self,
        name: &str,
        spec: &SampleSpec,
        attr: &BufferAttr,
    ) -> Result<Box<dyn PlaybackStream>, ServiceError> {
        Ok(Box::new(self.open(name, spec, attr, None)?))
    }

    fn connect_record(
        &mut self,
        name: &str,
        spec: &SampleSpec,
        attr: &BufferAttr,
        source: Option<&str>,
    ) -> Result<Box<dyn RecordStream>, ServiceError> {
        Ok(Box::new(self.open(name, spec, attr, source)?))
    }

    fn monitor_source(&mut self, sink_index: u32) -> Result<String, ServiceError> {
        self.monitors
            .get(&sink_index)
            .cloned()
            .ok_or_else(|| ServiceError::new("No such entity"))
    }

    fn last_error(&self) -> ServiceError {
        self.error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_is_idempotent() {
        let engine = MemoryEngine::with_system_ports("relay", 48000, 256, 1);
        engine.add_foreign_port("synth:in", PortFlow::Input).unwrap();
        engine.connect("system:capture_1", "synth:in").unwrap();
        engine.connect("system:capture_1", "synth:in").unwrap();
        assert_eq!(engine.connection_count(), 1);
        engine.disconnect("system:capture_1", "synth:in").unwrap();
        assert!(engine.disconnect("system:capture_1", "synth:in").is_err());
    }

    #[test]
    fn connect_checks_flow() {
        let engine = MemoryEngine::with_system_ports("relay", 48000, 256, 1);
        assert!(engine.connect("system:playback_1", "system:capture_1").is_err());
        assert!(engine.connect("system:capture_1", "nowhere:in").is_err());
    }

    #[test]
    fn unregister_drops_connections() {
        let engine = MemoryEngine::with_system_ports("relay", 48000, 256, 1);
        let own = engine.register_port("capture_1", PortFlow::Output).unwrap();
        assert_eq!(own, "relay:capture_1");
        engine.connect(&own, "system:playback_1").unwrap();
        engine.unregister_port(&own).unwrap();
        assert_eq!(engine.connection_count(), 0);
        assert!(!engine.port_names().contains(&own));
    }

    #[test]
    fn record_stream_peek_and_discard() {
        let spec = SampleSpec { rate: 48000, channels: 2 };
        let (mut stream, handle) = MemoryStream::connect("rec", &spec, &BufferAttr::default(), None, None);
        handle.push_data(&[1, 2, 3, 4]);
        handle.push_hole(8);
        assert_eq!(stream.readable_size(), 12);
        assert_eq!(stream.peek().unwrap(), Fragment::Data(&[1, 2, 3, 4]));
        // peeking again returns the same fragment
        assert_eq!(stream.peek().unwrap(), Fragment::Data(&[1, 2, 3, 4]));
        stream.discard().unwrap();
        assert_eq!(stream.peek().unwrap(), Fragment::Hole(8));
        stream.discard().unwrap();
        assert_eq!(stream.peek().unwrap(), Fragment::Empty);
        assert_eq!(stream.readable_size(), 0);
    }
}
