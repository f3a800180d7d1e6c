use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use klingt_relay::memory::{MemoryContext, MemoryEngine, PeriodIo};
use klingt_relay::{ContextState, Direction, Relay, RelayConfig, ServiceHandler};

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("PeriodAdapter.process() 256 frames", |b| {
        let engine = Arc::new(MemoryEngine::with_system_ports("relay", 48000, 256, 2));
        let (relay, mut handlers) = Relay::new(RelayConfig::default(), engine).unwrap();
        let mut context = MemoryContext::new();
        relay.service().lock().context_state(ContextState::Ready, &mut context).unwrap();
        let mut io = PeriodIo::new(2, 256);

        b.iter(|| {
            io.run(black_box(&mut handlers.process));
            // keep the playback ring from filling up
            relay.service().lock().writable(4096).unwrap();
        })
    });

    c.bench_function("ServiceSide.readable() 2048 bytes", |b| {
        let engine = Arc::new(MemoryEngine::with_system_ports("relay", 48000, 256, 2));
        let (relay, mut handlers) = Relay::new(RelayConfig::default(), engine).unwrap();
        let mut context = MemoryContext::new();
        relay.service().lock().context_state(ContextState::Ready, &mut context).unwrap();
        let capture = context.stream("JACK record").unwrap();
        let fragment = vec![0u8; 2048];
        let mut io = PeriodIo::new(2, 256);

        b.iter(|| {
            capture.push_data(black_box(&fragment));
            relay.service().lock().readable(Direction::Capture).unwrap();
            io.run(&mut handlers.process);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
