//! Loopback demo: an in-memory engine plays a sine wave into the relay, an
//! in-memory server sends everything it receives straight back as capture.
//!
//! Run with: cargo run --example loopback
//!
//! Halfway through, the engine halves its period size and the relay rebuilds
//! its rings on the fly. Set `RUST_LOG=debug` to watch it happen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use klingt_relay::memory::{MemoryContext, MemoryEngine, PeriodIo};
use klingt_relay::{ContextState, Direction, GraphEngine, NotificationHandler, Relay, RelayConfig, ServiceHandler};

const RATE: u32 = 48000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = RelayConfig::default().with_client_name("klingt-relay loopback");
    let channels = config.channels;
    let engine = Arc::new(MemoryEngine::with_system_ports("relay", RATE, 256, channels));
    let (relay, handlers) = Relay::new(config.clone(), engine.clone()).expect("relay setup failed");

    let mut context = MemoryContext::new();
    relay
        .service()
        .lock()
        .context_state(ContextState::Ready, &mut context)
        .expect("stream setup failed");
    let playback = context.stream(config.stream_name(Direction::Playback)).unwrap();
    let capture = context.stream(config.stream_name(Direction::Capture)).unwrap();

    let running = Arc::new(AtomicBool::new(true));

    // the engine's real-time thread
    let mut process = handlers.process;
    let engine_thread = {
        let engine = engine.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut io = PeriodIo::new(channels, engine.buffer_size());
            let mut phase = 0.0f32;
            let mut peak = 0.0f32;
            while running.load(Ordering::Relaxed) {
                let frames = engine.buffer_size();
                io.resize(frames);
                for frame in 0..frames as usize {
                    let sample = (phase * core::f32::consts::TAU).sin() * 0.25;
                    phase = (phase + 440.0 / RATE as f32).fract();
                    for channel in io.playback.iter_mut() {
                        channel[frame] = sample;
                    }
                }
                io.run(&mut process);
                peak = io.capture[0].iter().fold(peak, |peak, s| peak.max(s.abs()));
                thread::sleep(Duration::from_secs_f64(frames as f64 / RATE as f64));
            }
            peak
        })
    };

    // the server's event loop
    let service_thread = {
        let service = relay.service().clone();
        let running = running.clone();
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                {
                    let mut side = service.lock();
                    if let Err(err) = side.writable(1024) {
                        eprintln!("playback failed: {err}");
                        return;
                    }
                    capture.push_data(&playback.take_written());
                    if let Err(err) = side.readable(Direction::Capture) {
                        eprintln!("capture failed: {err}");
                        return;
                    }
                }
                thread::sleep(Duration::from_micros(2500));
            }
        })
    };

    let mut notifications = handlers.notifications;
    notifications.port_connect("system:capture_1", "system:playback_1", true);

    thread::sleep(Duration::from_secs(1));
    println!("\nHalving the period size...\n");
    engine.set_buffer_size(128);
    notifications.buffer_size(128).expect("period change failed");
    thread::sleep(Duration::from_secs(1));

    running.store(false, Ordering::Relaxed);
    let peak = engine_thread.join().unwrap_or(0.0);
    service_thread.join().ok();

    let stats = relay.stats();
    println!("\nPeak captured level: {peak:.3}");
    println!("Periods processed:   {}", stats.periods);
    println!("Ring swaps:          {}", stats.ring_swaps);
    println!("Playback xruns:      {:?}", stats.playback);
    println!("Capture xruns:       {:?}", stats.capture);
    println!(
        "Mirrored connection: {}",
        engine.is_connected("relay:capture_1", "system:playback_1")
    );
}
