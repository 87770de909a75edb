//! Performance benchmarks for hot paths of the simulation server

use server::config::ServerConfig;
use server::session_manager::SessionManager;
use shared::input::InputMode;
use shared::quantize::{decode_scalar, encode_scalar, encode_vector, QuantizedReader};
use shared::wire;
use shared::{FrameUpdate, JoinRequest, Message, Vec3};
use std::time::Instant;

/// Benchmarks fixed-point input encoding and decoding
#[test]
fn benchmark_quantization() {
    let iterations = 100_000;
    let start = Instant::now();

    let mut checksum = 0.0;
    for i in 0..iterations {
        let raw = encode_vector(Vec3::new(i as f32 * 1e-4, -0.5, 0.25));
        let mut reader = QuantizedReader::new(&raw);
        checksum += reader.read_vector().x as f64;
        checksum += decode_scalar(encode_scalar(0.125));
    }

    let duration = start.elapsed();
    println!(
        "Quantization: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(checksum > 0.0);
    assert!(duration.as_millis() < 500);
}

/// Benchmarks wire encoding of a frame carrying images
#[test]
fn benchmark_frame_encoding() {
    let images = vec![vec![7u8; 64 * 48 * 3]; 3];
    let update = FrameUpdate {
        observed_objects: Some((0..20).map(|i| format!("object_{}", i)).collect()),
        avatar_position: Vec3::new(1.0, 0.5, -2.0),
        ..FrameUpdate::default()
    };

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let message: Message = update.to_message(images.clone()).unwrap();
        let data = wire::encode(&message).unwrap();
        let decoded = wire::decode_body(&data[wire::LENGTH_PREFIX_BYTES..]).unwrap();
        assert_eq!(decoded.binary_frames().len(), 3);
    }

    let duration = start.elapsed();
    println!(
        "Frame encoding: {} iterations in {:?} ({:.2} us/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks full simulation steps with several loopback clients
#[test]
fn benchmark_simulation_steps() {
    let mut manager = SessionManager::new(ServerConfig {
        environment_scene: "Playroom".to_string(),
        spawn_seed: Some(3),
        ..ServerConfig::default()
    });
    let join = JoinRequest {
        relationships: vec!["ALL".to_string()],
        ..JoinRequest::default()
    };
    for _ in 0..4 {
        manager.create_test_client(&join, InputMode::Random).unwrap();
    }

    let ticks = 400;
    let start = Instant::now();

    for _ in 0..ticks {
        manager.tick();
    }

    let duration = start.elapsed();
    println!(
        "Simulation: {} ticks, {} steps in {:?}",
        ticks,
        manager.step(),
        duration
    );

    // Each step takes two ticks: one to deliver frames, one to collect inputs
    assert!(manager.step() >= (ticks / 2 - 2) as u64);
    assert!(duration.as_secs() < 10);
}
