//! Performance benchmarks for the replication hot paths

use bincode::{deserialize, serialize};
use shared::collaborators::Silent;
use shared::config::MatchConfig;
use shared::loopback::LoopbackHub;
use shared::projectile::BallSnapshot;
use shared::transform::TransformState;
use shared::{
    AuthorityChannel, BallId, Collaborators, Command, EntityRef, Envelope, InputSnapshot,
    MatchPhase, Packet, RoleKind, Rpc, Scope, Session, SessionConfig, Vec3,
};
use std::time::Instant;

const DT: f32 = 1.0 / 60.0;

fn playing_hub(proxies: usize) -> LoopbackHub {
    let config = SessionConfig {
        seed: Some(99),
        lifecycle: MatchConfig {
            exit_duration: 0.05,
            enter_duration: 0.05,
            wait_between_transitions: 0.0,
            auto_start_players: proxies + 1,
            ..MatchConfig::default()
        },
        ..SessionConfig::default()
    };
    let host = Session::host(config, Collaborators::headless(99, 0.0, Box::new(Silent))).unwrap();
    let mut hub = LoopbackHub::new(host);
    for seed in 0..proxies as u64 {
        hub.connect(Collaborators::headless(seed, 0.0, Box::new(Silent)))
            .unwrap();
    }
    hub.run(DT, 60);
    assert_eq!(hub.host.phase(), MatchPhase::Playing);
    hub
}

/// Benchmarks a full match tick with seven proxies walking around
#[test]
fn benchmark_loopback_ticks() {
    let mut hub = playing_hub(7);
    let iterations = 600;
    let start = Instant::now();

    for i in 0..iterations {
        let angle = i as f32 * 0.05;
        let movement = Vec3::new(angle.cos(), 0.0, angle.sin());
        hub.tick(DT, |_| InputSnapshot {
            movement,
            ..InputSnapshot::default()
        });
    }

    let duration = start.elapsed();
    println!(
        "Loopback ticks: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Ten simulated seconds must run well under real time
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks envelope serialization for the most frequent payloads
#[test]
fn benchmark_packet_serialization() {
    let packets = vec![
        Packet::Rpc(Envelope {
            sender: 0,
            sender_role: RoleKind::Authority,
            scope: Scope::ToAllFromAuthority,
            payload: Rpc::Transform {
                entity: EntityRef::Ball(BallId(3)),
                state: TransformState::at(Vec3::new(1.0, 0.25, -4.0)),
            },
        }),
        Packet::Rpc(Envelope {
            sender: 2,
            sender_role: RoleKind::Proxy,
            scope: Scope::ToAuthority,
            payload: Rpc::Request(Command::Throw {
                ball: BallId(1),
                by: 2,
                target: Vec3::new(4.0, 1.2, 7.0),
            }),
        }),
        Packet::Heartbeat,
    ];

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        for packet in &packets {
            let bytes = serialize(packet).unwrap();
            let _: Packet = deserialize(&bytes).unwrap();
        }
    }

    let duration = start.elapsed();
    println!(
        "Packet serialization: {} iterations in {:?}",
        iterations * packets.len(),
        duration
    );
    assert!(duration.as_millis() < 2000);
}

/// Every per-tick payload must fit comfortably in one datagram
#[test]
fn replication_payloads_fit_a_datagram() {
    let hub = playing_hub(3);
    let snapshot: BallSnapshot = hub
        .host
        .world()
        .pool
        .iter()
        .next()
        .map(|b| b.snapshot())
        .unwrap();

    let packet = Packet::Rpc(Envelope {
        sender: 0,
        sender_role: RoleKind::Authority,
        scope: Scope::ToAllFromAuthority,
        payload: Rpc::BallSync(snapshot),
    });
    let bytes = serialize(&packet).unwrap();
    assert!(bytes.len() < 512, "BallSync is {} bytes", bytes.len());
}

/// Stress tests the channel with many queued envelopes
#[test]
fn stress_test_channel_throughput() {
    let mut authority = AuthorityChannel::new(RoleKind::Authority, 0);
    let mut proxy = AuthorityChannel::new(RoleKind::Proxy, 1);

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        authority.send(Scope::ToAllFromAuthority, Rpc::EnterLevel);
    }
    for outgoing in authority.drain_outgoing() {
        proxy.receive(outgoing.envelope);
    }
    let mut delivered = 0;
    while proxy.next_incoming().is_some() {
        delivered += 1;
    }

    let duration = start.elapsed();
    println!(
        "Channel throughput: {} envelopes in {:?}",
        delivered, duration
    );

    assert_eq!(delivered, iterations);
    assert!(duration.as_millis() < 1000);
}
