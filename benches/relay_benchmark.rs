use criterion::{black_box, criterion_group, criterion_main, Criterion};

use canvas_sync::broadcast::BroadcastGroup;
use canvas_sync::canvas::CanvasDoc;
use canvas_sync::protocol::RelayMessage;
use canvas_sync::registry::RoomRegistry;
use canvas_sync::throttle::UpdateThrottle;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn bench_update_encode(c: &mut Criterion) {
    let sender = Uuid::new_v4();
    let payload = vec![0u8; 64]; // Typical small update

    c.bench_function("update_encode_64B", |b| {
        b.iter(|| {
            let msg = RelayMessage::update(
                black_box(sender),
                black_box("room-1"),
                black_box(payload.clone()),
            );
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_update_decode(c: &mut Criterion) {
    let msg = RelayMessage::update(Uuid::new_v4(), "room-1", vec![0u8; 64]);
    let encoded = msg.encode().unwrap();

    c.bench_function("update_decode_64B", |b| {
        b.iter(|| {
            black_box(RelayMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_update_roundtrip(c: &mut Criterion) {
    let sender = Uuid::new_v4();

    c.bench_function("update_roundtrip_64B", |b| {
        b.iter(|| {
            let msg = RelayMessage::update(sender, "room-1", vec![0u8; 64]);
            let encoded = msg.encode().unwrap();
            black_box(RelayMessage::decode(&encoded).unwrap());
        })
    });
}

fn bench_broadcast_raw(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_raw_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(1024);

                // Add 100 peers
                let mut receivers = Vec::new();
                for _ in 0..100 {
                    let rx = group.add_peer(Uuid::new_v4()).await;
                    receivers.push(rx);
                }

                // Broadcast 1 frame
                let data = Arc::new(vec![0u8; 64]);
                let count = group.broadcast_raw(black_box(data));
                black_box(count);
            });
        })
    });
}

fn bench_broadcast_1000_frames(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_1000_frames_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(2048);

                let mut receivers = Vec::new();
                for _ in 0..100 {
                    let rx = group.add_peer(Uuid::new_v4()).await;
                    receivers.push(rx);
                }

                // Broadcast 1000 frames
                for i in 0..1000u64 {
                    let data = Arc::new(vec![i as u8; 64]);
                    group.broadcast_raw(black_box(data));
                }
            });
        })
    });
}

fn bench_throttle_allow(c: &mut Criterion) {
    c.bench_function("throttle_allow_1000_conns", |b| {
        b.iter_custom(|iters| {
            let mut throttle = UpdateThrottle::new(Duration::from_millis(30));
            let conns: Vec<Uuid> = (0..1000).map(|_| Uuid::new_v4()).collect();

            let start = Instant::now();
            for i in 0..iters {
                let conn = conns[(i % 1000) as usize];
                black_box(throttle.allow(conn, Instant::now()));
            }
            start.elapsed()
        })
    });
}

fn bench_stroke_export(c: &mut Criterion) {
    c.bench_function("stroke_begin_and_export", |b| {
        b.iter(|| {
            let canvas = CanvasDoc::new();
            let (_, update) = canvas
                .begin_stroke(black_box("#336699"), black_box(2.0), 10.0, 20.0)
                .unwrap();
            black_box(update);
        })
    });
}

fn bench_apply_remote_updates(c: &mut Criterion) {
    // One source replica producing a realistic edit stream
    let source = CanvasDoc::new();
    let (stroke_id, first) = source.begin_stroke("#336699", 2.0, 0.0, 0.0).unwrap();
    let mut updates = vec![first];
    for i in 1..20 {
        updates.push(source.extend_stroke(stroke_id, i as f32, i as f32).unwrap());
    }

    c.bench_function("apply_20_remote_updates", |b| {
        b.iter(|| {
            let replica = CanvasDoc::new();
            for update in &updates {
                replica.apply_update(black_box(update)).unwrap();
            }
            black_box(replica.stroke_count());
        })
    });
}

fn bench_snapshot_encode(c: &mut Criterion) {
    // 100-stroke canvas, 20 points each
    let canvas = CanvasDoc::new();
    for s in 0..100 {
        let (id, _) = canvas
            .begin_stroke("#000000", 1.5, s as f32, 0.0)
            .unwrap();
        for p in 1..20 {
            canvas.extend_stroke(id, s as f32, p as f32).unwrap();
        }
    }

    c.bench_function("snapshot_encode_100_strokes", |b| {
        b.iter(|| {
            black_box(canvas.encode_snapshot());
        })
    });
}

fn bench_registry_join_leave(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("registry_join_leave", |b| {
        b.iter(|| {
            rt.block_on(async {
                let registry = RoomRegistry::with_defaults();
                let conn = Uuid::new_v4();
                let outcome = registry.join_room(conn, "bench").await;
                black_box(outcome.users_count);
                black_box(registry.leave_room(conn).await);
            });
        })
    });
}

fn bench_registry_apply_update(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let source = CanvasDoc::new();
    let (_, update) = source.begin_stroke("#336699", 2.0, 0.0, 0.0).unwrap();

    c.bench_function("registry_apply_update", |b| {
        b.iter(|| {
            rt.block_on(async {
                // Zero debounce so every iteration takes the merge path
                let registry = RoomRegistry::new(
                    256,
                    Duration::from_millis(0),
                    canvas_sync::registry::EvictionPolicy::Retain,
                );
                let outcome = registry
                    .apply_update(Uuid::new_v4(), "bench", black_box(&update))
                    .await;
                black_box(outcome);
            });
        })
    });
}

criterion_group!(
    benches,
    bench_update_encode,
    bench_update_decode,
    bench_update_roundtrip,
    bench_broadcast_raw,
    bench_broadcast_1000_frames,
    bench_throttle_allow,
    bench_stroke_export,
    bench_apply_remote_updates,
    bench_snapshot_encode,
    bench_registry_join_leave,
    bench_registry_apply_update,
);
criterion_main!(benches);
