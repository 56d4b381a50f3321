use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use pocket_sync::bridge::{SyncBridge, SyncBridgeConfig};
use pocket_sync::broadcast::BroadcastGroup;
use pocket_sync::clock::{NodeId, OperationTimestamp};
use pocket_sync::document::CrdtDocument;
use pocket_sync::operation::{path, CrdtOperation};
use pocket_sync::protocol::{AwarenessState, TransportMessage};
use serde_json::json;
use std::hint::black_box;
use uuid::Uuid;

fn remote_ops(count: u64) -> Vec<CrdtOperation> {
    (1..=count)
        .map(|i| {
            let node = if i % 2 == 0 { "A" } else { "B" };
            let key = format!("field{}", i % 16);
            CrdtOperation::update(OperationTimestamp::new(i, node), path(&[key]), json!(i), 0)
        })
        .collect()
}

fn bench_local_set(c: &mut Criterion) {
    let title = path(&["title"]);

    c.bench_function("document_local_set", |b| {
        b.iter_batched(
            || CrdtDocument::new("doc", NodeId::from("A")),
            |mut doc| {
                black_box(doc.set(&title, black_box(json!("hello"))));
                doc
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_apply_remote_in_order(c: &mut Criterion) {
    let ops = remote_ops(1000);

    c.bench_function("apply_remote_1000_in_order", |b| {
        b.iter_batched(
            || CrdtDocument::new("doc", NodeId::from("X")),
            |mut doc| {
                for op in &ops {
                    black_box(doc.apply_remote(op));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_apply_remote_reordered(c: &mut Criterion) {
    // Every other op arrives late, forcing replays.
    let ops = remote_ops(200);
    let (late, early): (Vec<_>, Vec<_>) = ops.into_iter().partition(|op| op.origin == NodeId::from("B"));

    c.bench_function("apply_remote_200_reordered", |b| {
        b.iter_batched(
            || CrdtDocument::new("doc", NodeId::from("X")),
            |mut doc| {
                for op in early.iter().chain(late.iter()) {
                    black_box(doc.apply_remote(op));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_duplicate_filter(c: &mut Criterion) {
    let ops = remote_ops(100);
    let mut doc = CrdtDocument::new("doc", NodeId::from("X"));
    for op in &ops {
        doc.apply_remote(op);
    }

    c.bench_function("apply_remote_duplicate", |b| {
        b.iter(|| {
            black_box(doc.apply_remote(black_box(&ops[50])));
        })
    });
}

fn bench_message_encode(c: &mut Criterion) {
    let op = CrdtOperation::update(
        OperationTimestamp::new(42, "A"),
        path(&["shapes", "rect-1", "style"]),
        json!({"fill": "#ff8800", "stroke": 2, "points": [[0, 0], [10, 0], [10, 10]]}),
        1_700_000_000_000,
    );
    let msg = TransportMessage::operation("doc", NodeId::from("A"), op);

    c.bench_function("operation_message_encode", |b| {
        b.iter(|| {
            black_box(black_box(&msg).encode().unwrap());
        })
    });
}

fn bench_message_decode(c: &mut Criterion) {
    let op = CrdtOperation::update(OperationTimestamp::new(42, "A"), path(&["title"]), json!("hi"), 0);
    let encoded = TransportMessage::operation("doc", NodeId::from("A"), op).encode().unwrap();

    c.bench_function("operation_message_decode", |b| {
        b.iter(|| {
            black_box(TransportMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_awareness_encode(c: &mut Criterion) {
    let state = AwarenessState::default()
        .with_cursor(json!({"x": 120.5, "y": 48.0}))
        .with_user(json!({"name": "Ada", "color": "#3366ff"}));

    c.bench_function("awareness_encode", |b| {
        b.iter(|| {
            let msg = TransportMessage::awareness(NodeId::from("A"), state.clone());
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_broadcast_100_subscribers(c: &mut Criterion) {
    let group: BroadcastGroup<TransportMessage> = BroadcastGroup::new(1024);
    let mut receivers: Vec<_> = (0..100).map(|_| group.subscribe()).collect();
    let msg = TransportMessage::peer_join(NodeId::from("A"));
    let origin = Uuid::new_v4();

    c.bench_function("broadcast_100_subscribers", |b| {
        b.iter(|| {
            black_box(group.publish(origin, msg.clone()));
            for rx in receivers.iter_mut() {
                let _ = rx.try_recv();
            }
        })
    });
}

fn bench_bridge_write(c: &mut Criterion) {
    let fields = match json!({"title": "buy milk", "done": false, "priority": 2}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };

    c.bench_function("bridge_local_write_3_fields", |b| {
        b.iter_batched(
            || {
                SyncBridge::new(SyncBridgeConfig {
                    node_id: NodeId::from("A"),
                    ..SyncBridgeConfig::default()
                })
            },
            |bridge| {
                black_box(bridge.process_local_write("todos", "t1", &fields).unwrap());
                bridge
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_local_set,
    bench_apply_remote_in_order,
    bench_apply_remote_reordered,
    bench_duplicate_filter,
    bench_message_encode,
    bench_message_decode,
    bench_awareness_encode,
    bench_broadcast_100_subscribers,
    bench_bridge_write,
);
criterion_main!(benches);
