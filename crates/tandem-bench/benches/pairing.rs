//! Matchmaking benchmarks for Tandem.
//!
//! These benchmarks measure pairing throughput and relay latency through the
//! matchmaker, without any network in the way.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Instant;
use tandem_core::{Matchmaker, Session};
use tandem_protocol::{tags, Event, SendMessage};

/// Benchmark attaching sessions that pair off two by two.
fn bench_attach(c: &mut Criterion) {
    let mut group = c.benchmark_group("attach");

    for groups in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(2));
        group.bench_with_input(BenchmarkId::new("pair", groups), &groups, |b, &groups| {
            let mm = Matchmaker::new();
            let mut i = 0usize;
            b.iter(|| {
                let name = format!("group:{}", i % groups);
                i += 1;

                let (first, _rx_first) = Session::new(name.clone());
                let (second, _rx_second) = Session::new(name);
                mm.attach(&first).unwrap();
                black_box(mm.attach(&second).unwrap());

                mm.remove_client(&first);
                mm.remove_client(&second);
            });
        });
    }

    group.finish();
}

/// Benchmark attaching into a busy lobby where every other arrival pairs.
fn bench_lobby(c: &mut Criterion) {
    let mut group = c.benchmark_group("lobby");

    group.bench_function("attach_burst", |b| {
        b.iter_custom(|iters| {
            let mm = Matchmaker::new();
            let mut sessions = Vec::with_capacity(iters as usize);

            let start = Instant::now();
            for _ in 0..iters {
                let (session, rx) = Session::new("lobby");
                mm.attach(&session).unwrap();
                sessions.push((session, rx));
            }
            let elapsed = start.elapsed();

            for (session, _) in &sessions {
                mm.remove_client(session);
            }
            elapsed
        });
    });

    group.finish();
}

/// Benchmark relaying a message to a partner and receiving it.
fn bench_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay");

    for size in [16usize, 256] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("send_message", size), &size, |b, &size| {
            let mm = Matchmaker::new();
            let (alice, _rx_alice) = Session::new("lobby");
            let (bob, mut rx_bob) = Session::new("lobby");
            mm.attach(&alice).unwrap();
            mm.attach(&bob).unwrap();
            while rx_bob.try_recv().is_ok() {}

            let text = "x".repeat(size);
            b.iter(|| {
                let message = SendMessage {
                    message: text.clone(),
                    from: "alice".into(),
                };
                mm.send_message(&alice, black_box(message)).unwrap();
                black_box(rx_bob.try_recv().unwrap())
            });
        });
    }

    group.bench_function("route_event", |b| {
        let mm = Matchmaker::new();
        let (alice, _rx_alice) = Session::new("lobby");
        let (bob, mut rx_bob) = Session::new("lobby");
        mm.attach(&alice).unwrap();
        mm.attach(&bob).unwrap();
        while rx_bob.try_recv().is_ok() {}

        let event = Event::new(
            tags::SEND_MESSAGE,
            &SendMessage {
                message: "hello".into(),
                from: "alice".into(),
            },
        )
        .unwrap();

        b.iter(|| {
            mm.route_event(black_box(&event), &alice).unwrap();
            black_box(rx_bob.try_recv().unwrap())
        });
    });

    group.finish();
}

/// Benchmark moving a paired session between groups.
fn bench_change_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_group");

    group.bench_function("ping_pong", |b| {
        let mm = Matchmaker::new();
        let (mover, mut rx_mover) = Session::new("red");
        mm.attach(&mover).unwrap();

        let mut targets = ["blue", "red"].iter().cycle();
        b.iter(|| {
            let target = targets.next().unwrap();
            black_box(mm.change_group(&mover, target).unwrap());
            while rx_mover.try_recv().is_ok() {}
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_attach,
    bench_lobby,
    bench_relay,
    bench_change_group
);
criterion_main!(benches);
