use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use lazarus::board::position::Position;
use lazarus::movegen::{generate_legal_moves, generate_moves, perft, ALL_MOVES, NOISY_ONLY};

const KIWIPETE: &str = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

fn movegen_benchmark(c: &mut Criterion) {
    let positions = vec![
        ("startpos", Position::startpos()),
        ("kiwipete", Position::from_fen(KIWIPETE).unwrap()),
    ];

    let mut group = c.benchmark_group("Move Generation");

    for (name, pos) in &positions {
        group.bench_with_input(BenchmarkId::new("pseudo_legal", name), pos, |b, pos| {
            b.iter(|| black_box(generate_moves::<ALL_MOVES>(pos)));
        });
        group.bench_with_input(BenchmarkId::new("noisy_only", name), pos, |b, pos| {
            b.iter(|| black_box(generate_moves::<NOISY_ONLY>(pos)));
        });
        group.bench_with_input(BenchmarkId::new("legal", name), pos, |b, pos| {
            b.iter(|| black_box(generate_legal_moves(pos)));
        });
    }

    group.finish();
}

fn perft_benchmark(c: &mut Criterion) {
    let pos = Position::startpos();

    let mut group = c.benchmark_group("Perft");
    group
        .sample_size(20)
        .measurement_time(Duration::from_secs(20))
        .throughput(Throughput::Elements(197_281));

    group.bench_function("startpos_depth_4", |b| {
        b.iter(|| black_box(perft(&pos, 4)));
    });

    group.finish();
}

criterion_group!(
    name = perft_benches;
    config = Criterion::default().noise_threshold(0.02);
    targets = movegen_benchmark, perft_benchmark,
);
criterion_main!(perft_benches);
