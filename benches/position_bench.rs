use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use lazarus::board::position::Position;
use lazarus::movegen::generate_legal_moves;

const KIWIPETE: &str = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";

fn position_setup_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Position Setup");

    group.bench_function("startpos", |b| {
        b.iter(|| black_box(Position::startpos()));
    });

    group.bench_function("from_fen", |b| {
        b.iter(|| black_box(Position::from_fen(KIWIPETE).unwrap()));
    });

    group.finish();
}

fn make_move_benchmark(c: &mut Criterion) {
    let positions = vec![
        ("startpos", Position::startpos()),
        ("kiwipete", Position::from_fen(KIWIPETE).unwrap()),
    ];

    let mut group = c.benchmark_group("Make Move");

    for (name, pos) in &positions {
        let moves = generate_legal_moves(pos);
        group.throughput(Throughput::Elements(moves.len as u64));

        group.bench_with_input(BenchmarkId::new("clone_make", name), pos, |b, pos| {
            b.iter(|| {
                for &m in &moves {
                    let mut next = pos.clone();
                    next.make_move(m);
                    black_box(&next);
                }
            });
        });
    }

    group.finish();
}

fn see_benchmark(c: &mut Criterion) {
    let pos = Position::from_fen(KIWIPETE).unwrap();
    let moves = generate_legal_moves(&pos);

    c.bench_function("see_all_moves", |b| {
        b.iter(|| {
            for &m in &moves {
                black_box(pos.see(m, 0));
            }
        });
    });
}

criterion_group!(
    name = position_benches;
    config = Criterion::default().noise_threshold(0.02);
    targets = position_setup_benchmark, make_move_benchmark, see_benchmark,
);
criterion_main!(position_benches);
