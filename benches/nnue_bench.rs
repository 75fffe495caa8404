use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use lazarus::board::position::{PieceType, Position};
use lazarus::movegen::moves::Move;
use lazarus::nnue::network::HL_SIZE;
use lazarus::nnue::{simd, AccumulatorPair, Network};

fn nnue_refresh_benchmark(c: &mut Criterion) {
    let net = Network::zeroed();
    let pos = Position::startpos();

    c.bench_function("accumulator_refresh", |b| {
        let mut acc = AccumulatorPair::default();
        b.iter(|| {
            acc.reset(&pos, &net);
            black_box(&acc);
        });
    });
}

fn nnue_update_benchmark(c: &mut Criterion) {
    let net = Network::zeroed();
    let pos = Position::startpos();

    let m = Move::from_uci("e2e4", &pos).unwrap();
    let mut after = pos.clone();
    after.make_move(m);

    c.bench_function("accumulator_delta_update", |b| {
        let mut acc = AccumulatorPair::default();
        acc.reset(&pos, &net);
        b.iter(|| {
            acc.update(&after, m, PieceType::NoPiece, &net);
            black_box(&acc);
        });
    });
}

fn inference_benchmark(c: &mut Criterion) {
    let mut stm = [0i16; HL_SIZE];
    let mut nstm = [0i16; HL_SIZE];
    let mut weights = vec![0i16; 2 * HL_SIZE];
    for i in 0..HL_SIZE {
        stm[i] = ((i * 31) % 512) as i16 - 128;
        nstm[i] = ((i * 17) % 512) as i16 - 128;
        weights[i] = (i % 15) as i16 - 7;
        weights[HL_SIZE + i] = (i % 11) as i16 - 5;
    }

    let mut group = c.benchmark_group("SCReLU Inference");
    group.throughput(Throughput::Elements(2 * HL_SIZE as u64));

    group.bench_function("dispatched", |b| {
        b.iter(|| black_box(simd::screlu_sum(&stm, &nstm, &weights)));
    });

    group.bench_function("scalar", |b| {
        b.iter(|| black_box(simd::screlu_sum_scalar(&stm, &nstm, &weights)));
    });

    group.finish();
}

criterion_group!(
    name = nnue_benches;
    config = Criterion::default().noise_threshold(0.02);
    targets = nnue_refresh_benchmark, nnue_update_benchmark, inference_benchmark,
);
criterion_main!(nnue_benches);
