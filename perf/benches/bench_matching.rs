use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use detect_core::assign_track_ids;
use perf::{detection_grid, track_grid};

fn bench_assign(c: &mut Criterion) {
    let tracks = track_grid(32);
    c.bench_function("assign_track_ids_32x32", |b| {
        b.iter(|| {
            let mut dets = detection_grid(32);
            assign_track_ids(&mut dets, black_box(&tracks));
            black_box(dets)
        })
    });
}

criterion_group!(benches, bench_assign);
criterion_main!(benches);
