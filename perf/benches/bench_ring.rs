use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use ivis_ring::{RingOptions, ShmRing};
use perf::vga_payload;

fn ring_for(tag: &str) -> ShmRing {
    let pid = std::process::id();
    ShmRing::open_or_create(RingOptions {
        data_name: format!("ivis_bench_{tag}_{pid}_data"),
        meta_name: format!("ivis_bench_{tag}_{pid}_meta"),
        slot_size: 640 * 480 * 3,
        slot_count: 8,
        owner: true,
        recreate_on_mismatch: true,
    })
    .expect("bench ring")
}

fn bench_write(c: &mut Criterion) {
    let mut ring = ring_for("write");
    let payload = vga_payload(0x42);
    c.bench_function("ring_write_vga", |b| {
        b.iter(|| black_box(ring.write(black_box(&payload)).unwrap()))
    });
}

fn bench_write_read(c: &mut Criterion) {
    let mut ring = ring_for("rw");
    let payload = vga_payload(0x42);
    c.bench_function("ring_write_then_read_vga", |b| {
        b.iter(|| {
            let (slot, generation) = ring.write(&payload).unwrap();
            black_box(ring.read(slot, generation).unwrap())
        })
    });
}

fn bench_read_latest(c: &mut Criterion) {
    let mut ring = ring_for("latest");
    ring.write(&vga_payload(0x42)).unwrap();
    c.bench_function("ring_read_latest_vga", |b| {
        b.iter(|| black_box(ring.read_latest().unwrap()))
    });
}

criterion_group!(benches, bench_write, bench_write_read, bench_read_latest);
criterion_main!(benches);
