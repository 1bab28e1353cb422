//! Benchmarks for the hot physical-memory paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use om_core::error::MemoryError;
use om_memory::{AccessWidth, MmioEndpoint, MmioRouter, SystemRam};
use parking_lot::Mutex;
use std::sync::Arc;

struct NullEndpoint;

impl MmioEndpoint for NullEndpoint {
    fn read(&mut self, _offset: u32, _width: AccessWidth) -> Result<u64, MemoryError> {
        Ok(0)
    }

    fn write(&mut self, _offset: u32, _width: AccessWidth, _value: u64) -> Result<(), MemoryError> {
        Ok(())
    }
}

fn bench_ram_access(c: &mut Criterion) {
    let mut ram = SystemRam::new(16 * 1024 * 1024);

    c.bench_function("ram_read_u32", |b| {
        b.iter(|| ram.read_u32(black_box(0x1000)).unwrap())
    });

    c.bench_function("ram_write_u32", |b| {
        b.iter(|| ram.write_u32(black_box(0x1000), black_box(0xDEADBEEF)).unwrap())
    });
}

fn bench_router_lookup(c: &mut Criterion) {
    let mut router = MmioRouter::new();
    // a realistic machine has a handful of regions
    for i in 0..8u32 {
        router
            .register_region(
                0xF000_0000 + i * 0x10_0000,
                0x8_0000,
                Arc::new(Mutex::new(NullEndpoint)),
            )
            .unwrap();
    }

    c.bench_function("router_hit", |b| {
        b.iter(|| router.read(black_box(0xF030_0020), AccessWidth::Word).unwrap())
    });

    c.bench_function("router_miss", |b| {
        b.iter(|| router.contains(black_box(0x0000_1000)))
    });
}

criterion_group!(benches, bench_ram_access, bench_router_lookup);
criterion_main!(benches);
