//! Micro-benchmarks over allocator churn and tree insert/erase: no captured-
//! process traces to replay, since nothing upstream of this workspace's two
//! core crates produces one, just direct workload generators against each
//! crate's public API, run through `criterion`.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ordered_containers::OrderedMap;
use region_alloc::{HeapAllocator, RegionAllocator};

fn bench_region_alloc_free_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_alloc_free_churn");
    for &block_size in &[16usize, 64, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(block_size),
            &block_size,
            |b, &block_size| {
                let mut buf = vec![0u8; 1 << 20].into_boxed_slice();
                let region = RegionAllocator::new();
                unsafe { region.init(buf.as_mut_ptr(), buf.len()) };

                b.iter(|| {
                    let mut live = Vec::with_capacity(256);
                    for _ in 0..256 {
                        live.push(region.malloc(block_size).expect("pool large enough"));
                    }
                    for p in live {
                        region.free(Some(p));
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_region_realloc_growth(c: &mut Criterion) {
    c.bench_function("region_realloc_growth", |b| {
        let mut buf = vec![0u8; 1 << 20].into_boxed_slice();
        let region = RegionAllocator::new();
        unsafe { region.init(buf.as_mut_ptr(), buf.len()) };

        b.iter(|| {
            let mut p = region.malloc(8).expect("initial allocation");
            for size in [16, 32, 64, 128, 256] {
                p = region.realloc(Some(p), size).expect("grow within the pool");
            }
            region.free(Some(p));
        });
    });
}

fn bench_ordered_map_insert_erase_churn(c: &mut Criterion) {
    c.bench_function("ordered_map_insert_erase_churn", |b| {
        let heap = HeapAllocator;
        b.iter(|| {
            let map: OrderedMap<i32, i32> = OrderedMap::new(&heap);
            for n in 0..1_000 {
                map.insert(n, n * 2);
            }
            for n in 0..1_000 {
                map.erase(&n);
            }
        });
    });
}

criterion_group!(
    benches,
    bench_region_alloc_free_churn,
    bench_region_realloc_growth,
    bench_ordered_map_insert_erase_churn,
);
criterion_main!(benches);
