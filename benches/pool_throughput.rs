use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use stratalloc::Pool;

const OPS: u64 = 100_000;

/// Pool alloc/free throughput.
fn pool_alloc_free(pool: &Pool, size: usize) {
  for _ in 0..OPS {
    let ptr = pool.allocate(size).unwrap();
    black_box(ptr);
    unsafe { pool.deallocate(ptr, size) };
  }
}

/// libc alloc/free throughput.
fn libc_malloc_free(size: usize) {
  for _ in 0..OPS {
    unsafe {
      let ptr = libc::malloc(size);
      black_box(ptr);
      libc::free(ptr);
    }
  }
}

fn benchmark_alloc_throughput(c: &mut Criterion) {
  let mut group = c.benchmark_group("alloc_throughput");
  let pool = Pool::new();

  for size in [8, 32, 128, 512, 4096] {
    group.throughput(Throughput::Elements(OPS));

    group.bench_with_input(BenchmarkId::new("pool", size), &size, |b, &size| {
      b.iter(|| pool_alloc_free(&pool, size))
    });

    group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
      b.iter(|| libc_malloc_free(size))
    });
  }

  group.finish();
}

fn benchmark_boxed_roundtrip(c: &mut Criterion) {
  let mut group = c.benchmark_group("boxed_roundtrip");
  let pool = Pool::new();

  group.throughput(Throughput::Elements(OPS));
  group.bench_function("pool_boxed", |b| {
    b.iter(|| {
      for i in 0..OPS {
        let value = pool.boxed(i).unwrap();
        black_box(*value);
      }
    })
  });
  group.bench_function("heap_boxed", |b| {
    b.iter(|| {
      for i in 0..OPS {
        let value = Box::new(i);
        black_box(*value);
      }
    })
  });

  group.finish();
}

criterion_group!(benches, benchmark_alloc_throughput, benchmark_boxed_roundtrip);
criterion_main!(benches);
