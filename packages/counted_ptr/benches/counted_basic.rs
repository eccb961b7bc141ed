//! Basic benchmarks for the `counted_ptr` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use counted_ptr::{
    DefaultDelete, IntrusivePtr, RefCounted, SharedPtr, SimpleCounter, UniquePtr,
};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;

#[derive(Default)]
struct IntrusiveItem {
    refs: SimpleCounter,
    value: TestItem,
}

// SAFETY: `counter()` always returns the embedded field.
unsafe impl RefCounted for IntrusiveItem {
    type Counter = SimpleCounter;
    type Deleter = DefaultDelete;

    fn counter(&self) -> &SimpleCounter {
        &self.refs
    }
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("counted_basic");

    group.bench_function("shared_new_embedded", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(SharedPtr::new(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("shared_from_box_separate", |b| {
        b.iter_custom(|iters| {
            let boxes = iter::repeat_with(|| Box::new(TEST_VALUE))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for boxed in boxes {
                drop(black_box(SharedPtr::from_box(boxed)));
            }

            start.elapsed()
        });
    });

    group.bench_function("shared_clone_drop", |b| {
        b.iter_custom(|iters| {
            let shared = SharedPtr::new(TEST_VALUE);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(shared.clone()));
            }

            start.elapsed()
        });
    });

    group.bench_function("weak_lock", |b| {
        b.iter_custom(|iters| {
            let shared = SharedPtr::new(TEST_VALUE);
            let weak = shared.downgrade();

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(weak.lock()));
            }

            start.elapsed()
        });
    });

    group.bench_function("intrusive_clone_drop", |b| {
        b.iter_custom(|iters| {
            let intrusive = IntrusivePtr::make(IntrusiveItem {
                value: TEST_VALUE,
                ..IntrusiveItem::default()
            });
            assert_eq!(intrusive.value, TEST_VALUE);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(intrusive.clone()));
            }

            start.elapsed()
        });
    });

    group.bench_function("unique_new", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(UniquePtr::new(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    group.finish();
}
