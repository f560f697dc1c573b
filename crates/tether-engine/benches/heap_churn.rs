use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tether_engine::{Isolate, IsolateOptions, Value};

fn bench_alloc_and_collect(c: &mut Criterion) {
    let isolate = Isolate::new(IsolateOptions::with_gc_threshold(0));
    let ctx = {
        let mut guard = isolate.enter().unwrap();
        guard.create_context()
    };

    c.bench_function("alloc_collect_256", |b| {
        b.iter(|| {
            let mut guard = isolate.enter().unwrap();
            guard.enter_context(ctx).unwrap();
            guard.scoped(|g| {
                for _ in 0..256 {
                    black_box(g.alloc_object().unwrap());
                }
            });
            guard.collect_garbage()
        });
    });
}

fn bench_property_writes(c: &mut Criterion) {
    let isolate = Isolate::new(IsolateOptions::with_gc_threshold(0));
    let (ctx, id) = {
        let mut guard = isolate.enter().unwrap();
        let ctx = guard.create_context();
        guard.enter_context(ctx).unwrap();
        let id = guard.alloc_object().unwrap();
        let global = guard.new_global(id).unwrap();
        std::mem::forget(global);
        (ctx, id)
    };

    c.bench_function("property_write_read", |b| {
        b.iter(|| {
            let mut guard = isolate.enter().unwrap();
            guard.enter_context(ctx).unwrap();
            guard
                .set_property(id, "n", Value::from(black_box(42i64)))
                .unwrap();
            black_box(guard.get_property(id, "n").unwrap())
        });
    });
}

fn bench_enter_exit(c: &mut Criterion) {
    let isolate = Isolate::new(IsolateOptions::default());

    c.bench_function("isolate_enter_exit", |b| {
        b.iter(|| {
            let guard = isolate.enter().unwrap();
            black_box(guard.isolate_id())
        });
    });
}

criterion_group!(
    benches,
    bench_alloc_and_collect,
    bench_property_writes,
    bench_enter_exit
);

criterion_main!(benches);
