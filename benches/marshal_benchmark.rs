//! Boundary-crossing benchmarks: stack marshaling, handle creation and
//! wrapped host function calls.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;
use tether::Vm;

fn open_vm() -> Vm {
    let mut vm = Vm::new();
    vm.open(true, 20).unwrap();
    vm
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");
    group.measurement_time(Duration::from_secs(3));
    let vm = open_vm();

    group.bench_function("integer", |b| {
        b.iter(|| vm.create_ref(black_box(&42i64)).as_::<i64>())
    });
    group.bench_function("float", |b| {
        b.iter(|| vm.create_ref(black_box(&1.5f64)).as_::<f64>())
    });

    for len in [8, 256, 4096] {
        let text = "x".repeat(len);
        group.bench_with_input(BenchmarkId::new("string", len), &text, |b, s| {
            b.iter(|| vm.create_ref(black_box(s.as_str())).as_::<String>())
        });
    }

    group.finish();
}

fn bench_handles(c: &mut Criterion) {
    let mut group = c.benchmark_group("handles");
    group.measurement_time(Duration::from_secs(3));
    let vm = open_vm();
    let table = vm.create_table(0, 1, None);
    table.set("field", &7);

    group.bench_function("create_table", |b| b.iter(|| vm.create_table(0, 0, None)));
    group.bench_function("clone", |b| b.iter(|| table.clone()));
    group.bench_function("get_field", |b| {
        b.iter(|| table.get_as::<i64, _>(black_box("field")))
    });
    group.bench_function("get_raw_field", |b| {
        b.iter(|| table.get_raw_as::<i64, _>(black_box("field")))
    });
    group.bench_function("set_field", |b| b.iter(|| table.set("field", black_box(&8))));

    let array = vm
        .execute_string("local t = {} for i = 1, 1000 do t[i] = i end return t", None)
        .unwrap()
        .remove(0);
    group.bench_function("iterate_1000", |b| {
        b.iter(|| array.iter().filter_map(|(_, v)| v.as_::<i64>()).sum::<i64>())
    });

    group.finish();
}

fn bench_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("calls");
    group.measurement_time(Duration::from_secs(3));
    let vm = open_vm();

    let host = vm.create_function(|a: i64, b: i64| a + b);
    group.bench_function("host_from_host", |b| {
        b.iter(|| host.call(black_box((1, 2))).unwrap())
    });

    let script = vm
        .execute_string("return function(a, b) return a + b end", None)
        .unwrap()
        .remove(0);
    group.bench_function("script_from_host", |b| {
        b.iter(|| script.call(black_box((1, 2))).unwrap())
    });

    vm.register_function("add", |a: i64, b: i64| a + b);
    let loop_chunk = vm
        .load_string("local s = 0 for i = 1, 1000 do s = add(s, i) end return s")
        .unwrap();
    group.bench_function("host_from_script_1000", |b| {
        b.iter(|| loop_chunk.call(()).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_round_trip, bench_handles, bench_calls);
criterion_main!(benches);
