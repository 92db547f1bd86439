//! Cycle throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rtl_interpreter::designs::gcd::{mk_req, GcdModel, GcdUnit};
use rtl_interpreter::designs::regincr::RegIncrNstage;
use rtl_interpreter::designs::sort::{SortModel, SortUnit};
use rtl_interpreter::Design;

const CYCLES: u64 = 1000;

fn benchmark_regincr_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("regincr_pipeline");
    group.throughput(Throughput::Elements(CYCLES));

    for nstages in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(nstages), &nstages, |b, &n| {
            let (mut sim, unit) = RegIncrNstage::elaborate(n).unwrap();
            sim.reset().unwrap();
            b.iter(|| {
                for i in 0..CYCLES {
                    sim.poke(unit.in_, i & 0xff).unwrap();
                    sim.tick().unwrap();
                }
                black_box(sim.peek(unit.out))
            });
        });
    }

    group.finish();
}

fn benchmark_sort_models(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_models");
    group.throughput(Throughput::Elements(CYCLES));

    let models = [
        ("fl", SortModel::Fl),
        ("cl", SortModel::Cl(3)),
        ("flat_rtl", SortModel::FlatRtl),
        ("struct_rtl", SortModel::StructRtl),
    ];
    for (name, model) in models {
        group.bench_function(name, |b| {
            let (mut sim, unit) = SortUnit::elaborate(model, 8).unwrap();
            sim.reset().unwrap();
            sim.poke(unit.in_val, 1).unwrap();
            b.iter(|| {
                for i in 0..CYCLES {
                    for (k, &port) in unit.in_.iter().enumerate() {
                        sim.poke(port, (i * 7 + k as u64 * 13) & 0xff).unwrap();
                    }
                    sim.tick().unwrap();
                }
                black_box(sim.peek(unit.out[0]))
            });
        });
    }

    group.finish();
}

fn benchmark_gcd_rtl(c: &mut Criterion) {
    c.bench_function("gcd_rtl", |b| {
        let mut d = Design::new("top");
        let top = d.top();
        let unit = GcdUnit::new(&mut d, top, "gcd", GcdModel::Rtl).unwrap();
        let mut sim = d.elaborate(Default::default()).unwrap();
        sim.reset().unwrap();
        sim.poke(unit.send.rdy, 1).unwrap();
        sim.poke(unit.recv.msg, mk_req(0xffff, 0x00ff)).unwrap();
        sim.poke(unit.recv.val, 1).unwrap();
        b.iter(|| {
            sim.run(CYCLES).unwrap();
            black_box(sim.peek(unit.send.msg))
        });
    });
}

criterion_group!(
    benches,
    benchmark_regincr_pipeline,
    benchmark_sort_models,
    benchmark_gcd_rtl
);
criterion_main!(benches);
