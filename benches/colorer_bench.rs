//! Benchmarks the DSATUR colorer on representative graph sizes, mirroring
//! the reference crate's `criterion_group!`/`criterion_main!` bench layout.

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use classgraph_scheduler::{
    Calendar, CancelToken, ClassItem, ConflictGraph, DsaturColorer, ScheduleConstraints, Slot,
    WeekScope,
};

fn synthetic_classes(n: usize, conflicts_per_class: usize) -> Vec<ClassItem> {
    (0..n)
        .map(|i| {
            let forbidden: Vec<Slot> = (0..conflicts_per_class)
                .map(|k| {
                    let idx = i * conflicts_per_class + k;
                    Slot::new(1 + (idx % 5) as u8, 1 + (idx % 8) as u8)
                })
                .collect();
            ClassItem::new(format!("class-{i}"), format!("Class {i}")).with_forbidden(forbidden)
        })
        .collect()
}

fn bench_dsatur(c: &mut Criterion) {
    let calendar = Calendar::new(NaiveDate::from_ymd_opt(2024, 9, 3).unwrap(), &[]);
    let constraints = ScheduleConstraints { max_periods_per_week: 40, ..ScheduleConstraints::default() };

    let mut group = c.benchmark_group("dsatur_color");
    for size in [8usize, 28] {
        let classes = synthetic_classes(size, 3);
        let graph = ConflictGraph::build(&classes).expect("synthetic graph is feasible");
        group.bench_with_input(BenchmarkId::from_parameter(size), &graph, |b, graph| {
            b.iter(|| {
                let scope = WeekScope::new(&calendar, 1);
                let colorer = DsaturColorer::new(graph, &constraints, scope);
                black_box(colorer.color(&CancelToken::new()).expect("feasible"))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dsatur);
criterion_main!(benches);
