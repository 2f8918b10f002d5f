//! Property tests for the universally-quantified invariants in spec.md §8
//! ("for all valid inputs...").

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use proptest::prelude::*;

use classgraph_scheduler::{
    CancelToken, ClassItem, ScheduleCache, ScheduleConstraints, Slot, SolverConfig, SolverMode,
};

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

/// Generates a feasible-by-construction class list: each class gets at most
/// 3 forbidden slots drawn from a small pool, keeping enough slots free that
/// `ConflictGraph::build` never rejects the input for having an
/// all-forbidden vertex.
fn classes_strategy() -> impl Strategy<Value = Vec<ClassItem>> {
    (2usize..10).prop_flat_map(|n| {
        proptest::collection::vec(
            proptest::collection::vec((1u8..=5, 1u8..=8), 0..3),
            n,
        )
        .prop_map(|per_class_slots| {
            per_class_slots
                .into_iter()
                .enumerate()
                .map(|(i, slots)| {
                    let forbidden: Vec<Slot> =
                        slots.into_iter().map(|(w, p)| Slot::new(w, p)).collect();
                    ClassItem::new(format!("C{i}"), format!("C{i}")).with_forbidden(forbidden)
                })
                .collect()
        })
    })
}

fn constraints_strategy() -> impl Strategy<Value = ScheduleConstraints> {
    (1u8..=8).prop_flat_map(|max_daily| {
        (1u8..=max_daily, max_daily..=(5 * max_daily)).prop_map(
            move |(max_consecutive, max_weekly)| ScheduleConstraints {
                max_periods_per_day: max_daily,
                max_periods_per_week: max_weekly,
                max_consecutive_periods: max_consecutive,
                avoid_consecutive: false,
                blackouts: Vec::new(),
            },
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    /// Invariants 1-5: weekday range, no blackout hits, no self-conflict,
    /// no adjacency conflict, daily/weekly caps, consecutive-run cap.
    #[test]
    fn hard_constraints_hold_for_any_feasible_run(
        classes in classes_strategy(),
        constraints in constraints_strategy(),
    ) {
        let mut config = SolverConfig::new(start_date());
        config.solver_mode = SolverMode::Graph;
        let Ok(mut run) = classgraph_scheduler::Run::new(&classes, constraints.clone(), config) else {
            return Ok(());
        };
        let cache = ScheduleCache::default();
        let Ok(output) = run.execute(&cache, &CancelToken::new()) else {
            return Ok(());
        };

        // Invariant 1: weekday range + no blackout hits (no blackouts here,
        // so this reduces to "always a weekday").
        for entry in &output.entries {
            let weekday = entry.assigned_date.weekday();
            prop_assert!(weekday != chrono::Weekday::Sat && weekday != chrono::Weekday::Sun);
        }

        // Invariant 3: no class in its own forbidden slot.
        for entry in &output.entries {
            let class = classes.iter().find(|c| c.id == entry.class_id).unwrap();
            let weekday_idx = iso_weekday(entry.assigned_date);
            prop_assert!(!class.forbidden.contains(&Slot::new(weekday_idx, entry.period)));
        }

        // Invariant 2: adjacent classes (shared forbidden slot) never share
        // an assigned slot.
        for a in &classes {
            for b in &classes {
                if a.id >= b.id {
                    continue;
                }
                if a.forbidden.is_disjoint(&b.forbidden) {
                    continue;
                }
                let ea = output.entries.iter().find(|e| e.class_id == a.id);
                let eb = output.entries.iter().find(|e| e.class_id == b.id);
                if let (Some(ea), Some(eb)) = (ea, eb) {
                    prop_assert!(!(ea.assigned_date == eb.assigned_date && ea.period == eb.period));
                }
            }
        }

        // Invariant 4: per-day and per-week caps.
        let mut per_day: HashMap<NaiveDate, u32> = HashMap::new();
        for entry in &output.entries {
            *per_day.entry(entry.assigned_date).or_insert(0) += 1;
        }
        for count in per_day.values() {
            prop_assert!(*count <= constraints.max_periods_per_day as u32);
        }
        prop_assert!(output.entries.len() as u32 <= constraints.max_periods_per_week as u32);

        // Invariant 5: longest consecutive run per day <= max_consecutive.
        let mut periods_by_day: HashMap<NaiveDate, Vec<u8>> = HashMap::new();
        for entry in &output.entries {
            periods_by_day.entry(entry.assigned_date).or_default().push(entry.period);
        }
        for periods in periods_by_day.values_mut() {
            periods.sort_unstable();
            let mut best = 1u8;
            let mut current = 1u8;
            for w in periods.windows(2) {
                if w[1] == w[0] + 1 {
                    current += 1;
                    best = best.max(current);
                } else if w[1] != w[0] {
                    current = 1;
                }
            }
            if !periods.is_empty() {
                prop_assert!(best <= constraints.max_consecutive_periods);
            }
        }
    }

    /// Invariant 6: idempotence. Identical inputs and a fixed RNG seed
    /// produce bitwise-identical outputs (entries and quality score).
    #[test]
    fn idempotent_given_fixed_seed(
        classes in classes_strategy(),
        constraints in constraints_strategy(),
    ) {
        let mut config = SolverConfig::new(start_date());
        config.solver_mode = SolverMode::GraphOptimize;
        config.optimizer.generation_limit = 5;
        config.optimizer.population_size = 8;
        config.optimizer.max_seconds = 2;

        let cache1 = ScheduleCache::default();
        let cache2 = ScheduleCache::default();

        let Ok(mut run1) = classgraph_scheduler::Run::new(&classes, constraints.clone(), config.clone()) else {
            return Ok(());
        };
        let Ok(mut run2) = classgraph_scheduler::Run::new(&classes, constraints.clone(), config) else {
            return Ok(());
        };

        let Ok(out1) = run1.execute(&cache1, &CancelToken::new()) else { return Ok(()) };
        let Ok(out2) = run2.execute(&cache2, &CancelToken::new()) else { return Ok(()) };

        let mut e1: Vec<_> = out1.entries.clone();
        let mut e2: Vec<_> = out2.entries.clone();
        e1.sort_by(|a, b| a.class_id.cmp(&b.class_id));
        e2.sort_by(|a, b| a.class_id.cmp(&b.class_id));
        prop_assert_eq!(e1, e2);
        prop_assert_eq!(out1.quality.total, out2.quality.total);
    }
}

fn iso_weekday(date: NaiveDate) -> u8 {
    match date.weekday() {
        chrono::Weekday::Mon => 1,
        chrono::Weekday::Tue => 2,
        chrono::Weekday::Wed => 3,
        chrono::Weekday::Thu => 4,
        chrono::Weekday::Fri => 5,
        _ => unreachable!("weekend dates never appear in scheduled output"),
    }
}
