//! Evaluator: computes a `QualityScore` from a feasible `Coloring`
//! (spec.md §4.5).

use std::collections::HashMap;

use crate::graph::ConflictGraph;
use crate::model::{Coloring, QualityScore, Slot};

/// Tunables for the quality sub-metrics (spec.md §6, `EvaluatorConfig`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluatorConfig {
    pub max_gap_size: u8,
    pub min_daily_classes: u32,
    pub max_daily_classes: u32,
    pub target_classes_per_day: u32,
    pub weights: EvaluatorWeights,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_gap_size: 2,
            min_daily_classes: 4,
            max_daily_classes: 8,
            target_classes_per_day: 6,
            weights: EvaluatorWeights::default(),
        }
    }
}

/// Weighted combination weights (spec.md §6, `OptimizerConfig.weights`).
/// `constraint_satisfaction` is carried for API parity with the optimizer's
/// fitness weighting even though the evaluator itself only scores feasible
/// colorings (constraint satisfaction is binary there: 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluatorWeights {
    pub day_distribution: f64,
    pub time_gaps: f64,
    pub period_utilization: f64,
    pub week_distribution: f64,
    pub constraint_satisfaction: f64,
}

impl Default for EvaluatorWeights {
    fn default() -> Self {
        Self {
            day_distribution: 0.3,
            time_gaps: 0.3,
            period_utilization: 0.2,
            week_distribution: 0.1,
            constraint_satisfaction: 0.1,
        }
    }
}

const OPTIMAL_BLOCK_RATIO: f64 = 0.7;

/// Computes a quality score for a feasible coloring. Feasibility is assumed
/// — this does not re-validate hard constraints.
pub struct Evaluator<'a> {
    config: &'a EvaluatorConfig,
}

impl<'a> Evaluator<'a> {
    pub fn new(config: &'a EvaluatorConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, graph: &ConflictGraph, coloring: &Coloring) -> QualityScore {
        if graph.is_empty() {
            return QualityScore::zero();
        }

        let by_day = group_by_day(graph, coloring);
        let day_distribution = self.day_distribution(&by_day);
        let time_gaps = self.time_gaps(&by_day);
        let period_utilization = self.period_utilization(&by_day, coloring);

        let w = &self.config.weights;
        let parts = [
            (w.day_distribution, day_distribution),
            (w.time_gaps, time_gaps),
            (w.period_utilization, period_utilization),
            (w.constraint_satisfaction, 1.0),
        ];
        let weight_sum: f64 = parts.iter().map(|(weight, _)| weight).sum();
        let total = if weight_sum > 0.0 {
            parts.iter().map(|(weight, value)| weight * value).sum::<f64>() / weight_sum
        } else {
            0.0
        };

        QualityScore {
            total,
            day_distribution,
            time_gaps,
            period_utilization,
            week_distribution: None,
            week_count: None,
        }
    }

    /// `1 - (sigma/mu)` of classes-per-weekday, clamped to `[0, 1]`.
    fn day_distribution(&self, by_day: &HashMap<u8, Vec<Slot>>) -> f64 {
        let counts: Vec<f64> = (1..=5u8).map(|d| by_day.get(&d).map_or(0, Vec::len) as f64).collect();
        let mu = counts.iter().sum::<f64>() / counts.len() as f64;
        if mu == 0.0 {
            return 0.0;
        }
        let variance = counts.iter().map(|c| (c - mu).powi(2)).sum::<f64>() / counts.len() as f64;
        let sigma = variance.sqrt();
        (1.0 - sigma / mu).clamp(0.0, 1.0)
    }

    /// `1 - meanPenalty(gaps)`, `penalty(g) = max(0, (g - maxGapSize)/g)`.
    fn time_gaps(&self, by_day: &HashMap<u8, Vec<Slot>>) -> f64 {
        let mut penalties = Vec::new();
        for slots in by_day.values() {
            let mut periods: Vec<u8> = slots.iter().map(|s| s.period).collect();
            periods.sort_unstable();
            for w in periods.windows(2) {
                let gap = (w[1] - w[0]).saturating_sub(1);
                if gap == 0 {
                    penalties.push(0.0);
                    continue;
                }
                let penalty = ((gap as f64 - self.config.max_gap_size as f64) / gap as f64).max(0.0);
                penalties.push(penalty);
            }
        }
        if penalties.is_empty() {
            return 1.0;
        }
        let mean = penalties.iter().sum::<f64>() / penalties.len() as f64;
        (1.0 - mean).clamp(0.0, 1.0)
    }

    /// `1 - |ratioInBlocks - 0.7|`, where `ratioInBlocks` is the fraction of
    /// classes participating in a run of >= 2 adjacent periods on the same
    /// day.
    fn period_utilization(&self, by_day: &HashMap<u8, Vec<Slot>>, coloring: &Coloring) -> f64 {
        let total = coloring.assignments.len();
        if total == 0 {
            return 0.0;
        }
        let mut in_block = 0usize;
        for slots in by_day.values() {
            let mut periods: Vec<u8> = slots.iter().map(|s| s.period).collect();
            periods.sort_unstable();
            let mut i = 0;
            while i < periods.len() {
                let mut j = i;
                while j + 1 < periods.len() && periods[j + 1] == periods[j] + 1 {
                    j += 1;
                }
                let run_len = j - i + 1;
                if run_len >= 2 {
                    in_block += run_len;
                }
                i = j + 1;
            }
        }
        let ratio = in_block as f64 / total as f64;
        (1.0 - (ratio - OPTIMAL_BLOCK_RATIO).abs()).clamp(0.0, 1.0)
    }
}

fn group_by_day(graph: &ConflictGraph, coloring: &Coloring) -> HashMap<u8, Vec<Slot>> {
    let mut by_day: HashMap<u8, Vec<Slot>> = HashMap::new();
    for id in graph.order() {
        if let Some(slot) = coloring.assignments.get(id) {
            by_day.entry(slot.weekday).or_default().push(*slot);
        }
    }
    by_day
}

/// Multi-week balance sub-metrics, computed separately from the weekly
/// template score because they require the expanded per-week schedule
/// entries rather than the single `Coloring` template (SPEC_FULL.md §3.1).
pub fn week_distribution(classes_per_week: &[u32]) -> f64 {
    if classes_per_week.is_empty() {
        return 1.0;
    }
    let total: u32 = classes_per_week.iter().sum();
    let ideal_per_week = total as f64 / classes_per_week.len() as f64;
    if ideal_per_week == 0.0 {
        return 1.0;
    }
    let variance = classes_per_week
        .iter()
        .map(|c| (*c as f64 - ideal_per_week).powi(2))
        .sum::<f64>()
        / classes_per_week.len() as f64;
    (1.0 - variance / ideal_per_week.powi(2)).clamp(0.0, 1.0)
}

pub fn week_count(weeks_used: u32, target_weeks: u32) -> f64 {
    if target_weeks == 0 {
        return 1.0;
    }
    (1.0 - (weeks_used as f64 - target_weeks as f64).abs() / target_weeks as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassItem;

    #[test]
    fn empty_coloring_scores_zero() {
        let graph = ConflictGraph::build(&[]).unwrap();
        let coloring = Coloring::new();
        let config = EvaluatorConfig::default();
        let score = Evaluator::new(&config).evaluate(&graph, &coloring);
        assert_eq!(score.total, 0.0);
    }

    #[test]
    fn perfectly_even_distribution_scores_well() {
        let classes: Vec<ClassItem> =
            (0..5).map(|i| ClassItem::new(format!("C{i}"), format!("C{i}"))).collect();
        let graph = ConflictGraph::build(&classes).unwrap();
        let mut coloring = Coloring::new();
        for (i, c) in classes.iter().enumerate() {
            coloring.assignments.insert(c.id.clone(), Slot::new(i as u8 + 1, 1));
        }
        let config = EvaluatorConfig::default();
        let score = Evaluator::new(&config).evaluate(&graph, &coloring);
        assert!(score.day_distribution > 0.99);
    }

    #[test]
    fn week_distribution_even_is_perfect() {
        assert!((week_distribution(&[6, 6, 6]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn week_count_matches_target() {
        assert_eq!(week_count(4, 4), 1.0);
        assert!(week_count(2, 4) < 1.0);
    }
}
