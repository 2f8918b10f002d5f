//! Run: the top-level entry point tying Calendar, Conflict Graph Builder,
//! DSATUR Colorer, Backtracking Scheduler, Genetic Optimizer, Evaluator, and
//! Parallel Dispatcher into the control flow in spec.md §2 ("Calendar ->
//! Graph Builder -> Colorer -> (optional) Genetic Optimizer -> Evaluator ->
//! emit schedule") and the state machine in spec.md §4.9.
//!
//! A `Run` owns its `Calendar`, `ConflictGraph`, and `Coloring` exclusively
//! (spec.md §3, "Ownership/lifecycle"); the `ScheduleCache` is process-wide
//! and passed in by the caller rather than owned here.

#![allow(clippy::unwrap_used)] // literal 1 is trivially non-zero

use std::collections::HashMap;
use std::num::NonZeroU32;

use chrono::NaiveDate;
use tracing::{instrument, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::backtrack::{BacktrackConfig, BacktrackingScheduler};
use crate::cache::ScheduleCache;
use crate::calendar::Calendar;
use crate::colorer::{CancelToken, DsaturColorer, WeekScope};
use crate::dispatcher;
use crate::error::SchedulerResult;
use crate::evaluator::{self, Evaluator, EvaluatorConfig};
use crate::graph::ConflictGraph;
use crate::model::{
    validate_classes, ClassItem, Coloring, QualityScore, ScheduleConstraints, ScheduleEntry,
};
use crate::optimizer::{GeneticOptimizer, OptimizationMetrics, OptimizerConfig};

/// Which solver path produces the feasible coloring a `Run` hands to the
/// Evaluator (spec.md §9, Open Question #1: "specify a single `solverMode`
/// option with `graph+optimize` as default").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SolverMode {
    /// Deterministic DFS fallback only (spec.md §4.4).
    Backtracking,
    /// DSATUR only, no genetic refinement.
    Graph,
    /// DSATUR seeds a genetic optimizer that refines the coloring. Default.
    GraphOptimize,
}

impl Default for SolverMode {
    fn default() -> Self {
        SolverMode::GraphOptimize
    }
}

/// The `Run` state machine (spec.md §4.9): `Initialized -> GraphBuilt ->
/// ColoringSought -> {Feasible, Infeasible} -> Optimizing? -> Completed`,
/// with `Aborted` reachable from any state on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunState {
    Initialized,
    GraphBuilt,
    ColoringSought,
    Feasible,
    Infeasible,
    Optimizing,
    Completed,
    Aborted,
}

/// Configuration for a single `Run`, gathering the optional knobs from
/// spec.md §6 (`OptimizerConfig`, `EvaluatorConfig`) alongside the solver
/// selection and multi-week scope (SPEC_FULL.md §3.1).
#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub solver_mode: SolverMode,
    /// Weeks the coloring must remain valid across; a `Coloring` stays a
    /// weekly template regardless (SPEC_FULL.md §3.1).
    pub weeks: NonZeroU32,
    pub start_date: NaiveDate,
    pub backtrack: BacktrackConfig,
    pub optimizer: OptimizerConfig,
    pub evaluator: EvaluatorConfig,
    /// Use the Parallel Dispatcher (rayon fan-out over connected
    /// components/chunks) for the initial DSATUR pass instead of coloring
    /// the whole graph on one worker (spec.md §4.8).
    pub parallel_coloring: bool,
}

impl SolverConfig {
    pub fn new(start_date: NaiveDate) -> Self {
        Self {
            solver_mode: SolverMode::default(),
            weeks: NonZeroU32::new(1).unwrap(),
            start_date,
            backtrack: BacktrackConfig::default(),
            optimizer: OptimizerConfig::default(),
            evaluator: EvaluatorConfig::default(),
            parallel_coloring: false,
        }
    }
}

/// Everything a caller gets back from a completed `Run` (spec.md §6,
/// "Output contract").
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub entries: Vec<ScheduleEntry>,
    pub quality: QualityScore,
    pub optimization: Option<OptimizationMetrics>,
    pub final_state: RunState,
}

/// Owns one scheduling attempt's `Calendar`, `ConflictGraph`, and
/// (post-`execute`) `Coloring`. Not `Clone`: a `Run` is meant to be driven
/// once through `execute` and discarded.
pub struct Run {
    calendar: Calendar,
    graph: ConflictGraph,
    constraints: ScheduleConstraints,
    config: SolverConfig,
    state: RunState,
    coloring: Option<Coloring>,
}

impl Run {
    /// Validates `classes` and `constraints`, builds the `Calendar` and
    /// `ConflictGraph`, and transitions straight to `GraphBuilt` (spec.md
    /// §6: validation failures return `InvalidInput` before any coloring is
    /// attempted).
    #[instrument(skip(classes, constraints, config), fields(classes = classes.len()))]
    pub fn new(
        classes: &[ClassItem],
        constraints: ScheduleConstraints,
        config: SolverConfig,
    ) -> SchedulerResult<Self> {
        validate_classes(classes)?;
        constraints.validate()?;
        let sanitized = ScheduleConstraints { blackouts: constraints.sanitized_blackouts(), ..constraints };
        let calendar = Calendar::new(config.start_date, &sanitized.blackouts);
        let graph = ConflictGraph::build(classes)?;
        Ok(Self { calendar, graph, constraints: sanitized, config, state: RunState::GraphBuilt, coloring: None })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drives the Run from `GraphBuilt` to `Completed` (or `Infeasible` /
    /// `Aborted`), following spec.md §2's control flow: Calendar -> Graph
    /// Builder (done in `new`) -> Colorer -> optional Optimizer -> Evaluator
    /// -> emit schedule.
    #[instrument(skip(self, cache, cancel), fields(mode = ?self.config.solver_mode))]
    pub fn execute(
        &mut self,
        cache: &ScheduleCache,
        cancel: &CancelToken,
    ) -> SchedulerResult<RunOutput> {
        if self.graph.is_empty() {
            self.state = RunState::Completed;
            return Ok(RunOutput {
                entries: Vec::new(),
                quality: QualityScore::zero(),
                optimization: None,
                final_state: self.state,
            });
        }

        self.state = RunState::ColoringSought;
        let fingerprint = self.graph.fingerprint();
        let (seed, weeks_used) = match cache.get(fingerprint) {
            Some(cached) => (cached, self.config.weeks.get()),
            None => match self.seek_coloring(cancel) {
                Ok((coloring, weeks_used)) => {
                    cache.put(fingerprint, coloring.clone());
                    (coloring, weeks_used)
                }
                Err(err) => {
                    self.state = RunState::Infeasible;
                    return Err(err);
                }
            },
        };
        self.state = RunState::Feasible;

        let (coloring, optimization) = match self.config.solver_mode {
            SolverMode::GraphOptimize => {
                self.state = RunState::Optimizing;
                let optimizer = GeneticOptimizer::new(
                    &self.graph,
                    &self.constraints,
                    &self.calendar,
                    self.config.weeks.get(),
                    &self.config.evaluator,
                    self.config.optimizer,
                );
                let (best, metrics) = optimizer.optimize(seed, cancel, rng_seed_from_fingerprint(fingerprint))?;
                (best, Some(metrics))
            }
            SolverMode::Backtracking | SolverMode::Graph => (seed, None),
        };

        self.coloring = Some(coloring.clone());
        let entries = self.schedule_entries(&coloring);
        let quality = self.evaluate(&coloring, &entries, weeks_used);
        self.state = RunState::Completed;

        Ok(RunOutput { entries, quality, optimization, final_state: self.state })
    }

    /// Seeks a feasible `Coloring`, alongside the number of weeks actually
    /// consumed to find it. The Backtracking Scheduler may need to advance
    /// past week 0 (SPEC_FULL.md §3.1); the Graph/GraphOptimize paths hand
    /// back one weekly template that is meant to recur across every
    /// requested week, so they report the full target as weeks used.
    fn seek_coloring(&self, cancel: &CancelToken) -> SchedulerResult<(Coloring, u32)> {
        match self.config.solver_mode {
            SolverMode::Backtracking => BacktrackingScheduler::new(
                &self.graph,
                &self.constraints,
                &self.calendar,
                self.config.backtrack,
            )
            .schedule(cancel),
            SolverMode::Graph | SolverMode::GraphOptimize => {
                if self.config.parallel_coloring && self.graph.len() > 1 {
                    match dispatcher::parallel_color(
                        &self.graph,
                        &self.constraints,
                        &self.calendar,
                        self.config.weeks.get(),
                        cancel,
                    ) {
                        Ok(c) => return Ok((c, self.config.weeks.get())),
                        Err(e) => warn!(error = %e, "parallel coloring failed, falling back to single-threaded DSATUR"),
                    }
                }
                let scope = WeekScope::new(&self.calendar, self.config.weeks.get());
                let coloring = DsaturColorer::new(&self.graph, &self.constraints, scope).color(cancel)?;
                Ok((coloring, self.config.weeks.get()))
            }
        }
    }

    /// Expands the weekly-template `Coloring` into one `ScheduleEntry` per
    /// (class, scheduled week) pair, resolving each week's concrete date
    /// through the Calendar (SPEC_FULL.md §3.1).
    fn schedule_entries(&self, coloring: &Coloring) -> Vec<ScheduleEntry> {
        let mut entries = Vec::with_capacity(coloring.assignments.len() * self.config.weeks.get() as usize);
        for week in 0..self.config.weeks.get() {
            for (class_id, slot) in &coloring.assignments {
                let date = self.calendar.date_for(week, slot.weekday);
                entries.push(ScheduleEntry { class_id: class_id.clone(), assigned_date: date, period: slot.period });
            }
        }
        entries
    }

    /// Computes the `QualityScore`, folding in multi-week sub-metrics when
    /// `weeks > 1` (spec.md §4.5; SPEC_FULL.md §3.1). `entries` must be the
    /// expansion of `coloring` produced by `schedule_entries`, and
    /// `weeks_used` the real count of weeks the solver consumed, so the
    /// multi-week sub-metrics reflect the actual schedule rather than the
    /// weekly template alone.
    fn evaluate(&self, coloring: &Coloring, entries: &[ScheduleEntry], weeks_used: u32) -> QualityScore {
        let evaluator = Evaluator::new(&self.config.evaluator);
        let mut score = evaluator.evaluate(&self.graph, coloring);

        if self.config.weeks.get() > 1 {
            let mut per_week: HashMap<u32, u32> = HashMap::new();
            for entry in entries {
                let week = self.calendar.week_index_of(entry.assigned_date);
                *per_week.entry(week).or_insert(0) += 1;
            }
            let counts: Vec<u32> = (0..self.config.weeks.get()).map(|w| *per_week.get(&w).unwrap_or(&0)).collect();
            let week_distribution = evaluator::week_distribution(&counts);
            let week_count = evaluator::week_count(weeks_used, self.config.weeks.get());
            score.week_distribution = Some(week_distribution);
            score.week_count = Some(week_count);

            let w = &self.config.evaluator.weights;
            let parts = [
                (w.day_distribution, score.day_distribution),
                (w.time_gaps, score.time_gaps),
                (w.period_utilization, score.period_utilization),
                (w.week_distribution, week_distribution),
                (w.constraint_satisfaction, 1.0),
            ];
            let weight_sum: f64 = parts.iter().map(|(weight, _)| weight).sum();
            if weight_sum > 0.0 {
                score.total = parts.iter().map(|(weight, value)| weight * value).sum::<f64>() / weight_sum;
            }
        }
        score
    }
}

/// Derives a stable RNG seed from the graph fingerprint so that, absent an
/// explicit seed override, identical inputs reproduce identical optimizer
/// runs (spec.md §5, "Ordering guarantees").
fn rng_seed_from_fingerprint(fingerprint: u64) -> u64 {
    fingerprint ^ 0x9E37_79B9_7F4A_7C15
}

#[cfg(feature = "async")]
mod async_facade {
    use super::*;

    impl Run {
        /// Thin async facade over the synchronous solver core (spec.md §9,
        /// "'Async' sprinkled across pure functions" redesign note: public
        /// entry points may be async for cancellation; internals stay
        /// synchronous). Runs `execute` on a blocking thread so callers can
        /// check a cancel token or budget without blocking their executor.
        pub async fn execute_async(
            mut self,
            cache: std::sync::Arc<ScheduleCache>,
            cancel: CancelToken,
        ) -> SchedulerResult<RunOutput> {
            tokio::task::spawn_blocking(move || self.execute(&cache, &cancel))
                .await
                .map_err(|_| crate::error::SchedulerError::Cancelled)?
        }
    }
}
