//! DSATUR graph colorer: produces a feasible `Coloring` or a structured
//! failure, plus the repair routine shared by the genetic optimizer and the
//! parallel dispatcher's boundary-merge step.

#![allow(clippy::unwrap_used, clippy::expect_used)] // uncolored set is checked non-empty before these run

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::calendar::Calendar;
use crate::error::{SchedulerError, SchedulerResult};
use crate::graph::ConflictGraph;
use crate::model::{palette, ClassId, Coloring, ScheduleConstraints, Slot};

/// Per-day/per-week running tallies, updated as vertices are colored and
/// rolled back on backtrack. Shared shape with `backtrack.rs`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tally {
    /// classes assigned per (weekday) so far
    per_day: HashMap<u8, u32>,
    /// classes assigned per week so far (single counter; DSATUR colors a
    /// weekly template, so "week" here means "the template week")
    per_week: u32,
    /// periods used per weekday, for the consecutive-run check
    periods_by_day: HashMap<u8, Vec<u8>>,
}

impl Tally {
    fn can_place(&self, slot: Slot, constraints: &ScheduleConstraints) -> bool {
        let day_count = *self.per_day.get(&slot.weekday).unwrap_or(&0);
        if day_count + 1 > constraints.max_periods_per_day as u32 {
            return false;
        }
        if self.per_week + 1 > constraints.max_periods_per_week as u32 {
            return false;
        }
        let mut periods = self.periods_by_day.get(&slot.weekday).cloned().unwrap_or_default();
        periods.push(slot.period);
        periods.sort_unstable();

        if constraints.avoid_consecutive {
            for w in periods.windows(2) {
                if w[1] - w[0] == 1 {
                    return false;
                }
            }
            return true;
        }

        longest_run(&periods) <= constraints.max_consecutive_periods
    }

    fn place(&mut self, slot: Slot) {
        *self.per_day.entry(slot.weekday).or_insert(0) += 1;
        self.per_week += 1;
        self.periods_by_day.entry(slot.weekday).or_default().push(slot.period);
    }

    fn unplace(&mut self, slot: Slot) {
        if let Some(c) = self.per_day.get_mut(&slot.weekday) {
            *c = c.saturating_sub(1);
        }
        self.per_week = self.per_week.saturating_sub(1);
        if let Some(periods) = self.periods_by_day.get_mut(&slot.weekday) {
            if let Some(pos) = periods.iter().position(|p| *p == slot.period) {
                periods.remove(pos);
            }
        }
    }
}

pub(crate) fn longest_run(sorted_periods: &[u8]) -> u8 {
    if sorted_periods.is_empty() {
        return 0;
    }
    let mut best = 1u8;
    let mut current = 1u8;
    for w in sorted_periods.windows(2) {
        if w[1] == w[0] + 1 {
            current += 1;
            best = best.max(current);
        } else if w[1] != w[0] {
            current = 1;
        }
    }
    best
}

/// Cooperative cancellation, checked between vertex selections (spec.md
/// §5). A no-op `CancelToken::default()` never cancels.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Weeks the coloring must remain valid across, resolved to concrete dates
/// up front so the colorer's inner loop never touches `Calendar` arithmetic.
pub struct WeekScope<'a> {
    calendar: &'a Calendar,
    weeks: u32,
}

impl<'a> WeekScope<'a> {
    pub fn new(calendar: &'a Calendar, weeks: u32) -> Self {
        Self { calendar, weeks: weeks.max(1) }
    }

    pub(crate) fn slot_is_blacked_out_any_week(&self, slot: Slot) -> bool {
        (0..self.weeks).any(|w| self.calendar.is_blackout(self.calendar.date_for(w, slot.weekday), slot.period))
    }
}

/// DSATUR colorer state shared between the deterministic and randomized
/// variants (spec.md §4.3).
pub struct DsaturColorer<'a> {
    graph: &'a ConflictGraph,
    constraints: &'a ScheduleConstraints,
    scope: WeekScope<'a>,
}

impl<'a> DsaturColorer<'a> {
    pub fn new(graph: &'a ConflictGraph, constraints: &'a ScheduleConstraints, scope: WeekScope<'a>) -> Self {
        Self { graph, constraints, scope }
    }

    /// Deterministic DSATUR: ties broken by higher graph degree, then
    /// lexicographic id (spec.md §4.3 step 1).
    pub fn color(&self, cancel: &CancelToken) -> SchedulerResult<Coloring> {
        self.color_with_order(cancel, None)
    }

    /// Randomized DSATUR: identical algorithm, vertices visited in a
    /// shuffled tie-break order, used to seed a diverse initial population
    /// (spec.md §4.3, "Randomized variant").
    pub fn color_randomized(&self, cancel: &CancelToken, rng: &mut impl Rng) -> SchedulerResult<Coloring> {
        let mut ids: Vec<ClassId> = self.graph.order().to_vec();
        ids.shuffle(rng);
        let priority: HashMap<ClassId, usize> = ids.into_iter().enumerate().map(|(i, id)| (id, i)).collect();
        self.color_with_order(cancel, Some(&priority))
    }

    fn color_with_order(
        &self,
        cancel: &CancelToken,
        shuffled_priority: Option<&HashMap<ClassId, usize>>,
    ) -> SchedulerResult<Coloring> {
        let all_slots = palette();
        let mut colored: HashMap<ClassId, Slot> = HashMap::with_capacity(self.graph.len());
        let mut uncolored: HashSet<ClassId> = self.graph.order().iter().cloned().collect();
        let mut tally = Tally::default();

        while !uncolored.is_empty() {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            let vertex = self.pick_saturated_vertex(&uncolored, &colored, shuffled_priority);
            let neighbor_slots: HashSet<Slot> = self
                .graph
                .neighbors(&vertex)
                .iter()
                .filter_map(|n| colored.get(n))
                .copied()
                .collect();

            let chosen = all_slots.iter().copied().find(|s| {
                self.graph.available(&vertex).contains(s)
                    && !neighbor_slots.contains(s)
                    && !self.scope.slot_is_blacked_out_any_week(*s)
                    && tally.can_place(*s, self.constraints)
            });

            match chosen {
                Some(slot) => {
                    trace!(class = %vertex, %slot, "dsatur assigned");
                    tally.place(slot);
                    colored.insert(vertex.clone(), slot);
                    uncolored.remove(&vertex);
                }
                None => {
                    warn!(class = %vertex, "dsatur exhausted palette");
                    return Err(SchedulerError::infeasible_with(
                        format!("no feasible slot for class {vertex}"),
                        vec![vertex],
                    ));
                }
            }
        }

        debug!(classes = colored.len(), "dsatur produced a total coloring");
        Ok(Coloring { assignments: colored.into_iter().collect() })
    }

    fn pick_saturated_vertex(
        &self,
        uncolored: &HashSet<ClassId>,
        colored: &HashMap<ClassId, Slot>,
        shuffled_priority: Option<&HashMap<ClassId, usize>>,
    ) -> ClassId {
        let mut best: Option<ClassId> = None;
        let mut best_key: Option<(usize, usize)> = None;

        for id in self.graph.order() {
            if !uncolored.contains(id) {
                continue;
            }
            let saturation = self
                .graph
                .neighbors(id)
                .iter()
                .filter_map(|n| colored.get(n))
                .collect::<HashSet<_>>()
                .len();
            let degree = self.graph.degree(id);
            let key = (saturation, degree);
            let is_better = match &best_key {
                None => true,
                Some(bk) => key > *bk,
            };
            let is_tied = best_key.as_ref() == Some(&key);
            if is_better {
                best_key = Some(key);
                best = Some(id.clone());
            } else if is_tied {
                // Tie-break by lexicographic id, or by shuffled priority
                // when running the randomized variant.
                let challenger_wins = match shuffled_priority {
                    Some(p) => p[id] < p[best.as_ref().unwrap()],
                    None => id < best.as_ref().unwrap(),
                };
                if challenger_wins {
                    best = Some(id.clone());
                }
            }
        }
        best.expect("uncolored is non-empty")
    }
}

/// Given a potentially-invalid coloring (e.g. after genetic crossover),
/// detect each conflict and reassign the lower-degree vertex in the pair to
/// its nearest feasible slot (spec.md §4.3, "Repair routine").
pub fn repair(
    graph: &ConflictGraph,
    constraints: &ScheduleConstraints,
    scope: &WeekScope,
    mut coloring: Coloring,
    rng: &mut impl Rng,
) -> SchedulerResult<Coloring> {
    let all_slots = palette();
    let mut tally = rebuild_tally(graph, &coloring);

    loop {
        let conflict = find_one_conflict(graph, constraints, scope, &coloring);
        let Some((a, b)) = conflict else { break };
        let (victim, keep) = if graph.degree(&a) <= graph.degree(&b) { (a, b) } else { (b, a) };

        let victim_slot = coloring.assignments[&victim];
        tally.unplace(victim_slot);

        let neighbor_slots: HashSet<Slot> = graph
            .neighbors(&victim)
            .iter()
            .filter(|n| **n != keep)
            .filter_map(|n| coloring.assignments.get(n))
            .copied()
            .chain(coloring.assignments.get(&keep).copied())
            .collect();

        let mut candidates: Vec<Slot> = all_slots
            .iter()
            .copied()
            .filter(|s| {
                graph.available(&victim).contains(s)
                    && !neighbor_slots.contains(s)
                    && !scope.slot_is_blacked_out_any_week(*s)
                    && tally.can_place(*s, constraints)
            })
            .collect();
        candidates.sort_by_key(|s| s.manhattan(&victim_slot));

        let replacement = match candidates.first() {
            Some(s) => *s,
            None => {
                // No near slot: pick any feasible slot at random.
                let any_feasible: Vec<Slot> = all_slots
                    .iter()
                    .copied()
                    .filter(|s| {
                        graph.available(&victim).contains(s)
                            && !neighbor_slots.contains(s)
                            && !scope.slot_is_blacked_out_any_week(*s)
                            && tally.can_place(*s, constraints)
                    })
                    .collect();
                match any_feasible.choose(rng) {
                    Some(s) => *s,
                    None => {
                        return Err(SchedulerError::infeasible_with(
                            format!("repair could not place class {victim}"),
                            vec![victim],
                        ))
                    }
                }
            }
        };

        tally.place(replacement);
        coloring.assignments.insert(victim, replacement);
    }

    Ok(coloring)
}

fn rebuild_tally(graph: &ConflictGraph, coloring: &Coloring) -> Tally {
    let mut tally = Tally::default();
    for id in graph.order() {
        if let Some(slot) = coloring.assignments.get(id) {
            tally.place(*slot);
        }
    }
    tally
}

/// Finds one adjacent pair sharing a slot, if any. O(V) amortized since
/// callers fix one conflict at a time and re-scan.
fn find_one_conflict(
    graph: &ConflictGraph,
    constraints: &ScheduleConstraints,
    scope: &WeekScope,
    coloring: &Coloring,
) -> Option<(ClassId, ClassId)> {
    for id in graph.order() {
        let Some(slot) = coloring.assignments.get(id) else { continue };
        if !graph.available(id).contains(slot) || scope.slot_is_blacked_out_any_week(*slot) {
            // Self-conflict: treat the class itself as both ends so the
            // repair loop reassigns it.
            return Some((id.clone(), id.clone()));
        }
        for n in graph.neighbors(id) {
            if let Some(nslot) = coloring.assignments.get(n) {
                if nslot == slot {
                    return Some((id.clone(), n.clone()));
                }
            }
        }
    }
    // Daily/weekly/consecutive tallies: scan once more against the full
    // constraints, since adjacency conflicts are necessary but not
    // sufficient for hard-constraint validity.
    let mut tally = Tally::default();
    for id in graph.order() {
        let Some(slot) = coloring.assignments.get(id) else { continue };
        if !tally.can_place(*slot, constraints) {
            return Some((id.clone(), id.clone()));
        }
        tally.place(*slot);
    }
    None
}
