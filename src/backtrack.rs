//! Backtracking scheduler: a deterministic depth-first fallback, preferred
//! when the graph is easy but daily/weekly/consecutive constraints dominate
//! (spec.md §4.4).

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::calendar::Calendar;
use crate::colorer::{CancelToken, WeekScope};
use crate::error::{SchedulerError, SchedulerResult};
use crate::graph::ConflictGraph;
use crate::model::{palette, ClassId, Coloring, ScheduleConstraints, Slot};

const DEFAULT_MAX_BACKTRACKS: u32 = 1000;
const DEFAULT_MAX_WEEKS_LOOKAHEAD: u32 = 10;

/// Tuning knobs for the backtracking fallback.
#[derive(Debug, Clone, Copy)]
pub struct BacktrackConfig {
    pub max_backtracks: u32,
    pub max_weeks_lookahead: u32,
}

impl Default for BacktrackConfig {
    fn default() -> Self {
        Self {
            max_backtracks: DEFAULT_MAX_BACKTRACKS,
            max_weeks_lookahead: DEFAULT_MAX_WEEKS_LOOKAHEAD,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Tally {
    per_day: HashMap<u8, u32>,
    per_week: u32,
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
            return !periods.windows(2).any(|w| w[1] - w[0] == 1);
        }
        crate::colorer::longest_run(&periods) <= constraints.max_consecutive_periods
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

/// A snapshot pushed before trying a slot, popped on dead-end (spec.md
/// §4.4: "push a snapshot of (partial assignment, per-day tally, per-week
/// tally) onto a stack").
struct Frame {
    class_id: ClassId,
    slot: Slot,
    /// index into the per-class candidate slot list we'd already tried up
    /// to and including this one, so resuming tries the next candidate.
    next_candidate_index: usize,
}

/// Depth-first placement with state snapshotting and bounded restarts.
pub struct BacktrackingScheduler<'a> {
    graph: &'a ConflictGraph,
    constraints: &'a ScheduleConstraints,
    calendar: &'a Calendar,
    config: BacktrackConfig,
}

impl<'a> BacktrackingScheduler<'a> {
    pub fn new(
        graph: &'a ConflictGraph,
        constraints: &'a ScheduleConstraints,
        calendar: &'a Calendar,
        config: BacktrackConfig,
    ) -> Self {
        Self { graph, constraints, calendar, config }
    }

    /// Sorts classes by descending `|forbidden|` (approximated here by
    /// ascending available-slot count, which is monotonic with forbidden
    /// count since the palette size is fixed), then performs DFS
    /// placement. Aborts after `max_backtracks` pops; reports `Infeasible`.
    ///
    /// Returns the coloring alongside the number of weeks actually consumed
    /// to find it (1 if week 0 sufficed, more if restarts advanced past
    /// full weeks).
    pub fn schedule(&self, cancel: &CancelToken) -> SchedulerResult<(Coloring, u32)> {
        let mut order: Vec<ClassId> = self.graph.order().to_vec();
        order.sort_by_key(|id| self.graph.available(id).len());

        let mut week: u32 = 0;
        let mut assigned: HashMap<ClassId, Slot> = HashMap::with_capacity(order.len());
        let mut tally = Tally::default();
        let mut stack: Vec<Frame> = Vec::new();
        let mut backtracks: u32 = 0;
        let all_slots = palette();

        let mut cursor = 0usize;
        'restart_weeks: loop {
            while cursor < order.len() {
                if cancel.is_cancelled() {
                    return Err(SchedulerError::Cancelled);
                }
                let class_id = &order[cursor];
                let neighbor_slots: std::collections::HashSet<Slot> = self
                    .graph
                    .neighbors(class_id)
                    .iter()
                    .filter_map(|n| assigned.get(n))
                    .copied()
                    .collect();

                let scope = WeekScope::new(self.calendar, week + 1);
                let candidates: Vec<Slot> = all_slots
                    .iter()
                    .copied()
                    .filter(|s| {
                        self.graph.available(class_id).contains(s)
                            && !neighbor_slots.contains(s)
                            && !scope.slot_is_blacked_out_any_week(*s)
                            && tally.can_place(*s, self.constraints)
                    })
                    .collect();

                match candidates.first() {
                    Some(slot) => {
                        trace!(class = %class_id, %slot, "backtrack placed");
                        tally.place(*slot);
                        assigned.insert(class_id.clone(), *slot);
                        stack.push(Frame {
                            class_id: class_id.clone(),
                            slot: *slot,
                            next_candidate_index: 1,
                        });
                        cursor += 1;
                    }
                    None => {
                        // Dead end: pop frames, trying the next candidate
                        // at the frame we pop back to.
                        loop {
                            let Some(frame) = stack.pop() else {
                                // No more weeks to try and fully exhausted.
                                if week + 1 >= self.config.max_weeks_lookahead {
                                    return Err(SchedulerError::infeasible(
                                        "backtracking exhausted all weeks within lookahead",
                                    ));
                                }
                                week += 1;
                                assigned.clear();
                                tally = Tally::default();
                                cursor = 0;
                                continue 'restart_weeks;
                            };
                            backtracks += 1;
                            if backtracks > self.config.max_backtracks {
                                return Err(SchedulerError::infeasible(
                                    "backtracking exceeded max_backtracks",
                                ));
                            }
                            tally.unplace(frame.slot);
                            assigned.remove(&frame.class_id);
                            cursor -= 1;

                            let scope = WeekScope::new(self.calendar, week + 1);
                            let neighbor_slots: std::collections::HashSet<Slot> = self
                                .graph
                                .neighbors(&frame.class_id)
                                .iter()
                                .filter_map(|n| assigned.get(n))
                                .copied()
                                .collect();
                            let candidates: Vec<Slot> = all_slots
                                .iter()
                                .copied()
                                .filter(|s| {
                                    self.graph.available(&frame.class_id).contains(s)
                                        && !neighbor_slots.contains(s)
                                        && !scope.slot_is_blacked_out_any_week(*s)
                                        && tally.can_place(*s, self.constraints)
                                })
                                .collect();
                            if let Some(next_slot) =
                                candidates.get(frame.next_candidate_index).copied()
                            {
                                tally.place(next_slot);
                                assigned.insert(frame.class_id.clone(), next_slot);
                                stack.push(Frame {
                                    class_id: frame.class_id,
                                    slot: next_slot,
                                    next_candidate_index: frame.next_candidate_index + 1,
                                });
                                cursor += 1;
                                break;
                            }
                            // else: keep popping further back.
                        }
                    }
                }
            }
            break;
        }

        debug!(classes = assigned.len(), weeks_advanced = week, "backtracking produced a total coloring");
        Ok((Coloring { assignments: assigned.into_iter().collect() }, week + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassItem;
    use chrono::NaiveDate;

    fn cal() -> Calendar {
        Calendar::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), &[])
    }

    #[test]
    fn schedules_trivial_pair() {
        let classes = vec![
            ClassItem::new("A", "A").with_forbidden([Slot::new(1, 1)]),
            ClassItem::new("B", "B").with_forbidden([Slot::new(1, 2)]),
        ];
        let graph = ConflictGraph::build(&classes).unwrap();
        let constraints = ScheduleConstraints::default();
        let calendar = cal();
        let scheduler =
            BacktrackingScheduler::new(&graph, &constraints, &calendar, BacktrackConfig::default());
        let (coloring, weeks_used) = scheduler.schedule(&CancelToken::new()).unwrap();
        assert_ne!(coloring.slot_of("A").unwrap(), Slot::new(1, 1));
        assert_ne!(coloring.slot_of("B").unwrap(), Slot::new(1, 2));
        assert_eq!(weeks_used, 1);
    }

    #[test]
    fn over_constrained_single_class_is_infeasible_at_graph_build() {
        let classes = vec![ClassItem::new("X", "X").with_forbidden(palette())];
        assert!(ConflictGraph::build(&classes).is_err());
    }
}
