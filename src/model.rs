//! Core data model: classes, slots, blackouts, constraints, colorings.

use std::collections::HashSet;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// Fixed cap on the period index within a day. The palette is always
/// `5 * P_MAX` slots; `maxPeriodsPerDay` (configurable, <= P_MAX) caps how
/// many of them may actually be used on a given day.
pub const P_MAX: u8 = 8;

/// Stable identifier for a [`ClassItem`]. Adjacency is stored by id, never
/// by pointer, so graphs stay `Send + Sync` and trivially cloneable.
pub type ClassId = String;

/// A (weekday, period) pair — the unit of assignment.
///
/// `weekday` is 1-based, Monday=1 .. Friday=5. Saturday/Sunday never appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Slot {
    pub weekday: u8,
    pub period: u8,
}

impl Slot {
    pub fn new(weekday: u8, period: u8) -> Self {
        Self { weekday, period }
    }

    /// Manhattan distance in (weekday, period) space, used by the repair
    /// routine to find the "nearest" feasible slot to a conflicting one.
    pub fn manhattan(&self, other: &Slot) -> u32 {
        (self.weekday as i32 - other.weekday as i32).unsigned_abs()
            + (self.period as i32 - other.period as i32).unsigned_abs()
    }

    fn is_valid(&self) -> bool {
        (1..=5).contains(&self.weekday) && (1..=P_MAX).contains(&self.period)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(day {}, period {})", self.weekday, self.period)
    }
}

/// The full enumeration of all `5 * P_MAX` slots, ordered (weekday ascending,
/// then period ascending). DSATUR's palette-scan order and the genetic
/// optimizer's mutation clamp both rely on this being deterministic.
pub fn palette() -> Vec<Slot> {
    let mut out = Vec::with_capacity(5 * P_MAX as usize);
    for weekday in 1..=5u8 {
        for period in 1..=P_MAX {
            out.push(Slot::new(weekday, period));
        }
    }
    out
}

/// A recurring class instance to be placed on the timetable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassItem {
    pub id: ClassId,
    pub label: String,
    pub grade_tag: String,
    /// Slots this class can never occupy, because of a pre-existing
    /// obligation outside the scheduler's control.
    pub forbidden: HashSet<Slot>,
    pub active: bool,
}

impl ClassItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            grade_tag: String::new(),
            forbidden: HashSet::new(),
            active: true,
        }
    }

    pub fn with_forbidden(mut self, slots: impl IntoIterator<Item = Slot>) -> Self {
        self.forbidden.extend(slots);
        self
    }

    fn validate(&self) -> SchedulerResult<()> {
        for slot in &self.forbidden {
            if !slot.is_valid() {
                return Err(SchedulerError::InvalidInput(format!(
                    "class {}: forbidden slot {} is out of range (weekday 1..5, period 1..{})",
                    self.id, slot, P_MAX
                )));
            }
        }
        Ok(())
    }
}

/// An absolute-date restriction that removes one or more slots on that
/// specific date. The richer shape (`periods`/`all_day`) is the normalized
/// form; a bare `(date, period)` pair is accepted as sugar at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlackoutEntry {
    pub date: chrono::NaiveDate,
    pub all_day: bool,
    pub periods: HashSet<u8>,
}

impl BlackoutEntry {
    pub fn all_day(date: chrono::NaiveDate) -> Self {
        Self { date, all_day: true, periods: HashSet::new() }
    }

    pub fn single_period(date: chrono::NaiveDate, period: u8) -> Self {
        Self { date, all_day: false, periods: [period].into_iter().collect() }
    }

    pub fn periods(date: chrono::NaiveDate, periods: impl IntoIterator<Item = u8>) -> Self {
        Self { date, all_day: false, periods: periods.into_iter().collect() }
    }
}

/// Hard limits and options applied during placement.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScheduleConstraints {
    pub max_periods_per_day: u8,
    pub max_periods_per_week: u8,
    pub max_consecutive_periods: u8,
    pub avoid_consecutive: bool,
    pub blackouts: Vec<BlackoutEntry>,
}

impl Default for ScheduleConstraints {
    fn default() -> Self {
        Self {
            max_periods_per_day: P_MAX,
            max_periods_per_week: 5 * P_MAX,
            max_consecutive_periods: P_MAX,
            avoid_consecutive: false,
            blackouts: Vec::new(),
        }
    }
}

impl ScheduleConstraints {
    /// Validates the contract in spec §6: `1 <= max_daily <= P_MAX`,
    /// `max_daily <= max_weekly <= 5*max_daily`, `1 <= max_consecutive <=
    /// max_daily`. Invalid blackout entries (bad weekday, bad period) are
    /// silently dropped rather than rejected, per §4.1.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_periods_per_day < 1 || self.max_periods_per_day > P_MAX {
            return Err(SchedulerError::InvalidInput(format!(
                "max_periods_per_day must be in 1..={P_MAX}, got {}",
                self.max_periods_per_day
            )));
        }
        let weekly_ceiling = 5 * self.max_periods_per_day;
        if self.max_periods_per_week < self.max_periods_per_day
            || self.max_periods_per_week > weekly_ceiling
        {
            return Err(SchedulerError::InvalidInput(format!(
                "max_periods_per_week must be in {}..={}, got {}",
                self.max_periods_per_day, weekly_ceiling, self.max_periods_per_week
            )));
        }
        if self.max_consecutive_periods < 1
            || self.max_consecutive_periods > self.max_periods_per_day
        {
            return Err(SchedulerError::InvalidInput(format!(
                "max_consecutive_periods must be in 1..={}, got {}",
                self.max_periods_per_day, self.max_consecutive_periods
            )));
        }
        Ok(())
    }

    /// Drops blackout entries that don't fall on a weekday or reference an
    /// out-of-range period, per §4.1 ("invalid entries are silently
    /// dropped").
    pub(crate) fn sanitized_blackouts(&self) -> Vec<BlackoutEntry> {
        use chrono::Datelike;
        self.blackouts
            .iter()
            .filter_map(|b| {
                let weekday = b.date.weekday();
                if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
                    return None;
                }
                if b.all_day {
                    return Some(b.clone());
                }
                let valid_periods: HashSet<u8> = b
                    .periods
                    .iter()
                    .copied()
                    .filter(|p| (1..=P_MAX).contains(p))
                    .collect();
                if valid_periods.is_empty() {
                    None
                } else {
                    Some(BlackoutEntry { date: b.date, all_day: false, periods: valid_periods })
                }
            })
            .collect()
    }
}

/// Validates a full class list: unique ids, per-class forbidden-slot ranges.
pub fn validate_classes(classes: &[ClassItem]) -> SchedulerResult<()> {
    let mut seen = HashSet::with_capacity(classes.len());
    for class in classes {
        if !seen.insert(&class.id) {
            return Err(SchedulerError::InvalidInput(format!(
                "duplicate class id: {}",
                class.id
            )));
        }
        class.validate()?;
    }
    Ok(())
}

/// A total function from class-id to a `Slot` (spec.md §3 glossary). The
/// same slot recurs on every scheduled week in multi-week mode (see
/// SPEC_FULL.md §3.1): a coloring is a weekly template, not a per-week plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Coloring {
    pub assignments: std::collections::BTreeMap<ClassId, Slot>,
}

impl Coloring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_of(&self, class_id: &str) -> Option<Slot> {
        self.assignments.get(class_id).copied()
    }

    pub fn is_total(&self, classes: &[ClassItem]) -> bool {
        classes.iter().filter(|c| c.active).all(|c| self.assignments.contains_key(&c.id))
    }
}

/// One output row: a class placed on an absolute date and period.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScheduleEntry {
    pub class_id: ClassId,
    pub assigned_date: chrono::NaiveDate,
    pub period: u8,
}

/// Sub-metrics and total for a candidate schedule, each normalized to
/// `[0, 1]`. See spec.md §4.5 for the weighting formula.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QualityScore {
    pub total: f64,
    pub day_distribution: f64,
    pub time_gaps: f64,
    pub period_utilization: f64,
    pub week_distribution: Option<f64>,
    pub week_count: Option<f64>,
}

impl QualityScore {
    pub fn zero() -> Self {
        Self {
            total: 0.0,
            day_distribution: 0.0,
            time_gaps: 0.0,
            period_utilization: 0.0,
            week_distribution: None,
            week_count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_is_sorted_and_complete() {
        let p = palette();
        assert_eq!(p.len(), 5 * P_MAX as usize);
        let mut sorted = p.clone();
        sorted.sort();
        assert_eq!(p, sorted);
    }

    #[test]
    fn slot_manhattan_distance() {
        let a = Slot::new(1, 1);
        let b = Slot::new(2, 3);
        assert_eq!(a.manhattan(&b), 3);
    }

    #[test]
    fn constraints_default_is_valid() {
        assert!(ScheduleConstraints::default().validate().is_ok());
    }

    #[test]
    fn constraints_reject_daily_above_pmax() {
        let c = ScheduleConstraints { max_periods_per_day: P_MAX + 1, ..Default::default() };
        assert!(c.validate().is_err());
    }

    #[test]
    fn constraints_reject_weekly_below_daily() {
        let c = ScheduleConstraints {
            max_periods_per_day: 4,
            max_periods_per_week: 3,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn constraints_reject_consecutive_above_daily() {
        let c = ScheduleConstraints {
            max_periods_per_day: 4,
            max_consecutive_periods: 5,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn blackout_sanitizer_drops_weekend_and_out_of_range() {
        use chrono::NaiveDate;
        let sat = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        let mon = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let c = ScheduleConstraints {
            blackouts: vec![
                BlackoutEntry::single_period(sat, 1),
                BlackoutEntry::periods(mon, [0, 9, 2]),
            ],
            ..Default::default()
        };
        let sanitized = c.sanitized_blackouts();
        assert_eq!(sanitized.len(), 1);
        assert_eq!(sanitized[0].periods, [2].into_iter().collect());
    }

    #[test]
    fn validate_classes_rejects_duplicate_ids() {
        let classes = vec![ClassItem::new("A", "A"), ClassItem::new("A", "A2")];
        assert!(validate_classes(&classes).is_err());
    }
}
