//! Calendar: projects (week, weekday) onto absolute dates and answers
//! blackout lookups in O(1).
//!
//! Grounded on the reference workflow engine's `ResourceCalendar`/
//! `CalendarService` (two-layer availability: a working-hours pattern plus
//! calendar entries layered on top), specialized to the spec's discrete
//! Mon-Fri/period model and to O(1) blackout lookups inside the DSATUR inner
//! loop (see SPEC_FULL.md §4.1).

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::model::{BlackoutEntry, P_MAX};

/// A resolved blackout index: either every period on a date is blacked out,
/// or a specific subset is.
#[derive(Debug, Clone, Default)]
struct DayBlackout {
    all_day: bool,
    periods: HashSet<u8>,
}

/// Maps weekday indices and week offsets to absolute dates, and answers
/// blackout queries in O(1) after construction.
#[derive(Debug, Clone)]
pub struct Calendar {
    start_date: NaiveDate,
    week0_monday: NaiveDate,
    index: HashMap<NaiveDate, DayBlackout>,
}

impl Calendar {
    /// `start_date` anchors week 0. If it falls on a weekend, the first
    /// scheduled day is the following Monday (spec.md §6).
    ///
    /// Blackout entries are validated and normalized here: entries on a
    /// weekend, or whose every period is out of `1..=P_MAX`, are dropped
    /// silently (spec.md §4.1).
    pub fn new(start_date: NaiveDate, blackouts: &[BlackoutEntry]) -> Self {
        let start_date = next_or_same_weekday(start_date);
        let mut index: HashMap<NaiveDate, DayBlackout> = HashMap::new();
        for entry in blackouts {
            let weekday = entry.date.weekday();
            if weekday == Weekday::Sat || weekday == Weekday::Sun {
                continue;
            }
            let day = index.entry(entry.date).or_default();
            if entry.all_day {
                day.all_day = true;
                continue;
            }
            let valid: Vec<u8> =
                entry.periods.iter().copied().filter(|p| (1..=P_MAX).contains(p)).collect();
            if valid.is_empty() {
                continue;
            }
            day.periods.extend(valid);
        }
        let week0_monday = start_date - Duration::days((iso_weekday(start_date) - 1) as i64);
        Self { start_date, week0_monday, index }
    }

    /// Projects a zero-based `week_index` and a 1-based `weekday` (Mon=1 ..
    /// Fri=5) onto an absolute date. Monotonic in `(week_index, weekday)`;
    /// never lands on Saturday/Sunday.
    ///
    /// Offsets are anchored at the Monday of `start_date`'s week, not at
    /// `start_date` itself: `start_date` may be any weekday Mon-Fri, not just
    /// Monday, so weekday 1 does not always coincide with `start_date`.
    pub fn date_for(&self, week_index: u32, weekday: u8) -> NaiveDate {
        debug_assert!((1..=5).contains(&weekday), "weekday must be 1..=5, got {weekday}");
        let days_from_week_start = (weekday - 1) as i64;
        self.week0_monday + Duration::days(week_index as i64 * 7 + days_from_week_start)
    }

    /// The zero-based week index that `date` falls into, relative to
    /// `start_date`'s week. Used to group expanded schedule entries by week
    /// without threading week indices back through them.
    pub(crate) fn week_index_of(&self, date: NaiveDate) -> u32 {
        let days = (date - self.week0_monday).num_days().max(0);
        (days / 7) as u32
    }

    /// True iff `(date, period)` is blacked out: a `BlackoutEntry` matches
    /// `date` AND (`all_day` OR `period` is in its `periods` set).
    pub fn is_blackout(&self, date: NaiveDate, period: u8) -> bool {
        match self.index.get(&date) {
            Some(day) => day.all_day || day.periods.contains(&period),
            None => false,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Enumerates the next `n` weekdays starting from `start_date` (week 0,
    /// weekday of `start_date`, then onward Mon-Fri only).
    pub fn next_weekdays(&self, n: usize) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(n);
        let mut week = 0u32;
        let start_weekday = iso_weekday(self.start_date);
        let mut weekday = start_weekday;
        while out.len() < n {
            out.push(self.date_for(week, weekday));
            if weekday == 5 {
                weekday = 1;
                week += 1;
            } else {
                weekday += 1;
            }
        }
        out
    }
}

/// 1-based Mon=1..Fri=5 weekday index for a date already known to be a
/// weekday.
fn iso_weekday(date: NaiveDate) -> u8 {
    match date.weekday() {
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat | Weekday::Sun => {
            unreachable!("weekend dates are normalized at construction")
        }
    }
}

fn next_or_same_weekday(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date + Duration::days(2),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monday_start_is_kept() {
        let cal = Calendar::new(date(2024, 1, 1), &[]);
        assert_eq!(cal.start_date(), date(2024, 1, 1));
    }

    #[test]
    fn weekend_start_advances_to_monday() {
        let cal = Calendar::new(date(2024, 1, 6), &[]); // Saturday
        assert_eq!(cal.start_date(), date(2024, 1, 8)); // Monday
        let cal = Calendar::new(date(2024, 1, 7), &[]); // Sunday
        assert_eq!(cal.start_date(), date(2024, 1, 8));
    }

    #[test]
    fn date_for_skips_weekends_across_weeks() {
        let cal = Calendar::new(date(2024, 1, 1), &[]); // Monday
        assert_eq!(cal.date_for(0, 5), date(2024, 1, 5)); // Friday
        assert_eq!(cal.date_for(1, 1), date(2024, 1, 8)); // next Monday
    }

    #[test]
    fn date_for_respects_midweek_start_weekday() {
        let cal = Calendar::new(date(2024, 9, 3), &[]); // Tuesday
        assert_eq!(cal.start_date(), date(2024, 9, 3));
        assert_eq!(cal.date_for(0, 2), date(2024, 9, 3)); // Tuesday, week 0
        assert_eq!(cal.date_for(0, 5), date(2024, 9, 6)); // Friday, week 0
        assert_eq!(cal.date_for(1, 1), date(2024, 9, 9)); // Monday, week 1
    }

    #[test]
    fn blackout_all_day_covers_every_period() {
        let cal = Calendar::new(date(2024, 1, 1), &[BlackoutEntry::all_day(date(2024, 1, 1))]);
        assert!(cal.is_blackout(date(2024, 1, 1), 1));
        assert!(cal.is_blackout(date(2024, 1, 1), 8));
        assert!(!cal.is_blackout(date(2024, 1, 2), 1));
    }

    #[test]
    fn blackout_specific_periods_only() {
        let cal = Calendar::new(
            date(2024, 1, 1),
            &[BlackoutEntry::periods(date(2024, 1, 1), [1, 2])],
        );
        assert!(cal.is_blackout(date(2024, 1, 1), 1));
        assert!(cal.is_blackout(date(2024, 1, 1), 2));
        assert!(!cal.is_blackout(date(2024, 1, 1), 3));
    }

    #[test]
    fn weekend_blackouts_are_dropped() {
        let cal =
            Calendar::new(date(2024, 1, 1), &[BlackoutEntry::single_period(date(2024, 1, 6), 1)]);
        assert!(!cal.is_blackout(date(2024, 1, 6), 1));
    }

    #[test]
    fn out_of_range_periods_are_dropped() {
        let cal =
            Calendar::new(date(2024, 1, 1), &[BlackoutEntry::periods(date(2024, 1, 1), [0, 9])]);
        assert!(!cal.is_blackout(date(2024, 1, 1), 0));
        assert!(!cal.is_blackout(date(2024, 1, 1), 9));
    }

    #[test]
    fn next_weekdays_enumeration() {
        let cal = Calendar::new(date(2024, 1, 1), &[]);
        let days = cal.next_weekdays(7);
        assert_eq!(days.len(), 7);
        assert_eq!(days[0], date(2024, 1, 1));
        assert_eq!(days[4], date(2024, 1, 5));
        assert_eq!(days[5], date(2024, 1, 8));
    }
}
