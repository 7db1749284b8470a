//! Occurrence evaluation: is a rule active now, and when does it next run.
//!
//! Everything here is pure and deterministic in `(rule, instant)`. Windows
//! are half-open: a rule is active from `start_time` inclusive until
//! `end_time` exclusive.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime};

use streamrec_types::{Occurrence, Recurrence, ScheduleRule};

/// Days searched ahead for daily and weekly rules. Seven covers the case
/// where today's slot already passed and the only match is a week out.
const WEEKLY_HORIZON_DAYS: u64 = 7;

/// Months searched ahead for monthly rules. A `31` selector skips at most
/// two consecutive short months, so a year plus one is ample.
const MONTHLY_HORIZON_MONTHS: u32 = 13;

/// Whether the rule's selector includes this calendar date.
pub fn matches_date(recurrence: &Recurrence, date: NaiveDate) -> bool {
    match recurrence {
        Recurrence::Once { date: on } => *on == date,
        Recurrence::Daily => true,
        Recurrence::Weekly { weekdays } => {
            weekdays.contains(&(date.weekday().num_days_from_sunday() as u8))
        }
        Recurrence::Monthly { monthdays } => monthdays.contains(&(date.day() as u8)),
    }
}

fn within_window(rule: &ScheduleRule, time: NaiveTime) -> bool {
    rule.start_time.to_naive_time() <= time && time < rule.end_time.to_naive_time()
}

/// The rule's window on a given date, regardless of whether the date matches.
pub fn window_on(rule: &ScheduleRule, date: NaiveDate) -> Occurrence {
    Occurrence {
        start: rule.start_time.on(date),
        end: rule.end_time.on(date),
    }
}

/// Whether the rule wants recording at `now`. Disabled rules never do.
pub fn is_active_at(rule: &ScheduleRule, now: NaiveDateTime) -> bool {
    rule.enabled && matches_date(&rule.recurrence, now.date()) && within_window(rule, now.time())
}

/// A one-time rule whose window has fully elapsed.
pub fn has_expired(rule: &ScheduleRule, now: NaiveDateTime) -> bool {
    match &rule.recurrence {
        Recurrence::Once { date } => rule.end_time.on(*date) <= now,
        _ => false,
    }
}

/// The earliest occurrence of `rule` starting strictly after `after`.
///
/// Returns `None` for disabled rules, one-time rules that already started,
/// and rules with an empty selector.
pub fn next_occurrence(rule: &ScheduleRule, after: NaiveDateTime) -> Option<Occurrence> {
    if !rule.enabled {
        return None;
    }

    match &rule.recurrence {
        Recurrence::Once { date } => {
            let occurrence = window_on(rule, *date);
            (occurrence.start > after).then_some(occurrence)
        }
        Recurrence::Daily | Recurrence::Weekly { .. } => (0..=WEEKLY_HORIZON_DAYS)
            .filter_map(|offset| after.date().checked_add_days(Days::new(offset)))
            .filter(|date| matches_date(&rule.recurrence, *date))
            .map(|date| window_on(rule, date))
            .find(|occurrence| occurrence.start > after),
        Recurrence::Monthly { monthdays } => {
            let first = after.date().with_day(1)?;
            (0..MONTHLY_HORIZON_MONTHS)
                .filter_map(|offset| first.checked_add_months(chrono::Months::new(offset)))
                .flat_map(|month| {
                    // BTreeSet iterates ascending, so days come out in order.
                    monthdays.iter().filter_map(move |day| {
                        NaiveDate::from_ymd_opt(month.year(), month.month(), (*day).into())
                    })
                })
                .map(|date| window_on(rule, date))
                .find(|occurrence| occurrence.start > after)
        }
    }
}

/// Enabled rules active at `now`, ordered by ID.
pub fn active_rules(rules: &[ScheduleRule], now: NaiveDateTime) -> Vec<&ScheduleRule> {
    let mut active: Vec<_> = rules.iter().filter(|r| is_active_at(r, now)).collect();
    active.sort_by(|a, b| a.id.cmp(&b.id));
    active
}

/// The next occurrence across all rules.
///
/// Earliest start wins; ties go to the lexicographically smallest rule ID.
pub fn system_next_occurrence(
    rules: &[ScheduleRule],
    after: NaiveDateTime,
) -> Option<(&ScheduleRule, Occurrence)> {
    rules
        .iter()
        .filter_map(|rule| next_occurrence(rule, after).map(|occ| (rule, occ)))
        .min_by(|(ra, a), (rb, b)| a.start.cmp(&b.start).then_with(|| ra.id.cmp(&rb.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn rule(id: &str, start: &str, end: &str, recurrence: Recurrence) -> ScheduleRule {
        ScheduleRule {
            id: id.into(),
            title: format!("rule {id}"),
            enabled: true,
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
            recurrence,
            created: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn weekly(days: &[u8]) -> Recurrence {
        Recurrence::Weekly {
            weekdays: days.iter().copied().collect(),
        }
    }

    fn monthly(days: &[u8]) -> Recurrence {
        Recurrence::Monthly {
            monthdays: days.iter().copied().collect(),
        }
    }

    fn once(y: i32, m: u32, d: u32) -> Recurrence {
        Recurrence::Once {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
        }
    }

    #[test]
    fn test_daily_window_boundaries() {
        let r = rule("d", "10:00", "11:00", Recurrence::Daily);
        let start = at(2025, 3, 4, 10, 0);
        let end = at(2025, 3, 4, 11, 0);

        assert!(is_active_at(&r, start));
        assert!(is_active_at(&r, start + TimeDelta::minutes(30)));
        assert!(is_active_at(&r, end - TimeDelta::seconds(1)));
        assert!(!is_active_at(&r, end));
        assert!(!is_active_at(&r, start - TimeDelta::seconds(1)));
    }

    #[test]
    fn test_daily_active_every_minute_of_window() {
        let r = rule("d", "09:15", "09:45", Recurrence::Daily);
        let mut t = at(2025, 6, 10, 9, 15);
        while t < at(2025, 6, 10, 9, 45) {
            assert!(is_active_at(&r, t), "expected active at {t}");
            t += TimeDelta::minutes(1);
        }
        assert!(!is_active_at(&r, t));
    }

    #[test]
    fn test_disabled_rule_never_active() {
        let mut r = rule("d", "00:00", "23:59", Recurrence::Daily);
        r.enabled = false;
        assert!(!is_active_at(&r, at(2025, 3, 4, 12, 0)));
        assert!(next_occurrence(&r, at(2025, 3, 4, 12, 0)).is_none());
    }

    #[test]
    fn test_weekly_excludes_unselected_weekdays() {
        // 2025-03-03 is a Monday.
        let r = rule("w", "00:00", "23:59", weekly(&[1, 3]));
        for day in 2..=8 {
            let t = at(2025, 3, day, 12, 0);
            let weekday = t.date().weekday().num_days_from_sunday();
            assert_eq!(is_active_at(&r, t), weekday == 1 || weekday == 3, "day {day}");
        }
    }

    #[test]
    fn test_weekly_tuesday_inactive() {
        let r = rule("w", "09:00", "09:30", weekly(&[1, 3]));
        // 2025-03-04 is a Tuesday.
        assert!(!is_active_at(&r, at(2025, 3, 4, 9, 15)));
        assert!(is_active_at(&r, at(2025, 3, 5, 9, 15)));
    }

    #[test]
    fn test_monthly_active_on_selected_day() {
        let r = rule("m", "20:00", "21:00", monthly(&[15]));
        assert!(is_active_at(&r, at(2025, 3, 15, 20, 30)));
        assert!(!is_active_at(&r, at(2025, 3, 16, 20, 30)));
    }

    #[test]
    fn test_once_active_only_on_its_date() {
        let r = rule("o", "10:00", "11:00", once(2025, 3, 1));
        assert!(is_active_at(&r, at(2025, 3, 1, 10, 5)));
        assert!(!is_active_at(&r, at(2025, 3, 2, 10, 5)));
        assert!(!is_active_at(&r, at(2025, 3, 1, 11, 0)));
    }

    #[test]
    fn test_has_expired() {
        let r = rule("o", "10:00", "11:00", once(2025, 3, 1));
        assert!(!has_expired(&r, at(2025, 3, 1, 10, 59)));
        assert!(has_expired(&r, at(2025, 3, 1, 11, 0)));
        assert!(has_expired(&r, at(2025, 3, 1, 11, 30)));

        let daily = rule("d", "10:00", "11:00", Recurrence::Daily);
        assert!(!has_expired(&daily, at(2030, 1, 1, 0, 0)));
    }

    #[test]
    fn test_next_once() {
        let r = rule("o", "10:00", "11:00", once(2025, 3, 1));
        let occ = next_occurrence(&r, at(2025, 2, 28, 12, 0)).unwrap();
        assert_eq!(occ.start, at(2025, 3, 1, 10, 0));
        assert_eq!(occ.end, at(2025, 3, 1, 11, 0));

        // Already started: no further occurrence
        assert!(next_occurrence(&r, at(2025, 3, 1, 10, 0)).is_none());
        assert!(next_occurrence(&r, at(2025, 3, 1, 10, 30)).is_none());
    }

    #[test]
    fn test_next_daily_today_or_tomorrow() {
        let r = rule("d", "10:00", "11:00", Recurrence::Daily);
        assert_eq!(
            next_occurrence(&r, at(2025, 3, 4, 9, 0)).unwrap().start,
            at(2025, 3, 4, 10, 0)
        );
        // Equal to start is not strictly after
        assert_eq!(
            next_occurrence(&r, at(2025, 3, 4, 10, 0)).unwrap().start,
            at(2025, 3, 5, 10, 0)
        );
    }

    #[test]
    fn test_next_weekly_wraps_a_full_week() {
        // Monday only; asked on a Monday after the slot.
        let r = rule("w", "09:00", "09:30", weekly(&[1]));
        assert_eq!(
            next_occurrence(&r, at(2025, 3, 3, 12, 0)).unwrap().start,
            at(2025, 3, 10, 9, 0)
        );
    }

    #[test]
    fn test_next_monthly_rolls_into_next_month() {
        let r = rule("m", "08:00", "09:00", monthly(&[1, 15]));
        assert_eq!(
            next_occurrence(&r, at(2025, 3, 20, 12, 0)).unwrap().start,
            at(2025, 4, 1, 8, 0)
        );
        assert_eq!(
            next_occurrence(&r, at(2025, 3, 10, 12, 0)).unwrap().start,
            at(2025, 3, 15, 8, 0)
        );
    }

    #[test]
    fn test_next_monthly_skips_short_months() {
        let r = rule("m", "08:00", "09:00", monthly(&[31]));
        // After Jan 31's slot, February and April have no 31st.
        assert_eq!(
            next_occurrence(&r, at(2025, 1, 31, 12, 0)).unwrap().start,
            at(2025, 3, 31, 8, 0)
        );
        assert_eq!(
            next_occurrence(&r, at(2025, 3, 31, 12, 0)).unwrap().start,
            at(2025, 5, 31, 8, 0)
        );
    }

    #[test]
    fn test_next_monthly_leap_day() {
        let r = rule("m", "08:00", "09:00", monthly(&[29]));
        assert_eq!(
            next_occurrence(&r, at(2025, 1, 30, 0, 0)).unwrap().start,
            at(2025, 3, 29, 8, 0)
        );
        assert_eq!(
            next_occurrence(&r, at(2024, 1, 30, 0, 0)).unwrap().start,
            at(2024, 2, 29, 8, 0)
        );
    }

    #[test]
    fn test_next_empty_selector_is_none() {
        let r = rule("w", "09:00", "10:00", weekly(&[]));
        assert!(next_occurrence(&r, at(2025, 3, 3, 0, 0)).is_none());
        let r = rule("m", "09:00", "10:00", monthly(&[]));
        assert!(next_occurrence(&r, at(2025, 3, 3, 0, 0)).is_none());
    }

    #[test]
    fn test_next_is_never_in_the_past_and_is_minimal() {
        let rules = [
            rule("d", "06:30", "07:00", Recurrence::Daily),
            rule("w", "18:00", "19:00", weekly(&[0, 2, 6])),
            rule("m", "12:00", "12:30", monthly(&[1, 10, 28, 31])),
        ];
        let mut after = at(2025, 1, 1, 0, 0);
        let limit = at(2025, 3, 1, 0, 0);
        while after < limit {
            for r in &rules {
                let occ = next_occurrence(r, after).unwrap();
                assert!(occ.start > after);
                // No matching start between `after` and the reported one.
                let mut probe = after.date();
                while probe < occ.start.date() {
                    if matches_date(&r.recurrence, probe) {
                        assert!(window_on(r, probe).start <= after, "{} skipped {probe}", r.id);
                    }
                    probe = probe.succ_opt().unwrap();
                }
            }
            after += TimeDelta::hours(7);
        }
    }

    #[test]
    fn test_active_rules_sorted_by_id() {
        let rules = vec![
            rule("b", "10:00", "12:00", Recurrence::Daily),
            rule("a", "11:00", "13:00", Recurrence::Daily),
            rule("c", "14:00", "15:00", Recurrence::Daily),
        ];
        let ids: Vec<_> = active_rules(&rules, at(2025, 3, 4, 11, 30))
            .into_iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(active_rules(&rules, at(2025, 3, 4, 13, 30)).is_empty());
    }

    #[test]
    fn test_system_next_earliest_then_smallest_id() {
        let rules = vec![
            rule("zeta", "10:00", "11:00", Recurrence::Daily),
            rule("alpha", "10:00", "10:30", Recurrence::Daily),
            rule("late", "12:00", "13:00", Recurrence::Daily),
        ];
        let (winner, occ) = system_next_occurrence(&rules, at(2025, 3, 4, 9, 0)).unwrap();
        assert_eq!(winner.id, "alpha");
        assert_eq!(occ.start, at(2025, 3, 4, 10, 0));

        let (winner, _) = system_next_occurrence(&rules, at(2025, 3, 4, 11, 0)).unwrap();
        assert_eq!(winner.id, "late");
    }

    #[test]
    fn test_system_next_ignores_disabled() {
        let mut early = rule("early", "08:00", "09:00", Recurrence::Daily);
        early.enabled = false;
        let rules = vec![early, rule("later", "10:00", "11:00", Recurrence::Daily)];
        let (winner, _) = system_next_occurrence(&rules, at(2025, 3, 4, 7, 0)).unwrap();
        assert_eq!(winner.id, "later");
        assert!(system_next_occurrence(&[], at(2025, 3, 4, 7, 0)).is_none());
    }

    #[test]
    fn test_weekday_numbering_sunday_zero() {
        let r = rule("w", "00:00", "23:59", Recurrence::Weekly {
            weekdays: BTreeSet::from([0]),
        });
        // 2025-03-02 is a Sunday.
        assert!(is_active_at(&r, at(2025, 3, 2, 12, 0)));
        assert!(!is_active_at(&r, at(2025, 3, 1, 12, 0)));
    }
}
