//! Resolves `scheduled_at` and `recurring` inputs, and computes drift-free
//! next-run times (spec §4.3).

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};

use crate::error::ActionQueueError;
use crate::model::RecurringSpec;

/// Raw input accepted for `scheduled_at`: an explicit Unix timestamp, an
/// RFC3339 date string, or nothing (resolves to `now`).
#[derive(Debug, Clone)]
pub enum ScheduledAtInput {
    Now,
    UnixSeconds(i64),
    DateTimeString(String),
}

impl Default for ScheduledAtInput {
    fn default() -> Self {
        ScheduledAtInput::Now
    }
}

/// Raw input accepted for `recurring`: a non-negative integer number of
/// seconds, or a relative offset string.
#[derive(Debug, Clone)]
pub enum RecurringInput {
    Seconds(i64),
    Offset(String),
}

pub struct Scheduler;

impl Scheduler {
    /// Resolves `scheduled_at`. Empty/zero input resolves to `now`.
    pub fn resolve_scheduled_at(
        input: ScheduledAtInput,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ActionQueueError> {
        match input {
            ScheduledAtInput::Now => Ok(now),
            ScheduledAtInput::UnixSeconds(0) => Ok(now),
            ScheduledAtInput::UnixSeconds(secs) => Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| ActionQueueError::InvalidSchedule(secs.to_string())),
            ScheduledAtInput::DateTimeString(s) if s.trim().is_empty() => Ok(now),
            ScheduledAtInput::DateTimeString(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ActionQueueError::InvalidSchedule(s)),
        }
    }

    /// Validates and normalizes a `recurring` input into a [`RecurringSpec`].
    pub fn resolve_recurring(input: Option<RecurringInput>) -> Result<Option<RecurringSpec>, ActionQueueError> {
        let Some(input) = input else { return Ok(None) };
        match input {
            RecurringInput::Seconds(secs) if secs >= 0 => Ok(Some(RecurringSpec::Interval(secs))),
            RecurringInput::Seconds(secs) => Err(ActionQueueError::InvalidRecurring(secs.to_string())),
            RecurringInput::Offset(s) => {
                // Validate eagerly: a string recurring spec must parse as a
                // relative offset against an arbitrary pivot, or it is
                // rejected at registration time rather than at reschedule
                // time.
                parse_relative(&s, Utc::now()).map_err(|_| ActionQueueError::InvalidRecurring(s.clone()))?;
                Ok(Some(RecurringSpec::Offset(s)))
            }
        }
    }

    /// Drift-free next-run computation.
    ///
    /// For a numeric interval `R`: `next = base + R`; if `next <= now`,
    /// advance by the smallest multiple of `R` that lands strictly in the
    /// future.
    ///
    /// For a string offset `R`: `next = parse(R, base)`. If `next <= now`
    /// and `R` does not already begin with `"next"`, retry as
    /// `parse("next " + R, base)`. Then iterate `next = parse(R, next)` up
    /// to 10 times while `next <= now`.
    pub fn next_run(
        base: DateTime<Utc>,
        recurring: &RecurringSpec,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ActionQueueError> {
        match recurring {
            RecurringSpec::Interval(r) => Self::next_run_numeric(base, *r, now),
            RecurringSpec::Offset(s) => Self::next_run_offset(base, s, now),
        }
    }

    fn next_run_numeric(base: DateTime<Utc>, r: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, ActionQueueError> {
        if r <= 0 {
            return Err(ActionQueueError::RecurringInThePast {
                job_id: 0,
                recurring: r.to_string(),
            });
        }
        let mut next = base + Duration::seconds(r);
        if next <= now {
            let gap = (now - next).num_seconds();
            let k = gap / r + 1;
            next = next + Duration::seconds(k * r);
        }
        if next <= now {
            return Err(ActionQueueError::RecurringInThePast {
                job_id: 0,
                recurring: r.to_string(),
            });
        }
        Ok(next)
    }

    fn next_run_offset(base: DateTime<Utc>, s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, ActionQueueError> {
        let mut next = parse_relative(s, base).map_err(|_| ActionQueueError::InvalidRecurring(s.to_string()))?;

        if next <= now && !s.trim().to_lowercase().starts_with("next") {
            let alt = format!("next {s}");
            if let Ok(candidate) = parse_relative(&alt, base) {
                next = candidate;
            }
        }

        let mut attempts = 0;
        while next <= now && attempts < 10 {
            next = parse_relative(s, next).map_err(|_| ActionQueueError::InvalidRecurring(s.to_string()))?;
            attempts += 1;
        }

        if next <= now {
            return Err(ActionQueueError::RecurringInThePast {
                job_id: 0,
                recurring: s.to_string(),
            });
        }
        Ok(next)
    }
}

/// A narrow relative-offset grammar: `"[+]N unit[s]"` (second/minute/hour/
/// day/week) or `"next <weekday>"`. This is deliberately not a full
/// cron/NLP date parser (spec §1 Non-goals): exactly the two forms spec §3
/// calls out ("+1 hour", "next monday").
fn parse_relative(spec: &str, pivot: DateTime<Utc>) -> Result<DateTime<Utc>, ()> {
    let trimmed = spec.trim();
    let lower = trimmed.to_lowercase();

    if let Some(rest) = lower.strip_prefix("next ") {
        return parse_next_weekday(rest.trim(), pivot);
    }

    parse_numeric_offset(trimmed, pivot)
}

fn parse_numeric_offset(spec: &str, pivot: DateTime<Utc>) -> Result<DateTime<Utc>, ()> {
    let spec = spec.trim().strip_prefix('+').unwrap_or(spec.trim());
    let mut parts = spec.split_whitespace();
    let amount: i64 = parts.next().ok_or(())?.parse().map_err(|_| ())?;
    let unit = parts.next().ok_or(())?.to_lowercase();
    if parts.next().is_some() {
        return Err(());
    }

    let duration = match unit.trim_end_matches('s') {
        "second" => Duration::seconds(amount),
        "minute" => Duration::minutes(amount),
        "hour" => Duration::hours(amount),
        "day" => Duration::days(amount),
        "week" => Duration::weeks(amount),
        _ => return Err(()),
    };
    Ok(pivot + duration)
}

fn parse_next_weekday(name: &str, pivot: DateTime<Utc>) -> Result<DateTime<Utc>, ()> {
    let target: Weekday = match name {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        "sunday" => Weekday::Sun,
        _ => return Err(()),
    };

    let pivot_date = pivot.date_naive();
    let mut days_ahead = (target.num_days_from_monday() as i64) - (pivot_date.weekday().num_days_from_monday() as i64);
    if days_ahead <= 0 {
        days_ahead += 7;
    }
    let next_date = pivot_date + Duration::days(days_ahead);
    let next_midnight = next_date
        .and_hms_opt(0, 0, 0)
        .ok_or(())?;
    Ok(Utc.from_utc_datetime(&next_midnight))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn numeric_next_run_basic() {
        let next = Scheduler::next_run(ts(1000), &RecurringSpec::Interval(60), ts(1000)).unwrap();
        assert_eq!(next, ts(1060));
    }

    #[test]
    fn numeric_next_run_drift_free_jump() {
        // base=1000, R=60, now=1250: the naive next slot (1060) is already
        // past `now`, so the schedule jumps by the smallest multiple of 60
        // that lands strictly in the future: 1060 + 4*60 = 1300.
        let next = Scheduler::next_run(ts(1000), &RecurringSpec::Interval(60), ts(1250)).unwrap();
        assert_eq!(next, ts(1300));
    }

    #[test]
    fn numeric_sequence_after_k_runs_equals_base_plus_i_times_r() {
        let base = ts(0);
        let r = 60;
        let mut scheduled_at = base;
        for i in 1..=5 {
            let now = scheduled_at; // run "on time"
            let next = Scheduler::next_run(scheduled_at, &RecurringSpec::Interval(r), now).unwrap();
            assert_eq!(next, base + Duration::seconds(i * r));
            scheduled_at = next;
        }
    }

    #[test]
    fn string_offset_plus_one_hour() {
        let base = ts(0);
        let next = Scheduler::next_run(base, &RecurringSpec::Offset("+1 hour".into()), base).unwrap();
        assert_eq!(next, base + Duration::hours(1));
    }

    #[test]
    fn zero_or_negative_interval_is_rejected() {
        assert!(Scheduler::next_run(ts(0), &RecurringSpec::Interval(0), ts(0)).is_err());
    }

    #[test]
    fn resolve_scheduled_at_empty_resolves_to_now() {
        let now = ts(500);
        let resolved = Scheduler::resolve_scheduled_at(ScheduledAtInput::Now, now).unwrap();
        assert_eq!(resolved, now);
    }

    #[test]
    fn resolve_scheduled_at_rejects_garbage_string() {
        let err = Scheduler::resolve_scheduled_at(ScheduledAtInput::DateTimeString("not a date".into()), ts(0));
        assert!(err.is_err());
    }
}
