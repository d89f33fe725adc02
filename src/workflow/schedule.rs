use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Timelike, Weekday};

/// When a follow-up task becomes due relative to the submission.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpPolicy {
    pub lead_days: i64,
    pub day_start: NaiveTime,
    /// First hour that is no longer business time.
    pub day_end_hour: u32,
    pub skip_weekends: bool,
}

impl Default for FollowUpPolicy {
    fn default() -> Self {
        Self {
            lead_days: 4,
            day_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            day_end_hour: 18,
            skip_weekends: true,
        }
    }
}

/// `now + lead_days`, pulled into business hours and, when enabled, off
/// the weekend.
///
/// Early times move to `day_start` the same day, times at or after
/// `day_end_hour` move to `day_start` the next day. Saturday then shifts
/// by two days and Sunday by one.
pub fn follow_up_due(now: DateTime<FixedOffset>, policy: &FollowUpPolicy) -> DateTime<FixedOffset> {
    let due = now + Duration::days(policy.lead_days);
    let day_start = due - (due.time() - policy.day_start);

    let due = if due.hour() < policy.day_start.hour() {
        day_start
    } else if due.hour() >= policy.day_end_hour {
        day_start + Duration::days(1)
    } else {
        due
    };

    if !policy.skip_weekends {
        return due;
    }
    match due.weekday() {
        Weekday::Sat => due + Duration::days(2),
        Weekday::Sun => due + Duration::days(1),
        _ => due,
    }
}
