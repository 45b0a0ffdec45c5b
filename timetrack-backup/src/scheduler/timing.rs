//! Wall-clock arithmetic for the scheduler: times of day, next-run lookup and
//! missed-run detection. Everything here is pure apart from [`SystemClock`].

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source of "now". The scheduler reads time only through this trait.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Step used to walk out of a DST gap.
const GAP_STEP_MINUTES: i64 = 15;

/// Longest gap walked before giving up (a skipped calendar day plus margin).
const MAX_GAP_MINUTES: i64 = 48 * 60;

/// A configured time of day, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduleTime(NaiveTime);

impl ScheduleTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn time(self) -> NaiveTime {
        self.0
    }

    /// This time of day on `date`, in local time.
    pub fn on(self, date: NaiveDate) -> Option<DateTime<Local>> {
        self.on_in(&Local, date)
    }

    /// This time of day on `date` in `tz`. A time inside a DST gap maps to the
    /// first valid instant after it; an ambiguous time takes the earlier one.
    pub fn on_in<Tz: TimeZone>(self, tz: &Tz, date: NaiveDate) -> Option<DateTime<Tz>> {
        resolve_local(tz, date.and_time(self.0))
    }
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    let step = Duration::minutes(GAP_STEP_MINUTES);
    let mut candidate = naive;
    for _ in 0..=MAX_GAP_MINUTES / GAP_STEP_MINUTES {
        if let Some(at) = tz.from_local_datetime(&candidate).earliest() {
            return Some(at);
        }
        candidate = candidate.checked_add_signed(step)?;
    }
    None
}

impl FromStr for ScheduleTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got {s:?}"))?;
        let valid = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
        if !valid(hour) || !valid(minute) {
            return Err(format!("expected HH:MM, got {s:?}"));
        }
        let hour: u32 = hour.parse().map_err(|_| format!("invalid hour in {s:?}"))?;
        let minute: u32 = minute.parse().map_err(|_| format!("invalid minute in {s:?}"))?;
        Self::new(hour, minute).ok_or_else(|| format!("time out of range: {s:?}"))
    }
}

impl TryFrom<String> for ScheduleTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScheduleTime> for String {
    fn from(value: ScheduleTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// Earliest configured occurrence strictly after `now`: later today if any
/// time remains, otherwise the earliest time tomorrow. `None` only for an
/// empty schedule.
pub fn next_run_after<Tz: TimeZone>(times: &[ScheduleTime], now: DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();
    let later_today = times
        .iter()
        .filter_map(|t| t.on_in(&tz, today))
        .filter(|at| *at > now)
        .min();
    if later_today.is_some() {
        return later_today;
    }

    let tomorrow = today.succ_opt()?;
    times.iter().filter_map(|t| t.on_in(&tz, tomorrow)).min()
}

/// Missed-run detection performed once at startup.
///
/// A run is due when there is no automatic backup at all, when none has ever
/// been recorded, when one of today's scheduled times passed after the last
/// automatic backup, or when the last automatic backup was taken on an earlier
/// calendar day.
pub fn run_is_due<Tz: TimeZone>(
    times: &[ScheduleTime],
    last_auto: Option<DateTime<Tz>>,
    has_automatic: bool,
    now: DateTime<Tz>,
) -> bool {
    if !has_automatic {
        return true;
    }
    let Some(last) = last_auto else {
        return true;
    };

    let tz = now.timezone();
    let today = now.date_naive();
    let passed_since_last = times
        .iter()
        .filter_map(|t| t.on_in(&tz, today))
        .any(|at| at > last && at <= now);

    passed_since_last || last.date_naive() < today
}
