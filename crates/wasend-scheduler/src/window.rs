//! Daily send-window math: "is this instant inside the allowed window"
//! and "pick a jittered instant inside the window".
//!
//! Windows are daily recurring clock-time intervals, closed at both ends.
//! A window whose start is later than its end spans midnight:
//! `[22:00, 02:00]` contains 23:30 and 01:15 but not 12:00.
//!
//! Everything here is pure; randomness comes from an injected `Rng`.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use wasend_core::{Result, WasendError};

/// A wall-clock time of day, minute resolution, parsed from `"HH:mm"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(WasendError::validation(format!("invalid clock time {hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    /// Parse `"HH:mm"`.
    pub fn parse(s: &str) -> Result<Self> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| WasendError::validation(format!("invalid clock time '{s}'")))?;
        let hour: u8 = h
            .parse()
            .map_err(|_| WasendError::validation(format!("invalid clock time '{s}'")))?;
        let minute: u8 = m
            .parse()
            .map_err(|_| WasendError::validation(format!("invalid clock time '{s}'")))?;
        Self::new(hour, minute)
    }

    pub fn minutes_of_day(&self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }

    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self { hour: instant.hour() as u8, minute: instant.minute() as u8 }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = WasendError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ClockTime> for String {
    fn from(t: ClockTime) -> String {
        t.to_string()
    }
}

/// Daily recurring interval during which sends are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl SendWindow {
    pub fn new(start: ClockTime, end: ClockTime) -> Result<Self> {
        if start == end {
            return Err(WasendError::validation(format!(
                "degenerate send window {start}-{end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(ClockTime::parse(start)?, ClockTime::parse(end)?)
    }

    /// True iff `target` falls inside the window, boundaries included.
    pub fn contains(&self, target: ClockTime) -> bool {
        if self.start <= self.end {
            self.start <= target && target <= self.end
        } else {
            // Spans midnight.
            target >= self.start || target <= self.end
        }
    }

    /// Window length in seconds (length of the closed minute interval).
    fn span_seconds(&self) -> i64 {
        let start = self.start.minutes_of_day() as i64;
        let end = self.end.minutes_of_day() as i64;
        (end - start).rem_euclid(24 * 60) * 60
    }

    /// The window occurrence (open/close instants) that contains `now` or
    /// is the nearest one after it.
    fn occurrence_at_or_after(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start_time = NaiveTime::from_hms_opt(self.start.hour as u32, self.start.minute as u32, 0)
            .unwrap_or_default();
        let span = Duration::seconds(self.span_seconds());
        // A midnight-spanning occurrence can open the previous day and
        // still be live now, so walk from yesterday forward.
        for day_offset in -1..=1 {
            let day = now.date_naive() + Duration::days(day_offset);
            let open = Utc.from_utc_datetime(&day.and_time(start_time));
            let close = open + span;
            if close >= now {
                return (open, close);
            }
        }
        // Unreachable for valid windows; fall back to tomorrow's open.
        let day = now.date_naive() + Duration::days(1);
        let open = Utc.from_utc_datetime(&day.and_time(start_time));
        (open, open + span)
    }

    /// Uniformly sample an instant inside `[lo, hi]`.
    fn sample_between(lo: DateTime<Utc>, hi: DateTime<Utc>, rng: &mut impl Rng) -> DateTime<Utc> {
        let span = (hi - lo).num_seconds().max(0);
        lo + Duration::seconds(rng.gen_range(0..=span))
    }

    /// Uniformly sample a clock time inside the window, boundaries
    /// included.
    pub fn random_clock_time(&self, rng: &mut impl Rng) -> ClockTime {
        let offset = rng.gen_range(0..=self.span_seconds() / 60);
        let minutes = (self.start.minutes_of_day() as i64 + offset).rem_euclid(24 * 60) as u32;
        ClockTime { hour: (minutes / 60) as u8, minute: (minutes % 60) as u8 }
    }

    /// Next permissible send instant at or after `now`, jittered so
    /// recipients are spread across the window instead of stacked on its
    /// open. If `now` is inside the window the sample covers `[now,
    /// close]`; if today's window already closed it rolls forward to the
    /// next occurrence.
    pub fn next_send_instant(&self, now: DateTime<Utc>, rng: &mut impl Rng) -> DateTime<Utc> {
        let (open, close) = self.occurrence_at_or_after(now);
        let lo = now.max(open);
        Self::sample_between(lo, close, rng)
    }

    /// Keep `instant` when it already lands inside the window; otherwise
    /// move it to a jittered instant in the nearest future occurrence.
    /// Used for nurturing follow-ups whose relative delay escapes the
    /// step's own window.
    pub fn clamp_into(&self, instant: DateTime<Utc>, rng: &mut impl Rng) -> DateTime<Utc> {
        if self.contains(ClockTime::from_instant(instant)) {
            return instant;
        }
        let (open, close) = self.occurrence_at_or_after(instant);
        Self::sample_between(instant.max(open), close, rng)
    }
}

impl std::fmt::Display for SendWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn window(start: &str, end: &str) -> SendWindow {
        SendWindow::parse(start, end).unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ClockTime::parse("25:00").is_err());
        assert!(ClockTime::parse("10:60").is_err());
        assert!(ClockTime::parse("ten").is_err());
        assert!(SendWindow::parse("10:00", "10:00").is_err());
    }

    #[test]
    fn contains_is_closed_on_both_ends() {
        let w = window("10:00", "18:00");
        assert!(w.contains(ClockTime::parse("10:00").unwrap()));
        assert!(w.contains(ClockTime::parse("18:00").unwrap()));
        assert!(w.contains(ClockTime::parse("13:37").unwrap()));
        assert!(!w.contains(ClockTime::parse("09:59").unwrap()));
        assert!(!w.contains(ClockTime::parse("18:01").unwrap()));
    }

    #[test]
    fn contains_handles_midnight_wraparound() {
        let w = window("22:00", "02:00");
        assert!(w.contains(ClockTime::parse("22:00").unwrap()));
        assert!(w.contains(ClockTime::parse("23:30").unwrap()));
        assert!(w.contains(ClockTime::parse("00:15").unwrap()));
        assert!(w.contains(ClockTime::parse("02:00").unwrap()));
        assert!(!w.contains(ClockTime::parse("02:01").unwrap()));
        assert!(!w.contains(ClockTime::parse("12:00").unwrap()));
        assert!(!w.contains(ClockTime::parse("21:59").unwrap()));
    }

    #[test]
    fn before_window_samples_today() {
        let w = window("10:00", "18:00");
        let now = at("2026-03-02T09:00:00Z");
        let mut rng = rng();
        for _ in 0..200 {
            let instant = w.next_send_instant(now, &mut rng);
            assert!(instant >= at("2026-03-02T10:00:00Z"));
            assert!(instant <= at("2026-03-02T18:00:00Z"));
        }
    }

    #[test]
    fn inside_window_samples_between_now_and_close() {
        let w = window("10:00", "18:00");
        let now = at("2026-03-02T15:00:00Z");
        let mut rng = rng();
        for _ in 0..200 {
            let instant = w.next_send_instant(now, &mut rng);
            assert!(instant >= now);
            assert!(instant <= at("2026-03-02T18:00:00Z"));
        }
    }

    #[test]
    fn after_window_rolls_to_tomorrow() {
        let w = window("10:00", "18:00");
        let now = at("2026-03-02T19:00:00Z");
        let mut rng = rng();
        for _ in 0..200 {
            let instant = w.next_send_instant(now, &mut rng);
            assert!(instant >= at("2026-03-03T10:00:00Z"));
            assert!(instant <= at("2026-03-03T18:00:00Z"));
        }
    }

    #[test]
    fn wraparound_occurrence_open_since_yesterday() {
        let w = window("22:00", "02:00");
        // 01:00 — inside the occurrence that opened yesterday 22:00.
        let now = at("2026-03-02T01:00:00Z");
        let mut rng = rng();
        for _ in 0..200 {
            let instant = w.next_send_instant(now, &mut rng);
            assert!(instant >= now);
            assert!(instant <= at("2026-03-02T02:00:00Z"));
        }
    }

    #[test]
    fn samples_spread_across_the_window() {
        let w = window("10:00", "18:00");
        let now = at("2026-03-02T00:00:00Z");
        let mid = at("2026-03-02T14:00:00Z");
        let mut rng = rng();
        let mut early = 0;
        let mut late = 0;
        for _ in 0..1000 {
            if w.next_send_instant(now, &mut rng) < mid { early += 1 } else { late += 1 }
        }
        // Roughly uniform: both halves must be well represented.
        assert!(early > 300, "early half underrepresented: {early}");
        assert!(late > 300, "late half underrepresented: {late}");
    }

    #[test]
    fn random_clock_time_stays_in_window() {
        let mut rng = rng();
        for w in [window("10:00", "18:00"), window("22:00", "02:00")] {
            for _ in 0..500 {
                let t = w.random_clock_time(&mut rng);
                assert!(w.contains(t), "{t} escaped {w}");
            }
        }
    }

    #[test]
    fn clamp_keeps_in_window_instants_exact() {
        let w = window("09:00", "23:00");
        let instant = at("2026-03-02T12:00:00Z");
        assert_eq!(w.clamp_into(instant, &mut rng()), instant);
    }

    #[test]
    fn clamp_defers_out_of_window_instants() {
        let w = window("09:00", "17:00");
        let late = at("2026-03-02T20:00:00Z");
        let mut rng = rng();
        for _ in 0..200 {
            let clamped = w.clamp_into(late, &mut rng);
            assert!(clamped >= at("2026-03-03T09:00:00Z"));
            assert!(clamped <= at("2026-03-03T17:00:00Z"));
        }
    }
}
