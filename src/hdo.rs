//! HDO tariff schedule evaluation
//!
//! The DIP feed lists the day's low-tariff windows as `HH:MM-HH:MM` ranges;
//! everything outside them is high tariff. This module parses the schedule
//! text and answers the two questions downstream automation cares about:
//! is the current instant inside a low-tariff window, and when is the next
//! switch. An end time of `24:00` is the vendor's end-of-day sentinel.

use crate::dip::HdoFeed;
use crate::error::{ElektraError, Result};
use crate::logging::get_logger;
use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

/// Minute-of-day value representing the end-of-day sentinel (`24:00`)
pub const END_OF_DAY_MIN: u16 = 24 * 60;

/// One low-tariff window in minute-of-day resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TariffWindow {
    /// Window start, minutes after midnight
    pub start_min: u16,

    /// Window end, minutes after midnight; `END_OF_DAY_MIN` means
    /// "through end of day"
    pub end_min: u16,
}

impl TariffWindow {
    /// Whether the window runs through the end of the day
    pub fn ends_at_midnight(&self) -> bool {
        self.end_min == END_OF_DAY_MIN
    }

    /// Render back to the vendor's `HH:MM-HH:MM` form
    pub fn render(&self) -> String {
        format!(
            "{}-{}",
            render_minute(self.start_min),
            render_minute(self.end_min)
        )
    }
}

fn render_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

/// Current tariff state for one supply point, recomputed every cycle
#[derive(Debug, Clone, PartialEq)]
pub struct HdoState {
    /// Whether the reference instant is inside a low-tariff window
    pub is_low_tariff: bool,

    /// The next low/high transition, portal-local
    pub next_switch: NaiveDateTime,

    /// The day's low-tariff windows
    pub today_schedule: Vec<TariffWindow>,

    /// Signal label from the feed
    pub signal_name: String,
}

impl HdoState {
    /// Render the schedule as `start-end; start-end` for publishing
    pub fn schedule_string(&self) -> String {
        let parts: Vec<String> = self.today_schedule.iter().map(TariffWindow::render).collect();
        parts.join("; ")
    }
}

/// Parse `HH:MM` to minute-of-day; `24:00` used as a start collapses to `00:00`
fn parse_start_minute(value: &str) -> Option<u16> {
    match parse_end_minute(value)? {
        END_OF_DAY_MIN => Some(0),
        minute => Some(minute),
    }
}

/// Parse `HH:MM` to minute-of-day; `24:00` parses to the end-of-day sentinel
fn parse_end_minute(value: &str) -> Option<u16> {
    if value == "24:00" {
        return Some(END_OF_DAY_MIN);
    }
    let (hours, minutes) = value.split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    let hours: u16 = hours.parse().ok()?;
    let minutes: u16 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Parse semicolon-separated time ranges into windows
///
/// Malformed segments (no dash, unparsable times) are logged and skipped so
/// one bad entry never discards the whole schedule.
pub fn parse_windows(schedule_text: &str) -> Vec<TariffWindow> {
    let logger = get_logger("hdo");
    let mut windows = Vec::new();
    for part in schedule_text.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((start_s, end_s)) = part.split_once('-') else {
            logger.warn(&format!("Skipping malformed time range: {}", part));
            continue;
        };
        let start = parse_start_minute(start_s.trim());
        let end = parse_end_minute(end_s.trim());
        match (start, end) {
            (Some(start_min), Some(end_min)) => windows.push(TariffWindow { start_min, end_min }),
            _ => logger.warn(&format!("Skipping malformed time range: {}", part)),
        }
    }
    windows
}

fn minute_of_day(time: NaiveTime) -> u16 {
    (time.hour() * 60 + time.minute()) as u16
}

/// Whether the given time-of-day falls within any low-tariff window
///
/// Membership is `[start, end)`; a window ending at the sentinel covers
/// everything from its start through the end of the day.
pub fn is_low_tariff(now_time: NaiveTime, windows: &[TariffWindow]) -> bool {
    let now_min = minute_of_day(now_time);
    windows.iter().any(|w| {
        if w.ends_at_midnight() {
            now_min >= w.start_min
        } else {
            w.start_min <= now_min && now_min < w.end_min
        }
    })
}

/// The next tariff switch (low to high or high to low) after `now`
///
/// Boundaries are every window start plus every non-sentinel end. The first
/// boundary strictly after now's time-of-day wins; with none left today, the
/// earliest boundary (or midnight, for an empty set) lands on tomorrow.
pub fn next_switch(now: NaiveDateTime, windows: &[TariffWindow]) -> NaiveDateTime {
    let mut boundaries: Vec<u16> = Vec::new();
    for w in windows {
        boundaries.push(w.start_min);
        if !w.ends_at_midnight() {
            boundaries.push(w.end_min);
        }
    }
    boundaries.sort_unstable();

    let now_min = minute_of_day(now.time());
    let today = now.date();

    for &b in &boundaries {
        if b > now_min {
            return today.and_time(time_from_minute(b));
        }
    }

    let first = boundaries.first().copied().unwrap_or(0);
    (today + Duration::days(1)).and_time(time_from_minute(first))
}

fn time_from_minute(minute: u16) -> NaiveTime {
    NaiveTime::from_hms_opt(u32::from(minute) / 60, u32::from(minute) % 60, 0)
        .unwrap_or(NaiveTime::MIN)
}

/// Evaluate the tariff feed at the reference instant
///
/// Reads exactly the first signal entry; an empty signal list fails with
/// `NoSignalData`, an empty schedule text with `NoSchedule`.
pub fn evaluate(feed: &HdoFeed, now: NaiveDateTime) -> Result<HdoState> {
    let signal = feed.signals.first().ok_or(ElektraError::NoSignalData)?;
    if signal.casy.is_empty() {
        return Err(ElektraError::NoSchedule);
    }

    let today_schedule = parse_windows(&signal.casy);
    let is_low = is_low_tariff(now.time(), &today_schedule);
    let next = next_switch(now, &today_schedule);

    Ok(HdoState {
        is_low_tariff: is_low,
        next_switch: next,
        today_schedule,
        signal_name: signal.signal.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dip::HdoSignal;
    use chrono::NaiveDate;

    const REFERENCE_SCHEDULE: &str =
        "00:00-08:00;   09:00-12:00;   13:00-15:00;   16:00-19:00;   20:00-24:00";

    fn windows() -> Vec<TariffWindow> {
        parse_windows(REFERENCE_SCHEDULE)
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn parses_reference_schedule() {
        let windows = windows();
        assert_eq!(windows.len(), 5);
        assert_eq!(windows[0], TariffWindow { start_min: 0, end_min: 480 });
        assert_eq!(
            windows[4],
            TariffWindow {
                start_min: 1200,
                end_min: END_OF_DAY_MIN
            }
        );
        assert!(windows[4].ends_at_midnight());
        assert!(!windows[0].ends_at_midnight());
    }

    #[test]
    fn malformed_segments_are_skipped() {
        let windows = parse_windows("00:00-08:00; nonsense; 09:00; 13:00-aa; ;20:00-24:00");
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].start_min, 1200);
    }

    #[test]
    fn rejects_out_of_range_times() {
        assert!(parse_windows("25:00-26:00").is_empty());
        assert!(parse_windows("12:60-13:00").is_empty());
    }

    #[test]
    fn low_tariff_membership() {
        let windows = windows();
        assert!(is_low_tariff(at(7, 59).time(), &windows));
        assert!(!is_low_tariff(at(8, 30).time(), &windows));
        assert!(is_low_tariff(at(23, 59).time(), &windows));
        // Boundaries: start inclusive, end exclusive
        assert!(is_low_tariff(at(9, 0).time(), &windows));
        assert!(!is_low_tariff(at(12, 0).time(), &windows));
    }

    #[test]
    fn full_day_window_is_always_low() {
        let windows = parse_windows("00:00-24:00");
        assert!(is_low_tariff(at(0, 0).time(), &windows));
        assert!(is_low_tariff(at(12, 0).time(), &windows));
        assert!(is_low_tariff(at(23, 59).time(), &windows));
    }

    #[test]
    fn next_switch_same_day() {
        let windows = windows();
        assert_eq!(next_switch(at(3, 0), &windows), at(8, 0));
        assert_eq!(next_switch(at(8, 30), &windows), at(9, 0));
        assert_eq!(next_switch(at(19, 30), &windows), at(20, 0));
    }

    #[test]
    fn next_switch_wraps_to_tomorrow() {
        let windows = windows();
        let next = next_switch(at(22, 0), &windows);
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2026, 2, 16)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn next_switch_empty_schedule_is_midnight_tomorrow() {
        let next = next_switch(at(10, 0), &[]);
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2026, 2, 16)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn evaluate_full_feed() {
        let feed = HdoFeed {
            signals: vec![HdoSignal {
                signal: "EVV2".to_string(),
                den: "Neděle".to_string(),
                datum: "15.02.2026".to_string(),
                casy: REFERENCE_SCHEDULE.to_string(),
            }],
        };
        let state = evaluate(&feed, at(7, 59)).unwrap();
        assert!(state.is_low_tariff);
        assert_eq!(state.next_switch, at(8, 0));
        assert_eq!(state.signal_name, "EVV2");
        assert_eq!(state.today_schedule.len(), 5);
        assert_eq!(
            state.schedule_string(),
            "00:00-08:00; 09:00-12:00; 13:00-15:00; 16:00-19:00; 20:00-24:00"
        );
    }

    #[test]
    fn evaluate_uses_first_signal_only() {
        let feed = HdoFeed {
            signals: vec![
                HdoSignal {
                    signal: "EVV2".to_string(),
                    den: String::new(),
                    datum: String::new(),
                    casy: "00:00-08:00".to_string(),
                },
                HdoSignal {
                    signal: "OTHER".to_string(),
                    den: String::new(),
                    datum: String::new(),
                    casy: "10:00-11:00".to_string(),
                },
            ],
        };
        let state = evaluate(&feed, at(10, 30)).unwrap();
        assert_eq!(state.signal_name, "EVV2");
        assert!(!state.is_low_tariff);
    }

    #[test]
    fn evaluate_error_conditions() {
        let empty = HdoFeed { signals: Vec::new() };
        assert!(matches!(
            evaluate(&empty, at(0, 0)),
            Err(ElektraError::NoSignalData)
        ));

        let no_schedule = HdoFeed {
            signals: vec![HdoSignal {
                signal: "EVV2".to_string(),
                den: String::new(),
                datum: String::new(),
                casy: String::new(),
            }],
        };
        assert!(matches!(
            evaluate(&no_schedule, at(0, 0)),
            Err(ElektraError::NoSchedule)
        ));
    }
}
