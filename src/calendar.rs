/// Recurring weekly availability for a doctor.
///
/// A `WeeklySchedule` holds the windows during which a doctor may be
/// booked. Windows repeat every week and never overlap on the same day.
use crate::error::{ClinicError, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// A recurring (weekday, start, end) interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub day: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ScheduleWindow {
    /// Create a new window with validation.
    pub fn new(day: Weekday, start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if end <= start {
            return Err(ClinicError::ValidationFailed(format!(
                "Window end {} must be after start {}",
                end.format("%H:%M"),
                start.format("%H:%M")
            )));
        }

        Ok(ScheduleWindow { day, start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Check if this window overlaps with another on the same day.
    pub fn overlaps_with(&self, other: &ScheduleWindow) -> bool {
        self.day == other.day && self.start < other.end && self.end > other.start
    }

    /// Check if a time of day falls within this window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    windows: Vec<ScheduleWindow>,
}

impl WeeklySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all windows ordered by weekday then start time.
    pub fn windows(&self) -> &[ScheduleWindow] {
        &self.windows
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Add a window, rejecting any overlap with an existing window on the same day.
    pub fn add_window(&mut self, window: ScheduleWindow) -> Result<()> {
        if let Some(existing) = self.windows.iter().find(|w| w.overlaps_with(&window)) {
            return Err(ClinicError::ValidationFailed(format!(
                "Window overlaps with existing window on {}: {} - {}",
                existing.day,
                existing.start.format("%H:%M"),
                existing.end.format("%H:%M")
            )));
        }

        self.windows.push(window);
        self.windows
            .sort_by_key(|w| (w.day.num_days_from_monday(), w.start));
        Ok(())
    }

    /// Remove the window starting at `start` on `day`.
    pub fn remove_window(&mut self, day: Weekday, start: NaiveTime) -> bool {
        let before = self.windows.len();
        self.windows.retain(|w| !(w.day == day && w.start == start));
        self.windows.len() != before
    }

    /// Windows for a single weekday.
    pub fn windows_on(&self, day: Weekday) -> impl Iterator<Item = &ScheduleWindow> {
        self.windows.iter().filter(move |w| w.day == day)
    }

    /// Whether the time of day of `at` falls inside one of that weekday's windows.
    pub fn covers(&self, at: NaiveDateTime) -> bool {
        let time = at.time();
        self.windows_on(at.weekday()).any(|w| w.contains(time))
    }

    /// Generate candidate slot starts for a date, stepping by the slot length.
    pub fn slot_starts_on(&self, date: NaiveDate, slot_length: Duration) -> Vec<NaiveDateTime> {
        let mut starts = Vec::new();
        if slot_length <= Duration::zero() {
            return starts;
        }

        for window in self.windows_on(date.weekday()) {
            let mut offset = Duration::zero();
            while offset + slot_length <= window.duration() {
                starts.push(date.and_time(window.start) + offset);
                offset = offset + slot_length;
            }
        }

        starts
    }
}

impl std::fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WeeklySchedule(windows={})", self.windows.len())
    }
}
