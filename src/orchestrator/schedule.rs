// Weekly schedule gate
// Decides once per tick whether today's flow may run now

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Days `weekday_start..weekday_end` run all day, `weekday_end` runs until
/// `stop_hour`. Weekdays are ISO numbered, 1 = Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WindowBounds")]
pub struct ScheduleWindow {
    weekday_start: u32,
    weekday_end: u32,
    stop_hour: u32,
}

/// Unchecked window fields as they appear in serialized config
#[derive(Deserialize)]
struct WindowBounds {
    weekday_start: u32,
    weekday_end: u32,
    stop_hour: u32,
}

impl TryFrom<WindowBounds> for ScheduleWindow {
    type Error = anyhow::Error;

    fn try_from(bounds: WindowBounds) -> Result<Self> {
        Self::new(bounds.weekday_start, bounds.weekday_end, bounds.stop_hour)
    }
}

impl ScheduleWindow {
    pub fn new(weekday_start: u32, weekday_end: u32, stop_hour: u32) -> Result<Self> {
        if !(1..=7).contains(&weekday_start) || !(1..=7).contains(&weekday_end) {
            bail!(
                "Weekdays must be between 1 (Monday) and 7 (Sunday), got {}..{}",
                weekday_start,
                weekday_end
            );
        }
        if weekday_start > weekday_end {
            bail!(
                "WEEKDAY_START ({}) must not be after WEEKDAY_END ({})",
                weekday_start,
                weekday_end
            );
        }
        if stop_hour > 23 {
            bail!("STOP_HOUR must be between 0 and 23, got {}", stop_hour);
        }

        Ok(Self {
            weekday_start,
            weekday_end,
            stop_hour,
        })
    }

    pub fn weekday_start(&self) -> u32 {
        self.weekday_start
    }

    pub fn weekday_end(&self) -> u32 {
        self.weekday_end
    }

    pub fn stop_hour(&self) -> u32 {
        self.stop_hour
    }

    pub fn contains(&self, weekday: u32, hour: u32) -> bool {
        if weekday < self.weekday_start || weekday > self.weekday_end {
            false
        } else if weekday < self.weekday_end {
            true
        } else {
            hour < self.stop_hour
        }
    }

    /// Window check for a moment already expressed in the venue timezone
    pub fn contains_time<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.contains(now.weekday().number_from_monday(), now.hour())
    }
}

/// Date of the last daily flow. In memory only, a restart re-runs today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMarker(Option<NaiveDate>);

impl RunMarker {
    pub fn last_run(&self) -> Option<NaiveDate> {
        self.0
    }

    pub fn has_run_on(&self, date: NaiveDate) -> bool {
        self.0 == Some(date)
    }

    pub fn mark(&mut self, date: NaiveDate) {
        self.0 = Some(date);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    AlreadyRan,
    OutsideWindow,
}

#[derive(Debug, Clone)]
pub struct ScheduleGate {
    window: ScheduleWindow,
    marker: RunMarker,
}

impl ScheduleGate {
    pub fn new(window: ScheduleWindow) -> Self {
        Self {
            window,
            marker: RunMarker::default(),
        }
    }

    pub fn window(&self) -> &ScheduleWindow {
        &self.window
    }

    pub fn marker(&self) -> RunMarker {
        self.marker
    }

    /// Evaluate the gate, marking today as run when it passes
    pub fn check<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> GateDecision {
        let today = now.date_naive();

        if self.marker.has_run_on(today) {
            GateDecision::AlreadyRan
        } else if !self.window.contains_time(now) {
            GateDecision::OutsideWindow
        } else {
            self.marker.mark(today);
            GateDecision::Run
        }
    }
}
