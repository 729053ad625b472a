// Daily reset window detection

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Scheduler phase. The loop is `Active` between resets and `Resetting` while a
/// new session is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Active,
    Resetting,
}

/// Half-open window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ResetWindow {
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        self.start <= now && now < self.end
    }
}

/// Fixed time-of-day reset with a short tolerance window, so a coarse polling
/// interval cannot step over the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSchedule {
    pub reset_time: NaiveTime,
    pub window: Duration,
}

impl ResetSchedule {
    pub fn new(reset_time: NaiveTime, window: Duration) -> Self {
        Self { reset_time, window }
    }

    /// The reset window opening on `date`
    pub fn window_on(&self, date: NaiveDate) -> ResetWindow {
        let start = date.and_time(self.reset_time);
        ResetWindow { start, end: start + self.window }
    }

    /// Today's and tomorrow's windows relative to `now`
    pub fn windows_around(&self, now: NaiveDateTime) -> (ResetWindow, ResetWindow) {
        let today = now.date();
        let tomorrow = today.succ_opt().unwrap_or(today);
        (self.window_on(today), self.window_on(tomorrow))
    }

    /// Trading date whose reset should run now, if any.
    ///
    /// Both the window opening today and the one that opened yesterday are
    /// checked (the latter matters when a window straddles midnight), and a date
    /// already reset never fires again.
    pub fn due_session(&self, now: NaiveDateTime, last_reset: Option<NaiveDate>) -> Option<NaiveDate> {
        let today = now.date();
        [Some(today), today.pred_opt()]
            .into_iter()
            .flatten()
            .find(|anchor| {
                self.window_on(*anchor).contains(now) && last_reset.map_or(true, |done| done < *anchor)
            })
    }

    /// Trading date `now` belongs to: the date of the most recent reset boundary.
    pub fn session_date(&self, now: NaiveDateTime) -> NaiveDate {
        let today = now.date();
        if now >= self.window_on(today).start {
            today
        } else {
            today.pred_opt().unwrap_or(today)
        }
    }

    /// Start of the next reset window strictly after `now`
    pub fn next_reset(&self, now: NaiveDateTime) -> NaiveDateTime {
        let (today, tomorrow) = self.windows_around(now);
        if now < today.start {
            today.start
        } else {
            tomorrow.start
        }
    }
}
