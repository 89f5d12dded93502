use chrono::{NaiveDateTime, TimeDelta};
use std::mem::replace;

/// A time range iterator that yields every nominal slot from the start
/// through the end (inclusive) at a fixed step.
#[derive(Clone, Eq, PartialEq, Copy, Debug)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub step: TimeDelta,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, step: TimeDelta) -> Self {
        TimeRange { start, end, step }
    }

    /// Hourly slots from `start` through `end`.
    pub fn hourly(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        TimeRange::new(start, end, TimeDelta::hours(1))
    }
}

impl Iterator for TimeRange {
    type Item = NaiveDateTime;
    fn next(&mut self) -> Option<Self::Item> {
        if self.step <= TimeDelta::zero() {
            return None;
        }
        if self.start <= self.end {
            let next = self.start + self.step;
            Some(replace(&mut self.start, next))
        } else {
            None
        }
    }
}
