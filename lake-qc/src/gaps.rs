//! Detection of stretches without observations.

use chrono::{NaiveDateTime, TimeDelta};

/// Default tolerance between consecutive observations: one day.
pub fn default_tolerance() -> TimeDelta {
    TimeDelta::days(1)
}

/// An interval `(start, end)` in which no observation exists.
///
/// `start` and `end` are the bounding observation (or window boundary)
/// timestamps; the gap itself is the open interval between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Gap {
    pub fn length(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Find every interval longer than `tolerance` that holds no observation.
///
/// The search runs over the sorted union of `window_start`, the observation
/// timestamps and `window_end`, so missing data at either edge of the window
/// is reported as well. Duplicated timestamps collapse.
pub fn detect_gaps(
    timestamps: &[NaiveDateTime],
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    tolerance: TimeDelta,
) -> Vec<Gap> {
    if timestamps.is_empty() {
        if window_start < window_end {
            return vec![Gap {
                start: window_start,
                end: window_end,
            }];
        }
        return Vec::new();
    }

    let mut points = Vec::with_capacity(timestamps.len() + 2);
    points.push(window_start);
    points.extend_from_slice(timestamps);
    points.push(window_end);
    points.sort();
    points.dedup();

    points
        .windows(2)
        .filter(|pair| pair[1] - pair[0] > tolerance)
        .map(|pair| Gap {
            start: pair[0],
            end: pair[1],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 3, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_empty_series_is_one_gap() {
        let gaps = detect_gaps(&[], day(1), day(20), default_tolerance());
        assert_eq!(
            gaps,
            vec![Gap {
                start: day(1),
                end: day(20)
            }]
        );
    }

    #[test]
    fn test_dense_series_has_no_gaps() {
        let times: Vec<_> = (0..24 * 9)
            .map(|h| day(1) + TimeDelta::hours(h))
            .collect();
        assert!(detect_gaps(&times, day(1), day(10), default_tolerance()).is_empty());
    }

    #[test]
    fn test_interior_and_edge_gaps() {
        let times = vec![day(3), day(4), day(9), day(10)];
        let gaps = detect_gaps(&times, day(1), day(12), default_tolerance());
        assert_eq!(gaps.len(), 3);
        assert_eq!(gaps[0], Gap { start: day(1), end: day(3) });
        assert_eq!(gaps[1], Gap { start: day(4), end: day(9) });
        assert_eq!(gaps[2], Gap { start: day(10), end: day(12) });
        assert_eq!(gaps[1].length(), TimeDelta::days(5));
    }

    #[test]
    fn test_duplicates_collapse() {
        let times = vec![day(2), day(2), day(2), day(3)];
        let gaps = detect_gaps(&times, day(2), day(3), default_tolerance());
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_spacing_equal_to_tolerance_is_not_a_gap() {
        let times = vec![day(1), day(2), day(3)];
        assert!(detect_gaps(&times, day(1), day(3), TimeDelta::days(1)).is_empty());
        assert_eq!(detect_gaps(&times, day(1), day(3), TimeDelta::hours(23)).len(), 2);
    }
}
