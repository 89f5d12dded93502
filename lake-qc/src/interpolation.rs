//! Linear interpolation across short runs of missing values.

use chrono::{NaiveDateTime, TimeDelta};

/// Fill runs of missing values by linear interpolation against time.
///
/// A run is filled only when it is bounded on both sides by present values
/// and the time between those two values is at most `max_gap`. Longer runs,
/// and runs touching either end of the series, stay missing.
pub fn interpolate(times: &[NaiveDateTime], values: &[f64], max_gap: TimeDelta) -> Vec<f64> {
    let mut result = values.to_vec();
    let n = times.len().min(values.len());
    let mut previous: Option<usize> = None;

    for i in 0..n {
        if result[i].is_nan() {
            continue;
        }
        if let Some(left) = previous {
            if i > left + 1 && times[i] - times[left] <= max_gap {
                fill_run(times, &mut result, left, i);
            }
        }
        previous = Some(i);
    }

    result
}

/// Interpolate the open run between the present values at `left` and `right`.
fn fill_run(times: &[NaiveDateTime], values: &mut [f64], left: usize, right: usize) {
    let span = (times[right] - times[left]).num_seconds() as f64;
    if span <= 0.0 {
        return;
    }
    let (v0, v1) = (values[left], values[right]);
    for k in (left + 1)..right {
        let fraction = (times[k] - times[left]).num_seconds() as f64 / span;
        values[k] = v0 + (v1 - v0) * fraction;
    }
}
