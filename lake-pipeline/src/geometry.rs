//! Vertical grid, output resolution, default profiles and other derived
//! physical constants for a site.

use lake_series::{LakeError, Result};

/// Upper bound on the number of model grid cells.
pub const MAX_GRID_CELLS: u32 = 1000;

/// Reference depths (m) of the seasonal default temperature profiles.
const PROFILE_DEPTHS: [f64; 10] = [0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 100.0, 150.0, 200.0, 300.0];

/// Day-of-year knots of the seasonal profiles (~Jan 1, Apr 1, Jul 1, Oct 1, Dec 31).
const PROFILE_DAYS: [f64; 5] = [0.0, 91.0, 182.0, 273.0, 365.0];

/// Seasonal temperature profiles (°C) of a lake at 500 m a.s.l.
const PROFILE_500M: [[f64; 10]; 5] = [
    [5.5, 5.5, 5.0, 5.0, 5.0, 4.5, 4.5, 4.5, 4.5, 4.5],
    [8.0, 6.0, 5.0, 5.0, 5.0, 4.5, 4.5, 4.5, 4.5, 4.5],
    [20.0, 18.0, 14.0, 8.0, 6.0, 4.5, 4.5, 4.5, 4.5, 4.5],
    [9.5, 9.5, 9.0, 8.0, 7.0, 5.0, 4.5, 4.5, 4.5, 4.5],
    [5.5, 5.5, 5.0, 5.0, 5.0, 4.5, 4.5, 4.5, 4.5, 4.5],
];

/// Seasonal temperature profiles (°C) of a lake at 1500 m a.s.l.
const PROFILE_1500M: [[f64; 10]; 5] = [
    [0.0, 2.5, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0],
    [0.0, 2.5, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0],
    [14.0, 9.0, 6.0, 4.5, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0],
    [8.0, 8.0, 7.0, 6.0, 5.0, 4.0, 4.0, 4.0, 4.0, 4.0],
    [0.0, 2.5, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0, 4.0],
];

/// Default grid resolution (m) for a lake of the given depth.
pub fn default_grid_resolution(max_depth: f64) -> f64 {
    if max_depth > 20.0 {
        0.5
    } else if max_depth > 10.0 {
        0.25
    } else if max_depth > 5.0 {
        0.125
    } else {
        0.05
    }
}

/// Number of grid cells, capped at [`MAX_GRID_CELLS`].
pub fn grid_cells(max_depth: f64, resolution: f64) -> Result<u32> {
    if resolution <= 0.0 || !resolution.is_finite() {
        return Err(LakeError::Configuration(format!(
            "grid resolution {resolution} must be positive"
        )));
    }
    let cells = (max_depth / resolution).abs().ceil();
    Ok(if cells > MAX_GRID_CELLS as f64 {
        MAX_GRID_CELLS
    } else {
        cells as u32
    })
}

/// Vertical spacing (m) of the output depths.
pub fn output_depth_resolution(max_depth: f64) -> f64 {
    if max_depth > 20.0 {
        1.0
    } else if max_depth > 10.0 {
        0.5
    } else if max_depth > 5.0 {
        0.25
    } else {
        0.1
    }
}

/// Output depths from the surface down to (excluding) `max_depth`.
pub fn output_depths(max_depth: f64, resolution: f64) -> Vec<f64> {
    if resolution <= 0.0 {
        return Vec::new();
    }
    (0..)
        .map(|i| i as f64 * resolution)
        .take_while(|z| *z < max_depth)
        .collect()
}

/// Model steps between two outputs.
pub fn output_time_steps(output_resolution: i64, model_resolution: i64) -> Result<i64> {
    if model_resolution <= 0 || output_resolution % model_resolution != 0 {
        return Err(LakeError::Validation(format!(
            "output time resolution {output_resolution}s must be a multiple of the model time resolution {model_resolution}s"
        )));
    }
    Ok(output_resolution / model_resolution)
}

/// Surface air pressure (mbar) at `elevation` (m a.s.l.).
pub fn air_pressure(elevation: f64) -> f64 {
    1013.25 * (1.0 - 2.25577e-5 * elevation).powf(5.25588)
}

/// Default light absorption coefficient (m-1).
pub fn default_absorption(trophic_state: &str, elevation: f64) -> f64 {
    if elevation > 2000.0 {
        return 1.0;
    }
    match trophic_state.to_lowercase().as_str() {
        "oligotrophic" => 0.15,
        "eutrophic" => 0.50,
        _ => 0.25,
    }
}

/// Piecewise linear interpolation with constant extrapolation.
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return f64::NAN;
    }
    if x <= xs[0] {
        return ys[0];
    }
    for i in 1..n {
        if x <= xs[i] {
            let fraction = (x - xs[i - 1]) / (xs[i] - xs[i - 1]);
            return ys[i - 1] + (ys[i] - ys[i - 1]) * fraction;
        }
    }
    ys[n - 1]
}

/// A vertical profile for initial conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// m, positive down
    pub depth: Vec<f64>,
    pub temperature: Vec<f64>,
    pub salinity: Vec<f64>,
}

/// Synthesize an initial temperature profile from the seasonal reference
/// profiles, interpolated by day of year and then by elevation.
pub fn default_profile(day_of_year: u32, elevation: f64, max_depth: f64, salinity: f64) -> Profile {
    let doy = day_of_year as f64;
    let at_elevation: Vec<f64> = (0..PROFILE_DEPTHS.len())
        .map(|k| {
            let low: Vec<f64> = PROFILE_500M.iter().map(|row| row[k]).collect();
            let high: Vec<f64> = PROFILE_1500M.iter().map(|row| row[k]).collect();
            let t500 = interp(doy, &PROFILE_DAYS, &low);
            let t1500 = interp(doy, &PROFILE_DAYS, &high);
            interp(elevation, &[500.0, 1500.0], &[t500, t1500])
        })
        .collect();

    let mut depth: Vec<f64> = PROFILE_DEPTHS
        .iter()
        .copied()
        .filter(|d| *d < max_depth)
        .collect();
    depth.push(max_depth);
    let temperature = depth
        .iter()
        .map(|d| interp(*d, &PROFILE_DEPTHS, &at_elevation))
        .collect();
    let salinity = vec![salinity; depth.len()];
    Profile {
        depth,
        temperature,
        salinity,
    }
}
