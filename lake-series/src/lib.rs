//! Core types for lake simulation inputs: time series, regular time grids,
//! the shared error taxonomy and the observation source API.

pub mod date_range;
pub mod error;
pub mod source;
pub mod time_series;

pub use error::{LakeError, Result};
pub use time_series::TimeSeries;
