//! Quality control for lake forcing and inflow series.
//!
//! Raw readings from several stations are merged ([`reconcile`]), checked
//! against physical bounds ([`policy`]), interpolated across short gaps
//! ([`interpolation`]) and filled from history across long ones
//! ([`climatology`]). [`quantity::QuantityPipeline`] chains the stages.

pub mod climatology;
pub mod gaps;
pub mod interpolation;
pub mod policy;
pub mod quantity;
pub mod reconcile;

pub use policy::{FillMode, Quantity, QuantityPolicy};
pub use quantity::{QuantityPipeline, ReconciliationContext};
