//! Consumption normalization: turns raw, occasionally stale portal readings
//! into a non-decreasing total, a daily estimate and an effective date.

mod date_resolver;
mod delta;
mod engine;
mod fluid_state;

pub use date_resolver::DateResolver;
pub use delta::{DeltaEstimator, Estimate};
pub use engine::NormalizationEngine;
pub use fluid_state::FluidState;
