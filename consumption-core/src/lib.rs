pub mod domain;
pub mod normalize;

pub use domain::{
    DailySource, DailyStatus, Fluid, LeakEstimate, NormalizedReading, RawReading, ReadingError,
    Unit, UnknownFluid, ValueStatus,
};
pub use normalize::{DateResolver, DeltaEstimator, Estimate, FluidState, NormalizationEngine};
