mod fluid;
mod normalized;
mod reading;

pub use fluid::{Fluid, Unit, UnknownFluid};
pub use normalized::{DailySource, DailyStatus, NormalizedReading, ValueStatus};
pub use reading::{LeakEstimate, RawReading, ReadingError};
