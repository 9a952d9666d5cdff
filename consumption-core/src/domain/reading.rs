use std::fmt;

use serde::{Deserialize, Serialize};
use time::Date;

use super::Fluid;

/// Portal leak diagnostic, kept as the exact text the portal sent.
///
/// The format is unofficial and has changed before, so it is never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeakEstimate(String);

impl LeakEstimate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeakEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fluid's raw portal payload for one poll.
///
/// `total` and `reported_date` are `None` when the portal omitted them or sent
/// something that could not be decoded; the engine turns that into an
/// `unavailable` output instead of failing the pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub fluid: Fluid,
    pub reported_date: Option<Date>,
    pub total: Option<f64>,
    pub leak_estimate: Option<LeakEstimate>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadingError {
    #[error("no reading received for {fluid}")]
    Missing { fluid: Fluid },
    #[error("{fluid} reading has no parsable total")]
    UnparsableTotal { fluid: Fluid },
    #[error("{fluid} reading has invalid total {total}")]
    InvalidTotal { fluid: Fluid, total: f64 },
    #[error("{fluid} reading has no parsable date")]
    UnparsableDate { fluid: Fluid },
    #[error("{fluid} reading dated {effective} precedes last accepted date {last}")]
    OutOfOrder {
        fluid: Fluid,
        effective: Date,
        last: Date,
    },
}

impl RawReading {
    pub fn new(fluid: Fluid, reported_date: Date, total: f64) -> Self {
        Self {
            fluid,
            reported_date: Some(reported_date),
            total: Some(total),
            leak_estimate: None,
        }
    }

    /// A reading for which the portal returned nothing usable.
    pub fn empty(fluid: Fluid) -> Self {
        Self {
            fluid,
            reported_date: None,
            total: None,
            leak_estimate: None,
        }
    }

    pub fn with_leak_estimate(mut self, leak: impl Into<String>) -> Self {
        self.leak_estimate = Some(LeakEstimate::new(leak));
        self
    }

    /// The cumulative total, if it is present, finite and non-negative.
    pub fn checked_total(&self) -> Result<f64, ReadingError> {
        match self.total {
            None => Err(ReadingError::UnparsableTotal { fluid: self.fluid }),
            Some(total) if !total.is_finite() || total < 0.0 => Err(ReadingError::InvalidTotal {
                fluid: self.fluid,
                total,
            }),
            Some(total) => Ok(total),
        }
    }
}
