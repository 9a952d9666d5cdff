use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A metered fluid exposed by the resident portal.
///
/// Heat (CETC) is tracked like a third fluid even though it is billed in kWh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fluid {
    ColdWater,
    HotWater,
    Heat,
}

/// Unit a fluid's totals are published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "L")]
    Liters,
    #[serde(rename = "kWh")]
    KilowattHours,
}

impl Fluid {
    pub const ALL: [Fluid; 3] = [Fluid::ColdWater, Fluid::HotWater, Fluid::Heat];

    pub fn key(self) -> &'static str {
        match self {
            Fluid::ColdWater => "cold_water",
            Fluid::HotWater => "hot_water",
            Fluid::Heat => "heat",
        }
    }

    /// Path segment used by the portal's consumption endpoint.
    pub fn api_name(self) -> &'static str {
        match self {
            Fluid::ColdWater => "EauFroide",
            Fluid::HotWater => "EauChaude",
            Fluid::Heat => "Cetc",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Fluid::ColdWater => "Eau froide",
            Fluid::HotWater => "Eau chaude",
            Fluid::Heat => "CETC",
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            Fluid::ColdWater | Fluid::HotWater => Unit::Liters,
            Fluid::Heat => Unit::KilowattHours,
        }
    }

    /// Only water meters report a leak estimate.
    pub fn is_water(self) -> bool {
        matches!(self, Fluid::ColdWater | Fluid::HotWater)
    }
}

impl fmt::Display for Fluid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown fluid '{0}'")]
pub struct UnknownFluid(pub String);

impl FromStr for Fluid {
    type Err = UnknownFluid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fluid::ALL
            .into_iter()
            .find(|f| f.key() == s)
            .ok_or_else(|| UnknownFluid(s.to_string()))
    }
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Liters => "L",
            Unit::KilowattHours => "kWh",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
