use std::fmt;

use serde::{Deserialize, Serialize};
use time::Date;

use super::{Fluid, LeakEstimate, Unit};

/// Quality of the daily estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyStatus {
    /// No baseline yet to compute a delta against.
    #[default]
    Unknown,
    /// Exact one-day delta.
    Ok,
    /// Delta spread over a multi-day gap.
    Estimated,
    /// Same effective date as the previous poll; prior estimate carried over.
    Unchanged,
}

/// Quality of the cumulative total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueStatus {
    #[default]
    Unknown,
    Ok,
    /// The portal total went down; the baseline was rebased.
    Corrected,
    /// The reading was missing or malformed; prior values retained.
    Unavailable,
}

/// Where a daily figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailySource {
    /// Exact difference between two consecutive days.
    Delta,
    /// Difference spread evenly over a multi-day gap.
    MultiDayEstimate,
    /// New month's total spread over the days elapsed in that month.
    MonthReset,
    /// Month-to-date total divided by the day of month.
    MonthlyAverage,
}

impl DailySource {
    pub fn as_str(self) -> &'static str {
        match self {
            DailySource::Delta => "delta",
            DailySource::MultiDayEstimate => "multi_day_estimate",
            DailySource::MonthReset => "month_reset",
            DailySource::MonthlyAverage => "monthly_average",
        }
    }
}

impl fmt::Display for DailySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DailyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DailyStatus::Unknown => "unknown",
            DailyStatus::Ok => "ok",
            DailyStatus::Estimated => "estimated",
            DailyStatus::Unchanged => "unchanged",
        }
    }
}

impl ValueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueStatus::Unknown => "unknown",
            ValueStatus::Ok => "ok",
            ValueStatus::Corrected => "corrected",
            ValueStatus::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for DailyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ValueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-fluid values handed to the sensor layer after a poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReading {
    pub fluid: Fluid,
    pub unit: Unit,
    /// Non-decreasing across polls; feeds long-term statistics.
    pub total: Option<f64>,
    pub daily: Option<f64>,
    pub daily_source: Option<DailySource>,
    /// Best guess for today's consumption, available even without a delta.
    pub estimated_today: Option<f64>,
    pub estimated_today_source: Option<DailySource>,
    pub latest_date: Option<Date>,
    pub api_latest_date: Option<Date>,
    pub daily_status: DailyStatus,
    pub value_status: ValueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leak_estimate: Option<LeakEstimate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_source_serializes_snake_case() {
        let json = serde_json::to_string(&DailySource::MultiDayEstimate).unwrap();
        assert_eq!(json, "\"multi_day_estimate\"");
        assert_eq!(DailySource::MonthReset.to_string(), "month_reset");
    }
}
