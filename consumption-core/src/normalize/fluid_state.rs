use serde::{Deserialize, Serialize};
use time::Date;

use super::Estimate;
use crate::domain::{DailySource, DailyStatus, RawReading, ValueStatus};

/// Per-fluid aggregate carried from one poll to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FluidState {
    /// Last portal total accepted as baseline. May go down after a correction.
    pub last_total: Option<f64>,
    /// Total exposed to the sensor layer. Never goes down.
    pub published_total: Option<f64>,
    pub effective_date: Option<Date>,
    /// Raw portal date, kept apart from `effective_date` for diagnostics.
    pub api_date: Option<Date>,
    pub daily_estimate: Option<f64>,
    pub daily_status: DailyStatus,
    #[serde(default)]
    pub daily_source: Option<DailySource>,
    #[serde(default)]
    pub estimated_today: Option<f64>,
    #[serde(default)]
    pub estimated_today_source: Option<DailySource>,
    pub value_status: ValueStatus,
}

impl FluidState {
    /// Commits one poll's result. An unavailable estimate only flips
    /// `value_status`; every other field keeps its prior value.
    pub fn apply(
        &mut self,
        reading: &RawReading,
        effective_date: Option<Date>,
        api_date: Option<Date>,
        estimate: &Estimate,
    ) {
        self.value_status = estimate.value_status;
        if estimate.value_status == ValueStatus::Unavailable {
            return;
        }

        self.last_total = reading.total;
        self.published_total = estimate.published_total;
        self.effective_date = effective_date;
        self.api_date = api_date;
        self.daily_estimate = estimate.daily_estimate;
        self.daily_status = estimate.daily_status;
        self.daily_source = estimate.daily_source;
        self.estimated_today = estimate.estimated_today;
        self.estimated_today_source = estimate.estimated_today_source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Fluid, ReadingError};
    use time::macros::date;

    fn accepted(total: f64, daily: Option<f64>) -> Estimate {
        Estimate {
            daily_estimate: daily,
            daily_status: DailyStatus::Ok,
            daily_source: Some(DailySource::Delta),
            estimated_today: daily,
            estimated_today_source: Some(DailySource::Delta),
            value_status: ValueStatus::Ok,
            published_total: Some(total),
            gap_days: Some(1),
            issue: None,
        }
    }

    #[test]
    fn apply_commits_accepted_reading() {
        let mut state = FluidState::default();
        let reading = RawReading::new(Fluid::ColdWater, date!(2024-03-04), 1050.0);

        state.apply(
            &reading,
            Some(date!(2024-03-04)),
            reading.reported_date,
            &accepted(1050.0, Some(50.0)),
        );

        assert_eq!(state.last_total, Some(1050.0));
        assert_eq!(state.published_total, Some(1050.0));
        assert_eq!(state.effective_date, Some(date!(2024-03-04)));
        assert_eq!(state.api_date, Some(date!(2024-03-04)));
        assert_eq!(state.daily_estimate, Some(50.0));
        assert_eq!(state.daily_status, DailyStatus::Ok);
        assert_eq!(state.daily_source, Some(DailySource::Delta));
        assert_eq!(state.estimated_today, Some(50.0));
        assert_eq!(state.value_status, ValueStatus::Ok);
    }

    #[test]
    fn apply_unavailable_keeps_prior_values() {
        let mut state = FluidState {
            last_total: Some(1000.0),
            published_total: Some(1000.0),
            effective_date: Some(date!(2024-03-03)),
            api_date: Some(date!(2024-03-03)),
            daily_estimate: Some(20.0),
            daily_status: DailyStatus::Ok,
            daily_source: Some(DailySource::Delta),
            estimated_today: Some(20.0),
            estimated_today_source: Some(DailySource::Delta),
            value_status: ValueStatus::Ok,
        };
        let before = state.clone();
        let reading = RawReading::empty(Fluid::ColdWater);
        let estimate = Estimate::unavailable(
            &state,
            ReadingError::UnparsableTotal {
                fluid: Fluid::ColdWater,
            },
        );

        state.apply(&reading, None, None, &estimate);

        assert_eq!(state.value_status, ValueStatus::Unavailable);
        assert_eq!(
            FluidState {
                value_status: before.value_status,
                ..state
            },
            before
        );
    }

    #[test]
    fn state_saved_before_daily_sources_still_decodes() {
        let json = r#"{
            "last_total": 1000.0,
            "published_total": 1000.0,
            "effective_date": "2024-03-04",
            "api_date": "2024-03-04",
            "daily_estimate": 12.5,
            "daily_status": "ok",
            "value_status": "ok"
        }"#;

        let state: FluidState = serde_json::from_str(json).unwrap();
        assert_eq!(state.daily_estimate, Some(12.5));
        assert_eq!(state.daily_source, None);
        assert_eq!(state.estimated_today, None);
    }
}
