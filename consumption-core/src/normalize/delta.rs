use time::Date;

use super::FluidState;
use crate::domain::{DailySource, DailyStatus, RawReading, ReadingError, ValueStatus};

/// Totals closer than this are considered equal.
const TOTAL_EPSILON: f64 = 1e-6;

/// Outcome of comparing a reading against the previous fluid state.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub daily_estimate: Option<f64>,
    pub daily_status: DailyStatus,
    pub daily_source: Option<DailySource>,
    pub estimated_today: Option<f64>,
    pub estimated_today_source: Option<DailySource>,
    pub value_status: ValueStatus,
    pub published_total: Option<f64>,
    /// Days between the previous and the new effective date, when both exist.
    pub gap_days: Option<i64>,
    pub issue: Option<ReadingError>,
}

impl Estimate {
    /// Leaves every value as it was and only flags the reading unavailable.
    pub fn unavailable(previous: &FluidState, issue: ReadingError) -> Self {
        Self {
            daily_estimate: previous.daily_estimate,
            daily_status: previous.daily_status,
            daily_source: previous.daily_source,
            estimated_today: previous.estimated_today,
            estimated_today_source: previous.estimated_today_source,
            value_status: ValueStatus::Unavailable,
            published_total: previous.published_total,
            gap_days: None,
            issue: Some(issue),
        }
    }

    /// Keeps the previous daily value; only the totals move.
    fn carried(
        previous: &FluidState,
        value_status: ValueStatus,
        published_total: f64,
        gap_days: i64,
    ) -> Self {
        Self {
            daily_estimate: previous.daily_estimate,
            daily_status: DailyStatus::Unchanged,
            daily_source: previous.daily_source,
            estimated_today: None,
            estimated_today_source: None,
            value_status,
            published_total: Some(published_total),
            gap_days: Some(gap_days),
            issue: None,
        }
    }

    /// Fills `estimated_today` from the daily value, or from the
    /// month-to-date total when there is none.
    fn with_today_estimate(mut self, month_total: f64, date: Date) -> Self {
        if self.estimated_today.is_some() {
            return self;
        }
        match self.daily_estimate {
            Some(daily) => {
                self.estimated_today = Some(daily);
                self.estimated_today_source = self.daily_source;
            }
            None => {
                self.estimated_today = Some(per_day(month_total, date));
                self.estimated_today_source = Some(DailySource::MonthlyAverage);
            }
        }
        self
    }
}

/// Derives the daily delta and quality flags for one fluid.
///
/// - same effective date as last poll: previous daily carried over, `unchanged`;
/// - next day with a higher or equal total: exact delta, `ok`;
/// - later day: delta split evenly over the gap, `estimated`;
/// - lower total: baseline rebased, published total held, `corrected`.
///
/// Exact deltas and totals are kept at full precision. Only the split
/// estimates are rounded to 3 decimals.
pub struct DeltaEstimator;

impl DeltaEstimator {
    pub fn estimate(
        previous: &FluidState,
        reading: &RawReading,
        effective_date: Option<Date>,
    ) -> Estimate {
        let fluid = reading.fluid;
        let total = match reading.checked_total() {
            Ok(total) => total,
            Err(issue) => return Estimate::unavailable(previous, issue),
        };
        let Some(effective_date) = effective_date else {
            return Estimate::unavailable(previous, ReadingError::UnparsableDate { fluid });
        };

        let (Some(last_total), Some(last_date)) = (previous.last_total, previous.effective_date)
        else {
            return Estimate {
                daily_estimate: None,
                daily_status: DailyStatus::Unknown,
                daily_source: None,
                estimated_today: None,
                estimated_today_source: None,
                value_status: ValueStatus::Ok,
                published_total: Some(total),
                gap_days: None,
                issue: None,
            }
            .with_today_estimate(total, effective_date);
        };

        if effective_date < last_date {
            return Estimate::unavailable(
                previous,
                ReadingError::OutOfOrder {
                    fluid,
                    effective: effective_date,
                    last: last_date,
                },
            );
        }

        let published = previous.published_total.unwrap_or(last_total);
        let decreased = total + TOTAL_EPSILON < last_total;
        let gap_days = (effective_date - last_date).whole_days();

        if decreased {
            let rollover = (effective_date.year(), effective_date.month())
                != (last_date.year(), last_date.month());
            if !rollover {
                return Estimate::carried(previous, ValueStatus::Corrected, published, gap_days)
                    .with_today_estimate(total, effective_date);
            }
            // The portal counter restarts every month; the new month's total
            // is then consumption on top of what was already published.
            let mut estimate =
                Estimate::carried(previous, ValueStatus::Corrected, published + total, gap_days);
            estimate.estimated_today = Some(per_day(total, effective_date));
            estimate.estimated_today_source = Some(DailySource::MonthReset);
            return estimate;
        }

        let delta = (total - last_total).max(0.0);

        if gap_days == 0 {
            return Estimate::carried(previous, ValueStatus::Ok, published + delta, 0)
                .with_today_estimate(total, effective_date);
        }

        let (daily, daily_status, daily_source) = if gap_days == 1 {
            (delta, DailyStatus::Ok, DailySource::Delta)
        } else {
            (
                round3(delta / gap_days as f64),
                DailyStatus::Estimated,
                DailySource::MultiDayEstimate,
            )
        };

        Estimate {
            daily_estimate: Some(daily),
            daily_status,
            daily_source: Some(daily_source),
            estimated_today: None,
            estimated_today_source: None,
            value_status: ValueStatus::Ok,
            published_total: Some(published + delta),
            gap_days: Some(gap_days),
            issue: None,
        }
        .with_today_estimate(total, effective_date)
    }
}

fn per_day(month_total: f64, date: Date) -> f64 {
    round3(month_total / f64::from(date.day().max(1)))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
