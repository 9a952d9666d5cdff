use std::collections::BTreeMap;

use time::Date;

use super::{DateResolver, DeltaEstimator, Estimate, FluidState};
use crate::domain::{Fluid, NormalizedReading, RawReading, ReadingError, ValueStatus};

/// Owns one `FluidState` per enabled fluid and runs the per-poll pass.
///
/// One engine per account. Callers must not run two passes concurrently;
/// the engine itself does no locking.
#[derive(Debug, Clone)]
pub struct NormalizationEngine {
    fluids: Vec<Fluid>,
    states: BTreeMap<Fluid, FluidState>,
}

impl NormalizationEngine {
    pub fn new(fluids: impl IntoIterator<Item = Fluid>) -> Self {
        Self::with_states(fluids, BTreeMap::new())
    }

    /// Seeds the engine with previously saved states. States for fluids that
    /// are not enabled are dropped.
    pub fn with_states(
        fluids: impl IntoIterator<Item = Fluid>,
        mut saved: BTreeMap<Fluid, FluidState>,
    ) -> Self {
        let mut enabled: Vec<Fluid> = Vec::new();
        for fluid in fluids {
            if !enabled.contains(&fluid) {
                enabled.push(fluid);
            }
        }

        let states = enabled
            .iter()
            .map(|fluid| (*fluid, saved.remove(fluid).unwrap_or_default()))
            .collect();

        Self {
            fluids: enabled,
            states,
        }
    }

    pub fn fluids(&self) -> &[Fluid] {
        &self.fluids
    }

    pub fn state(&self, fluid: Fluid) -> Option<&FluidState> {
        self.states.get(&fluid)
    }

    pub fn states(&self) -> &BTreeMap<Fluid, FluidState> {
        &self.states
    }

    /// Runs one poll pass. Every enabled fluid gets an output, even when its
    /// reading is absent or malformed; readings for other fluids are ignored.
    pub fn normalize(
        &mut self,
        readings: &[RawReading],
        today: Date,
    ) -> BTreeMap<Fluid, NormalizedReading> {
        for reading in readings {
            if !self.states.contains_key(&reading.fluid) {
                tracing::debug!(fluid = %reading.fluid, "ignoring reading for disabled fluid");
            }
        }

        let mut outputs = BTreeMap::new();
        for (fluid, state) in self.states.iter_mut() {
            let reading = readings.iter().find(|r| r.fluid == *fluid);
            let output = normalize_fluid(*fluid, state, reading, today);
            outputs.insert(*fluid, output);
        }
        outputs
    }
}

fn normalize_fluid(
    fluid: Fluid,
    state: &mut FluidState,
    reading: Option<&RawReading>,
    today: Date,
) -> NormalizedReading {
    let missing;
    let (reading, estimate, effective_date) = match reading {
        Some(reading) => {
            let effective_date = reading
                .reported_date
                .map(|reported| DateResolver::resolve(reported, today));
            let estimate = DeltaEstimator::estimate(state, reading, effective_date);
            (reading, estimate, effective_date)
        }
        None => {
            missing = RawReading::empty(fluid);
            let estimate = Estimate::unavailable(state, ReadingError::Missing { fluid });
            (&missing, estimate, None)
        }
    };

    state.apply(reading, effective_date, reading.reported_date, &estimate);

    match (&estimate.issue, estimate.value_status) {
        (Some(issue), _) => {
            tracing::warn!(%fluid, error = %issue, "reading unavailable, keeping prior values")
        }
        (None, ValueStatus::Corrected) => tracing::warn!(
            %fluid,
            new_total = ?reading.total,
            published_total = ?state.published_total,
            "portal total decreased, rebasing"
        ),
        _ => {}
    }

    tracing::info!(
        %fluid,
        total = ?state.published_total,
        unit = %fluid.unit(),
        daily = ?state.daily_estimate,
        daily_source = ?state.daily_source,
        estimated_today = ?state.estimated_today,
        gap_days = ?estimate.gap_days,
        api_date = ?reading.reported_date,
        effective_date = ?state.effective_date,
        value_status = %state.value_status,
        daily_status = %state.daily_status,
        "normalized {}",
        fluid.label()
    );

    NormalizedReading {
        fluid,
        unit: fluid.unit(),
        total: state.published_total,
        daily: state.daily_estimate,
        daily_source: state.daily_source,
        estimated_today: state.estimated_today,
        estimated_today_source: state.estimated_today_source,
        latest_date: state.effective_date,
        api_latest_date: state.api_date,
        daily_status: state.daily_status,
        value_status: state.value_status,
        leak_estimate: reading
            .leak_estimate
            .clone()
            .filter(|_| fluid.is_water()),
    }
}
