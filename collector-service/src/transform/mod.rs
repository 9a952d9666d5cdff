use std::collections::BTreeMap;

use consumption_core::{Fluid, NormalizationEngine, NormalizedReading};
use time::Date;
use tokio::sync::Mutex;

use crate::{
    pipeline::{Envelope, PipelineError, Transform},
    sources::PollBatch,
    state_store::StateStore,
};

/// Result of one normalization pass, one reading per enabled fluid.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub today: Date,
    pub readings: BTreeMap<Fluid, NormalizedReading>,
}

/// Runs the normalization engine inside the pipeline and saves the
/// resulting fluid states.
pub struct NormalizeTransform {
    engine: Mutex<NormalizationEngine>,
    store: Option<StateStore>,
}

impl NormalizeTransform {
    pub fn new(engine: NormalizationEngine, store: Option<StateStore>) -> Self {
        Self {
            engine: Mutex::new(engine),
            store,
        }
    }
}

fn record_outcomes(readings: &BTreeMap<Fluid, NormalizedReading>) {
    for reading in readings.values() {
        metrics::counter!(
            "normalized_readings_total",
            "fluid" => reading.fluid.key(),
            "value_status" => reading.value_status.as_str(),
            "daily_status" => reading.daily_status.as_str()
        )
        .increment(1);
    }
}

#[async_trait::async_trait]
impl Transform<PollBatch, PollOutcome> for NormalizeTransform {
    async fn apply(
        &self,
        input: Envelope<PollBatch>,
    ) -> Result<Envelope<PollOutcome>, PipelineError> {
        // Held for the whole pass: one pass at a time.
        let mut engine = self.engine.lock().await;

        let today = input.payload.today;
        let readings = engine.normalize(&input.payload.readings, today);
        record_outcomes(&readings);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(engine.states()).await {
                tracing::warn!(error = %e, "failed to save fluid state");
                metrics::counter!("state_store_save_failures_total").increment(1);
            }
        }

        Ok(input.map(|_| PollOutcome { today, readings }))
    }
}
