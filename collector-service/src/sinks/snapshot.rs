use std::{collections::BTreeMap, sync::Arc};

use consumption_core::{Fluid, NormalizedReading};
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::{
    pipeline::{Envelope, PipelineError, Sink},
    transform::PollOutcome,
};

/// Latest normalized reading per fluid, shared with the HTTP API.
#[derive(Debug, Clone, Default)]
pub struct SensorBoard {
    inner: Arc<RwLock<BTreeMap<Fluid, NormalizedReading>>>,
}

impl SensorBoard {
    pub async fn publish(&self, readings: &BTreeMap<Fluid, NormalizedReading>) {
        let mut board = self.inner.write().await;
        for (fluid, reading) in readings {
            board.insert(*fluid, reading.clone());
        }
    }

    pub async fn all(&self) -> Vec<NormalizedReading> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn get(&self, fluid: Fluid) -> Option<NormalizedReading> {
        self.inner.read().await.get(&fluid).cloned()
    }
}

fn record_gauges(reading: &NormalizedReading) {
    let fluid = reading.fluid.key();
    if let Some(total) = reading.total {
        metrics::gauge!("ocea_fluid_total", "fluid" => fluid).set(total);
    }
    if let Some(daily) = reading.daily {
        metrics::gauge!("ocea_fluid_daily", "fluid" => fluid).set(daily);
    }
}

/// Exposes each pass to the sensor layer: the board and Prometheus gauges.
pub struct SensorSnapshotSink {
    board: SensorBoard,
}

impl SensorSnapshotSink {
    pub fn new(board: SensorBoard) -> Self {
        Self { board }
    }
}

#[async_trait::async_trait]
impl Sink<PollOutcome> for SensorSnapshotSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<PollOutcome>, PipelineError>>
            + Send
            + Unpin
            + 'static,
    {
        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "error in upstream pipeline for SensorSnapshotSink"
                    );
                    continue;
                }
            };

            for reading in env.payload.readings.values() {
                record_gauges(reading);
            }
            self.board.publish(&env.payload.readings).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consumption_core::{DailySource, DailyStatus, Unit, ValueStatus};
    use time::macros::date;

    fn reading(fluid: Fluid, total: f64) -> NormalizedReading {
        NormalizedReading {
            fluid,
            unit: fluid.unit(),
            total: Some(total),
            daily: Some(1.0),
            daily_source: Some(DailySource::Delta),
            estimated_today: Some(1.0),
            estimated_today_source: Some(DailySource::Delta),
            latest_date: Some(date!(2024-03-04)),
            api_latest_date: Some(date!(2024-03-04)),
            daily_status: DailyStatus::Ok,
            value_status: ValueStatus::Ok,
            leak_estimate: None,
        }
    }

    fn outcome(readings: Vec<NormalizedReading>) -> Envelope<PollOutcome> {
        Envelope::new(PollOutcome {
            today: date!(2024-03-05),
            readings: readings.into_iter().map(|r| (r.fluid, r)).collect(),
        })
    }

    #[tokio::test]
    async fn sink_publishes_latest_readings_and_skips_errors() {
        let board = SensorBoard::default();
        let sink = SensorSnapshotSink::new(board.clone());

        let items = vec![
            Ok(outcome(vec![reading(Fluid::ColdWater, 10.0), reading(Fluid::Heat, 5.0)])),
            Err(PipelineError::Source("portal down".to_string())),
            Ok(outcome(vec![reading(Fluid::ColdWater, 12.0)])),
        ];
        sink.run(futures::stream::iter(items)).await.unwrap();

        let all = board.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(board.get(Fluid::ColdWater).await.unwrap().total, Some(12.0));
        assert_eq!(board.get(Fluid::Heat).await.unwrap().unit, Unit::KilowattHours);
        assert!(board.get(Fluid::HotWater).await.is_none());
    }
}
