use std::{sync::Arc, time::Duration};

use consumption_core::{Fluid, RawReading};
use rand::Rng;
use time::{Date, OffsetDateTime, UtcOffset};
use tokio::{
    sync::{mpsc, Mutex},
    time::MissedTickBehavior,
};

use super::portal_client::PortalClient;
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Floor for the jittered poll interval.
const MIN_INTERVAL_SECS: u64 = 60;

/// Everything one normalization pass needs.
#[derive(Debug, Clone)]
pub struct PollBatch {
    pub readings: Vec<RawReading>,
    pub today: Date,
}

/// Polls the portal on a fixed interval, plus on demand.
///
/// The first poll runs immediately. A manual trigger restarts the interval.
pub struct PortalPollSource<C> {
    client: Arc<C>,
    fluids: Vec<Fluid>,
    interval: Duration,
    utc_offset: Option<UtcOffset>,
    trigger: Arc<Mutex<Option<mpsc::Receiver<()>>>>,
}

impl<C> PortalPollSource<C>
where
    C: PortalClient + 'static,
{
    pub fn new(
        client: C,
        fluids: Vec<Fluid>,
        interval: Duration,
        trigger: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            client: Arc::new(client),
            fluids,
            interval,
            utc_offset: None,
            trigger: Arc::new(Mutex::new(Some(trigger))),
        }
    }

    /// Shifts the interval once by a random amount in `[-max, max]`.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        let max = max.as_secs() as i64;
        if max == 0 {
            return self;
        }
        let offset = rand::thread_rng().gen_range(-max..=max);
        let effective = jittered(self.interval, offset);
        tracing::info!(
            base = ?self.interval,
            jitter_secs = offset,
            effective = ?effective,
            "portal poll interval"
        );
        self.interval = effective;
        self
    }

    /// Computes "today" in a fixed offset instead of the host's local one.
    pub fn with_utc_offset(mut self, offset: Option<UtcOffset>) -> Self {
        self.utc_offset = offset;
        self
    }
}

fn jittered(base: Duration, offset_secs: i64) -> Duration {
    let secs = (base.as_secs() as i64).saturating_add(offset_secs);
    Duration::from_secs(secs.max(MIN_INTERVAL_SECS as i64) as u64)
}

fn today(offset: Option<UtcOffset>) -> Date {
    let now = OffsetDateTime::now_utc();
    let offset = offset.or_else(|| UtcOffset::current_local_offset().ok());
    match offset {
        Some(offset) => now.to_offset(offset).date(),
        None => now.date(),
    }
}

#[async_trait::async_trait]
impl<C> Source<PollBatch> for PortalPollSource<C>
where
    C: PortalClient + 'static,
{
    async fn stream(&self) -> EnvelopeStream<PollBatch> {
        let Some(mut trigger) = self.trigger.lock().await.take() else {
            return Box::pin(futures::stream::once(async {
                Err(PipelineError::Source(
                    "portal poll stream already taken; only one consumer supported".to_string(),
                ))
            }));
        };

        let client = self.client.clone();
        let fluids = self.fluids.clone();
        let period = self.interval;
        let utc_offset = self.utc_offset;

        let s = async_stream::stream! {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut trigger_open = true;

            loop {
                let reason = tokio::select! {
                    _ = ticker.tick() => "scheduled",
                    msg = trigger.recv(), if trigger_open => match msg {
                        Some(()) => {
                            ticker.reset();
                            "manual"
                        }
                        None => {
                            trigger_open = false;
                            continue;
                        }
                    },
                };

                metrics::counter!("portal_polls_total", "trigger" => reason).increment(1);
                tracing::info!(trigger = reason, fluids = fluids.len(), "polling portal");

                let started = std::time::Instant::now();
                let result = client.fetch(&fluids).await;
                metrics::histogram!("portal_fetch_duration_seconds")
                    .record(started.elapsed().as_secs_f64());

                yield match result {
                    Ok(readings) => {
                        tracing::debug!(readings = readings.len(), "portal fetch completed");
                        Ok(Envelope::new(PollBatch { readings, today: today(utc_offset) }))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "portal poll failed; state left untouched");
                        metrics::counter!("portal_poll_failures_total").increment(1);
                        Err(PipelineError::Source(e.to_string()))
                    }
                };
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::PortalError;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::date;

    struct FakePortal {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl PortalClient for FakePortal {
        async fn fetch(&self, fluids: &[Fluid]) -> Result<Vec<RawReading>, PortalError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PortalError::NoDwelling);
            }
            Ok(fluids
                .iter()
                .map(|f| RawReading::new(*f, date!(2024-03-04), 100.0 + call as f64))
                .collect())
        }
    }

    fn source(fail: bool) -> (PortalPollSource<FakePortal>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(1);
        let client = FakePortal {
            calls: AtomicUsize::new(0),
            fail,
        };
        let src = PortalPollSource::new(
            client,
            vec![Fluid::ColdWater, Fluid::Heat],
            Duration::from_secs(3600),
            rx,
        )
        .with_utc_offset(Some(UtcOffset::UTC));
        (src, tx)
    }

    #[tokio::test]
    async fn first_poll_is_immediate_and_manual_trigger_polls_again() {
        let (src, tx) = source(false);
        let mut stream = src.stream().await;

        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first.payload.readings.len(), 2);
        assert_eq!(first.payload.readings[0].total, Some(100.0));
        assert_eq!(first.payload.today, OffsetDateTime::now_utc().date());

        tx.send(()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second.payload.readings[0].total, Some(101.0));
    }

    #[tokio::test]
    async fn failed_fetch_is_emitted_as_source_error() {
        let (src, _tx) = source(true);
        let mut stream = src.stream().await;

        let item = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(item, Err(PipelineError::Source(_))));
    }

    #[tokio::test]
    async fn stream_can_only_be_taken_once() {
        let (src, _tx) = source(false);
        let _first = src.stream().await;
        let mut second = src.stream().await;

        assert!(matches!(second.next().await, Some(Err(PipelineError::Source(_)))));
    }

    #[test]
    fn jitter_shifts_interval_but_never_below_a_minute() {
        let base = Duration::from_secs(3600);
        assert_eq!(jittered(base, 120), Duration::from_secs(3720));
        assert_eq!(jittered(base, -300), Duration::from_secs(3300));
        assert_eq!(jittered(Duration::from_secs(90), -300), Duration::from_secs(60));
    }

    #[test]
    fn with_jitter_stays_within_bounds() {
        for _ in 0..50 {
            let (src, _tx) = source(false);
            let src = src.with_jitter(Duration::from_secs(300));
            assert!(src.interval >= Duration::from_secs(3300));
            assert!(src.interval <= Duration::from_secs(3900));
        }

        let (src, _tx) = source(false);
        assert_eq!(src.with_jitter(Duration::ZERO).interval, Duration::from_secs(3600));
    }
}
