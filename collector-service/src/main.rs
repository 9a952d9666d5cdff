use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use collector_service::{
    config::AppConfig,
    http_api, metrics_server, observability,
    pipeline::{Envelope, Pipeline, PipelineError, Sink},
    sinks::{QuestDbIlpSink, SensorBoard, SensorSnapshotSink, TeeSink},
    sources::{HttpPortalClient, PollBatch, PortalPollSource},
    state_store::StateStore,
    transform::{NormalizeTransform, PollOutcome},
};
use consumption_core::NormalizationEngine;
use time::UtcOffset;
use tokio::sync::mpsc;

enum OutputSink {
    Sensors(SensorSnapshotSink),
    SensorsAndQuestDb(TeeSink<SensorSnapshotSink, QuestDbIlpSink>),
}

#[async_trait::async_trait]
impl Sink<PollOutcome> for OutputSink {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<PollOutcome>, PipelineError>>
            + Send
            + Unpin
            + 'static,
    {
        match self {
            Self::Sensors(s) => s.run(input).await,
            Self::SensorsAndQuestDb(s) => s.run(input).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let collector = &cfg.collector;

    // Restore fluid state from the previous run, if any
    let store = collector.state_path.clone().map(StateStore::new);
    let saved = match &store {
        Some(store) => store.load().await?,
        None => BTreeMap::new(),
    };
    let engine = NormalizationEngine::with_states(collector.fluids.iter().copied(), saved);

    let board = SensorBoard::default();
    let (fetch_tx, fetch_rx) = mpsc::channel(1);
    http_api::spawn(&cfg.api.bind_addr, board.clone(), fetch_tx).await?;

    let utc_offset = collector
        .utc_offset_hours
        .map(|hours| UtcOffset::from_hms(hours, 0, 0))
        .transpose()?;
    let source = PortalPollSource::new(
        HttpPortalClient::new(&cfg.portal)?,
        collector.fluids.clone(),
        collector.update_interval.as_duration(),
        fetch_rx,
    )
    .with_utc_offset(utc_offset)
    .with_jitter(Duration::from_secs(collector.update_jitter_secs));

    let sensors = SensorSnapshotSink::new(board);
    let sink = match &cfg.questdb {
        Some(questdb) => {
            let addr: SocketAddr = questdb
                .ilp_tcp_addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid questdb.ilp_tcp_addr: {e}"))?;
            OutputSink::SensorsAndQuestDb(TeeSink::new(
                sensors,
                QuestDbIlpSink::new(
                    addr,
                    questdb.max_retries,
                    Duration::from_millis(questdb.retry_backoff_ms),
                ),
            ))
        }
        None => OutputSink::Sensors(sensors),
    };

    tracing::info!(
        fluids = ?collector.fluids,
        interval = ?collector.update_interval,
        state = ?store.as_ref().map(|store| store.path().display().to_string()),
        questdb = cfg.questdb.is_some(),
        "starting ocea collector"
    );

    let pipeline: Pipeline<_, PollBatch, PollOutcome, _> = Pipeline {
        source,
        transform: Arc::new(NormalizeTransform::new(engine, store)),
        sink,
    };
    pipeline.run().await?;

    Ok(())
}
