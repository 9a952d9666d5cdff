use std::{net::SocketAddr, time::Duration};

use consumption_core::{NormalizedReading, ValueStatus};
use futures::StreamExt;
use time::{Date, Time};
use tokio::{io::AsyncWriteExt, net::TcpStream};

use crate::{
    pipeline::{Envelope, PipelineError, Sink},
    transform::PollOutcome,
};

const MEASUREMENT: &str = "ocea_consumption";

/// Escape measurement/tag keys/tag values/field keys for ILP.
///
/// ILP requires escaping commas, spaces and equals with a backslash.
fn ilp_escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    ilp_escape_ident(key, out);
    out.push('=');
    ilp_escape_ident(value, out);
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: f64) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }

    ilp_escape_ident(key, out);
    out.push('=');
    out.push_str(&value.to_string());
}

fn date_to_unix_nanos(date: Date) -> i128 {
    date.with_time(Time::MIDNIGHT).assume_utc().unix_timestamp_nanos()
}

/// Same fluid, day and total always hash to the same id, so a repeated poll
/// can be deduplicated on the QuestDB side.
fn event_id(fluid: &str, date: Date, total: f64) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&(fluid.len() as u32).to_le_bytes());
    h.update(fluid.as_bytes());
    h.update(&date.to_julian_day().to_le_bytes());
    h.update(&total.to_bits().to_le_bytes());
    h.finalize().to_hex().to_string()
}

/// Appends one line for `reading`. Returns false, writing nothing, when the
/// reading has no usable total or date.
fn write_ilp_line(reading: &NormalizedReading, out: &mut String) -> bool {
    if reading.value_status == ValueStatus::Unavailable {
        return false;
    }
    let (Some(total), Some(date)) = (reading.total, reading.latest_date) else {
        return false;
    };
    let fluid = reading.fluid.key();

    out.push_str(MEASUREMENT);

    // tags (SYMBOL columns)
    push_tag(out, "event_id", &event_id(fluid, date, total));
    push_tag(out, "fluid", fluid);
    push_tag(out, "unit", reading.unit.symbol());
    push_tag(out, "value_status", reading.value_status.as_str());
    push_tag(out, "daily_status", reading.daily_status.as_str());

    // fields
    out.push(' ');
    let mut first = true;
    push_field_f64(out, &mut first, "total", total);
    if let Some(daily) = reading.daily {
        push_field_f64(out, &mut first, "daily", daily);
    }

    // timestamp (nanos), attributed to the effective date
    out.push(' ');
    out.push_str(&date_to_unix_nanos(date).to_string());
    out.push('\n');
    true
}

/// Writes every pass to QuestDB over ILP/TCP.
///
/// Write failures are retried with a linear backoff and a fresh connection;
/// when retries run out the pass is dropped and the sink keeps running.
pub struct QuestDbIlpSink {
    addr: SocketAddr,
    max_retries: u32,
    retry_backoff: Duration,
}

impl QuestDbIlpSink {
    pub fn new(addr: SocketAddr, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            addr,
            max_retries,
            retry_backoff,
        }
    }

    async fn connect(&self) -> Result<TcpStream, PipelineError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| PipelineError::Sink(format!("failed to connect to QuestDB ILP: {e}")))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    fn encode(outcome: &PollOutcome) -> (Vec<u8>, usize) {
        let mut s = String::with_capacity(outcome.readings.len() * 160);
        let lines = outcome
            .readings
            .values()
            .filter(|reading| write_ilp_line(reading, &mut s))
            .count();
        (s.into_bytes(), lines)
    }

    async fn write(
        &self,
        conn: &mut Option<TcpStream>,
        payload: &[u8],
    ) -> Result<(), PipelineError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match conn.as_mut() {
                Some(stream) => stream
                    .write_all(payload)
                    .await
                    .map_err(|e| PipelineError::Sink(format!("ilp write failed: {e}"))),
                None => match self.connect().await {
                    Ok(stream) => {
                        *conn = Some(stream);
                        continue;
                    }
                    Err(e) => Err(e),
                },
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "QuestDB ILP write failed, reconnecting and retrying"
                    );
                    metrics::counter!("questdb_ilp_retry_total").increment(1);
                    *conn = None;
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    *conn = None;
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<PollOutcome> for QuestDbIlpSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<PollOutcome>, PipelineError>>
            + Send
            + Unpin
            + 'static,
    {
        let mut conn: Option<TcpStream> = None;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline for QuestDbIlpSink");
                    continue;
                }
            };

            let (payload, lines) = Self::encode(&env.payload);
            if lines == 0 {
                continue;
            }

            match self.write(&mut conn, &payload).await {
                Ok(()) => {
                    metrics::counter!("questdb_ingested_records_total").increment(lines as u64);
                    metrics::counter!("questdb_ilp_bytes_total").increment(payload.len() as u64);
                }
                Err(e) => {
                    tracing::error!(error = %e, lines, "QuestDB ILP write failed, dropping pass");
                    metrics::counter!("questdb_ilp_sink_errors_total").increment(1);
                }
            }
        }

        if let Some(mut stream) = conn {
            let _ = stream.shutdown().await;
        }

        Ok(())
    }
}
