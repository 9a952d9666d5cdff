use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::pipeline::{Envelope, PipelineError, Sink};

/// Feeds every item to two sinks. Upstream errors are logged here and not
/// forwarded.
pub struct TeeSink<A, B> {
    first: A,
    second: B,
    buffer: usize,
}

impl<A, B> TeeSink<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            buffer: 16,
        }
    }
}

#[async_trait::async_trait]
impl<T, A, B> Sink<T> for TeeSink<A, B>
where
    T: Clone + Send + Sync + 'static,
    A: Sink<T> + Send + Sync,
    B: Sink<T> + Send + Sync,
{
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static,
    {
        let (tx_a, rx_a) = mpsc::channel::<Envelope<T>>(self.buffer);
        let (tx_b, rx_b) = mpsc::channel::<Envelope<T>>(self.buffer);

        let forward = async move {
            let mut targets = [Some(tx_a), Some(tx_b)];
            while let Some(item) = input.next().await {
                let env = match item {
                    Ok(env) => env,
                    Err(e) => {
                        tracing::error!(error = %e, "error in upstream pipeline for TeeSink");
                        continue;
                    }
                };

                for target in targets.iter_mut() {
                    let closed = match target {
                        Some(tx) => tx.send(env.clone()).await.is_err(),
                        None => false,
                    };
                    if closed {
                        tracing::warn!("tee target stopped; no longer forwarding to it");
                        *target = None;
                    }
                }
            }
        };

        let (_, first, second) = tokio::join!(
            forward,
            self.first.run(ReceiverStream::new(rx_a).map(Ok)),
            self.second.run(ReceiverStream::new(rx_b).map(Ok)),
        );

        first.and(second)
    }
}
