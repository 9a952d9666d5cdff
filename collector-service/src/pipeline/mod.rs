use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }

    /// Replaces the payload, keeping the original receive time.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            payload: f(self.payload),
            received_at: self.received_at,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

pub type EnvelopeStream<T> =
    Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// Source of `I`, one transform `I -> O`, sink of `O`.
///
/// Items are transformed strictly one after another, so a stateful transform
/// never sees two items at once.
pub struct Pipeline<S, I, O, K> {
    pub source: S,
    pub transform: Arc<dyn Transform<I, O> + Send + Sync>,
    pub sink: K,
}

impl<S, I, O, K> Pipeline<S, I, O, K>
where
    I: Send + 'static,
    O: Send + 'static,
    S: Source<I> + Send + Sync + 'static,
    K: Sink<O> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let input = self.source.stream().await;
        let transform = self.transform;

        let output: EnvelopeStream<O> = Box::pin(input.then(move |item| {
            let t = transform.clone();
            async move {
                match item {
                    Ok(env) => t.apply(env).await,
                    Err(e) => Err(e),
                }
            }
        }));

        self.sink.run(output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Numbers(Vec<i64>);

    #[async_trait::async_trait]
    impl Source<i64> for Numbers {
        async fn stream(&self) -> EnvelopeStream<i64> {
            let items: Vec<_> = self.0.iter().map(|n| Ok(Envelope::new(*n))).collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    struct Describe;

    #[async_trait::async_trait]
    impl Transform<i64, String> for Describe {
        async fn apply(&self, input: Envelope<i64>) -> Result<Envelope<String>, PipelineError> {
            if input.payload < 0 {
                return Err(PipelineError::Transform("negative".to_string()));
            }
            Ok(input.map(|n| format!("#{n}")))
        }
    }

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<Result<String, String>>>,
    }

    #[async_trait::async_trait]
    impl Sink<String> for Collect {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<String>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                let entry = item.map(|env| env.payload).map_err(|e| e.to_string());
                self.seen.lock().unwrap().push(entry);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn pipeline_runs_items_through_transform_in_order() {
        let sink = Arc::new(Collect::default());

        struct Shared(Arc<Collect>);

        #[async_trait::async_trait]
        impl Sink<String> for Shared {
            async fn run<S>(&self, input: S) -> Result<(), PipelineError>
            where
                S: Stream<Item = Result<Envelope<String>, PipelineError>> + Send + Unpin + 'static,
            {
                self.0.run(input).await
            }
        }

        let pipeline: Pipeline<_, i64, String, _> = Pipeline {
            source: Numbers(vec![1, -2, 3]),
            transform: Arc::new(Describe),
            sink: Shared(sink.clone()),
        };
        pipeline.run().await.unwrap();

        let seen = sink.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                Ok("#1".to_string()),
                Err("transform error: negative".to_string()),
                Ok("#3".to_string()),
            ]
        );
    }
}
