//! Streaming plumbing for offline replays: a source of timestamped rows, a
//! chain of same-type stages, and a sink that consumes what survives.

use std::{pin::Pin, sync::Arc};

use futures::{Stream, StreamExt};
use time::OffsetDateTime;

/// A record plus the instant it describes.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub observed_at: OffsetDateTime,
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

/// Consumes the stream. Rejected rows arrive as `Err` items; whether they
/// abort the run is up to the sink.
#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

type Stage<T> = Arc<dyn Transform<T, T> + Send + Sync>;

pub struct Pipeline<S, T, K> {
    source: S,
    stages: Vec<Stage<T>>,
    sink: K,
}

impl<S, T, K> Pipeline<S, T, K> {
    pub fn new(source: S, sink: K) -> Self {
        Self {
            source,
            stages: Vec::new(),
            sink,
        }
    }

    /// Appends a stage. Stages see rows in the order they were added; a row
    /// rejected by one stage skips the rest.
    pub fn with_transform(mut self, stage: impl Transform<T, T> + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }
}

impl<S, T, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let stages = self.stages.len();
        let input = self.source.stream().await;

        let chained = self
            .stages
            .into_iter()
            .fold(input, |stream, stage| -> EnvelopeStream<T> {
                Box::pin(stream.then(move |item| {
                    let stage = Arc::clone(&stage);
                    async move {
                        match item {
                            Ok(env) => stage.apply(env).await,
                            Err(e) => Err(e),
                        }
                    }
                }))
            });

        tracing::debug!(stages, "pipeline started");
        self.sink.run(chained).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use time::macros::datetime;
    use tokio::sync::Mutex;

    struct Rows(Vec<&'static str>);

    #[async_trait::async_trait]
    impl Source<String> for Rows {
        async fn stream(&self) -> EnvelopeStream<String> {
            let rows: Vec<_> = self
                .0
                .iter()
                .map(|r| {
                    Ok(Envelope {
                        payload: r.to_string(),
                        observed_at: datetime!(2024-05-10 12:00:00 UTC),
                    })
                })
                .collect();
            Box::pin(stream::iter(rows))
        }
    }

    /// Appends its tag, rejecting rows that contain `reject`.
    struct Tag {
        tag: &'static str,
        reject: &'static str,
    }

    #[async_trait::async_trait]
    impl Transform<String, String> for Tag {
        async fn apply(
            &self,
            mut input: Envelope<String>,
        ) -> Result<Envelope<String>, PipelineError> {
            if input.payload.contains(self.reject) {
                let reason = format!("{} rejected {}", self.tag, input.payload);
                return Err(PipelineError::Transform(reason));
            }
            input.payload.push_str(self.tag);
            Ok(input)
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<Result<String, String>>>>);

    #[async_trait::async_trait]
    impl Sink<String> for Collect {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<String>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                self.0
                    .lock()
                    .await
                    .push(item.map(|env| env.payload).map_err(|e| e.to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn stages_run_in_order_and_rejections_skip_later_stages() {
        let sink = Collect::default();
        let seen = sink.0.clone();

        Pipeline::<_, String, _>::new(Rows(vec!["a", "b", "x"]), sink)
            .with_transform(Tag { tag: "1", reject: "x" })
            .with_transform(Tag { tag: "2", reject: "b1" })
            .run()
            .await
            .unwrap();

        let seen = seen.lock().await.clone();
        assert_eq!(seen[0], Ok("a12".to_string()));
        assert_eq!(seen[1], Err("transform error: 2 rejected b1".to_string()));
        assert_eq!(seen[2], Err("transform error: 1 rejected x".to_string()));
    }

    #[tokio::test]
    async fn pipeline_without_stages_passes_rows_through() {
        let sink = Collect::default();
        let seen = sink.0.clone();

        Pipeline::<_, String, _>::new(Rows(vec!["only"]), sink)
            .run()
            .await
            .unwrap();

        assert_eq!(*seen.lock().await, vec![Ok("only".to_string())]);
    }
}
