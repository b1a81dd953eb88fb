//! Bounded, order-preserving parallel map
//!
//! Tasks run on tokio's blocking thread pool, gated by a semaphore so that at
//! most `concurrency` of them execute at once. Results always come back in
//! input order, whatever order the tasks finish in.
//!
//! Two scheduling modes share the same contract:
//! - [`PoolMode::Eager`] turns every input into a pending task up front and
//!   lets all of them run to completion, even after a failure.
//! - [`PoolMode::LowMemory`] streams inputs through a bounded pipeline and
//!   only keeps `concurrency` tasks alive at a time.

pub mod priority;
pub mod progress;

pub use progress::{
    ChannelProgress, NoProgress, ProgressReporter, ProgressSink, ProgressSnapshot,
    TerminalProgress,
};

use crate::config::{PoolConfig, PoolMode};
use crate::error::{error_trace, MapError};
use futures::stream::{self, FuturesUnordered, StreamExt};
use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, error, info, Span};

/// Parallel map executor
#[derive(Clone)]
pub struct ParallelMap {
    config: PoolConfig,
    progress: Arc<dyn ProgressSink>,
    span: Span,
}

impl std::fmt::Debug for ParallelMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelMap")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ParallelMap {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl ParallelMap {
    /// Create an executor that reports progress nowhere
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoProgress),
            span: tracing::info_span!("parallel_map"),
        }
    }

    /// Send progress snapshots to `sink`
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Run every task inside `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Apply `func` to every input and return the results in input order.
    ///
    /// A failing task is logged where it fails. The error returned is the
    /// one belonging to the lowest failing input index.
    pub async fn map<T, R, E, F, I>(&self, func: F, inputs: I) -> Result<Vec<R>, MapError<E>>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        R: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let concurrency = self.config.concurrency.max(1);
        priority::apply(self.config.niceness);

        let func = Arc::new(func);
        match self.config.mode {
            PoolMode::Eager => self.map_eager(func, inputs, concurrency).await,
            PoolMode::LowMemory => self.map_streaming(func, inputs, concurrency).await,
        }
    }

    async fn map_eager<T, R, E, F, I>(
        &self,
        func: Arc<F>,
        inputs: I,
        concurrency: usize,
    ) -> Result<Vec<R>, MapError<E>>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        R: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let inputs: Vec<T> = inputs.into_iter().collect();
        let total = inputs.len();
        info!(
            parent: &self.span,
            total, concurrency, "Dispatching tasks to parallel pool"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut pending = FuturesUnordered::new();
        for (index, input) in inputs.into_iter().enumerate() {
            pending.push(self.dispatch(index, input, func.clone(), semaphore.clone()));
        }

        let mut reporter =
            ProgressReporter::start(self.progress.clone(), self.config.progress_interval, total);
        let mut slots: Vec<Option<Result<R, MapError<E>>>> = (0..total).map(|_| None).collect();

        while let Some((index, outcome)) = pending.next().await {
            reporter.task_finished(outcome.is_err());
            slots[index] = Some(outcome);
        }
        reporter.finish();

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.unwrap_or(Err(MapError::Cancelled { index })))
            .collect()
    }

    async fn map_streaming<T, R, E, F, I>(
        &self,
        func: Arc<F>,
        inputs: I,
        concurrency: usize,
    ) -> Result<Vec<R>, MapError<E>>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        R: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let inputs = inputs.into_iter();
        let (lower, upper) = inputs.size_hint();
        let total = upper.unwrap_or(lower);
        info!(
            parent: &self.span,
            total, concurrency, "Streaming tasks through parallel pool"
        );

        // The pipeline itself bounds concurrency; the semaphore is never contended.
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut results_stream = stream::iter(inputs.enumerate())
            .map(|(index, input)| self.dispatch(index, input, func.clone(), semaphore.clone()))
            .buffered(concurrency);

        let mut reporter =
            ProgressReporter::start(self.progress.clone(), self.config.progress_interval, total);
        let mut results = Vec::with_capacity(total);

        while let Some((index, outcome)) = results_stream.next().await {
            reporter.task_finished(outcome.is_err());
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    debug!(
                        parent: &self.span,
                        index, "Stopping streaming pool after first failure"
                    );
                    reporter.finish();
                    return Err(e);
                }
            }
        }
        reporter.finish();

        Ok(results)
    }

    /// Build the future for one task: wait for a permit, then run on a blocking thread
    fn dispatch<T, R, E, F>(
        &self,
        index: usize,
        input: T,
        func: Arc<F>,
        semaphore: Arc<Semaphore>,
    ) -> impl std::future::Future<Output = (usize, Result<R, MapError<E>>)> + Send + 'static
    where
        T: Send + 'static,
        R: Send + 'static,
        E: StdError + Send + Sync + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        let span = self.span.clone();
        let niceness = self.config.niceness;

        async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (index, Err(MapError::Cancelled { index })),
            };

            let task_span = span.clone();
            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                priority::apply(niceness);
                run_task(index, &task_span, func.as_ref(), input)
            })
            .await;

            let outcome = match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(MapError::Task { index, source }),
                Err(join_error) => Err(join_failure(index, &span, join_error)),
            };
            (index, outcome)
        }
    }
}

/// Execute one task inside the pool's span, logging its failure
fn run_task<T, R, E, F>(index: usize, span: &Span, func: &F, input: T) -> Result<R, E>
where
    E: StdError + 'static,
    F: Fn(T) -> Result<R, E>,
{
    span.in_scope(|| {
        debug!(task = index, "Task started");
        let result = func(input);
        match &result {
            Ok(_) => debug!(task = index, "Task finished"),
            Err(e) => error!(
                task = index,
                error = %e,
                trace = %error_trace(e),
                "Task failed"
            ),
        }
        result
    })
}

fn join_failure<E>(index: usize, span: &Span, join_error: JoinError) -> MapError<E>
where
    E: StdError + Send + Sync + 'static,
{
    if join_error.is_panic() {
        let message = panic_message(join_error.into_panic());
        error!(parent: span, task = index, panic = %message, "Task panicked");
        MapError::Panicked { index, message }
    } else {
        error!(parent: span, task = index, "Task was cancelled");
        MapError::Cancelled { index }
    }
}

fn panic_message(payload: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Eager parallel map over every CPU with a terminal progress bar
pub async fn pmap<T, R, E, F, I>(func: F, inputs: I) -> Result<Vec<R>, MapError<E>>
where
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    R: Send + 'static,
    E: StdError + Send + Sync + 'static,
    F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
{
    ParallelMap::new(PoolConfig::default())
        .with_progress(Arc::new(TerminalProgress::default()))
        .map(func, inputs)
        .await
}

/// Streaming parallel map over half the CPUs, for long memory-hungry tasks
pub async fn low_memory_pmap<T, R, E, F, I>(func: F, inputs: I) -> Result<Vec<R>, MapError<E>>
where
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    R: Send + 'static,
    E: StdError + Send + Sync + 'static,
    F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
{
    ParallelMap::new(PoolConfig::low_memory())
        .map(func, inputs)
        .await
}
