//! Bounded worker pool shared by the fetch, build, and push phases.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

type Job<T> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<T>> + Send>;

struct Queued<T> {
    name: String,
    job: Job<T>,
}

/// A fixed number of workers pulling named jobs from one queue.
///
/// The first failing job cancels the pool's token. Workers stop dequeuing
/// once it is cancelled, so queued jobs never start; running jobs see the
/// token and are expected to return at their next suspension point.
pub struct WorkerPool<T> {
    queue: Option<mpsc::UnboundedSender<Queued<T>>>,
    results: mpsc::UnboundedReceiver<(String, Result<T>)>,
    workers: JoinSet<()>,
    cancel: CancellationToken,
    submitted: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Starts `size` workers (at least one). The pool's token is a child of
    /// `parent`: cancelling the caller cancels the pool, not the reverse.
    pub fn new(size: usize, parent: &CancellationToken) -> Self {
        let size = size.max(1);
        let cancel = parent.child_token();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Queued<T>>();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let (result_tx, results) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for worker in 0..size {
            let queue = Arc::clone(&queue_rx);
            let results = result_tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        queued = async { queue.lock().await.recv().await } => queued,
                    };
                    let Some(Queued { name, job }) = next else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        debug!(worker, job = %name, "skipping job after cancellation");
                        break;
                    }

                    debug!(worker, job = %name, "job started");
                    let outcome = job(cancel.clone()).await;
                    if let Err(e) = &outcome {
                        debug!(worker, job = %name, error = %e, "job failed, cancelling pool");
                        cancel.cancel();
                    }
                    if results.send((name, outcome)).is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            queue: Some(queue_tx),
            results,
            workers,
            cancel,
            submitted: 0,
        }
    }

    pub fn submit<F, Fut>(&mut self, name: impl Into<String>, job: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let name = name.into();
        let job: Job<T> = Box::new(move |cancel| Box::pin(job(cancel)));
        self.submitted += 1;

        let Some(queue) = &self.queue else {
            return;
        };
        if queue.send(Queued { name, job }).is_err() {
            debug!("workers already stopped, job dropped");
        }
    }

    /// Closes the queue and waits for every worker to stop.
    ///
    /// Returns the completed jobs (in completion order) when all of them
    /// succeeded, otherwise the first error observed. Under concurrent
    /// failures which error is "first" depends on timing; an error other
    /// than cancellation is preferred over one caused by it.
    pub async fn wait(mut self) -> Result<Vec<(String, T)>> {
        self.queue.take();

        let mut completed = Vec::with_capacity(self.submitted);
        let mut first_error: Option<Error> = None;

        while let Some((name, outcome)) = self.results.recv().await {
            match outcome {
                Ok(value) => completed.push((name, value)),
                Err(e) => record_failure(&mut first_error, name, e),
            }
        }

        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                self.cancel.cancel();
                let error = Error::Worker { source: e };
                record_failure(&mut first_error, "worker".to_owned(), error);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if completed.len() < self.submitted {
            return Err(Error::Cancelled);
        }
        Ok(completed)
    }
}

fn record_failure(first: &mut Option<Error>, name: String, error: Error) {
    match first {
        None => *first = Some(error),
        Some(current) if current.is_cancelled() && !error.is_cancelled() => *first = Some(error),
        Some(_) => debug!(job = %name, error = %error, "additional failure"),
    }
}
