//! # Fan-out / Fan-in Worker Pool
//!
//! Shared shape of the preview and encoding pools: a fixed number of workers
//! pull requests from a channel pre-sized to the batch, and a collector
//! gathers exactly one reply per request.
//!
//! ## Guarantees:
//! - The producer never blocks: both channels hold the whole batch
//! - A request that panics or exceeds the item deadline still produces a reply,
//!   built by the pool's failure constructor
//! - The input side closes once the batch is queued; the collector closes the
//!   reply side right after the N-th reply
//! - If replies stop before N arrive, the batch fails with `MissingResults`
//!   instead of hanging

use futures::future::BoxFuture;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::error::PipelineError;

/// A request that can be correlated with its reply.
pub trait PoolRequest: Send + 'static {
    type Key: Copy + Debug + Send + 'static;

    fn key(&self) -> Self::Key;
}

/// Fixed-size pool running one async job per request.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
    item_timeout: Duration,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize, item_timeout: Duration) -> Self {
        Self {
            name,
            workers: workers.max(1),
            item_timeout,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `work` for every request and returns the replies in completion order.
    ///
    /// `failed` builds the reply for a request whose job panicked or timed out.
    pub async fn run<Req, Res, W, F>(
        &self,
        requests: Vec<Req>,
        work: W,
        failed: F,
    ) -> Result<Vec<Res>, PipelineError>
    where
        Req: PoolRequest,
        Res: Send + 'static,
        W: Fn(Req) -> BoxFuture<'static, Res> + Send + Sync + 'static,
        F: Fn(Req::Key, PipelineError) -> Res + Send + Sync + 'static,
    {
        let expected = requests.len();
        if expected == 0 {
            return Ok(Vec::new());
        }

        let (input_tx, input_rx) = mpsc::channel::<Req>(expected);
        let (reply_tx, mut reply_rx) = mpsc::channel::<Res>(expected);

        for request in requests {
            // Capacity equals the batch size, so this never waits.
            input_tx
                .send(request)
                .await
                .map_err(|_| PipelineError::Environment(format!("{} pool input closed", self.name)))?;
        }
        // Workers drain the queued batch and stop once it is empty.
        drop(input_tx);

        let input_rx = Arc::new(Mutex::new(input_rx));
        let work = Arc::new(work);
        let failed = Arc::new(failed);
        let worker_count = self.workers.min(expected);
        let mut handles = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let input_rx = input_rx.clone();
            let reply_tx = reply_tx.clone();
            let work = work.clone();
            let failed = failed.clone();
            let item_timeout = self.item_timeout;
            let name = self.name;

            handles.push(tokio::spawn(async move {
                debug!("{} worker {} started", name, worker_id);
                loop {
                    let next = input_rx.lock().await.recv().await;
                    let Some(request) = next else { break };
                    let key = request.key();

                    let job = tokio::spawn(work(request));
                    let abort = job.abort_handle();
                    let reply = match tokio::time::timeout(item_timeout, job).await {
                        Ok(Ok(reply)) => reply,
                        Ok(Err(join_err)) => {
                            error!("{} worker {} job {:?} panicked: {}", name, worker_id, key, join_err);
                            failed(key, PipelineError::Environment(format!("worker panicked: {}", join_err)))
                        }
                        Err(_) => {
                            abort.abort();
                            warn!("{} job {:?} exceeded {}s", name, key, item_timeout.as_secs());
                            failed(
                                key,
                                PipelineError::Timeout {
                                    tool: name.to_string(),
                                    seconds: item_timeout.as_secs(),
                                },
                            )
                        }
                    };

                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                debug!("{} worker {} stopped", name, worker_id);
            }));
        }
        drop(reply_tx);

        let mut replies = Vec::with_capacity(expected);
        while let Some(reply) = reply_rx.recv().await {
            replies.push(reply);
            if replies.len() == expected {
                reply_rx.close();
                break;
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("{} worker exited abnormally: {}", self.name, e);
            }
        }

        if replies.len() != expected {
            return Err(PipelineError::MissingResults {
                expected,
                received: replies.len(),
            });
        }
        Ok(replies)
    }
}
