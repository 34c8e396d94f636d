//! # Task Dispatcher
//!
//! A bounded queue of tasks consumed by a single loop that runs at most
//! `max_concurrent` handlers at a time.
//!
//! ## Lifecycle:
//! 1. register one handler per operation on a [`TaskDispatcherBuilder`]
//! 2. `start()` spawns the consumer and hands back the [`TaskDispatcher`]
//! 3. `enqueue` waits while the queue is full and never drops a task
//! 4. `stop()` closes the queue; `shutdown()` also waits for running handlers
//!
//! Tasks still buffered when the dispatcher stops are never dequeued and stay
//! NEW in the store.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{TaskOperation, TaskRequest};

pub type TaskHandler = Arc<dyn Fn(TaskRequest) -> BoxFuture<'static, Result<(), PipelineError>> + Send + Sync>;

pub struct TaskDispatcherBuilder {
    handlers: HashMap<TaskOperation, TaskHandler>,
    queue_size: usize,
    max_concurrent: usize,
}

impl TaskDispatcherBuilder {
    pub fn new(queue_size: usize, max_concurrent: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            queue_size: queue_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.task_queue_size, config.max_concurrent_tasks)
    }

    /// Associates `operation` with `handler`, replacing any earlier one.
    pub fn register_handler<F, Fut>(mut self, operation: TaskOperation, handler: F) -> Self
    where
        F: Fn(TaskRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        let handler: TaskHandler = Arc::new(move |task| handler(task).boxed());
        self.handlers.insert(operation, handler);
        self
    }

    pub fn start(self) -> TaskDispatcher {
        let (sender, receiver) = mpsc::channel(self.queue_size);
        let cancel = CancellationToken::new();
        let mut operations: Vec<TaskOperation> = self.handlers.keys().copied().collect();
        operations.sort_by_key(|op| op.as_str());
        info!(
            "Task dispatcher started: queue {}, {} concurrent, handlers {:?}",
            self.queue_size, self.max_concurrent, operations
        );

        let consumer = tokio::spawn(consume(
            receiver,
            Arc::new(self.handlers),
            Arc::new(Semaphore::new(self.max_concurrent)),
            cancel.clone(),
        ));

        TaskDispatcher {
            sender: Mutex::new(Some(sender)),
            operations,
            cancel,
            consumer: Mutex::new(Some(consumer)),
        }
    }
}

async fn consume(
    mut receiver: mpsc::Receiver<TaskRequest>,
    handlers: Arc<HashMap<TaskOperation, TaskHandler>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let mut running = JoinSet::new();

    loop {
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Some(task) => task,
                None => break,
            },
        };

        let Some(handler) = handlers.get(&task.operation).cloned() else {
            warn!("Dropping task {}: no handler for {}", task.id, task.operation);
            continue;
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        debug!("Dispatching task {} ({})", task.id, task.operation);
        running.spawn(async move {
            let _permit = permit;
            let (id, operation) = (task.id, task.operation);
            if let Err(e) = handler(task).await {
                warn!("Task {} ({}) returned an error: {}", id, operation, e);
            }
        });

        while let Some(done) = running.try_join_next() {
            if let Err(e) = done {
                error!("Task handler panicked: {}", e);
            }
        }
    }

    while let Some(done) = running.join_next().await {
        if let Err(e) = done {
            error!("Task handler panicked: {}", e);
        }
    }
    debug!("Task dispatcher consumer stopped");
}

/// Handle used to submit work to a running dispatcher.
pub struct TaskDispatcher {
    sender: Mutex<Option<mpsc::Sender<TaskRequest>>>,
    operations: Vec<TaskOperation>,
    cancel: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl TaskDispatcher {
    pub fn handles(&self, operation: TaskOperation) -> bool {
        self.operations.contains(&operation)
    }

    /// Queues a task, waiting while the queue is full.
    pub async fn enqueue(&self, task: TaskRequest) -> Result<(), PipelineError> {
        if !self.handles(task.operation) {
            return Err(PipelineError::UnregisteredOperation(task.operation));
        }
        let sender = self.sender.lock().clone().ok_or(PipelineError::QueueClosed)?;
        sender.send(task).await.map_err(|_| PipelineError::QueueClosed)
    }

    /// Closes the queue. Running handlers finish; nothing new is dequeued.
    pub fn stop(&self) {
        if self.sender.lock().take().is_some() {
            info!("Task dispatcher stopping");
        }
        self.cancel.cancel();
    }

    /// Stops and waits for every running handler.
    pub async fn shutdown(&self) {
        self.stop();
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                error!("Task dispatcher consumer failed: {}", e);
            }
        }
    }
}
