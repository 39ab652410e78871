//! `queue` crate — background execution collaborator, one of the
//! synchronous/streaming/background execution modes the engine supports.
//!
//! Enqueue once, a worker dequeues and runs it — kept strictly in-process:
//! durable checkpointing across restarts is an explicit non-goal, so there
//! is nothing a durable queue would buy here that an in-memory
//! `tokio::mpsc` channel doesn't already provide. See DESIGN.md for the
//! record of this design choice.

use std::sync::Arc;

use engine::{Driver, ExecutionOptions, ExecutionContext, WorkflowDefinition};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// A workflow execution request accepted for background processing.
///
/// `workflow` is an `Arc` snapshot — the same immutable-snapshot discipline
/// the engine applies at `execute()` time: no shared global state modifies
/// a `WorkflowDefinition` once it's in flight.
#[derive(Clone)]
pub struct Job {
    pub workflow: Arc<WorkflowDefinition>,
    pub input_data: Value,
    pub options: ExecutionOptions,
}

impl Job {
    pub fn new(workflow: Arc<WorkflowDefinition>, input_data: Value, options: ExecutionOptions) -> Self {
        Self { workflow, input_data, options }
    }

    /// The execution id this job will run under, generating one now if the
    /// caller didn't already pin one via `ExecutionOptions::execution_id` —
    /// so callers can report an id back to the client before the worker
    /// even picks the job up.
    pub fn execution_id(&self) -> Uuid {
        self.options.execution_id.unwrap_or_else(Uuid::new_v4)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is at capacity")]
    Full,
    #[error("job queue is closed")]
    Closed,
}

/// A bounded in-process job queue. `enqueue` never blocks the caller
/// (fire-and-forget submission, matching `Persistence::save_execution`'s
/// contract in spirit); `enqueue_waiting` backpressures instead of
/// rejecting, for callers that would rather wait than retry.
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    receiver: Mutex<mpsc::Receiver<Job>>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self { sender, receiver: Mutex::new(receiver) }
    }

    pub fn enqueue(&self, job: Job) -> Result<Uuid, QueueError> {
        let execution_id = job.execution_id();
        self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        Ok(execution_id)
    }

    pub async fn enqueue_waiting(&self, job: Job) -> Result<Uuid, QueueError> {
        let execution_id = job.execution_id();
        self.sender.send(job).await.map_err(|_| QueueError::Closed)?;
        Ok(execution_id)
    }

    /// Pull the next job, or `None` once every sender has been dropped.
    /// Multiple worker tasks may call this concurrently on the same queue —
    /// the receiver lock only ever hands one job to one task at a time.
    async fn next(&self) -> Option<Job> {
        let mut rx = self.receiver.lock().await;
        rx.recv().await
    }
}

/// Drain `queue` forever, running each job through `driver.execute`.
/// Returns once the queue's senders are all dropped (i.e. the process is
/// shutting down). Persistence of the result is the driver's own
/// fire-and-forget hook (`ExecutionPersistence`), not this loop's concern —
/// a worker only needs to drive the execution to completion and log the
/// outcome.
pub async fn run_worker(worker_name: &str, queue: Arc<JobQueue>, driver: Arc<Driver>) {
    info!(worker = worker_name, "background worker started");
    while let Some(job) = queue.next().await {
        let execution_id = job.execution_id();
        info!(worker = worker_name, %execution_id, workflow_id = %job.workflow.id, "picked up job");
        let context: ExecutionContext = driver
            .execute(&job.workflow, job.input_data, job.options)
            .await;
        match context.error {
            Some(err) => warn!(worker = worker_name, %execution_id, error = %err, "job finished with error"),
            None => info!(worker = worker_name, %execution_id, "job completed"),
        }
    }
    info!(worker = worker_name, "queue closed, worker exiting");
}

/// Spawn `count` concurrent worker tasks draining the same queue. Several
/// workers polling one shared queue is the same shape a `SELECT … FOR
/// UPDATE SKIP LOCKED` job table gives you — here, concurrent `recv()`
/// calls on one `mpsc::Receiver` serve the same purpose without a database.
pub fn spawn_workers(queue: Arc<JobQueue>, driver: Arc<Driver>, count: usize) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|i| {
            let queue = queue.clone();
            let driver = driver.clone();
            let name = format!("worker-{i}");
            tokio::spawn(async move { run_worker(&name, queue, driver).await })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::scheduler::ResourcePool;
    use engine::models::ResourceAmounts;
    use nodes::collaborators::{stub, Collaborators};
    use std::sync::Arc;

    fn test_driver() -> Arc<Driver> {
        let collaborators = Arc::new(Collaborators {
            identity: Arc::new(stub::StubIdentityService::allowing()),
            embeddings: Arc::new(stub::StubEmbeddingProvider { dim: 4 }),
            chat: Arc::new(stub::StubChatProvider::returning("pong")),
            rerank: Arc::new(stub::StubRerankProvider),
            vector_store: Arc::new(stub::StubVectorStore::with_collection("c", vec![])),
            keyword_index: None,
            clock: Arc::new(stub::SystemClock),
        });
        let pool = Arc::new(ResourcePool::new(ResourceAmounts {
            cpu_cores: 4.0,
            memory_mb: 4096.0,
            network_mbps: 100.0,
            gpu_mb: 0.0,
            storage_io: 100.0,
        }));
        Arc::new(Driver::new(nodes::builtin_registry(), collaborators, pool))
    }

    fn linear_workflow() -> WorkflowDefinition {
        use engine::models::{Edge, Node};
        WorkflowDefinition::new(
            "wf",
            vec![
                Node { id: "a".into(), node_type: "input".into(), name: "in".into(), config: Value::Null, position: Default::default(), signature: Default::default() },
                Node { id: "b".into(), node_type: "output".into(), name: "out".into(), config: Value::Null, position: Default::default(), signature: Default::default() },
            ],
            vec![Edge { id: "a-b".into(), source: "a".into(), target: "b".into(), source_output: None, target_input: None, condition: None, transform: None }],
        )
    }

    #[tokio::test]
    async fn enqueued_job_runs_to_completion() {
        let queue = Arc::new(JobQueue::new(8));
        let driver = test_driver();
        let workers = spawn_workers(queue.clone(), driver.clone(), 1);

        let execution_id = queue
            .enqueue(Job::new(
                Arc::new(linear_workflow()),
                serde_json::json!({"q": "ping"}),
                ExecutionOptions { tenant_id: "t1".into(), user_id: "u1".into(), ..Default::default() },
            ))
            .expect("enqueue should succeed");

        // Give the worker a chance to drain the job.
        for _ in 0..50 {
            if driver.get_status(execution_id).await.is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        drop(queue);
        for w in workers {
            let _ = tokio::time::timeout(std::time::Duration::from_millis(200), w).await;
        }
    }

    #[test]
    fn full_queue_rejects_enqueue() {
        let queue = JobQueue::new(1);
        let job = |options: ExecutionOptions| Job::new(Arc::new(linear_workflow()), Value::Null, options);
        queue.enqueue(job(ExecutionOptions::default())).expect("first job fits");
        assert!(matches!(queue.enqueue(job(ExecutionOptions::default())), Err(QueueError::Full)));
    }
}
