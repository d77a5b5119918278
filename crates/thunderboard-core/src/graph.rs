//! A minimal dependency-ordered task scheduler.
//!
//! Tasks are units of asynchronous work that finish only when they signal
//! their [`TaskCompletion`]. This lets a task issue a hardware request and
//! stay pending until the transport confirms it, while the graph keeps
//! downstream tasks waiting.
//!
//! Rules:
//!
//! - A task starts only after every dependency has completed.
//! - At most `max_concurrency` tasks are pending at once (1 by default, one
//!   physical link).
//! - Every task runs under a timeout; a timeout or failure aborts the graph
//!   and every task it spawned.
//! - Dependencies can only name tasks created earlier, so graphs are acyclic
//!   by construction.
//!
//! # Example
//!
//! ```
//! use thunderboard_core::graph::TaskGraph;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> thunderboard_core::Result<()> {
//! let mut graph = TaskGraph::new("example");
//! let a = graph.create_task("a", &[], |done| Box::pin(async move { done.complete() }));
//! graph.create_task("b", &[a], |done| Box::pin(async move { done.complete() }));
//!
//! let report = graph.run().await?;
//! assert_eq!(report.completed, vec!["a", "b"]);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Default per-task timeout.
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10);

type TaskOutcome = std::result::Result<(), String>;
type TaskWork = Box<dyn FnOnce(TaskCompletion) -> BoxFuture<'static, ()> + Send>;

/// Handle to a task, used to declare dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    graph: u64,
    index: usize,
}

/// Completion signal handed to a task's work.
///
/// Consuming: a task signals at most once. Dropping it without signalling
/// fails the task.
#[derive(Debug)]
pub struct TaskCompletion {
    sender: oneshot::Sender<TaskOutcome>,
}

impl TaskCompletion {
    /// Mark the task done.
    pub fn complete(self) {
        let _ = self.sender.send(Ok(()));
    }

    /// Mark the task failed; the graph aborts.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.sender.send(Err(reason.into()));
    }

    /// Complete or fail from a result.
    pub fn finish(self, result: Result<()>) {
        match result {
            Ok(()) => self.complete(),
            Err(e) => self.fail(e.to_string()),
        }
    }
}

struct Task {
    name: String,
    dependencies: Vec<TaskHandle>,
    timeout: Option<Duration>,
    work: Option<TaskWork>,
}

/// Outcome of a successful graph run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphReport {
    /// Graph name.
    pub name: String,
    /// Task names in the order they completed.
    pub completed: Vec<String>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// A dependency-ordered set of asynchronous tasks. Consumed by [`TaskGraph::run`].
pub struct TaskGraph {
    id: u64,
    name: String,
    tasks: Vec<Task>,
    max_concurrency: usize,
    task_timeout: Duration,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("name", &self.name)
            .field("tasks", &self.tasks.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            tasks: Vec::new(),
            max_concurrency: 1,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    /// Set the number of tasks that may be pending at once.
    #[must_use]
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Set the default per-task timeout.
    #[must_use]
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Add a task that runs `work` once all `dependencies` completed.
    pub fn create_task<F>(
        &mut self,
        name: impl Into<String>,
        dependencies: &[TaskHandle],
        work: F,
    ) -> TaskHandle
    where
        F: FnOnce(TaskCompletion) -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.push(name.into(), dependencies, None, Box::new(work))
    }

    /// Add a task with its own timeout instead of the graph default.
    pub fn create_task_with_timeout<F>(
        &mut self,
        name: impl Into<String>,
        dependencies: &[TaskHandle],
        timeout: Duration,
        work: F,
    ) -> TaskHandle
    where
        F: FnOnce(TaskCompletion) -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.push(name.into(), dependencies, Some(timeout), Box::new(work))
    }

    fn push(
        &mut self,
        name: String,
        dependencies: &[TaskHandle],
        timeout: Option<Duration>,
        work: TaskWork,
    ) -> TaskHandle {
        let index = self.tasks.len();
        self.tasks.push(Task {
            name,
            dependencies: dependencies.to_vec(),
            timeout,
            work: Some(work),
        });
        TaskHandle {
            graph: self.id,
            index,
        }
    }

    fn validate(&self) -> Result<()> {
        for (index, task) in self.tasks.iter().enumerate() {
            for dependency in &task.dependencies {
                if dependency.graph != self.id || dependency.index >= index {
                    return Err(Error::invalid_config(format!(
                        "task '{}' in graph '{}' depends on a task outside the graph",
                        task.name, self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run the graph to completion and discard it.
    #[tracing::instrument(level = "debug", skip(self), fields(graph = %self.name, tasks = self.tasks.len()))]
    pub async fn run(mut self) -> Result<GraphReport> {
        self.validate()?;

        let started_at = Instant::now();
        let count = self.tasks.len();
        let mut started = vec![false; count];
        let mut done = vec![false; count];
        let mut completed = Vec::with_capacity(count);
        let mut spawned: Vec<JoinHandle<()>> = Vec::with_capacity(count);
        let mut running = FuturesUnordered::new();

        loop {
            for index in 0..count {
                if running.len() >= self.max_concurrency {
                    break;
                }
                if started[index] {
                    continue;
                }
                let ready = self.tasks[index]
                    .dependencies
                    .iter()
                    .all(|dependency| done[dependency.index]);
                if !ready {
                    continue;
                }

                started[index] = true;
                let task = &mut self.tasks[index];
                let Some(work) = task.work.take() else {
                    continue;
                };
                let (sender, receiver) = oneshot::channel();
                let timeout = task.timeout.unwrap_or(self.task_timeout);
                debug!(task = %task.name, "task started");

                spawned.push(tokio::spawn(work(TaskCompletion { sender })));
                running.push(async move {
                    let outcome = match tokio::time::timeout(timeout, receiver).await {
                        Ok(Ok(outcome)) => Ok(outcome),
                        Ok(Err(_)) => Ok(Err("task dropped its completion".to_string())),
                        Err(_) => Err(timeout),
                    };
                    (index, outcome)
                });
            }

            let Some((index, outcome)) = running.next().await else {
                break;
            };
            let name = self.tasks[index].name.clone();
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(reason)) => Some(Error::task_failed(&name, reason)),
                Err(duration) => Some(Error::timeout(&name, duration)),
            };

            if let Some(error) = failure {
                warn!(task = %name, error = %error, "task failed, aborting graph");
                for handle in &spawned {
                    handle.abort();
                }
                return Err(error);
            }

            debug!(task = %name, "task completed");
            done[index] = true;
            completed.push(name);
        }

        for handle in &spawned {
            handle.abort();
        }

        Ok(GraphReport {
            name: self.name,
            completed,
            elapsed: started_at.elapsed(),
        })
    }
}
