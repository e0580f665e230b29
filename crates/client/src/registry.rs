use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error a background task finished with.
pub type TaskError = Box<dyn StdError + Send + Sync>;

/// Identifies a registered task.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TaskId(u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// What a background task does. Shutdown stops watches before consumers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TaskKind {
    /// A pull-consumer polling loop.
    Consumer,

    /// A bucket watch loop.
    Watch,
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Consumer => f.write_str("consumer"),
            Self::Watch => f.write_str("watch"),
        }
    }
}

/// How a task ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// Returned normally, usually after observing cancellation.
    Completed,

    /// Returned an error (callback or transport failure).
    Failed(String),

    /// Panicked.
    Panicked,

    /// Did not stop within the grace period and was aborted.
    Aborted,
}

impl Display for TaskOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Panicked => f.write_str("panicked"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// The final state of one task, as collected by shutdown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskReport {
    /// Task name, e.g. `consumer:orders_worker`.
    pub name: String,

    /// Task kind.
    pub kind: TaskKind,

    /// How it ended.
    pub outcome: TaskOutcome,
}

/// Handle to a registered background task.
///
/// Dropping the handle does not stop the task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: TaskId,
    kind: TaskKind,
    name: String,
    token: CancellationToken,
}

impl TaskHandle {
    /// Registry identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Task kind.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals the task to stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Returned by [`TaskRegistry::spawn`] once shutdown has begun.
#[derive(Clone, Copy, Debug)]
pub struct RegistryClosed;

#[derive(Debug)]
struct RegisteredTask {
    name: String,
    kind: TaskKind,
    token: CancellationToken,
    join: JoinHandle<Result<(), TaskError>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    closed: bool,
    tasks: HashMap<TaskId, RegisteredTask>,
    exited: Vec<(TaskId, TaskReport)>,
}

/// Moves a task from `tasks` to `exited` when its future ends or is dropped.
///
/// Does nothing if `cancel` or `drain` already took the task, since those
/// collect the outcome from the join handle instead.
struct ExitGuard {
    id: TaskId,
    state: Arc<Mutex<RegistryState>>,
    outcome: Option<TaskOutcome>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(if std::thread::panicking() {
            TaskOutcome::Panicked
        } else {
            TaskOutcome::Aborted
        });

        let mut state = self.state.lock();
        let Some(task) = state.tasks.remove(&self.id) else {
            return;
        };

        log_outcome(&task.name, &outcome);
        state.exited.push((
            self.id,
            TaskReport {
                name: task.name,
                kind: task.kind,
                outcome,
            },
        ));
    }
}

fn outcome_of(result: &Result<(), TaskError>) -> TaskOutcome {
    match result {
        Ok(()) => TaskOutcome::Completed,
        Err(e) => TaskOutcome::Failed(e.to_string()),
    }
}

fn log_outcome(name: &str, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Completed => info!(task = %name, "task stopped"),
        other => error!(task = %name, outcome = %other, "task ended abnormally"),
    }
}

/// Tracks every background task spawned on a connection.
///
/// A task that ends on its own leaves the set of running tasks immediately.
/// Its report is kept until [`TaskRegistry::cancel`] or [`TaskRegistry::drain`]
/// collects it.
#[derive(Clone, Debug, Default)]
pub struct TaskRegistry {
    next_id: Arc<AtomicU64>,
    root: CancellationToken,
    state: Arc<Mutex<RegistryState>>,
}

impl TaskRegistry {
    /// Registers and starts a task. The task does not begin running until it
    /// is in the registry.
    pub fn spawn<F, Fut>(
        &self,
        name: String,
        kind: TaskKind,
        task: F,
    ) -> Result<TaskHandle, RegistryClosed>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let mut state = self.state.lock();

        if state.closed {
            return Err(RegistryClosed);
        }

        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = self.root.child_token();
        let (start_tx, start_rx) = oneshot::channel::<()>();
        let work = task(token.clone());
        let registry_state = self.state.clone();

        let join = tokio::spawn(async move {
            let _ = start_rx.await;

            let mut guard = ExitGuard {
                id,
                state: registry_state,
                outcome: None,
            };
            let result = work.await;
            guard.outcome = Some(outcome_of(&result));
            drop(guard);

            result
        });

        state.tasks.insert(
            id,
            RegisteredTask {
                name: name.clone(),
                kind,
                token: token.clone(),
                join,
            },
        );
        drop(state);

        let _ = start_tx.send(());
        info!(task = %name, %kind, %id, "task started");

        Ok(TaskHandle {
            id,
            kind,
            name,
            token,
        })
    }

    /// Refuses any further registration.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    /// Whether registration is still accepted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Whether no task is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of exited tasks whose reports have not been collected yet.
    #[must_use]
    pub fn exited_count(&self) -> usize {
        self.state.lock().exited.len()
    }

    /// Cancels one task and waits for it until `deadline`. A task that already
    /// exited on its own yields its recorded report.
    ///
    /// Returns `None` if the task is unknown or its report was already collected.
    pub async fn cancel(&self, id: TaskId, deadline: Instant) -> Option<TaskReport> {
        let task = {
            let mut state = self.state.lock();

            match state.tasks.remove(&id) {
                Some(task) => task,
                None => {
                    let position = state.exited.iter().position(|(exited, _)| *exited == id)?;
                    return Some(state.exited.remove(position).1);
                }
            }
        };
        task.token.cancel();

        Some(Self::await_task(task, deadline).await)
    }

    /// Cancels every task of `kind`, then waits for each of them until
    /// `deadline`. Reports of tasks of `kind` that already exited are included,
    /// all in spawn order.
    pub async fn drain(&self, kind: TaskKind, deadline: Instant) -> Vec<TaskReport> {
        let (mut exited, running) = {
            let mut state = self.state.lock();

            let (exited, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.exited)
                .into_iter()
                .partition(|(_, report)| report.kind == kind);
            state.exited = kept;

            let ids: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|(_, t)| t.kind == kind)
                .map(|(id, _)| *id)
                .collect();
            let running: Vec<(TaskId, RegisteredTask)> = ids
                .into_iter()
                .filter_map(|id| state.tasks.remove(&id).map(|t| (id, t)))
                .collect();

            (exited, running)
        };

        debug!(
            %kind,
            running = running.len(),
            exited = exited.len(),
            "draining tasks"
        );

        for (_, task) in &running {
            task.token.cancel();
        }

        for (id, task) in running {
            exited.push((id, Self::await_task(task, deadline).await));
        }
        exited.sort_by_key(|(id, _)| id.0);

        exited.into_iter().map(|(_, report)| report).collect()
    }

    async fn await_task(mut task: RegisteredTask, deadline: Instant) -> TaskReport {
        let outcome = match timeout_at(deadline, &mut task.join).await {
            Ok(Ok(result)) => outcome_of(&result),
            Ok(Err(e)) if e.is_panic() => TaskOutcome::Panicked,
            Ok(Err(_)) => TaskOutcome::Aborted,
            Err(_) => {
                task.join.abort();
                warn!(task = %task.name, "task did not stop within grace period, aborted");
                TaskOutcome::Aborted
            }
        };

        log_outcome(&task.name, &outcome);

        TaskReport {
            name: task.name,
            kind: task.kind,
            outcome,
        }
    }
}
