//! Dependency-aware task scheduling.
//!
//! The scheduler runs one task per site with:
//!
//! - **Parallelism**: at most `max_workers` tasks execute at once
//! - **Dependency ordering**: a task starts only after every task it depends
//!   on has succeeded
//! - **Fault isolation**: a failed task only blocks its dependents
//!
//! Task state is owned by a single scheduler loop. Workers execute on the
//! blocking thread pool and report `(key, outcome)` back over a channel.

use log::{error, info};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("max_workers must be at least 1")]
    NoWorkers,

    #[error("duplicate task key: {0}")]
    DuplicateKey(String),

    /// First task failure in debug mode.
    #[error("{key} failed: {reason}")]
    TaskFailed { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Running,
    Succeeded,
    Failed,
}

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub key: String,
    pub state: TaskState,
    /// Keys still to succeed before this task may run.
    pub dependencies: BTreeSet<String>,
}

impl Task {
    pub fn new<I, S>(key: &str, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Task {
            key: key.to_string(),
            state: TaskState::Waiting,
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }
}

/// Classification of every task at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Tasks that never ran because a dependency did not succeed.
    pub blocked: Vec<String>,
    pub elapsed: Duration,
}

impl Summary {
    fn from_tasks(tasks: &BTreeMap<String, Task>, elapsed: Duration) -> Self {
        let keys = |state: TaskState| -> Vec<String> {
            tasks
                .values()
                .filter(|t| t.state == state)
                .map(|t| t.key.clone())
                .collect()
        };
        Summary {
            succeeded: keys(TaskState::Succeeded),
            failed: keys(TaskState::Failed),
            blocked: keys(TaskState::Waiting),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    pub fn log(&self) {
        info!("_______________________");
        info!("Run complete in {:.1}s", self.elapsed.as_secs_f64());
        info!("{} tasks succeeded", self.succeeded.len());
        info!("{} tasks failed: {:?}", self.failed.len(), self.failed);
        info!(
            "{} tasks had dependency failures: {:?}",
            self.blocked.len(),
            self.blocked
        );
        info!("_______________________");
    }
}

type Outcome = (String, anyhow::Result<()>);

/// Run every task, respecting dependencies, with at most `max_workers`
/// executing concurrently.
///
/// A failing task is logged and marked failed; tasks depending on it stay
/// waiting and are reported as blocked. With `debug` set the first failure is
/// returned as [`SchedulerError::TaskFailed`] instead. A dependency on a key
/// that is not part of `tasks` is never satisfied.
pub async fn run<F>(tasks: Vec<Task>, max_workers: usize, debug: bool, execute: F) -> Result<Summary>
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
{
    if max_workers == 0 {
        return Err(SchedulerError::NoWorkers);
    }
    let start = Instant::now();
    let mut tasks = index(tasks)?;
    let execute = Arc::new(execute);
    let (tx, mut rx) = mpsc::channel::<Outcome>(max_workers);
    let mut ready = VecDeque::new();
    let mut in_flight = 0usize;

    feed(&mut tasks, &mut ready);
    loop {
        while in_flight < max_workers {
            let Some(key) = ready.pop_front() else { break };
            spawn_worker(key, Arc::clone(&execute), tx.clone());
            in_flight += 1;
        }
        if in_flight == 0 {
            break;
        }
        let Some((key, outcome)) = rx.recv().await else { break };
        in_flight -= 1;
        complete(&mut tasks, &key, outcome, debug)?;
        feed(&mut tasks, &mut ready);
    }

    Ok(Summary::from_tasks(&tasks, start.elapsed()))
}

fn index(tasks: Vec<Task>) -> Result<BTreeMap<String, Task>> {
    let mut indexed = BTreeMap::new();
    for task in tasks {
        if indexed.contains_key(&task.key) {
            return Err(SchedulerError::DuplicateKey(task.key));
        }
        indexed.insert(task.key.clone(), task);
    }
    Ok(indexed)
}

/// Queue every waiting task whose dependencies are all satisfied.
fn feed(tasks: &mut BTreeMap<String, Task>, ready: &mut VecDeque<String>) {
    for task in tasks.values_mut() {
        if task.state == TaskState::Waiting && task.dependencies.is_empty() {
            task.state = TaskState::Running;
            ready.push_back(task.key.clone());
        }
    }
}

fn complete(
    tasks: &mut BTreeMap<String, Task>,
    key: &str,
    outcome: anyhow::Result<()>,
    debug: bool,
) -> Result<()> {
    match outcome {
        Ok(()) => {
            for task in tasks.values_mut() {
                task.dependencies.remove(key);
            }
            if let Some(task) = tasks.get_mut(key) {
                task.state = TaskState::Succeeded;
            }
            Ok(())
        }
        Err(e) => {
            if let Some(task) = tasks.get_mut(key) {
                task.state = TaskState::Failed;
            }
            if debug {
                return Err(SchedulerError::TaskFailed {
                    key: key.to_string(),
                    reason: format!("{e:#}"),
                });
            }
            Ok(())
        }
    }
}

fn spawn_worker<F>(key: String, execute: Arc<F>, tx: mpsc::Sender<Outcome>)
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!("{} starting", key);
        let started = Instant::now();
        let worker_key = key.clone();
        let outcome = match tokio::task::spawn_blocking(move || (*execute)(&worker_key)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow::anyhow!("worker panicked: {e}")),
        };
        let secs = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(()) => info!("{} completed in {:.1}s", key, secs),
            Err(e) => error!("{} failed in {:.1}s: {:#}. See task log for details.", key, secs, e),
        }
        // The receiver only goes away once the run has been abandoned.
        let _ = tx.send((key, outcome)).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn failing_on(
        fail: &'static [&'static str],
    ) -> impl Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static {
        move |key: &str| {
            if fail.iter().any(|f| *f == key) {
                anyhow::bail!("{key} exploded")
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chain_failure_blocks_dependents() {
        let tasks = vec![
            Task::new("A", Vec::<String>::new()),
            Task::new("B", ["A"]),
            Task::new("C", ["B"]),
        ];
        let summary = run(tasks, 2, false, failing_on(&["A"])).await.unwrap();
        assert!(summary.succeeded.is_empty());
        assert_eq!(summary.failed, keys(&["A"]));
        assert_eq!(summary.blocked, keys(&["B", "C"]));
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_dag_outcome_independent_of_worker_count() {
        for workers in [1, 2, 3, 8] {
            let tasks = vec![
                Task::new("a", Vec::<String>::new()),
                Task::new("b", ["a"]),
                Task::new("c", ["a"]),
                Task::new("d", ["b", "c"]),
                Task::new("e", Vec::<String>::new()),
                Task::new("f", ["e"]),
                Task::new("g", ["d", "f"]),
            ];
            let summary = run(tasks, workers, false, failing_on(&["c"])).await.unwrap();
            assert_eq!(summary.succeeded, keys(&["a", "b", "e", "f"]), "workers={workers}");
            assert_eq!(summary.failed, keys(&["c"]), "workers={workers}");
            assert_eq!(summary.blocked, keys(&["d", "g"]), "workers={workers}");
        }
    }

    #[tokio::test]
    async fn test_dependencies_finish_before_dependents_start() {
        let events = Arc::new(Mutex::new(Vec::<(String, bool)>::new()));
        let recorder = Arc::clone(&events);
        let tasks = vec![
            Task::new("up", Vec::<String>::new()),
            Task::new("mid", ["up"]),
            Task::new("side", Vec::<String>::new()),
            Task::new("down", ["mid", "side"]),
        ];
        let deps: Vec<(String, Vec<String>)> = tasks
            .iter()
            .map(|t| (t.key.clone(), t.dependencies.iter().cloned().collect()))
            .collect();

        let summary = run(tasks, 4, false, move |key: &str| {
            recorder.lock().unwrap().push((key.to_string(), true));
            std::thread::sleep(Duration::from_millis(10));
            recorder.lock().unwrap().push((key.to_string(), false));
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(summary.succeeded.len(), 4);

        let events = events.lock().unwrap();
        let position = |key: &str, started: bool| {
            events
                .iter()
                .position(|(k, s)| k == key && *s == started)
                .unwrap()
        };
        for (key, dependencies) in deps {
            for dep in dependencies {
                assert!(position(&dep, false) < position(&key, true), "{dep} before {key}");
            }
        }
    }

    #[tokio::test]
    async fn test_worker_bound_is_respected() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
        let tasks: Vec<Task> = (0..10)
            .map(|i| Task::new(&format!("site{i}"), Vec::<String>::new()))
            .collect();

        let summary = run(tasks, 3, false, move |_key: &str| {
            let now = c.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            c.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(summary.succeeded.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_debug_mode_fails_fast() {
        let tasks = vec![
            Task::new("A", Vec::<String>::new()),
            Task::new("B", ["A"]),
        ];
        let err = run(tasks, 1, true, failing_on(&["A"])).await.unwrap_err();
        match err {
            SchedulerError::TaskFailed { key, reason } => {
                assert_eq!(key, "A");
                assert!(reason.contains("exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_task_is_failed() {
        let tasks = vec![Task::new("A", Vec::<String>::new()), Task::new("B", ["A"])];
        let summary = run(tasks, 2, false, |key: &str| {
            if key == "A" {
                panic!("boom");
            }
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(summary.failed, keys(&["A"]));
        assert_eq!(summary.blocked, keys(&["B"]));
    }

    #[tokio::test]
    async fn test_unknown_dependency_is_blocked() {
        let tasks = vec![Task::new("A", ["missing"]), Task::new("B", Vec::<String>::new())];
        let summary = run(tasks, 2, false, failing_on(&[])).await.unwrap();
        assert_eq!(summary.succeeded, keys(&["B"]));
        assert_eq!(summary.blocked, keys(&["A"]));
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let err = run(vec![], 0, false, failing_on(&[])).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoWorkers));

        let tasks = vec![Task::new("A", Vec::<String>::new()), Task::new("A", Vec::<String>::new())];
        let err = run(tasks, 1, false, failing_on(&[])).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateKey(k) if k == "A"));

        let summary = run(vec![], 1, false, failing_on(&[])).await.unwrap();
        assert!(summary.is_success());
    }
}
