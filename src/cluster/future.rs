//! Handle for a cluster-wide operation in flight
//!
//! A `ClusterFuture` starts with the local node's result already merged and
//! one outstanding entry per contacted peer. Each peer resolves its entry
//! exactly once, either with a value that is merged into the aggregate or
//! with a recorded failure. When nothing is outstanding the future completes,
//! wakes every waiter and runs the registered callbacks.

use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::IntoFuture;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use super::aggregate::Aggregate;
use super::types::{ClusterError, NodeFailure};

/// Final or partial view of a cluster operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterResult<T> {
    /// Merged value of every node that answered
    pub value: T,
    /// Nodes that contributed to `value`, local node first
    pub responded: Vec<String>,
    /// Peers that failed, in the order their failure was recorded
    pub failures: Vec<NodeFailure>,
    /// Peers that had not answered when the result was taken
    pub pending: Vec<String>,
    /// Set when any contacted node is missing from `value`
    pub partial: bool,
}

pub type ClusterOutcome<T> = Result<ClusterResult<T>, ClusterError>;

type Callback<T> = Box<dyn FnOnce(ClusterOutcome<T>) + Send + 'static>;

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Running,
    Completed,
    Cancelled,
    Failed(ClusterError),
}

struct State<T> {
    value: T,
    responded: Vec<String>,
    outstanding: BTreeSet<String>,
    failures: Vec<NodeFailure>,
    phase: Phase,
    callbacks: Vec<Callback<T>>,
    tasks: Vec<AbortHandle>,
}

impl<T: Aggregate> State<T> {
    fn result(&self) -> ClusterResult<T> {
        let pending: Vec<String> = self.outstanding.iter().cloned().collect();
        ClusterResult {
            value: self.value.clone(),
            responded: self.responded.clone(),
            partial: !self.failures.is_empty() || !pending.is_empty(),
            failures: self.failures.clone(),
            pending,
        }
    }

    fn outcome(&self) -> Option<ClusterOutcome<T>> {
        match &self.phase {
            Phase::Running => None,
            Phase::Completed => Some(Ok(self.result())),
            Phase::Cancelled => Some(Err(ClusterError::Cancelled)),
            Phase::Failed(e) => Some(Err(e.clone())),
        }
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
    notify: Notify,
    partial_on_timeout: bool,
}

/// Aggregating handle returned by every cluster operation
pub struct ClusterFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ClusterFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Aggregate> ClusterFuture<T> {
    /// Start an operation whose local part already produced `local`
    pub(crate) fn start(
        local_node: &str,
        local: T,
        peers: impl IntoIterator<Item = String>,
        partial_on_timeout: bool,
    ) -> Self {
        let outstanding: BTreeSet<String> = peers.into_iter().collect();
        let phase = if outstanding.is_empty() {
            Phase::Completed
        } else {
            Phase::Running
        };

        Self::from_state(
            State {
                value: local,
                responded: vec![local_node.to_string()],
                outstanding,
                failures: Vec::new(),
                phase,
                callbacks: Vec::new(),
                tasks: Vec::new(),
            },
            partial_on_timeout,
        )
    }

    /// An operation that failed before any peer was contacted
    pub fn failed(error: ClusterError) -> Self {
        Self::from_state(
            State {
                value: T::default(),
                responded: Vec::new(),
                outstanding: BTreeSet::new(),
                failures: Vec::new(),
                phase: Phase::Failed(error),
                callbacks: Vec::new(),
                tasks: Vec::new(),
            },
            false,
        )
    }

    fn from_state(state: State<T>, partial_on_timeout: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                cond: Condvar::new(),
                notify: Notify::new(),
                partial_on_timeout,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Callbacks never run under the lock, so a poisoned state is still consistent
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge a peer's value; ignored unless the peer is still outstanding
    pub(crate) fn complete_node(&self, node_id: &str, value: T) {
        let mut state = self.lock();
        if state.phase != Phase::Running || !state.outstanding.remove(node_id) {
            return;
        }
        state.value.merge(value);
        state.responded.push(node_id.to_string());
        self.settle(state);
    }

    /// Record a peer failure; ignored unless the peer is still outstanding
    pub(crate) fn fail_node(&self, failure: NodeFailure) {
        let mut state = self.lock();
        if state.phase != Phase::Running || !state.outstanding.remove(&failure.node_id) {
            return;
        }
        state.failures.push(failure);
        self.settle(state);
    }

    /// Attach a peer task so `cancel` can stop it
    pub(crate) fn track(&self, task: AbortHandle) {
        let mut state = self.lock();
        match state.phase {
            Phase::Running => state.tasks.push(task),
            Phase::Cancelled => task.abort(),
            _ => {}
        }
    }

    fn settle(&self, mut state: MutexGuard<'_, State<T>>) {
        if !state.outstanding.is_empty() {
            return;
        }

        state.phase = Phase::Completed;
        state.tasks.clear();
        let callbacks = std::mem::take(&mut state.callbacks);
        let result = state.result();
        drop(state);

        self.wake();
        for callback in callbacks {
            callback(Ok(result.clone()));
        }
    }

    fn wake(&self) {
        self.inner.notify.notify_waiters();
        self.inner.cond.notify_all();
    }

    /// Register a callback for the final outcome.
    ///
    /// Runs immediately when the operation already finished. Never runs for a
    /// cancelled operation.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(ClusterOutcome<T>) + Send + 'static,
    {
        let mut state = self.lock();
        match state.outcome() {
            None => state.callbacks.push(Box::new(callback)),
            Some(Err(ClusterError::Cancelled)) => {}
            Some(outcome) => {
                drop(state);
                callback(outcome);
            }
        }
    }

    /// Stop the operation. Outstanding peer calls are aborted and pending
    /// callbacks are dropped. Returns false if it had already finished.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if state.phase != Phase::Running {
            return false;
        }

        state.phase = Phase::Cancelled;
        state.callbacks.clear();
        let tasks = std::mem::take(&mut state.tasks);
        drop(state);

        for task in tasks {
            task.abort();
        }
        self.wake();
        true
    }

    pub fn is_done(&self) -> bool {
        self.lock().phase != Phase::Running
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().phase == Phase::Cancelled
    }

    /// Current aggregate without waiting
    pub fn snapshot(&self) -> ClusterResult<T> {
        self.lock().result()
    }

    /// Peers that have not answered yet
    pub fn pending_nodes(&self) -> Vec<String> {
        self.lock().outstanding.iter().cloned().collect()
    }

    /// Wait until every peer has answered or failed
    pub async fn wait(&self) -> ClusterOutcome<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a completion in between is not lost
            notified.as_mut().enable();

            let outcome = self.lock().outcome();
            if let Some(outcome) = outcome {
                return outcome;
            }
            notified.await;
        }
    }

    /// Wait at most `timeout`. When it elapses the caller gets the partial
    /// aggregate, or `ClusterError::Timeout` if partial results are disabled.
    /// Peers keep running either way.
    pub async fn wait_timeout(&self, timeout: Duration) -> ClusterOutcome<T> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => self.expired(),
        }
    }

    /// Blocking wait for callers outside the async runtime.
    ///
    /// Must not be called from a runtime worker thread, it would stall the
    /// tasks that complete this future.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> ClusterOutcome<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();

        loop {
            if let Some(outcome) = state.outcome() {
                return outcome;
            }

            state = match deadline {
                None => self
                    .inner
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        drop(state);
                        return self.expired();
                    }
                    self.inner
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    fn expired(&self) -> ClusterOutcome<T> {
        let state = self.lock();
        if let Some(outcome) = state.outcome() {
            return outcome;
        }

        if self.inner.partial_on_timeout {
            Ok(state.result())
        } else {
            Err(ClusterError::Timeout {
                pending: state.outstanding.iter().cloned().collect(),
            })
        }
    }
}

impl<T: Aggregate> IntoFuture for ClusterFuture<T> {
    type Output = ClusterOutcome<T>;
    type IntoFuture = BoxFuture<'static, ClusterOutcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

impl<T: Aggregate + std::fmt::Debug> std::fmt::Debug for ClusterFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ClusterFuture")
            .field("phase", &state.phase)
            .field("value", &state.value)
            .field("outstanding", &state.outstanding)
            .field("failures", &state.failures.len())
            .finish()
    }
}
