//! In-process store backend.
//!
//! Keeps desired specs, actual instances and tasks in memory and pushes
//! change notifications to every open watch. Watches that stop, drop their
//! stream or let their buffer fill up are pruned on the next publish.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use super::{watch_channel, Change, TaskResolver, WatchSink, WatchSource, WatchStream};
use crate::error::StoreError;
use crate::models::{ActualInstance, DesiredSpec, Task, TaskState};

/// Default number of notifications buffered per watch
const DEFAULT_WATCH_BUFFER: usize = 256;

#[derive(Default)]
struct StoreState {
    desired: BTreeMap<String, DesiredSpec>,
    actual: BTreeMap<(String, u32), ActualInstance>,
    tasks: BTreeMap<String, Task>,
    desired_watches: Vec<WatchSink<Change<DesiredSpec>>>,
    actual_watches: Vec<WatchSink<Change<ActualInstance>>>,
    task_watches: Vec<WatchSink<Task>>,
}

fn publish<T: Clone>(sinks: &mut Vec<WatchSink<T>>, item: &T) {
    sinks.retain(|sink| sink.offer(item.clone()));
}

/// In-memory implementation of [`WatchSource`] and [`TaskResolver`].
pub struct MemoryStore {
    state: Mutex<StoreState>,
    watch_buffer: usize,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_watch_buffer(DEFAULT_WATCH_BUFFER)
    }

    /// Create an empty store whose watches buffer `buffer` notifications.
    #[must_use]
    pub fn with_watch_buffer(buffer: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            watch_buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a desired spec.
    pub fn upsert_desired(&self, mut spec: DesiredSpec) {
        let mut state = self.lock();
        let change = match state.desired.get(&spec.process_guid) {
            Some(before) => {
                spec.modification_tag = before.modification_tag.incremented();
                Change::Changed {
                    before: before.clone(),
                    after: spec.clone(),
                }
            }
            None => Change::Created(spec.clone()),
        };
        state.desired.insert(spec.process_guid.clone(), spec);
        publish(&mut state.desired_watches, &change);
    }

    /// Remove a desired spec.
    pub fn remove_desired(&self, process_guid: &str) -> Option<DesiredSpec> {
        let mut state = self.lock();
        let removed = state.desired.remove(process_guid)?;
        publish(&mut state.desired_watches, &Change::Removed(removed.clone()));
        Some(removed)
    }

    /// Look up a desired spec.
    #[must_use]
    pub fn desired(&self, process_guid: &str) -> Option<DesiredSpec> {
        self.lock().desired.get(process_guid).cloned()
    }

    /// Create or replace an actual instance.
    pub fn upsert_actual(&self, mut instance: ActualInstance) {
        let mut state = self.lock();
        let key = instance.key();
        let change = match state.actual.get(&key) {
            Some(before) => {
                instance.modification_tag = before.modification_tag.incremented();
                Change::Changed {
                    before: before.clone(),
                    after: instance.clone(),
                }
            }
            None => Change::Created(instance.clone()),
        };
        state.actual.insert(key, instance);
        publish(&mut state.actual_watches, &change);
    }

    /// Remove an actual instance.
    pub fn remove_actual(&self, process_guid: &str, index: u32) -> Option<ActualInstance> {
        let mut state = self.lock();
        let removed = state.actual.remove(&(process_guid.to_string(), index))?;
        publish(&mut state.actual_watches, &Change::Removed(removed.clone()));
        Some(removed)
    }

    /// Look up an actual instance.
    #[must_use]
    pub fn actual(&self, process_guid: &str, index: u32) -> Option<ActualInstance> {
        self.lock()
            .actual
            .get(&(process_guid.to_string(), index))
            .cloned()
    }

    /// Register a new pending task.
    pub fn desire_task(&self, mut task: Task) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.tasks.contains_key(&task.task_guid) {
            return Err(StoreError::TaskExists(task.task_guid));
        }
        task.state = TaskState::Pending;
        task.updated_at = Utc::now();
        state.tasks.insert(task.task_guid.clone(), task);
        Ok(())
    }

    /// Move a pending task to running.
    pub fn start_task(&self, task_guid: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        transition(&mut state, task_guid, &[TaskState::Pending], TaskState::Running)?;
        Ok(())
    }

    /// Record a task's result and announce it to completed-task watches.
    pub fn complete_task(
        &self,
        task_guid: &str,
        failed: bool,
        failure_reason: &str,
        result: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let task = transition(
            &mut state,
            task_guid,
            &[TaskState::Pending, TaskState::Running],
            TaskState::Completed,
        )?;
        task.failed = failed;
        task.failure_reason = failure_reason.to_string();
        task.result = result.to_string();
        let completed = task.clone();
        publish(&mut state.task_watches, &completed);
        debug!(task_guid, "Task completed");
        Ok(())
    }

    /// Look up a task.
    #[must_use]
    pub fn task(&self, task_guid: &str) -> Option<Task> {
        self.lock().tasks.get(task_guid).cloned()
    }

    /// Return tasks stuck in resolving for longer than `resolving_timeout`
    /// to completed and announce them again.
    ///
    /// Returns the number of tasks kicked.
    pub fn converge_tasks(&self, resolving_timeout: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(resolving_timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_sub_signed(timeout))
        else {
            return 0;
        };
        let mut state = self.lock();

        let mut kicked = Vec::new();
        for task in state.tasks.values_mut() {
            if task.state == TaskState::Resolving && task.updated_at <= cutoff {
                task.state = TaskState::Completed;
                task.updated_at = Utc::now();
                kicked.push(task.clone());
            }
        }
        for task in &kicked {
            publish(&mut state.task_watches, task);
        }

        if !kicked.is_empty() {
            info!(count = kicked.len(), "Re-announced tasks stuck in resolving");
        }
        kicked.len()
    }

    /// Number of open watches per kind: (desired, actual, tasks).
    #[must_use]
    pub fn open_watches(&self) -> (usize, usize, usize) {
        let mut state = self.lock();
        state.desired_watches.retain(|sink| !sink.is_stopped());
        state.actual_watches.retain(|sink| !sink.is_stopped());
        state.task_watches.retain(|sink| !sink.is_stopped());
        (
            state.desired_watches.len(),
            state.actual_watches.len(),
            state.task_watches.len(),
        )
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn transition<'a>(
    state: &'a mut StoreState,
    task_guid: &str,
    from: &[TaskState],
    to: TaskState,
) -> Result<&'a mut Task, StoreError> {
    let task = state
        .tasks
        .get_mut(task_guid)
        .ok_or_else(|| StoreError::TaskNotFound(task_guid.to_string()))?;
    if !from.contains(&task.state) {
        return Err(StoreError::InvalidTransition {
            task_guid: task_guid.to_string(),
            from: task.state,
            to,
        });
    }
    task.state = to;
    task.updated_at = Utc::now();
    Ok(task)
}

#[async_trait]
impl WatchSource for MemoryStore {
    async fn watch_desired_specs(&self) -> Result<WatchStream<Change<DesiredSpec>>, StoreError> {
        let (sink, stream) = watch_channel(self.watch_buffer);
        self.lock().desired_watches.push(sink);
        Ok(stream)
    }

    async fn watch_actual_instances(
        &self,
    ) -> Result<WatchStream<Change<ActualInstance>>, StoreError> {
        let (sink, stream) = watch_channel(self.watch_buffer);
        self.lock().actual_watches.push(sink);
        Ok(stream)
    }

    async fn watch_completed_tasks(&self) -> Result<WatchStream<Task>, StoreError> {
        let (sink, stream) = watch_channel(self.watch_buffer);
        let mut state = self.lock();

        // Completed tasks nobody claimed yet get another chance on every
        // new watch.
        for task in state.tasks.values() {
            if task.state == TaskState::Completed && !sink.offer(task.clone()) {
                break;
            }
        }
        state.task_watches.push(sink);
        Ok(stream)
    }
}

#[async_trait]
impl TaskResolver for MemoryStore {
    async fn start_task_resolving(&self, task_guid: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        transition(
            &mut state,
            task_guid,
            &[TaskState::Completed],
            TaskState::Resolving,
        )?;
        Ok(())
    }

    async fn resolve_task(&self, task_guid: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        transition(
            &mut state,
            task_guid,
            &[TaskState::Resolving],
            TaskState::Resolved,
        )?;
        Ok(())
    }
}
