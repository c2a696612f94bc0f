//! Optimization tasks and their registry.
//!
//! A task moves `pending -> running -> {completed, failed}` and never leaves a
//! terminal state. Each task lives in a `tokio::sync::watch` channel so
//! pollers read the latest snapshot and waiters are woken on every change.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::candidate::OptimizationConstraints;
use super::goals::OptimizationGoal;
use crate::error::{Error, Result};

/// Identifier of an optimization task.
pub type TaskId = String;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// What a completed optimization changed.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct OptimizationOutcome {
    pub original_tokens: usize,
    pub optimized_tokens: usize,
    pub tokens_saved: isize,
    pub original_element_count: usize,
    pub optimized_element_count: usize,
    pub explanation: String,
}

impl OptimizationOutcome {
    pub fn new(
        original: (usize, usize),
        optimized: (usize, usize),
        explanation: impl Into<String>,
    ) -> Self {
        let (original_tokens, original_element_count) = original;
        let (optimized_tokens, optimized_element_count) = optimized;
        Self {
            original_tokens,
            optimized_tokens,
            tokens_saved: original_tokens as isize - optimized_tokens as isize,
            original_element_count,
            optimized_element_count,
            explanation: explanation.into(),
        }
    }
}

/// Why a task failed, in the same code vocabulary as [`Error::code`].
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TaskFailure {
    pub code: String,
    pub message: String,
}

impl From<&Error> for TaskFailure {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Snapshot of one optimization run.
#[derive(Serialize, Clone, Debug)]
pub struct OptimizationTask {
    pub id: TaskId,
    pub context_id: String,
    /// Whether goals were chosen by the model.
    pub auto: bool,
    pub goals: Vec<OptimizationGoal>,
    pub constraints: OptimizationConstraints,
    pub status: TaskStatus,
    /// Rough completion percentage, 0-100.
    pub progress: u8,
    /// Model's reasoning for the goals it picked (auto runs only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OptimizationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl OptimizationTask {
    pub(crate) fn new(
        context_id: impl Into<String>,
        goals: Vec<OptimizationGoal>,
        constraints: OptimizationConstraints,
        auto: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            context_id: context_id.into(),
            auto,
            goals,
            constraints,
            status: TaskStatus::Pending,
            progress: 0,
            reasoning: None,
            result: None,
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn start(&mut self) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Running;
            self.started_at = Some(Utc::now());
            self.progress = 10;
        }
    }

    pub(crate) fn advance(&mut self, progress: u8) {
        if self.status == TaskStatus::Running {
            self.progress = progress.min(99).max(self.progress);
        }
    }

    pub(crate) fn complete(&mut self, outcome: OptimizationOutcome) {
        if !self.is_finished() {
            self.status = TaskStatus::Completed;
            self.progress = 100;
            self.result = Some(outcome);
            self.completed_at = Some(Utc::now());
        }
    }

    pub(crate) fn fail(&mut self, err: &Error) {
        if !self.is_finished() {
            self.status = TaskStatus::Failed;
            self.failure = Some(TaskFailure::from(err));
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Per-status task counts.
#[derive(Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// All optimization tasks known to the process.
///
/// Entries are never evicted: a task stays pollable for the life of the
/// process, including after its window is deleted. Memory grows by one
/// task record per optimization run.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, watch::Sender<OptimizationTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: OptimizationTask) -> TaskId {
        let id = task.id.clone();
        let (tx, _rx) = watch::channel(task);
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);
        id
    }

    pub fn get(&self, id: &str) -> Result<OptimizationTask> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(id)
            .map(|tx| tx.borrow().clone())
            .ok_or_else(|| Error::not_found("optimization task", id))
    }

    /// Apply `f` to the task and notify waiters. Returns the new snapshot.
    pub(crate) fn update(
        &self,
        id: &str,
        f: impl FnOnce(&mut OptimizationTask),
    ) -> Option<OptimizationTask> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let tx = tasks.get(id)?;
        tx.send_modify(f);
        let snapshot = tx.borrow().clone();
        Some(snapshot)
    }

    pub fn subscribe(&self, id: &str) -> Result<watch::Receiver<OptimizationTask>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .get(id)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| Error::not_found("optimization task", id))
    }

    /// Resolve once the task reaches a terminal state.
    pub async fn wait(&self, id: &str) -> Result<OptimizationTask> {
        let mut rx = self.subscribe(id)?;
        let task = rx
            .wait_for(|t| t.status.is_terminal())
            .await
            .map_err(|_| Error::not_found("optimization task", id))?
            .clone();
        Ok(task)
    }

    pub fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut counts = TaskCounts::default();
        for tx in tasks.values() {
            match tx.borrow().status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
