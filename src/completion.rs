//! Task completion processing.
//!
//! An update is a small saga over a store without multi-row transactions:
//!
//! 1. commit the task row;
//! 2. re-derive the owning phase's status;
//! 3. recompute the owning project's progress;
//! 4. on a not-true → true completion transition, append one activity entry.
//!
//! Steps 2-4 run after the commit and are never rolled back into it. If one of them fails the
//! caller gets a degraded report naming the stale step; re-running the update, or
//! `progress::refresh_project`, converges the aggregates again.

use serde::Serialize;
use tracing::{info, warn};

use crate::activity::{log_task_completed, ActivityLogEntry};
use crate::error::{Error, Result};
use crate::fields::{ActorType, PhaseStatus};
use crate::progress::recompute_project_progress;
use crate::status::sync_phase_status;
use crate::store::LeafStore;
use crate::task::{NewTask, Task, TaskChanges, TaskPatch};

/// A post-commit step of the saga.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    PhaseStatus,
    ProjectProgress,
    ActivityLog,
}

/// A post-commit step that failed, leaving the named value stale.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StaleStep {
    pub step: SagaStep,
    pub error: String,
}

/// Phase status and project progress recomputed after a task-level change.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Aggregates {
    pub phase_status: Option<PhaseStatus>,
    pub project_progress: Option<u8>,
    pub stale: Vec<StaleStep>,
}

impl Aggregates {
    pub fn is_degraded(&self) -> bool {
        !self.stale.is_empty()
    }

    fn mark_stale(&mut self, step: SagaStep, err: Error) {
        warn!(?step, error = %err, "post-commit step failed; aggregate left stale");
        self.stale.push(StaleStep { step, error: err.to_string() });
    }
}

/// Re-derive a phase and then its project, collecting failures instead of returning them.
pub fn refresh_aggregates<S>(store: &mut S, phase_id: u64, project_id: u64) -> Aggregates
where
    S: LeafStore + ?Sized,
{
    let mut aggregates = Aggregates::default();
    match sync_phase_status(store, phase_id) {
        Ok(status) => aggregates.phase_status = Some(status),
        Err(err) => aggregates.mark_stale(SagaStep::PhaseStatus, err),
    }
    match recompute_project_progress(store, project_id) {
        Ok(progress) => aggregates.project_progress = Some(progress),
        Err(err) => aggregates.mark_stale(SagaStep::ProjectProgress, err),
    }
    aggregates
}

/// What the caller gets back from [`apply_task_update`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskUpdateReport {
    pub task: Task,
    #[serde(flatten)]
    pub aggregates: Aggregates,
    /// The entry appended by this call, if it completed the task.
    pub activity: Option<ActivityLogEntry>,
}

impl TaskUpdateReport {
    pub fn is_degraded(&self) -> bool {
        self.aggregates.is_degraded()
    }
}

/// Apply a sparse update to one task and bring its phase and project up to date.
pub fn apply_task_update<S>(
    store: &mut S,
    task_id: u64,
    patch: &TaskPatch,
    actor: ActorType,
) -> Result<TaskUpdateReport>
where
    S: LeafStore + ?Sized,
{
    if patch.is_empty() {
        return Err(Error::validation("update contains no fields"));
    }

    let task = store.get_task(task_id)?.ok_or(Error::not_found("task", task_id))?;
    let phase = store
        .get_phase(task.phase_id)?
        .ok_or(Error::not_found("phase", task.phase_id))?;
    if store.get_project(phase.project_id)?.is_none() {
        return Err(Error::not_found("project", phase.project_id));
    }

    let kind = patch.apply_to(&task.kind)?;
    let changes = TaskChanges {
        completed: patch.completed,
        kind: (kind != task.kind).then_some(kind),
        sort_order: None,
    };
    let write = store.update_task(task_id, &changes)?;
    info!(
        task_id,
        phase_id = phase.id,
        changed = write.changed(),
        completed = write.after.completed,
        "task committed"
    );

    let mut aggregates = refresh_aggregates(store, phase.id, phase.project_id);

    let mut activity = None;
    if write.completion_transition() {
        match log_task_completed(store, phase.project_id, &write.after, actor) {
            Ok(entry) => activity = Some(entry),
            Err(err) => aggregates.mark_stale(SagaStep::ActivityLog, err),
        }
    }

    Ok(TaskUpdateReport { task: write.after, aggregates, activity })
}

/// Result of adding or removing a task outside of a migration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StructuralReport {
    pub task: Task,
    #[serde(flatten)]
    pub aggregates: Aggregates,
}

/// Append a task at the end of a phase from a tagged portal label.
pub fn add_task<S>(store: &mut S, phase_id: u64, raw_label: &str) -> Result<StructuralReport>
where
    S: LeafStore + ?Sized,
{
    let phase = store.get_phase(phase_id)?.ok_or(Error::not_found("phase", phase_id))?;
    let next_order = store
        .list_tasks_by_phase(phase_id)?
        .iter()
        .map(|t| t.sort_order)
        .max()
        .unwrap_or(0)
        + 1;
    let new_task = NewTask::from_tagged_label(phase_id, raw_label, next_order)?;
    let task = store.insert_task(&new_task)?;
    info!(task_id = task.id, phase_id, sort_order = task.sort_order, "task added");

    let aggregates = refresh_aggregates(store, phase_id, phase.project_id);
    Ok(StructuralReport { task, aggregates })
}

/// Delete a task and recompute the aggregates of the phase and project it belonged to.
pub fn remove_task<S>(store: &mut S, task_id: u64) -> Result<StructuralReport>
where
    S: LeafStore + ?Sized,
{
    let task = store.get_task(task_id)?.ok_or(Error::not_found("task", task_id))?;
    let phase = store
        .get_phase(task.phase_id)?
        .ok_or(Error::not_found("phase", task.phase_id))?;
    let removed = store.delete_task(task_id)?;
    info!(task_id, phase_id = phase.id, "task deleted");

    let aggregates = refresh_aggregates(store, phase.id, phase.project_id);
    Ok(StructuralReport { task: removed, aggregates })
}
