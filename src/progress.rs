//! Project progress aggregation.
//!
//! Progress is always recomputed from every task of every phase of the project. There is no
//! running counter: the store cannot update a task and a counter together, so any counter
//! would drift the first time a request died between the two writes. A full rescan costs one
//! list call per phase and is self-correcting.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fields::PhaseStatus;
use crate::status::sync_phase_status;
use crate::store::{retry_once_on_conflict, LeafStore};

/// `round(100 * completed / total)`, with halves rounded up and an empty project at 0.
pub fn completion_percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    ((200 * completed + total) / (2 * total)) as u8
}

/// Rescan a project's task tree and persist `overall_progress`.
///
/// The value is written even when unchanged. If any phase's tasks cannot be read nothing is
/// written and the previous value stays in place.
pub fn recompute_project_progress<S>(store: &mut S, project_id: u64) -> Result<u8>
where
    S: LeafStore + ?Sized,
{
    retry_once_on_conflict(store, |store| {
        let project = store
            .get_project(project_id)?
            .ok_or(Error::not_found("project", project_id))?;

        let mut total = 0usize;
        let mut completed = 0usize;
        for phase in store.list_phases_by_project(project_id)? {
            let tasks = store.list_tasks_by_phase(phase.id)?;
            total += tasks.len();
            completed += tasks.iter().filter(|t| t.completed).count();
        }

        let progress = completion_percentage(completed, total);
        store.update_project_progress(project_id, progress, project.version)?;
        debug!(project_id, completed, total, progress, "project progress written");
        Ok(progress)
    })
}

/// Phase statuses and progress of a project after a full refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSnapshot {
    pub project_id: u64,
    pub overall_progress: u8,
    pub phases: Vec<PhaseSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSnapshot {
    pub phase_id: u64,
    pub phase_number: u32,
    pub status: PhaseStatus,
}

/// Re-derive every phase of a project, then its progress.
///
/// This is the recovery path after a degraded update and the follow-up to structural edits.
pub fn refresh_project<S>(store: &mut S, project_id: u64) -> Result<ProjectSnapshot>
where
    S: LeafStore + ?Sized,
{
    if store.get_project(project_id)?.is_none() {
        return Err(Error::not_found("project", project_id));
    }

    let mut phases = Vec::new();
    for phase in store.list_phases_by_project(project_id)? {
        let status = sync_phase_status(store, phase.id)?;
        phases.push(PhaseSnapshot {
            phase_id: phase.id,
            phase_number: phase.phase_number,
            status,
        });
    }
    let overall_progress = recompute_project_progress(store, project_id)?;
    info!(project_id, overall_progress, phases = phases.len(), "project refreshed");

    Ok(ProjectSnapshot { project_id, overall_progress, phases })
}
