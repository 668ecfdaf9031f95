//! Phase status derivation.

use tracing::debug;

use crate::error::{Error, Result};
use crate::fields::PhaseStatus;
use crate::store::{retry_once_on_conflict, LeafStore};
use crate::task::Task;

/// Status of a phase as a pure function of its complete task set.
///
/// A phase without tasks is `NotStarted`.
pub fn derive_phase_status(tasks: &[Task]) -> PhaseStatus {
    let total = tasks.len();
    let done = tasks.iter().filter(|t| t.completed).count();
    if done == 0 {
        PhaseStatus::NotStarted
    } else if done == total {
        PhaseStatus::Completed
    } else {
        PhaseStatus::InProgress
    }
}

/// Rescan one phase's tasks and persist its derived status if it changed.
pub fn sync_phase_status<S>(store: &mut S, phase_id: u64) -> Result<PhaseStatus>
where
    S: LeafStore + ?Sized,
{
    retry_once_on_conflict(store, |store| {
        let phase = store
            .get_phase(phase_id)?
            .ok_or(Error::not_found("phase", phase_id))?;
        let tasks = store.list_tasks_by_phase(phase_id)?;
        let status = derive_phase_status(&tasks);
        if status != phase.status {
            store.update_phase_status(phase_id, status, phase.version)?;
            debug!(phase_id, from = ?phase.status, to = ?status, "phase status changed");
        }
        Ok(status)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::fields::ProjectStatus;
    use crate::store::testing::FaultyStore;
    use crate::task::{NewTask, TaskChanges, TaskKind};

    fn tasks(flags: &[bool]) -> Vec<Task> {
        flags
            .iter()
            .enumerate()
            .map(|(i, &completed)| Task {
                id: i as u64 + 1,
                phase_id: 1,
                label: format!("Step {i}"),
                kind: TaskKind::Standard,
                completed,
                sort_order: i as i64 + 1,
                completed_at_utc: None,
                updated_at_utc: 0,
            })
            .collect()
    }

    #[test]
    fn test_derive_phase_status_truth_table() {
        assert_eq!(derive_phase_status(&[]), PhaseStatus::NotStarted);
        assert_eq!(derive_phase_status(&tasks(&[false, false])), PhaseStatus::NotStarted);
        assert_eq!(derive_phase_status(&tasks(&[true, false, true])), PhaseStatus::InProgress);
        assert_eq!(derive_phase_status(&tasks(&[true])), PhaseStatus::Completed);
        assert_eq!(derive_phase_status(&tasks(&[true, true, true])), PhaseStatus::Completed);
    }

    #[test]
    fn test_derive_phase_status_exhaustive_small_sets() {
        for n in 0..6usize {
            for c in 0..=n {
                let flags: Vec<bool> = (0..n).map(|i| i < c).collect();
                let expected = if c == 0 {
                    PhaseStatus::NotStarted
                } else if c == n {
                    PhaseStatus::Completed
                } else {
                    PhaseStatus::InProgress
                };
                assert_eq!(derive_phase_status(&tasks(&flags)), expected, "n={n} c={c}");
            }
        }
    }

    fn one_phase_store() -> (Database, u64, u64) {
        let mut db = Database::default();
        let project = db.add_project("Quay", ProjectStatus::InProgress).unwrap();
        let phase = db.add_phase(project.id, 1, "Survey").unwrap();
        let task = db
            .insert_task(&NewTask {
                phase_id: phase.id,
                label: "Walk the site".into(),
                kind: TaskKind::Standard,
                sort_order: 1,
            })
            .unwrap();
        (db, phase.id, task.id)
    }

    #[test]
    fn test_sync_skips_write_when_unchanged() {
        let (mut db, phase_id, _) = one_phase_store();
        assert_eq!(sync_phase_status(&mut db, phase_id).unwrap(), PhaseStatus::NotStarted);
        assert_eq!(db.get_phase(phase_id).unwrap().unwrap().version, 0);
    }

    #[test]
    fn test_sync_retries_once_after_race() {
        let (mut db, phase_id, task_id) = one_phase_store();
        db.update_task(task_id, &TaskChanges { completed: Some(true), ..Default::default() })
            .unwrap();
        let mut store = FaultyStore::new(db);
        store.phase_races = 1;
        assert_eq!(sync_phase_status(&mut store, phase_id).unwrap(), PhaseStatus::Completed);
        let phase = store.inner.get_phase(phase_id).unwrap().unwrap();
        assert_eq!(phase.status, PhaseStatus::Completed);
    }

    #[test]
    fn test_sync_surfaces_conflict_after_second_race() {
        let (mut db, phase_id, task_id) = one_phase_store();
        db.update_task(task_id, &TaskChanges { completed: Some(true), ..Default::default() })
            .unwrap();
        let mut store = FaultyStore::new(db);
        store.phase_races = 2;
        let err = sync_phase_status(&mut store, phase_id).unwrap_err();
        assert!(matches!(err, Error::Conflict { entity: "phase", .. }));
    }

    #[test]
    fn test_sync_missing_phase() {
        let mut db = Database::default();
        assert!(matches!(sync_phase_status(&mut db, 5), Err(Error::NotFound { .. })));
    }
}
