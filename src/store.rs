//! The leaf store boundary.
//!
//! The completion engine and the migration runner only ever talk to storage through
//! [`LeafStore`]. Every method is atomic for a single row and nothing more; callers must not
//! assume that two calls are applied together.

use crate::activity::{ActivityLogEntry, NewActivity};
use crate::error::Result;
use crate::fields::PhaseStatus;
use crate::project::{Phase, Project};
use crate::task::{NewTask, Task, TaskChanges};

/// Row-level access to projects, phases, tasks and the activity log.
pub trait LeafStore {
    fn get_task(&mut self, id: u64) -> Result<Option<Task>>;

    fn get_phase(&mut self, id: u64) -> Result<Option<Phase>>;

    fn get_project(&mut self, id: u64) -> Result<Option<Project>>;

    /// Tasks of one phase, ascending by `sort_order`.
    fn list_tasks_by_phase(&mut self, phase_id: u64) -> Result<Vec<Task>>;

    /// Phases of one project, ascending by `phase_number`.
    fn list_phases_by_project(&mut self, project_id: u64) -> Result<Vec<Phase>>;

    /// Every phase in the store, ascending by project then `phase_number`.
    fn list_phases(&mut self) -> Result<Vec<Phase>>;

    /// Apply `changes` to one task. The returned pair is the row immediately before and
    /// after this write, read under the same row lock.
    fn update_task(&mut self, id: u64, changes: &TaskChanges) -> Result<TaskWrite>;

    /// Write a phase status if the phase is still at `expected_version`.
    fn update_phase_status(
        &mut self,
        id: u64,
        status: PhaseStatus,
        expected_version: u64,
    ) -> Result<Phase>;

    /// Write a project's progress if the project is still at `expected_version`.
    fn update_project_progress(
        &mut self,
        id: u64,
        progress: u8,
        expected_version: u64,
    ) -> Result<Project>;

    fn insert_task(&mut self, task: &NewTask) -> Result<Task>;

    fn delete_task(&mut self, id: u64) -> Result<Task>;

    fn append_activity_log(&mut self, entry: &NewActivity) -> Result<ActivityLogEntry>;

    /// Activity for one project, oldest first.
    fn list_activity(&mut self, project_id: u64) -> Result<Vec<ActivityLogEntry>>;
}

/// Result of a single task write.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskWrite {
    pub before: Task,
    pub after: Task,
}

impl TaskWrite {
    /// True when this write moved `completed` from not-true to true.
    pub fn completion_transition(&self) -> bool {
        !self.before.completed && self.after.completed
    }

    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Run a rescan-and-write step, repeating it once if the write hit a version conflict.
pub fn retry_once_on_conflict<S, T>(
    store: &mut S,
    mut step: impl FnMut(&mut S) -> Result<T>,
) -> Result<T>
where
    S: LeafStore + ?Sized,
{
    match step(&mut *store) {
        Err(err) if err.is_conflict() => {
            tracing::debug!(error = %err, "aggregate write raced, rescanning once");
            step(&mut *store)
        }
        other => other,
    }
}

/// Fault-injecting store used by tests of the failure paths.
#[cfg(test)]
pub mod testing {
    use std::collections::HashSet;

    use super::*;
    use crate::db::Database;
    use crate::error::Error;

    #[derive(Debug, Default)]
    pub struct FaultyStore {
        pub inner: Database,
        /// Phase ids whose task listing fails.
        pub fail_list_tasks: HashSet<u64>,
        /// Phase ids into which inserts fail.
        pub fail_insert: HashSet<u64>,
        /// Phase ids whose task sort orders cannot be rewritten.
        pub fail_shift: HashSet<u64>,
        /// When set, sort-order rewrites start failing once this many more have succeeded.
        pub shifts_left: Option<usize>,
        pub fail_activity: bool,
        /// How many upcoming project writes race with a simulated concurrent writer.
        pub project_races: usize,
        /// How many upcoming phase writes race with a simulated concurrent writer.
        pub phase_races: usize,
        pub project_writes: usize,
    }

    impl FaultyStore {
        pub fn new(inner: Database) -> Self {
            FaultyStore { inner, ..Default::default() }
        }
    }

    fn unavailable(what: &str) -> Error {
        Error::StoreUnavailable(format!("injected failure: {what}"))
    }

    impl LeafStore for FaultyStore {
        fn get_task(&mut self, id: u64) -> Result<Option<Task>> {
            self.inner.get_task(id)
        }

        fn get_phase(&mut self, id: u64) -> Result<Option<Phase>> {
            self.inner.get_phase(id)
        }

        fn get_project(&mut self, id: u64) -> Result<Option<Project>> {
            self.inner.get_project(id)
        }

        fn list_tasks_by_phase(&mut self, phase_id: u64) -> Result<Vec<Task>> {
            if self.fail_list_tasks.contains(&phase_id) {
                return Err(unavailable("list tasks"));
            }
            self.inner.list_tasks_by_phase(phase_id)
        }

        fn list_phases_by_project(&mut self, project_id: u64) -> Result<Vec<Phase>> {
            self.inner.list_phases_by_project(project_id)
        }

        fn list_phases(&mut self) -> Result<Vec<Phase>> {
            self.inner.list_phases()
        }

        fn update_task(&mut self, id: u64, changes: &TaskChanges) -> Result<TaskWrite> {
            if changes.sort_order.is_some() {
                let phase_id = self.inner.get_task(id)?.map(|t| t.phase_id);
                if phase_id.is_some_and(|p| self.fail_shift.contains(&p)) {
                    return Err(unavailable("shift task"));
                }
                if let Some(left) = self.shifts_left.as_mut() {
                    if *left == 0 {
                        return Err(unavailable("shift task"));
                    }
                    *left -= 1;
                }
            }
            self.inner.update_task(id, changes)
        }

        fn update_phase_status(
            &mut self,
            id: u64,
            status: PhaseStatus,
            expected_version: u64,
        ) -> Result<Phase> {
            if self.phase_races > 0 {
                self.phase_races -= 1;
                if let Some(current) = self.inner.get_phase(id)? {
                    self.inner.update_phase_status(id, current.status, current.version)?;
                }
            }
            self.inner.update_phase_status(id, status, expected_version)
        }

        fn update_project_progress(
            &mut self,
            id: u64,
            progress: u8,
            expected_version: u64,
        ) -> Result<Project> {
            self.project_writes += 1;
            if self.project_races > 0 {
                self.project_races -= 1;
                if let Some(current) = self.inner.get_project(id)? {
                    self.inner
                        .update_project_progress(id, current.overall_progress, current.version)?;
                }
            }
            self.inner.update_project_progress(id, progress, expected_version)
        }

        fn insert_task(&mut self, task: &NewTask) -> Result<Task> {
            if self.fail_insert.contains(&task.phase_id) {
                return Err(unavailable("insert task"));
            }
            self.inner.insert_task(task)
        }

        fn delete_task(&mut self, id: u64) -> Result<Task> {
            self.inner.delete_task(id)
        }

        fn append_activity_log(&mut self, entry: &NewActivity) -> Result<ActivityLogEntry> {
            if self.fail_activity {
                return Err(unavailable("append activity"));
            }
            self.inner.append_activity_log(entry)
        }

        fn list_activity(&mut self, project_id: u64) -> Result<Vec<ActivityLogEntry>> {
            self.inner.list_activity(project_id)
        }
    }
}
