//! Named, re-runnable structural migrations.
//!
//! These are one-off data repairs invoked by an operator, not schema versions. Each one
//! inserts a task into every phase with a given phase number, after checking that the phase
//! does not already carry it. Phases are processed one at a time and a failure in one phase
//! is recorded and skipped past; it never stops the batch.

use std::cmp::Reverse;

use serde::Serialize;
use tracing::{info, warn};

use crate::completion::refresh_aggregates;
use crate::error::{Error, Result};
use crate::project::Phase;
use crate::store::LeafStore;
use crate::task::{NewTask, Task, TaskChanges};

/// A structural edit applied to every matching phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: &'static str,
    pub description: &'static str,
    /// Phases with this number are eligible.
    pub phase_number: u32,
    /// Label of the inserted task, in tagged portal form.
    pub label: &'static str,
    /// `sort_order` the new task takes; tasks at or above it move up by one.
    pub position: i64,
    /// A phase already has the task if any label contains this, ignoring case.
    pub marker: &'static str,
}

impl Migration {
    pub fn selects(&self, phase: &Phase) -> bool {
        phase.phase_number == self.phase_number
    }

    /// The task that shows this migration already ran on a phase, if any.
    pub fn existing<'a>(&self, tasks: &'a [Task]) -> Option<&'a Task> {
        let marker = self.marker.to_lowercase();
        tasks.iter().find(|t| t.label.to_lowercase().contains(&marker))
    }
}

/// Every migration an operator can run.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            name: "pm-access-date",
            description: "Ask the property manager to confirm the building access date",
            phase_number: 3,
            label: "[PM-DATE] Confirm building access date",
            position: 2,
            marker: "access date",
        },
        Migration {
            name: "admin-speed-test",
            description: "Record a speed test once the line is live",
            phase_number: 4,
            label: "[ADMIN-SPEED] Record post-install speed test",
            position: 1,
            marker: "speed test",
        },
        Migration {
            name: "admin-enclosure-choice",
            description: "Capture which enclosure the equipment goes into",
            phase_number: 2,
            label: "[ADMIN-ENCLOSURE] Choose equipment enclosure",
            position: 3,
            marker: "enclosure",
        },
    ]
}

pub fn find_migration(name: &str) -> Result<Migration> {
    all_migrations()
        .into_iter()
        .find(|m| m.name == name)
        .ok_or_else(|| Error::UnknownMigration(name.to_string()))
}

/// What happened to one eligible phase.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Applied {
        task_id: u64,
        /// Set when the task went in but the phase/project recompute afterwards failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        aggregate_error: Option<String>,
    },
    Skipped {
        existing_task_id: u64,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhaseMigrationResult {
    pub phase_id: u64,
    pub project_id: u64,
    #[serde(flatten)]
    pub outcome: PhaseOutcome,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MigrationReport {
    pub migration: String,
    pub applied_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub total_eligible_phases: usize,
    pub results: Vec<PhaseMigrationResult>,
}

impl MigrationReport {
    fn new(name: &str) -> Self {
        MigrationReport {
            migration: name.to_string(),
            applied_count: 0,
            skipped_count: 0,
            failed_count: 0,
            total_eligible_phases: 0,
            results: Vec::new(),
        }
    }

    fn record(&mut self, phase: &Phase, outcome: PhaseOutcome) {
        match outcome {
            PhaseOutcome::Applied { .. } => self.applied_count += 1,
            PhaseOutcome::Skipped { .. } => self.skipped_count += 1,
            PhaseOutcome::Failed { .. } => self.failed_count += 1,
        }
        self.total_eligible_phases += 1;
        self.results.push(PhaseMigrationResult {
            phase_id: phase.id,
            project_id: phase.project_id,
            outcome,
        });
    }

    /// Turn a report with failed phases into [`Error::PartialMigrationFailure`].
    pub fn ensure_complete(self) -> Result<Self> {
        if self.failed_count > 0 {
            return Err(Error::PartialMigrationFailure {
                name: self.migration,
                failed: self.failed_count,
                applied: self.applied_count,
            });
        }
        Ok(self)
    }
}

/// Run a registered migration by name. Unknown names are rejected before the store is read.
pub fn run_migration<S>(store: &mut S, name: &str) -> Result<MigrationReport>
where
    S: LeafStore + ?Sized,
{
    let migration = find_migration(name)?;
    apply_migration(store, &migration)
}

/// Apply `migration` to every eligible phase, sequentially.
pub fn apply_migration<S>(store: &mut S, migration: &Migration) -> Result<MigrationReport>
where
    S: LeafStore + ?Sized,
{
    let template = NewTask::from_tagged_label(0, migration.label, migration.position)?;
    let phases: Vec<Phase> =
        store.list_phases()?.into_iter().filter(|p| migration.selects(p)).collect();
    info!(migration = migration.name, eligible = phases.len(), "migration started");

    let mut report = MigrationReport::new(migration.name);
    for phase in &phases {
        let outcome = migrate_phase(store, migration, &template, phase);
        match &outcome {
            PhaseOutcome::Failed { error } => {
                warn!(migration = migration.name, phase_id = phase.id, %error, "phase failed")
            }
            other => info!(migration = migration.name, phase_id = phase.id, ?other, "phase done"),
        }
        report.record(phase, outcome);
    }

    info!(
        migration = migration.name,
        applied = report.applied_count,
        skipped = report.skipped_count,
        failed = report.failed_count,
        "migration finished"
    );
    Ok(report)
}

fn migrate_phase<S>(
    store: &mut S,
    migration: &Migration,
    template: &NewTask,
    phase: &Phase,
) -> PhaseOutcome
where
    S: LeafStore + ?Sized,
{
    let tasks = match store.list_tasks_by_phase(phase.id) {
        Ok(tasks) => tasks,
        Err(err) => return PhaseOutcome::Failed { error: err.to_string() },
    };
    if let Some(existing) = migration.existing(&tasks) {
        return PhaseOutcome::Skipped { existing_task_id: existing.id };
    }

    let inserted = shift_and_insert(store, template, phase.id, &tasks);
    let task = match inserted {
        Ok(task) => task,
        Err(err) => return PhaseOutcome::Failed { error: err.to_string() },
    };

    let aggregates = refresh_aggregates(store, phase.id, phase.project_id);
    let aggregate_error = aggregates.is_degraded().then(|| {
        aggregates
            .stale
            .iter()
            .map(|s| s.error.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    });
    PhaseOutcome::Applied { task_id: task.id, aggregate_error }
}

/// Renumber the phase densely around the insertion slot, then fill the slot.
///
/// The slot is the migration's position, or just past the last task when the phase is shorter.
/// Rows moving down go lowest first and rows moving up go highest first, so no two rows of the
/// phase ever share a sort order, including when an interrupted run left a gap behind.
fn shift_and_insert<S>(
    store: &mut S,
    template: &NewTask,
    phase_id: u64,
    tasks: &[Task],
) -> Result<Task>
where
    S: LeafStore + ?Sized,
{
    let slot = template.sort_order.clamp(1, tasks.len() as i64 + 1);
    let (down, mut up): (Vec<(&Task, i64)>, Vec<(&Task, i64)>) = tasks
        .iter()
        .zip(1..)
        .map(|(task, dense)| (task, if dense < slot { dense } else { dense + 1 }))
        .filter(|(task, target)| task.sort_order != *target)
        .partition(|(task, target)| *target < task.sort_order);
    up.sort_by_key(|(task, _)| Reverse(task.sort_order));

    for (task, target) in down.into_iter().chain(up) {
        let changes = TaskChanges { sort_order: Some(target), ..Default::default() };
        store.update_task(task.id, &changes)?;
    }

    let new_task = NewTask { phase_id, sort_order: slot, ..template.clone() };
    store.insert_task(&new_task)
}
