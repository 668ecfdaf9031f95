//! Command implementations for the CLI interface.
//!
//! Handlers here own presentation and process exit codes. Everything with invariants lives in
//! `completion`, `progress` and `migration`; the `project`/`phase` creation commands are thin
//! gateway glue so an operator can build a hierarchy to work on.

use clap::Subcommand;
use clap_complete::{generate, Shell};
use serde::Serialize;

use crate::activity::ActivityLogEntry;
use crate::completion::{add_task, apply_task_update, remove_task, Aggregates, StructuralReport};
use crate::db::{create_backup, FileStore};
use crate::error::Error;
use crate::fields::*;
use crate::migration::{
    all_migrations, find_migration, run_migration, MigrationReport, PhaseOutcome,
};
use crate::progress::refresh_project;
use crate::project::Phase;
use crate::store::LeafStore;
use crate::task::{Task, TaskPatch};

/// Exit code for a degraded success or a migration with failed phases.
pub const EXIT_DEGRADED: i32 = 2;

#[derive(Subcommand)]
pub enum Commands {
    /// Create and inspect projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Create phases.
    Phase {
        #[command(subcommand)]
        action: PhaseAction,
    },

    /// Add, update, complete, reopen and delete tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Re-derive every phase status and the progress of a project.
    Refresh {
        /// Project ID.
        project: u64,
    },

    /// Show the activity log of a project.
    Activity {
        /// Project ID.
        project: u64,
    },

    /// List or run structural migrations.
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ProjectAction {
    /// Create a project.
    Add {
        name: String,
        #[arg(long, value_enum, default_value_t = ProjectStatus::Planning)]
        status: ProjectStatus,
    },
    /// List projects with their progress.
    List,
    /// Show a project's phases and tasks.
    Show { id: u64 },
}

#[derive(Subcommand)]
pub enum PhaseAction {
    /// Create a phase under a project.
    Add {
        /// Owning project ID.
        #[arg(long)]
        project: u64,
        /// Phase number; migrations target phases by number.
        #[arg(long)]
        number: u32,
        name: String,
    },
}

#[derive(Subcommand)]
pub enum TaskAction {
    /// Append a task to a phase. The label may start with a kind tag such as "[PM] ".
    Add {
        #[arg(long)]
        phase: u64,
        label: String,
    },
    /// Apply a sparse JSON update, e.g. --set '{"completed": true}'.
    Update {
        id: u64,
        #[arg(long = "set")]
        fields: String,
        #[arg(long, value_enum, default_value_t = ActorType::PropertyManager)]
        actor: ActorType,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Mark a task completed.
    Complete {
        id: u64,
        #[arg(long, value_enum, default_value_t = ActorType::PropertyManager)]
        actor: ActorType,
    },
    /// Mark a completed task as not completed.
    Reopen {
        id: u64,
        #[arg(long, value_enum, default_value_t = ActorType::Admin)]
        actor: ActorType,
    },
    /// Delete a task and recompute its phase and project.
    Delete { id: u64 },
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// List the available migrations.
    List,
    /// Run one migration by name.
    Run {
        name: String,
        /// Skip the backup of the data file taken before running.
        #[arg(long)]
        no_backup: bool,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Print an error and terminate.
fn exit_with(err: Error) -> ! {
    eprintln!("Error: {err}");
    std::process::exit(1);
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => exit_with(e.into()),
    }
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out = String::new();
        for (i, ch) in s.chars().enumerate() {
            if i + 1 >= width {
                out.push('…');
                break;
            }
            out.push(ch);
        }
        out
    }
}

fn print_aggregates(aggregates: &Aggregates) {
    if let Some(status) = aggregates.phase_status {
        println!("Phase status: {}", format_phase_status(status));
    }
    if let Some(progress) = aggregates.project_progress {
        println!("Project progress: {progress}%");
    }
    for stale in &aggregates.stale {
        eprintln!("Warning: {:?} not updated: {}", stale.step, stale.error);
    }
    if aggregates.is_degraded() {
        eprintln!("The change is saved. Run `itrack refresh <project>` once the store is healthy.");
    }
}

fn finish(aggregates: &Aggregates) {
    if aggregates.is_degraded() {
        std::process::exit(EXIT_DEGRADED);
    }
}

pub fn cmd_project(store: &mut FileStore, action: ProjectAction) {
    match action {
        ProjectAction::Add { name, status } => {
            match store.mutate(|db| db.add_project(&name, status)) {
                Ok(project) => println!("Created project {} ({})", project.id, project.name),
                Err(e) => exit_with(e),
            }
        }
        ProjectAction::List => {
            let db = store.snapshot().unwrap_or_else(|e| exit_with(e));
            if db.projects.is_empty() {
                println!("No projects.");
                return;
            }
            println!("{:<5} {:<12} {:<9} {}", "ID", "Status", "Progress", "Name");
            for p in &db.projects {
                println!(
                    "{:<5} {:<12} {:<9} {}",
                    p.id,
                    format_project_status(p.status),
                    format!("{}%", p.overall_progress),
                    p.name
                );
            }
        }
        ProjectAction::Show { id } => cmd_project_show(store, id),
    }
}

fn cmd_project_show(store: &mut FileStore, id: u64) {
    let project = match store.get_project(id) {
        Ok(Some(p)) => p,
        Ok(None) => exit_with(Error::not_found("project", id)),
        Err(e) => exit_with(e),
    };
    let phases: Vec<Phase> = store.list_phases_by_project(id).unwrap_or_else(|e| exit_with(e));

    println!(
        "{} [{}] {}%",
        project.name,
        format_project_status(project.status),
        project.overall_progress
    );
    for phase in phases {
        println!(
            "  Phase {} (id {}): {} [{}]",
            phase.phase_number,
            phase.id,
            phase.name,
            format_phase_status(phase.status)
        );
        let tasks: Vec<Task> =
            store.list_tasks_by_phase(phase.id).unwrap_or_else(|e| exit_with(e));
        for t in tasks {
            let mark = if t.completed { "x" } else { " " };
            println!(
                "    [{mark}] {:<4} {:<5} {}",
                t.id,
                t.sort_order,
                truncate(&t.tagged_label(), 72)
            );
        }
    }
}

pub fn cmd_phase(store: &mut FileStore, action: PhaseAction) {
    match action {
        PhaseAction::Add { project, number, name } => {
            match store.mutate(|db| db.add_phase(project, number, &name)) {
                Ok(phase) => println!("Created phase {} (number {})", phase.id, phase.phase_number),
                Err(e) => exit_with(e),
            }
        }
    }
}

pub fn cmd_task(store: &mut FileStore, action: TaskAction) {
    match action {
        TaskAction::Add { phase, label } => {
            let report = add_task(store, phase, &label).unwrap_or_else(|e| exit_with(e));
            print_structural("Added", &report);
        }
        TaskAction::Update { id, fields, actor, json } => {
            let patch = TaskPatch::from_json(&fields).unwrap_or_else(|e| exit_with(e));
            update_and_print(store, id, &patch, actor, json);
        }
        TaskAction::Complete { id, actor } => {
            update_and_print(store, id, &TaskPatch::completion(true), actor, false);
        }
        TaskAction::Reopen { id, actor } => {
            update_and_print(store, id, &TaskPatch::completion(false), actor, false);
        }
        TaskAction::Delete { id } => {
            let report = remove_task(store, id).unwrap_or_else(|e| exit_with(e));
            print_structural("Deleted", &report);
        }
    }
}

fn print_structural(verb: &str, report: &StructuralReport) {
    println!(
        "{verb} task {} at position {}: {}",
        report.task.id, report.task.sort_order, report.task.label
    );
    print_aggregates(&report.aggregates);
    finish(&report.aggregates);
}

fn update_and_print(
    store: &mut FileStore,
    id: u64,
    patch: &TaskPatch,
    actor: ActorType,
    json: bool,
) {
    let report = apply_task_update(store, id, patch, actor).unwrap_or_else(|e| exit_with(e));
    if json {
        print_json(&report);
    } else {
        let state = if report.task.completed { "completed" } else { "open" };
        println!("Updated task {} ({state}): {}", report.task.id, report.task.label);
        if let Some(entry) = &report.activity {
            println!("Logged: {} by {}", entry.description, format_actor(entry.actor_type));
        }
        print_aggregates(&report.aggregates);
    }
    if report.is_degraded() {
        std::process::exit(EXIT_DEGRADED);
    }
}

pub fn cmd_refresh(store: &mut FileStore, project: u64) {
    let snapshot = refresh_project(store, project).unwrap_or_else(|e| exit_with(e));
    for phase in &snapshot.phases {
        println!(
            "Phase {} (id {}): {}",
            phase.phase_number,
            phase.phase_id,
            format_phase_status(phase.status)
        );
    }
    println!("Project progress: {}%", snapshot.overall_progress);
}

pub fn cmd_activity(store: &mut FileStore, project: u64) {
    let entries: Vec<ActivityLogEntry> =
        store.list_activity(project).unwrap_or_else(|e| exit_with(e));
    if entries.is_empty() {
        println!("No activity for project {project}.");
        return;
    }
    for entry in entries {
        println!(
            "{}  {:<16} task {:<5} {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            format_actor(entry.actor_type),
            entry.task_id.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            entry.description
        );
    }
}

pub fn cmd_migrate(store: &mut FileStore, action: MigrateAction) {
    match action {
        MigrateAction::List => {
            for m in all_migrations() {
                println!("{:<24} phase {:<3} {}", m.name, m.phase_number, m.description);
            }
        }
        MigrateAction::Run { name, no_backup, json } => {
            // Reject unknown names before touching or copying anything.
            if let Err(e) = find_migration(&name) {
                exit_with(e);
            }
            if !no_backup && store.path().exists() {
                match create_backup(store.path()) {
                    Ok(path) => eprintln!("Backup created: {}", path.display()),
                    Err(e) => {
                        eprintln!("Failed to create backup: {e}");
                        eprintln!("Aborting migration. Use --no-backup to skip the backup.");
                        std::process::exit(1);
                    }
                }
            }
            let report = run_migration(store, &name).unwrap_or_else(|e| exit_with(e));
            if json {
                print_json(&report);
            } else {
                print_migration_report(&report);
            }
            if let Err(e) = report.ensure_complete() {
                eprintln!("Warning: {e}. Review the failed phases and re-run.");
                std::process::exit(EXIT_DEGRADED);
            }
        }
    }
}

fn print_migration_report(report: &MigrationReport) {
    for r in &report.results {
        let detail = match &r.outcome {
            PhaseOutcome::Applied { task_id, aggregate_error: None } => {
                format!("applied (task {task_id})")
            }
            PhaseOutcome::Applied { task_id, aggregate_error: Some(err) } => {
                format!("applied (task {task_id}), aggregates stale: {err}")
            }
            PhaseOutcome::Skipped { existing_task_id } => {
                format!("skipped (already has task {existing_task_id})")
            }
            PhaseOutcome::Failed { error } => format!("FAILED: {error}"),
        };
        println!("project {:<5} phase {:<5} {}", r.project_id, r.phase_id, detail);
    }
    println!(
        "{}: {} applied, {} skipped, {} failed of {} eligible phase(s)",
        report.migration,
        report.applied_count,
        report.skipped_count,
        report.failed_count,
        report.total_eligible_phases
    );
}

/// Generate shell completion scripts.
pub fn cmd_completions(shell: Shell) {
    use clap::CommandFactory;
    use crate::cli::Cli;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut std::io::stdout());
}
