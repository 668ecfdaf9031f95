//! Storage: the in-memory table set and its JSON file backing.
//!
//! `Database` holds every table and implements [`LeafStore`] directly, which is what tests and
//! the file store use. `FileStore` wraps a JSON file and turns each trait call into
//! lock → load → apply one row operation → save, so independent processes get row-level
//! atomicity without sharing any memory.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::activity::{ActivityLogEntry, NewActivity};
use crate::error::{Error, Result};
use crate::fields::{PhaseStatus, ProjectStatus};
use crate::project::{sort_phases, Phase, Project};
use crate::store::{LeafStore, TaskWrite};
use crate::task::{NewTask, Task, TaskChanges};

/// Every table of the portal, as persisted in one JSON document.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub activity: Vec<ActivityLogEntry>,
    /// Highest task id ever handed out. Deleted task ids are never reused.
    #[serde(default)]
    pub last_task_id: u64,
}

impl Database {
    /// Load from a JSON file. A missing file is an empty database; an unreadable one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Database::default());
        }
        let mut buf = String::new();
        File::open(path)?.read_to_string(&mut buf)?;
        if buf.trim().is_empty() {
            return Ok(Database::default());
        }
        Ok(serde_json::from_str(&buf)?)
    }

    /// Save to a JSON file using atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        let data = serde_json::to_string_pretty(self)?;
        f.write_all(data.as_bytes())?;
        f.sync_all()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn next_project_id(&self) -> u64 {
        self.projects.iter().map(|p| p.id).max().unwrap_or(0) + 1
    }

    fn next_phase_id(&self) -> u64 {
        self.phases.iter().map(|p| p.id).max().unwrap_or(0) + 1
    }

    fn next_task_id(&mut self) -> u64 {
        let highest = self.tasks.iter().map(|t| t.id).max().unwrap_or(0);
        self.last_task_id = self.last_task_id.max(highest) + 1;
        self.last_task_id
    }

    fn next_activity_id(&self) -> u64 {
        self.activity.iter().map(|a| a.id).max().unwrap_or(0) + 1
    }

    /// Create a project with zero progress.
    pub fn add_project(&mut self, name: &str, status: ProjectStatus) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("project name cannot be empty"));
        }
        let project = Project {
            id: self.next_project_id(),
            name: name.to_string(),
            overall_progress: 0,
            status,
            version: 0,
            created_at_utc: Utc::now(),
        };
        self.projects.push(project.clone());
        Ok(project)
    }

    /// Create an empty phase under an existing project.
    pub fn add_phase(&mut self, project_id: u64, phase_number: u32, name: &str) -> Result<Phase> {
        if !self.projects.iter().any(|p| p.id == project_id) {
            return Err(Error::not_found("project", project_id));
        }
        if self
            .phases
            .iter()
            .any(|p| p.project_id == project_id && p.phase_number == phase_number)
        {
            return Err(Error::validation(format!(
                "project {project_id} already has a phase {phase_number}"
            )));
        }
        let phase = Phase {
            id: self.next_phase_id(),
            project_id,
            phase_number,
            name: name.trim().to_string(),
            status: PhaseStatus::NotStarted,
            version: 0,
        };
        self.phases.push(phase.clone());
        Ok(phase)
    }

    fn project_index(&self, id: u64) -> Result<usize> {
        self.projects
            .iter()
            .position(|p| p.id == id)
            .ok_or(Error::not_found("project", id))
    }

    fn phase_index(&self, id: u64) -> Result<usize> {
        self.phases
            .iter()
            .position(|p| p.id == id)
            .ok_or(Error::not_found("phase", id))
    }

    fn task_index(&self, id: u64) -> Result<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(Error::not_found("task", id))
    }
}

impl LeafStore for Database {
    fn get_task(&mut self, id: u64) -> Result<Option<Task>> {
        Ok(self.tasks.iter().find(|t| t.id == id).cloned())
    }

    fn get_phase(&mut self, id: u64) -> Result<Option<Phase>> {
        Ok(self.phases.iter().find(|p| p.id == id).cloned())
    }

    fn get_project(&mut self, id: u64) -> Result<Option<Project>> {
        Ok(self.projects.iter().find(|p| p.id == id).cloned())
    }

    fn list_tasks_by_phase(&mut self, phase_id: u64) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> =
            self.tasks.iter().filter(|t| t.phase_id == phase_id).cloned().collect();
        tasks.sort_by_key(|t| (t.sort_order, t.id));
        Ok(tasks)
    }

    fn list_phases_by_project(&mut self, project_id: u64) -> Result<Vec<Phase>> {
        let mut phases: Vec<Phase> =
            self.phases.iter().filter(|p| p.project_id == project_id).cloned().collect();
        sort_phases(&mut phases);
        Ok(phases)
    }

    fn list_phases(&mut self) -> Result<Vec<Phase>> {
        let mut phases = self.phases.clone();
        phases.sort_by_key(|p| (p.project_id, p.phase_number, p.id));
        Ok(phases)
    }

    fn update_task(&mut self, id: u64, changes: &TaskChanges) -> Result<TaskWrite> {
        let idx = self.task_index(id)?;
        let before = self.tasks[idx].clone();
        let mut after = before.clone();
        let now = Utc::now();

        if let Some(completed) = changes.completed {
            if completed != after.completed {
                after.completed = completed;
                after.completed_at_utc = completed.then_some(now);
            }
        }
        if let Some(kind) = &changes.kind {
            after.kind = kind.clone();
        }
        if let Some(order) = changes.sort_order {
            after.sort_order = order;
        }

        // An identical re-save leaves the row untouched.
        if after != before {
            after.updated_at_utc = now.timestamp();
            self.tasks[idx] = after.clone();
        }
        Ok(TaskWrite { before, after })
    }

    fn update_phase_status(
        &mut self,
        id: u64,
        status: PhaseStatus,
        expected_version: u64,
    ) -> Result<Phase> {
        let idx = self.phase_index(id)?;
        let phase = &mut self.phases[idx];
        if phase.version != expected_version {
            return Err(Error::Conflict { entity: "phase", id });
        }
        phase.status = status;
        phase.version += 1;
        Ok(phase.clone())
    }

    fn update_project_progress(
        &mut self,
        id: u64,
        progress: u8,
        expected_version: u64,
    ) -> Result<Project> {
        if progress > 100 {
            return Err(Error::validation(format!("progress {progress} is out of range")));
        }
        let idx = self.project_index(id)?;
        let project = &mut self.projects[idx];
        if project.version != expected_version {
            return Err(Error::Conflict { entity: "project", id });
        }
        project.overall_progress = progress;
        project.version += 1;
        Ok(project.clone())
    }

    fn insert_task(&mut self, task: &NewTask) -> Result<Task> {
        self.phase_index(task.phase_id)?;
        let row = Task {
            id: self.next_task_id(),
            phase_id: task.phase_id,
            label: task.label.clone(),
            kind: task.kind.clone(),
            completed: false,
            sort_order: task.sort_order,
            completed_at_utc: None,
            updated_at_utc: Utc::now().timestamp(),
        };
        self.tasks.push(row.clone());
        Ok(row)
    }

    fn delete_task(&mut self, id: u64) -> Result<Task> {
        let idx = self.task_index(id)?;
        Ok(self.tasks.remove(idx))
    }

    fn append_activity_log(&mut self, entry: &NewActivity) -> Result<ActivityLogEntry> {
        let row = ActivityLogEntry {
            id: self.next_activity_id(),
            project_id: entry.project_id,
            task_id: entry.task_id,
            action: entry.action,
            description: entry.description.clone(),
            actor_type: entry.actor_type,
            created_at: Utc::now(),
        };
        self.activity.push(row.clone());
        Ok(row)
    }

    fn list_activity(&mut self, project_id: u64) -> Result<Vec<ActivityLogEntry>> {
        Ok(self
            .activity
            .iter()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }
}

/// A [`LeafStore`] over a JSON file, safe to share between processes.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(FileStore { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<File> {
        let lock_path = self.path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        Ok(file)
    }

    /// Run `f` against a fresh load of the file under a shared lock.
    pub fn read<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        let result = Database::load(&self.path).and_then(|mut db| f(&mut db));
        self.release(lock);
        result
    }

    /// Run `f` against a fresh load under an exclusive lock and save only if `f` succeeds.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let lock = self.lock_file()?;
        lock.lock_exclusive()?;
        let result = Database::load(&self.path).and_then(|mut db| {
            let value = f(&mut db)?;
            db.save(&self.path)?;
            Ok(value)
        });
        self.release(lock);
        result
    }

    fn release(&self, lock: File) {
        if let Err(e) = lock.unlock() {
            warn!(lock = %self.path.with_extension("lock").display(), error = %e, "unlock failed");
        }
    }

    pub fn snapshot(&self) -> Result<Database> {
        self.read(|db| Ok(db.clone()))
    }
}

impl LeafStore for FileStore {
    fn get_task(&mut self, id: u64) -> Result<Option<Task>> {
        self.read(|db| db.get_task(id))
    }

    fn get_phase(&mut self, id: u64) -> Result<Option<Phase>> {
        self.read(|db| db.get_phase(id))
    }

    fn get_project(&mut self, id: u64) -> Result<Option<Project>> {
        self.read(|db| db.get_project(id))
    }

    fn list_tasks_by_phase(&mut self, phase_id: u64) -> Result<Vec<Task>> {
        self.read(|db| db.list_tasks_by_phase(phase_id))
    }

    fn list_phases_by_project(&mut self, project_id: u64) -> Result<Vec<Phase>> {
        self.read(|db| db.list_phases_by_project(project_id))
    }

    fn list_phases(&mut self) -> Result<Vec<Phase>> {
        self.read(|db| db.list_phases())
    }

    fn update_task(&mut self, id: u64, changes: &TaskChanges) -> Result<TaskWrite> {
        self.mutate(|db| db.update_task(id, changes))
    }

    fn update_phase_status(
        &mut self,
        id: u64,
        status: PhaseStatus,
        expected_version: u64,
    ) -> Result<Phase> {
        self.mutate(|db| db.update_phase_status(id, status, expected_version))
    }

    fn update_project_progress(
        &mut self,
        id: u64,
        progress: u8,
        expected_version: u64,
    ) -> Result<Project> {
        self.mutate(|db| db.update_project_progress(id, progress, expected_version))
    }

    fn insert_task(&mut self, task: &NewTask) -> Result<Task> {
        self.mutate(|db| db.insert_task(task))
    }

    fn delete_task(&mut self, id: u64) -> Result<Task> {
        self.mutate(|db| db.delete_task(id))
    }

    fn append_activity_log(&mut self, entry: &NewActivity) -> Result<ActivityLogEntry> {
        self.mutate(|db| db.append_activity_log(entry))
    }

    fn list_activity(&mut self, project_id: u64) -> Result<Vec<ActivityLogEntry>> {
        self.read(|db| db.list_activity(project_id))
    }
}

/// Copy the data file into a `backup/` directory next to it, with a timestamped name.
pub fn create_backup(db_path: &Path) -> Result<PathBuf> {
    if !db_path.exists() {
        return Err(Error::StoreUnavailable(format!(
            "data file {} does not exist",
            db_path.display()
        )));
    }

    let parent_dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    let backup_dir = parent_dir.join("backup");
    fs::create_dir_all(&backup_dir)?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let db_filename = db_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("portal.json");
    let backup_path = backup_dir.join(format!("{timestamp}_{db_filename}"));
    fs::copy(db_path, &backup_path)?;

    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use tempfile::TempDir;

    fn seeded() -> (Database, u64, u64) {
        let mut db = Database::default();
        let project = db.add_project("Harbour View", ProjectStatus::InProgress).unwrap();
        let phase = db.add_phase(project.id, 1, "Survey").unwrap();
        (db, project.id, phase.id)
    }

    #[test]
    fn test_add_phase_rejects_duplicate_numbers_and_missing_projects() {
        let (mut db, project_id, _) = seeded();
        assert!(matches!(db.add_phase(project_id, 1, "Again"), Err(Error::Validation(_))));
        assert!(matches!(db.add_phase(99, 1, "Orphan"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_update_task_reports_previous_row() {
        let (mut db, _, phase_id) = seeded();
        let task = db
            .insert_task(&NewTask {
                phase_id,
                label: "Walk the site".into(),
                kind: TaskKind::Standard,
                sort_order: 1,
            })
            .unwrap();

        let changes = TaskChanges { completed: Some(true), ..Default::default() };
        let first = db.update_task(task.id, &changes).unwrap();
        assert!(first.completion_transition());
        assert!(first.after.completed_at_utc.is_some());

        let second = db.update_task(task.id, &changes).unwrap();
        assert!(!second.completion_transition());
        assert!(!second.changed());
    }

    #[test]
    fn test_versioned_writes_detect_conflicts() {
        let (mut db, project_id, phase_id) = seeded();
        db.update_project_progress(project_id, 40, 0).unwrap();
        let err = db.update_project_progress(project_id, 50, 0).unwrap_err();
        assert!(err.is_conflict());

        db.update_phase_status(phase_id, PhaseStatus::InProgress, 0).unwrap();
        let err = db.update_phase_status(phase_id, PhaseStatus::Completed, 0).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(
            db.update_project_progress(project_id, 101, 1),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_deleted_task_ids_are_not_reused() {
        let (mut db, _, phase_id) = seeded();
        let task = |label| NewTask::from_tagged_label(phase_id, label, 1).unwrap();
        db.insert_task(&task("Walk")).unwrap();
        let newest = db.insert_task(&task("Survey")).unwrap();
        db.delete_task(newest.id).unwrap();
        assert_eq!(db.insert_task(&task("Report")).unwrap().id, newest.id + 1);

        // The counter survives a save even when every task is gone.
        let ids: Vec<u64> = db.tasks.iter().map(|t| t.id).collect();
        for id in ids {
            db.delete_task(id).unwrap();
        }
        let json = serde_json::to_string(&db).unwrap();
        let mut reloaded: Database = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.insert_task(&task("Snag list")).unwrap().id, newest.id + 2);
    }

    #[test]
    fn test_insert_task_requires_phase() {
        let mut db = Database::default();
        let err = db
            .insert_task(&NewTask {
                phase_id: 3,
                label: "x".into(),
                kind: TaskKind::Standard,
                sort_order: 1,
            })
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "phase", id: 3 }));
    }

    #[test]
    fn test_file_store_persists_each_row_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("portal.json");
        let store = FileStore::open(&path).unwrap();

        let phase_id = store
            .mutate(|db| {
                let project = db.add_project("Elm Court", ProjectStatus::Planning)?;
                Ok(db.add_phase(project.id, 1, "Survey")?.id)
            })
            .unwrap();

        let mut writer = store.clone();
        let task = writer
            .insert_task(&NewTask::from_tagged_label(phase_id, "[PM] Approve plan", 1).unwrap())
            .unwrap();
        writer
            .update_task(task.id, &TaskChanges { completed: Some(true), ..Default::default() })
            .unwrap();

        let reloaded = Database::load(&path).unwrap();
        assert_eq!(reloaded.tasks.len(), 1);
        assert!(reloaded.tasks[0].completed);
        assert_eq!(reloaded.tasks[0].kind, TaskKind::PmCheckbox);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_does_not_save_failed_mutation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("portal.json");
        let store = FileStore::open(&path).unwrap();
        let err = store.mutate(|db| db.add_phase(1, 1, "No project")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_is_store_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("portal.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Database::load(&path), Err(Error::StoreUnavailable(_))));
    }

    #[test]
    fn test_create_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("portal.json");
        Database::default().save(&path).unwrap();
        let backup = create_backup(&path).unwrap();
        assert!(backup.exists());
        assert!(backup.starts_with(dir.path().join("backup")));
    }
}
