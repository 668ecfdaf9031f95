//! Append-only audit trail of task completions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::fields::{ActivityAction, ActorType};
use crate::store::LeafStore;
use crate::task::{strip_kind_tag, Task};

/// A stored audit entry. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityLogEntry {
    pub id: u64,
    pub project_id: u64,
    pub task_id: Option<u64>,
    pub action: ActivityAction,
    pub description: String,
    pub actor_type: ActorType,
    pub created_at: DateTime<Utc>,
}

/// An entry about to be appended; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub project_id: u64,
    pub task_id: Option<u64>,
    pub action: ActivityAction,
    pub description: String,
    pub actor_type: ActorType,
}

/// Human description of a completed task: its portal label minus one leading kind tag.
pub fn completion_description(task: &Task) -> String {
    strip_kind_tag(&task.tagged_label()).to_string()
}

/// Record that `task` was completed by `actor`.
///
/// Only the completion processor calls this, and only on a not-true → true transition.
pub fn log_task_completed<S: LeafStore + ?Sized>(
    store: &mut S,
    project_id: u64,
    task: &Task,
    actor: ActorType,
) -> Result<ActivityLogEntry> {
    let entry = NewActivity {
        project_id,
        task_id: Some(task.id),
        action: ActivityAction::TaskCompleted,
        description: completion_description(task),
        actor_type: actor,
    };
    let stored = store.append_activity_log(&entry)?;
    debug!(project_id, task_id = task.id, entry_id = stored.id, "activity logged");
    Ok(stored)
}
