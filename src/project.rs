//! Project and phase records.
//!
//! A project owns its phases exclusively, and a phase owns its tasks. Both records carry a
//! `version` that the store bumps on every write so aggregate writers can detect that the
//! row moved underneath them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fields::{PhaseStatus, ProjectStatus};

/// An installation project at one property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: u64,
    pub name: String,
    /// Percentage of completed tasks across every phase. Written only by the aggregator.
    pub overall_progress: u8,
    pub status: ProjectStatus,
    #[serde(default)]
    pub version: u64,
    pub created_at_utc: DateTime<Utc>,
}

/// A numbered stage of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: u64,
    pub project_id: u64,
    pub phase_number: u32,
    pub name: String,
    pub status: PhaseStatus,
    #[serde(default)]
    pub version: u64,
}

/// Sort phases into display order: by phase number, then by id.
pub fn sort_phases(phases: &mut [Phase]) {
    phases.sort_by_key(|p| (p.phase_number, p.id));
}
