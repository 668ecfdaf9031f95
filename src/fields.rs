//! Enumerations and field types for the installation hierarchy.
//!
//! This module defines the status values carried by projects and phases, the actor
//! recorded on activity entries, and the small value types that task payloads use.

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a whole installation project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Planning,
    InProgress,
    Completed,
    OnHold,
    Cancelled,
}

/// Derived status of a phase. Never set directly; see `status::derive_phase_status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

/// Who initiated a change that produced an activity entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Admin,
    #[default]
    PropertyManager,
    System,
}

/// Kind of audit entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    TaskCompleted,
}

/// Physical enclosure chosen for the installed equipment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnclosureType {
    WallMount,
    Rack,
    Outdoor,
    None,
}

/// One delivery of equipment to site, recorded by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeliveryRecord {
    pub delivered_on: NaiveDate,
    pub description: String,
    pub quantity: u32,
    #[serde(default)]
    pub received_by: Option<String>,
}

/// Format a project status for display.
pub fn format_project_status(s: ProjectStatus) -> &'static str {
    match s {
        ProjectStatus::Planning => "Planning",
        ProjectStatus::InProgress => "In Progress",
        ProjectStatus::Completed => "Completed",
        ProjectStatus::OnHold => "On Hold",
        ProjectStatus::Cancelled => "Cancelled",
    }
}

/// Format a phase status for display.
pub fn format_phase_status(s: PhaseStatus) -> &'static str {
    match s {
        PhaseStatus::NotStarted => "Not Started",
        PhaseStatus::InProgress => "In Progress",
        PhaseStatus::Completed => "Completed",
    }
}

/// Format an actor for display.
pub fn format_actor(a: ActorType) -> &'static str {
    match a {
        ActorType::Admin => "admin",
        ActorType::PropertyManager => "property manager",
        ActorType::System => "system",
    }
}
