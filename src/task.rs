//! Task data structure and the task-kind boundary.
//!
//! Labels coming from the portal still use a leading tag (`[PM] `, `[ADMIN-SPEED] `, ...)
//! to say what sort of task they are. That tag is parsed exactly once, here, into
//! [`TaskKind`]; everything past this module works with the enum.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fields::{DeliveryRecord, EnclosureType};

/// A single checklist item inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: u64,
    pub phase_id: u64,
    /// Human label without any kind tag.
    pub label: String,
    pub kind: TaskKind,
    pub completed: bool,
    pub sort_order: i64,
    #[serde(default)]
    pub completed_at_utc: Option<DateTime<Utc>>,
    pub updated_at_utc: i64,
}

impl Task {
    /// Label in the legacy prefix form, for consumers that still parse tags.
    pub fn tagged_label(&self) -> String {
        match self.kind.tag() {
            Some(tag) => format!("{tag} {}", self.label),
            None => self.label.clone(),
        }
    }
}

/// What sort of task this is, with the fields only that sort carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskKind {
    #[default]
    Standard,
    PmCheckbox,
    PmText {
        #[serde(default)]
        response: Option<String>,
    },
    PmDate {
        #[serde(default)]
        confirmed_date: Option<NaiveDate>,
    },
    AdminDate {
        #[serde(default)]
        scheduled_date: Option<NaiveDate>,
    },
    AdminSpeed {
        #[serde(default)]
        upload_mbps: Option<f64>,
        #[serde(default)]
        download_mbps: Option<f64>,
    },
    AdminEnclosure {
        #[serde(default)]
        enclosure_type: Option<EnclosureType>,
    },
    AdminEquipment {
        #[serde(default)]
        quantity: Option<u32>,
    },
    AdminDelivery {
        #[serde(default)]
        deliveries: Vec<DeliveryRecord>,
    },
    AdminDoc {
        #[serde(default)]
        document_url: Option<String>,
    },
}

const KIND_TAGS: &[&str] = &[
    "[PM]",
    "[PM-TEXT]",
    "[PM-DATE]",
    "[ADMIN-DATE]",
    "[ADMIN-SPEED]",
    "[ADMIN-ENCLOSURE]",
    "[ADMIN-EQUIPMENT]",
    "[ADMIN-DELIVERY]",
    "[ADMIN-DOC]",
];

impl TaskKind {
    /// The legacy label tag for this kind, if it has one.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            TaskKind::Standard => None,
            TaskKind::PmCheckbox => Some("[PM]"),
            TaskKind::PmText { .. } => Some("[PM-TEXT]"),
            TaskKind::PmDate { .. } => Some("[PM-DATE]"),
            TaskKind::AdminDate { .. } => Some("[ADMIN-DATE]"),
            TaskKind::AdminSpeed { .. } => Some("[ADMIN-SPEED]"),
            TaskKind::AdminEnclosure { .. } => Some("[ADMIN-ENCLOSURE]"),
            TaskKind::AdminEquipment { .. } => Some("[ADMIN-EQUIPMENT]"),
            TaskKind::AdminDelivery { .. } => Some("[ADMIN-DELIVERY]"),
            TaskKind::AdminDoc { .. } => Some("[ADMIN-DOC]"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Standard => "standard",
            TaskKind::PmCheckbox => "pm-checkbox",
            TaskKind::PmText { .. } => "pm-text",
            TaskKind::PmDate { .. } => "pm-date",
            TaskKind::AdminDate { .. } => "admin-date",
            TaskKind::AdminSpeed { .. } => "admin-speed",
            TaskKind::AdminEnclosure { .. } => "admin-enclosure",
            TaskKind::AdminEquipment { .. } => "admin-equipment",
            TaskKind::AdminDelivery { .. } => "admin-delivery",
            TaskKind::AdminDoc { .. } => "admin-doc",
        }
    }

    fn from_tag(tag: &str) -> Option<TaskKind> {
        let kind = match tag {
            "[PM]" => TaskKind::PmCheckbox,
            "[PM-TEXT]" => TaskKind::PmText { response: None },
            "[PM-DATE]" => TaskKind::PmDate { confirmed_date: None },
            "[ADMIN-DATE]" => TaskKind::AdminDate { scheduled_date: None },
            "[ADMIN-SPEED]" => TaskKind::AdminSpeed { upload_mbps: None, download_mbps: None },
            "[ADMIN-ENCLOSURE]" => TaskKind::AdminEnclosure { enclosure_type: None },
            "[ADMIN-EQUIPMENT]" => TaskKind::AdminEquipment { quantity: None },
            "[ADMIN-DELIVERY]" => TaskKind::AdminDelivery { deliveries: Vec::new() },
            "[ADMIN-DOC]" => TaskKind::AdminDoc { document_url: None },
            _ => return None,
        };
        Some(kind)
    }
}

/// Return the leading kind tag of `label` if it is one of the recognised forms.
///
/// `[PM]`, `[PM-TEXT]` and `[PM-DATE]` are matched exactly; any `[ADMIN-...]` tag made of
/// uppercase letters, digits and hyphens is recognised as belonging to the admin family.
fn leading_tag(label: &str) -> Option<&str> {
    if !label.starts_with('[') {
        return None;
    }
    let close = label.find(']')?;
    let tag = &label[..=close];
    if KIND_TAGS.contains(&tag) {
        return Some(tag);
    }
    let inner = tag.strip_prefix("[ADMIN-")?.strip_suffix(']')?;
    let well_formed = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');
    well_formed.then_some(tag)
}

/// Strip one leading recognised kind tag plus the space after it.
///
/// Bracketed text anywhere else in the label, and unrecognised leading tags, are left alone.
pub fn strip_kind_tag(label: &str) -> &str {
    match leading_tag(label) {
        Some(tag) => {
            let rest = &label[tag.len()..];
            rest.strip_prefix(' ').unwrap_or(rest)
        }
        None => label,
    }
}

/// Split a tagged portal label into its kind and its plain label.
pub fn parse_tagged_label(raw: &str) -> Result<(TaskKind, String)> {
    let raw = raw.trim();
    let (kind, rest) = match leading_tag(raw) {
        Some(tag) => {
            let kind = TaskKind::from_tag(tag)
                .ok_or_else(|| Error::validation(format!("unsupported admin task tag {tag}")))?;
            (kind, strip_kind_tag(raw))
        }
        None => (TaskKind::Standard, raw),
    };
    let label = rest.trim();
    if label.is_empty() {
        return Err(Error::validation("task label cannot be empty"));
    }
    Ok((kind, label.to_string()))
}

/// Fields for a task row that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub phase_id: u64,
    pub label: String,
    pub kind: TaskKind,
    pub sort_order: i64,
}

impl NewTask {
    pub fn from_tagged_label(phase_id: u64, raw_label: &str, sort_order: i64) -> Result<Self> {
        let (kind, label) = parse_tagged_label(raw_label)?;
        Ok(NewTask { phase_id, label, kind, sort_order })
    }
}

/// Row-level changes the core is allowed to send to the store for a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskChanges {
    pub completed: Option<bool>,
    pub kind: Option<TaskKind>,
    pub sort_order: Option<i64>,
}

/// A sparse, caller-supplied update to one task.
///
/// Unknown fields are rejected rather than dropped.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskPatch {
    pub completed: Option<bool>,
    pub response: Option<String>,
    pub confirmed_date: Option<NaiveDate>,
    pub scheduled_date: Option<NaiveDate>,
    pub upload_mbps: Option<f64>,
    pub download_mbps: Option<f64>,
    pub enclosure_type: Option<EnclosureType>,
    pub quantity: Option<u32>,
    pub deliveries: Option<Vec<DeliveryRecord>>,
    pub document_url: Option<String>,
}

impl TaskPatch {
    /// Parse a patch from a JSON object such as `{"completed": true}`.
    pub fn from_json(input: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| Error::validation(format!("patch is not valid JSON: {e}")))?;
        if !value.is_object() {
            return Err(Error::validation("patch must be a JSON object"));
        }
        serde_json::from_value(value).map_err(|e| Error::validation(e.to_string()))
    }

    pub fn completion(completed: bool) -> Self {
        TaskPatch { completed: Some(completed), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    /// Apply the payload fields of this patch to `kind`, rejecting fields the kind does not carry.
    pub fn apply_to(&self, kind: &TaskKind) -> Result<TaskKind> {
        let mut next = kind.clone();

        if let Some(text) = &self.response {
            match &mut next {
                TaskKind::PmText { response } => *response = Some(text.trim().to_string()),
                other => return Err(field_mismatch("response", other)),
            }
        }
        if let Some(date) = self.confirmed_date {
            match &mut next {
                TaskKind::PmDate { confirmed_date } => *confirmed_date = Some(date),
                other => return Err(field_mismatch("confirmed_date", other)),
            }
        }
        if let Some(date) = self.scheduled_date {
            match &mut next {
                TaskKind::AdminDate { scheduled_date } => *scheduled_date = Some(date),
                other => return Err(field_mismatch("scheduled_date", other)),
            }
        }
        if self.upload_mbps.is_some() || self.download_mbps.is_some() {
            let field = if self.upload_mbps.is_some() { "upload_mbps" } else { "download_mbps" };
            match &mut next {
                TaskKind::AdminSpeed { upload_mbps, download_mbps } => {
                    if let Some(up) = self.upload_mbps {
                        *upload_mbps = Some(check_speed("upload_mbps", up)?);
                    }
                    if let Some(down) = self.download_mbps {
                        *download_mbps = Some(check_speed("download_mbps", down)?);
                    }
                }
                other => return Err(field_mismatch(field, other)),
            }
        }
        if let Some(choice) = self.enclosure_type {
            match &mut next {
                TaskKind::AdminEnclosure { enclosure_type } => *enclosure_type = Some(choice),
                other => return Err(field_mismatch("enclosure_type", other)),
            }
        }
        if let Some(qty) = self.quantity {
            match &mut next {
                TaskKind::AdminEquipment { quantity } => *quantity = Some(qty),
                other => return Err(field_mismatch("quantity", other)),
            }
        }
        if let Some(records) = &self.deliveries {
            for record in records {
                if record.description.trim().is_empty() {
                    return Err(Error::validation("delivery description cannot be empty"));
                }
                if record.quantity == 0 {
                    return Err(Error::validation("delivery quantity must be at least 1"));
                }
            }
            match &mut next {
                TaskKind::AdminDelivery { deliveries } => *deliveries = records.clone(),
                other => return Err(field_mismatch("deliveries", other)),
            }
        }
        if let Some(url) = &self.document_url {
            let url = url.trim();
            if url.is_empty() {
                return Err(Error::validation("document_url cannot be empty"));
            }
            match &mut next {
                TaskKind::AdminDoc { document_url } => *document_url = Some(url.to_string()),
                other => return Err(field_mismatch("document_url", other)),
            }
        }

        Ok(next)
    }
}

fn field_mismatch(field: &str, kind: &TaskKind) -> Error {
    Error::validation(format!("field `{field}` does not apply to a {} task", kind.name()))
}

fn check_speed(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::validation(format!("{field} must be a non-negative number")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_kind_tag() {
        assert_eq!(strip_kind_tag("[PM] Sign off access"), "Sign off access");
        assert_eq!(strip_kind_tag("[PM-TEXT] Parking notes"), "Parking notes");
        assert_eq!(strip_kind_tag("[ADMIN-SPEED] Speed test"), "Speed test");
        assert_eq!(strip_kind_tag("[ADMIN-WHATEVER] Future kind"), "Future kind");
        assert_eq!(strip_kind_tag("Check [PM] wiring"), "Check [PM] wiring");
        assert_eq!(strip_kind_tag("[NOTE] Keep this"), "[NOTE] Keep this");
        assert_eq!(strip_kind_tag("[PM] [PM] twice"), "[PM] twice");
        assert_eq!(strip_kind_tag("Plain"), "Plain");
    }

    #[test]
    fn test_parse_tagged_label() {
        let (kind, label) = parse_tagged_label("[ADMIN-DELIVERY] Router delivered").unwrap();
        assert_eq!(kind, TaskKind::AdminDelivery { deliveries: vec![] });
        assert_eq!(label, "Router delivered");

        let (kind, label) = parse_tagged_label("Run cable to [B] block").unwrap();
        assert_eq!(kind, TaskKind::Standard);
        assert_eq!(label, "Run cable to [B] block");

        assert!(matches!(parse_tagged_label("[ADMIN-FOO] x"), Err(Error::Validation(_))));
        assert!(matches!(parse_tagged_label("[PM]   "), Err(Error::Validation(_))));
    }

    #[test]
    fn test_tagged_label_round_trips_through_parser() {
        let task = Task {
            id: 1,
            phase_id: 1,
            label: "Confirm access date".into(),
            kind: TaskKind::PmDate { confirmed_date: None },
            completed: false,
            sort_order: 1,
            completed_at_utc: None,
            updated_at_utc: 0,
        };
        assert_eq!(task.tagged_label(), "[PM-DATE] Confirm access date");
        let (kind, label) = parse_tagged_label(&task.tagged_label()).unwrap();
        assert_eq!(kind, task.kind);
        assert_eq!(label, task.label);
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let err = TaskPatch::from_json(r#"{"completed": true, "colour": "red"}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("colour")));
        assert!(matches!(TaskPatch::from_json("[1,2]"), Err(Error::Validation(_))));
        assert!(matches!(
            TaskPatch::from_json(r#"{"upload_mbps": "fast"}"#),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            TaskPatch::from_json(r#"{"enclosure_type": "cupboard"}"#),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_patch_applies_only_to_matching_kind() {
        let patch = TaskPatch::from_json(r#"{"upload_mbps": 48.5}"#).unwrap();
        let next = patch
            .apply_to(&TaskKind::AdminSpeed { upload_mbps: None, download_mbps: Some(300.0) })
            .unwrap();
        assert_eq!(
            next,
            TaskKind::AdminSpeed { upload_mbps: Some(48.5), download_mbps: Some(300.0) }
        );

        let err = patch.apply_to(&TaskKind::PmCheckbox).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("pm-checkbox")));
    }

    #[test]
    fn test_patch_validates_values() {
        let negative = TaskPatch { download_mbps: Some(-1.0), ..Default::default() };
        let speed = TaskKind::AdminSpeed { upload_mbps: None, download_mbps: None };
        assert!(matches!(negative.apply_to(&speed), Err(Error::Validation(_))));

        let patch = TaskPatch::from_json(
            r#"{"deliveries": [{"delivered_on": "2026-03-02", "description": "ONT", "quantity": 0}]}"#,
        )
        .unwrap();
        let delivery = TaskKind::AdminDelivery { deliveries: vec![] };
        assert!(matches!(patch.apply_to(&delivery), Err(Error::Validation(_))));
    }

    #[test]
    fn test_completion_patch_is_not_empty() {
        assert!(TaskPatch::default().is_empty());
        assert!(!TaskPatch::completion(true).is_empty());
        assert_eq!(
            TaskPatch::completion(true).apply_to(&TaskKind::Standard).unwrap(),
            TaskKind::Standard
        );
    }
}
