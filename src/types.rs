//! # Core Types for the Alert Triage Engine
//!
//! Data crossing the backend boundary, plus the client-only annotations the
//! engine keeps alongside it.
//!
//! ## Type Categories
//!
//! ### Server-authoritative records
//! - [`Event`]: one raw security event, never mutated client-side
//! - [`Group`]: a threat-pattern instance aggregating events of one scenario
//! - [`Report`]: an analyst's incident report, at most one per scenario
//!
//! ### Lifecycle vocabulary
//! - [`GroupStatus`]: `active -> investigating | escalated | resolved`
//! - [`AnalystAction`]: the disposition an analyst commits for a group
//! - [`Verdict`]: how a closed group's category compares with the disposition
//!
//! ### Wire messages
//! - [`ActionRequest`] / [`ActionReceipt`]: the commit endpoint's payloads
//!
//! ## Usage Examples
//!
//! ```rust
//! use alert_triage::types::{AnalystAction, Group, GroupStatus};
//!
//! let json = r#"{
//!     "scenario_id": "s1",
//!     "threat_pattern": "Credential Access",
//!     "label": "brute_force",
//!     "severity": "critical",
//!     "status": "active",
//!     "log_count": 0,
//!     "logs": []
//! }"#;
//!
//! let group: Group = serde_json::from_str(json).unwrap();
//! assert_eq!(group.status, GroupStatus::Active);
//! // The pending selection is client-only and starts at `investigate`
//! assert_eq!(group.selected_action, AnalystAction::Investigate);
//! assert_eq!(AnalystAction::Escalate.target_status(), GroupStatus::Escalated);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Category the backend assigns to benign scenarios
pub const FALSE_POSITIVE_CATEGORY: &str = "False Positive";

/// A raw security event as produced by the backend
///
/// Only the fields the engine reasons about are named; everything else the
/// server sends (addresses, byte counts, detector, ...) is kept in `extra` so
/// that the serialized form used by the free-text filter stays complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque identity key
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_pattern: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Lifecycle status of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Initial state, assigned by the backend
    Active,
    Investigating,
    Escalated,
    Resolved,
    /// Anything the backend reports outside the state machine
    #[serde(other)]
    Unknown,
}

impl GroupStatus {
    /// Terminal from the client's point of view; only the backend can reopen
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Investigating | Self::Escalated | Self::Resolved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Investigating => "investigating",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disposition an analyst selects and commits for a group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalystAction {
    #[default]
    Investigate,
    Escalate,
    /// Dismissal; sent as `resolve`
    Resolve,
}

impl AnalystAction {
    /// Status a group moves to once this action is committed
    pub fn target_status(&self) -> GroupStatus {
        match self {
            Self::Investigate => GroupStatus::Investigating,
            Self::Escalate => GroupStatus::Escalated,
            Self::Resolve => GroupStatus::Resolved,
        }
    }

    /// Investigations must capture a report before the transition completes
    pub fn requires_report(&self) -> bool {
        matches!(self, Self::Investigate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Investigate => "investigate",
            Self::Escalate => "escalate",
            Self::Resolve => "resolve",
        }
    }
}

impl fmt::Display for AnalystAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threat-pattern instance: events of one scenario grouped by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Identity key
    pub scenario_id: String,
    #[serde(default)]
    pub threat_pattern: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub severity: String,
    pub status: GroupStatus,
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<String>,
    #[serde(default)]
    pub log_count: usize,
    #[serde(default)]
    pub logs: Vec<Event>,

    /// Analyst's pending choice; client-only, never sent or read on the wire
    #[serde(skip)]
    pub selected_action: AnalystAction,
}

impl Group {
    /// Key used to tell apart patterns of the same scenario in a listing
    pub fn display_key(&self) -> String {
        format!("{}_{}", self.scenario_id, self.threat_pattern)
    }

    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }

    /// Outcome feedback for a group that has left the active state
    pub fn verdict(&self) -> Verdict {
        let category = self.category.as_deref();
        match self.status {
            GroupStatus::Investigating => Verdict::Triage,
            GroupStatus::Escalated => match category {
                Some(category) => Verdict::Confirmed(category.to_string()),
                None => Verdict::Pending,
            },
            GroupStatus::Resolved => match category {
                Some(category) if category.eq_ignore_ascii_case(FALSE_POSITIVE_CATEGORY) => {
                    Verdict::FalsePositive
                }
                Some(category) => Verdict::Missed(category.to_string()),
                None => Verdict::Missed("Unknown".to_string()),
            },
            GroupStatus::Active | GroupStatus::Unknown => Verdict::Pending,
        }
    }
}

/// Feedback shown on a group once the backend has classified it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Still open, or escalated without a confirmed category yet
    Pending,
    /// Triage is under way (investigating)
    Triage,
    /// Escalation confirmed as the given category
    Confirmed(String),
    /// Correctly dismissed as a false positive
    FalsePositive,
    /// Dismissed, but it was actually the given category
    Missed(String),
}

/// Incident report persisted by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Identity key, assigned by the backend
    pub id: String,
    #[serde(default)]
    pub scenario_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub threat_category: String,
    #[serde(default)]
    pub affected_hosts: String,
    #[serde(default)]
    pub mitigation: String,
    #[serde(default)]
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub correct_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_match: Option<bool>,
}

/// Body of the commit endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub analyst_action: AnalystAction,
    pub scenario_id: String,
    pub label: String,
}

impl ActionRequest {
    pub fn for_group(group: &Group) -> Self {
        Self {
            analyst_action: group.selected_action,
            scenario_id: group.scenario_id.clone(),
            label: group.label.clone(),
        }
    }
}

/// Acknowledgement returned by action-style endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl ActionReceipt {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Best human-readable summary of the acknowledgement
    pub fn summary(&self) -> &str {
        self.message
            .as_deref()
            .or(self.status.as_deref())
            .unwrap_or("ok")
    }
}

/// The backend writes missing categories as empty strings
fn blank_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
