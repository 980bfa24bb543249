//! Incident report capture
//!
//! [`ReportDraft`] is the form model, validated with `validator`.
//! [`ReportLedger`] holds the submitted reports and answers whether a
//! scenario already has one. [`ReportEditor`] re-opens an existing report and
//! writes it back by id; it is independent of the live triage flow.
//!
//! The triage-side workflow (a report that gates an investigation) lives in
//! the lifecycle controller, which owns the commit guard for it.

use crate::Result;
use crate::backend::TriageBackend;
use crate::engine::guard::GuardTicket;
use crate::engine::notice::Notifier;
use crate::engine::store::{PollMergeStore, ReportFeed};
use crate::types::{ActionReceipt, Report};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const SEVERITIES: [&str; 4] = ["Low", "Medium", "High", "Critical"];

pub const CATEGORIES: [&str; 9] = [
    "Malware",
    "Phishing",
    "Lateral Movement",
    "Data Exfiltration",
    "Insider Threat",
    "Defense Evasion",
    "Brute Force",
    "Command & Control",
    "DDoS",
];

pub const REPORT_STATUSES: [&str; 4] = ["Open", "In Progress", "Escalated", "Resolved"];

pub const DEFAULT_SEVERITY: &str = "Medium";
pub const DEFAULT_REPORT_STATUS: &str = "In Progress";

/// Field name to first validation message
pub type FieldErrors = BTreeMap<String, String>;

/// Report form model, sent as the body of the create and update calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ReportDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub scenario_id: String,
    #[validate(
        custom(function = "title_present"),
        length(max = 80, message = "Title must be at most 80 characters.")
    )]
    pub title: String,
    #[validate(
        custom(function = "description_present"),
        length(max = 1000, message = "Description must be at most 1000 characters.")
    )]
    pub description: String,
    #[validate(custom(function = "known_severity"))]
    pub severity: String,
    #[validate(custom(function = "known_category"))]
    pub threat_category: String,
    #[validate(length(max = 200, message = "Affected hosts must be at most 200 characters."))]
    #[serde(default)]
    pub affected_hosts: String,
    #[validate(length(max = 800, message = "Mitigation must be at most 800 characters."))]
    #[serde(default)]
    pub mitigation: String,
    #[validate(custom(function = "known_status"))]
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_match: Option<bool>,
}

impl Default for ReportDraft {
    fn default() -> Self {
        Self {
            id: None,
            scenario_id: String::new(),
            title: String::new(),
            description: String::new(),
            severity: DEFAULT_SEVERITY.to_string(),
            threat_category: String::new(),
            affected_hosts: String::new(),
            mitigation: String::new(),
            status: DEFAULT_REPORT_STATUS.to_string(),
            timestamp: Utc::now(),
            correct_category: None,
            category_match: None,
        }
    }
}

impl ReportDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blank form bound to the scenario being investigated
    pub fn for_scenario(scenario_id: &str) -> Self {
        Self {
            scenario_id: scenario_id.to_string(),
            ..Self::default()
        }
    }

    /// Pre-filled form for editing a persisted report
    pub fn from_report(report: &Report) -> Self {
        Self {
            id: Some(report.id.clone()),
            scenario_id: report.scenario_id.clone(),
            title: report.title.clone(),
            description: report.description.clone(),
            severity: report.severity.clone(),
            threat_category: report.threat_category.clone(),
            affected_hosts: report.affected_hosts.clone(),
            mitigation: report.mitigation.clone(),
            status: report.status.clone(),
            timestamp: report.timestamp,
            correct_category: report.correct_category.clone(),
            category_match: report.category_match,
        }
    }

    /// Run the form rules; the draft itself is never modified
    pub fn check(&self) -> std::result::Result<(), FieldErrors> {
        self.validate().map_err(|errors| {
            errors
                .field_errors()
                .into_iter()
                .filter_map(|(field, errs)| {
                    let message = errs.iter().find_map(|e| e.message.as_ref())?;
                    Some((field.to_string(), message.to_string()))
                })
                .collect()
        })
    }
}

fn failure(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

fn present(value: &str, message: &'static str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(failure("required", message));
    }
    Ok(())
}

fn one_of(
    value: &str,
    allowed: &[&str],
    required: &'static str,
    unknown: &'static str,
) -> std::result::Result<(), ValidationError> {
    present(value, required)?;
    if !allowed.contains(&value.trim()) {
        return Err(failure("unknown_option", unknown));
    }
    Ok(())
}

fn title_present(value: &str) -> std::result::Result<(), ValidationError> {
    present(value, "Title is required.")
}

fn description_present(value: &str) -> std::result::Result<(), ValidationError> {
    present(value, "Description is required.")
}

fn known_severity(value: &str) -> std::result::Result<(), ValidationError> {
    one_of(
        value,
        &SEVERITIES,
        "Severity is required.",
        "Severity must be Low, Medium, High or Critical.",
    )
}

fn known_category(value: &str) -> std::result::Result<(), ValidationError> {
    one_of(
        value,
        &CATEGORIES,
        "Category is required.",
        "Category is not a known threat category.",
    )
}

fn known_status(value: &str) -> std::result::Result<(), ValidationError> {
    one_of(
        value,
        &REPORT_STATUSES,
        "Status is required.",
        "Status must be Open, In Progress, Escalated or Resolved.",
    )
}

/// Result of submitting a form
#[derive(Debug, Clone, PartialEq)]
pub enum ReportSubmission {
    /// Persisted; the form is closed
    Submitted(ActionReceipt),
    /// Rejected locally; the form stays open with these messages
    Invalid(FieldErrors),
    /// A submission for this form is already pending
    InFlight,
    /// No form is open for the target
    NotOpen,
}

/// Open report form, as seen by presentation code
#[derive(Debug, Clone, PartialEq)]
pub struct ReportForm {
    pub scenario_id: String,
    pub label: String,
    pub draft: ReportDraft,
    pub errors: FieldErrors,
    pub submitting: bool,
}

/// Report form gating an investigation
///
/// Holds the commit guard ticket for its scenario; closing the workflow
/// (submit or cancel) drops the ticket.
#[derive(Debug)]
pub(crate) struct ReportWorkflow {
    pub(crate) form: ReportForm,
    pub(crate) ticket: GuardTicket,
}

impl ReportWorkflow {
    pub(crate) fn open(scenario_id: &str, label: &str, ticket: GuardTicket) -> Self {
        Self {
            form: ReportForm {
                scenario_id: scenario_id.to_string(),
                label: label.to_string(),
                draft: ReportDraft::for_scenario(scenario_id),
                errors: FieldErrors::new(),
                submitting: false,
            },
            ticket,
        }
    }

    /// Identifies this opening of the form across cancel and reopen
    pub(crate) fn ticket_id(&self) -> Uuid {
        self.ticket.entry().ticket_id
    }
}

/// Submitted reports, most recent first
///
/// Not polled: refreshed on demand and after every report write.
pub struct ReportLedger {
    store: PollMergeStore<ReportFeed>,
}

impl ReportLedger {
    pub fn new(backend: Arc<dyn TriageBackend>) -> Self {
        Self {
            store: PollMergeStore::new(ReportFeed(backend)),
        }
    }

    pub async fn refresh(&self) -> Result<bool> {
        self.store.refresh().await
    }

    pub async fn force_refresh(&self) -> Result<bool> {
        self.store.force_refresh().await
    }

    pub async fn reports(&self) -> Vec<Report> {
        self.store.items().await
    }

    pub async fn get(&self, report_id: &str) -> Option<Report> {
        self.store.get(report_id).await
    }

    /// The report captured for a scenario, if any
    pub async fn for_scenario(&self, scenario_id: &str) -> Option<Report> {
        self.store
            .snapshot()
            .await
            .items
            .into_iter()
            .find(|r| r.scenario_id == scenario_id)
    }

    pub fn store(&self) -> &PollMergeStore<ReportFeed> {
        &self.store
    }
}

/// Report being edited
#[derive(Debug, Clone, PartialEq)]
pub struct EditForm {
    pub report_id: String,
    pub draft: ReportDraft,
    pub errors: FieldErrors,
    pub submitting: bool,
}

/// Edit mode for persisted reports
pub struct ReportEditor {
    backend: Arc<dyn TriageBackend>,
    ledger: Arc<ReportLedger>,
    notifier: Notifier,
    form: Mutex<Option<EditForm>>,
}

impl ReportEditor {
    pub fn new(backend: Arc<dyn TriageBackend>, ledger: Arc<ReportLedger>, notifier: Notifier) -> Self {
        Self {
            backend,
            ledger,
            notifier,
            form: Mutex::new(None),
        }
    }

    /// Open a report for editing, replacing any form already open
    pub fn open(&self, report: &Report) -> ReportDraft {
        let draft = ReportDraft::from_report(report);
        if let Ok(mut form) = self.form.lock() {
            *form = Some(EditForm {
                report_id: report.id.clone(),
                draft: draft.clone(),
                errors: FieldErrors::new(),
                submitting: false,
            });
        }
        draft
    }

    pub fn current(&self) -> Option<EditForm> {
        self.form.lock().ok().and_then(|f| f.clone())
    }

    pub fn cancel(&self) {
        if let Ok(mut form) = self.form.lock() {
            *form = None;
        }
    }

    /// Validate and write the draft back to the open report
    pub async fn submit(&self, draft: ReportDraft) -> Result<ReportSubmission> {
        let report_id = {
            let mut guard = self
                .form
                .lock()
                .map_err(|_| crate::triage_error!("Report editor lock poisoned"))?;
            let Some(form) = guard.as_mut() else {
                return Ok(ReportSubmission::NotOpen);
            };

            form.draft = draft.clone();
            if let Err(errors) = draft.check() {
                form.errors = errors.clone();
                self.notifier.error("Please fix the highlighted fields.");
                return Ok(ReportSubmission::Invalid(errors));
            }
            if form.submitting {
                return Ok(ReportSubmission::InFlight);
            }
            form.errors.clear();
            form.submitting = true;
            form.report_id.clone()
        };

        let mut payload = draft;
        payload.id = Some(report_id.clone());

        match self.backend.update_report(&report_id, &payload).await {
            Ok(receipt) => {
                if let Ok(mut form) = self.form.lock() {
                    if form.as_ref().is_some_and(|f| f.report_id == report_id) {
                        *form = None;
                    }
                }
                tracing::info!(report_id = %report_id, "✅ Report updated");
                self.notifier.success("Report updated");
                if let Err(e) = self.ledger.refresh().await {
                    tracing::warn!(error = %e, "Report list refresh after update failed");
                }
                Ok(ReportSubmission::Submitted(receipt))
            }
            Err(e) => {
                if let Ok(mut form) = self.form.lock() {
                    if let Some(form) = form.as_mut().filter(|f| f.report_id == report_id) {
                        form.submitting = false;
                    }
                }
                tracing::error!(report_id = %report_id, error = %e, "❌ Report update failed");
                self.notifier.error("Failed to update report");
                Err(e)
            }
        }
    }
}
