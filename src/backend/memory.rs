//! In-process triage backend
//!
//! Mirrors the server's observable behavior closely enough to drive the
//! engine end to end:
//! - events are stored oldest first and grouped per `scenario_id` + pattern
//! - committed actions rewrite the status of every event of the scenario
//! - reports are scored against the scenario's true category
//!
//! Every call is counted per [`Endpoint`], and calls can be made to fail or
//! to block until released, which is how the engine's concurrency guarantees
//! are exercised.

use crate::backend::TriageBackend;
use crate::engine::analytics::{AnalyticsSummary, ReportCard, WeeklyAlerts};
use crate::engine::report::ReportDraft;
use crate::types::{
    ActionReceipt, ActionRequest, AnalystAction, Event, FALSE_POSITIVE_CATEGORY, Group,
    GroupStatus, Report,
};
use crate::{Error, Result, remote_error, triage_error};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Label the server gives to background traffic; never grouped
const NORMAL_TRAFFIC_LABEL: &str = "normal_traffic";

/// Pattern name used when an event carries none
const DEFAULT_THREAT_PATTERN: &str = "Suspicious Activity";

/// One entry per backend call, for counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ListEvents,
    ListGroups,
    ListReports,
    CommitAction,
    CreateReport,
    UpdateReport,
    StartSimulator,
    ResetSimulator,
    Analytics,
    ReportCard,
}

/// Injected failure modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Transport-level failure
    Remote,
    /// Payload that cannot be decoded
    Malformed,
}

impl Failure {
    fn into_error(self, endpoint: Endpoint) -> Error {
        match self {
            Self::Remote => remote_error!("{:?} unavailable", endpoint),
            Self::Malformed => serde_json::from_str::<Vec<Group>>("{\"truncated\":")
                .err()
                .map(Error::Decode)
                .unwrap_or_else(|| triage_error!("Malformed payload unexpectedly parsed")),
        }
    }
}

/// Analyst action as recorded by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAction {
    pub scenario_id: String,
    pub action: AnalystAction,
    pub label: String,
}

#[derive(Default)]
struct State {
    events: Vec<Event>,
    reports: Vec<Report>,
    actions: Vec<RecordedAction>,
    simulator_running: bool,
}

#[derive(Default)]
struct Faults {
    calls: HashMap<Endpoint, usize>,
    failures: HashMap<Endpoint, (Failure, usize)>,
    gates: HashMap<Endpoint, Arc<Semaphore>>,
}

/// Scriptable in-memory backend
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw event (newest last, as the server stores them)
    pub fn push_event(&self, event: Event) {
        if let Ok(mut state) = self.state.lock() {
            state.events.push(event);
        }
    }

    /// Append a background-traffic event that never forms a group
    pub fn push_normal_event(&self, id: &str, message: &str) {
        self.push_event(build_event(id, message, "low", None, NORMAL_TRAFFIC_LABEL, None, None));
    }

    /// Inject an attack scenario of `count` critical events
    ///
    /// `category` is the scenario's true classification, used to score reports
    /// and to fill in the category once the analyst commits.
    pub fn inject_scenario(
        &self,
        scenario_id: &str,
        label: &str,
        threat_pattern: &str,
        category: &str,
        count: usize,
    ) {
        for i in 0..count {
            let mut event = build_event(
                &format!("{scenario_id}-{i}"),
                &format!("{label} activity #{i}"),
                "critical",
                Some(scenario_id),
                label,
                Some(threat_pattern),
                Some(category),
            );
            event.extra.insert("status".to_string(), json!("active"));
            self.push_event(event);
        }
    }

    /// Drop every event of a scenario (the server closed it)
    pub fn remove_scenario(&self, scenario_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .events
                .retain(|e| e.scenario_id.as_deref() != Some(scenario_id));
        }
    }

    /// Seed a report as if it had been submitted earlier
    pub fn seed_report(&self, report: Report) {
        if let Ok(mut state) = self.state.lock() {
            state.reports.push(report);
        }
    }

    /// Number of calls made to an endpoint so far
    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.faults
            .lock()
            .map(|f| f.calls.get(&endpoint).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Make the next `times` calls to an endpoint fail
    pub fn fail_next(&self, endpoint: Endpoint, failure: Failure, times: usize) {
        if times == 0 {
            return;
        }
        if let Ok(mut faults) = self.faults.lock() {
            faults.failures.insert(endpoint, (failure, times));
        }
    }

    /// Block calls to an endpoint until [`release`](Self::release) is called
    pub fn hold(&self, endpoint: Endpoint) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.gates.insert(endpoint, Arc::new(Semaphore::new(0)));
        }
    }

    /// Let `count` held calls through
    pub fn release(&self, endpoint: Endpoint, count: usize) {
        if let Ok(faults) = self.faults.lock() {
            if let Some(gate) = faults.gates.get(&endpoint) {
                gate.add_permits(count);
            }
        }
    }

    /// Stop holding an endpoint and let every waiting call through
    pub fn open(&self, endpoint: Endpoint) {
        if let Ok(mut faults) = self.faults.lock() {
            if let Some(gate) = faults.gates.remove(&endpoint) {
                gate.close();
            }
        }
    }

    /// Actions the server has recorded, in order
    pub fn recorded_actions(&self) -> Vec<RecordedAction> {
        self.state
            .lock()
            .map(|s| s.actions.clone())
            .unwrap_or_default()
    }

    pub fn simulator_running(&self) -> bool {
        self.state.lock().map(|s| s.simulator_running).unwrap_or(false)
    }

    /// Count the call, wait on a gate if one is set, then apply any failure
    async fn enter(&self, endpoint: Endpoint) -> Result<()> {
        let gate = {
            let mut faults = self
                .faults
                .lock()
                .map_err(|_| triage_error!("Fault table lock poisoned"))?;
            *faults.calls.entry(endpoint).or_insert(0) += 1;
            faults.gates.get(&endpoint).cloned()
        };

        if let Some(gate) = gate {
            // A closed gate means the endpoint was opened while we waited
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut faults = self
            .faults
            .lock()
            .map_err(|_| triage_error!("Fault table lock poisoned"))?;
        if let Some((failure, remaining)) = faults.failures.get_mut(&endpoint) {
            let failure = *failure;
            *remaining -= 1;
            if *remaining == 0 {
                faults.failures.remove(&endpoint);
            }
            return Err(failure.into_error(endpoint));
        }

        Ok(())
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| triage_error!("Backend state lock poisoned"))
    }
}

fn build_event(
    id: &str,
    message: &str,
    severity: &str,
    scenario_id: Option<&str>,
    label: &str,
    threat_pattern: Option<&str>,
    category: Option<&str>,
) -> Event {
    Event {
        id: id.to_string(),
        timestamp: Utc::now(),
        event_type: "alert".to_string(),
        source_ip: "10.0.0.1".to_string(),
        message: message.to_string(),
        severity: severity.to_string(),
        label: Some(label.to_string()),
        category: category.map(str::to_string),
        scenario_id: scenario_id.map(str::to_string),
        threat_pattern: threat_pattern.map(str::to_string),
        extra: serde_json::Map::new(),
    }
}

fn event_status(event: &Event) -> GroupStatus {
    event
        .extra
        .get("status")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(GroupStatus::Unknown)
}

/// Group scenario events the way the server does: one group per
/// `scenario_id` + pattern, status and category taken from the first event
fn group_events(events: &[Event]) -> Vec<Group> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Group> = HashMap::new();

    for event in events {
        let Some(scenario_id) = event.scenario_id.as_deref() else {
            continue;
        };
        if event.label.as_deref() == Some(NORMAL_TRAFFIC_LABEL) {
            continue;
        }

        let pattern = event
            .threat_pattern
            .clone()
            .unwrap_or_else(|| DEFAULT_THREAT_PATTERN.to_string());
        let key = format!("{scenario_id}_{pattern}");

        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            Group {
                scenario_id: scenario_id.to_string(),
                threat_pattern: pattern,
                label: event.label.clone().unwrap_or_else(|| "Unknown".to_string()),
                status: event_status(event),
                severity: event.severity.clone(),
                category: event.category.clone().filter(|c| !c.is_empty()),
                log_count: 0,
                logs: Vec::new(),
                selected_action: AnalystAction::default(),
            }
        });
        group.logs.push(event.clone());
        group.log_count += 1;
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}

fn scenario_category(events: &[Event], scenario_id: &str) -> Option<String> {
    events
        .iter()
        .find(|e| e.scenario_id.as_deref() == Some(scenario_id))
        .and_then(|e| e.category.clone())
        .filter(|c| !c.is_empty())
}

fn set_scenario_status(
    events: &mut [Event],
    scenario_id: &str,
    status: GroupStatus,
    action: AnalystAction,
) {
    for event in events
        .iter_mut()
        .filter(|e| e.scenario_id.as_deref() == Some(scenario_id))
    {
        event.extra.insert("status".to_string(), json!(status));
        event
            .extra
            .insert("analyst_action".to_string(), json!(action));
    }
}

fn draft_to_report(id: String, draft: &ReportDraft) -> Report {
    Report {
        id,
        scenario_id: draft.scenario_id.clone(),
        title: draft.title.clone(),
        description: draft.description.clone(),
        severity: draft.severity.clone(),
        threat_category: draft.threat_category.clone(),
        affected_hosts: draft.affected_hosts.clone(),
        mitigation: draft.mitigation.clone(),
        status: draft.status.clone(),
        timestamp: draft.timestamp,
        correct_category: draft.correct_category.clone(),
        category_match: draft.category_match,
    }
}

#[async_trait]
impl TriageBackend for InMemoryBackend {
    async fn list_events(&self) -> Result<Vec<Event>> {
        self.enter(Endpoint::ListEvents).await?;
        Ok(self.state()?.events.clone())
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        self.enter(Endpoint::ListGroups).await?;
        Ok(group_events(&self.state()?.events))
    }

    async fn list_reports(&self) -> Result<Vec<Report>> {
        self.enter(Endpoint::ListReports).await?;
        Ok(self.state()?.reports.clone())
    }

    async fn commit_action(&self, request: &ActionRequest) -> Result<ActionReceipt> {
        self.enter(Endpoint::CommitAction).await?;
        if request.scenario_id.is_empty() {
            return Err(remote_error!("Missing scenario_id"));
        }

        let mut state = self.state()?;
        let existing = scenario_category(&state.events, &request.scenario_id).or_else(|| {
            state
                .reports
                .iter()
                .find(|r| r.scenario_id == request.scenario_id && !r.threat_category.is_empty())
                .map(|r| r.threat_category.clone())
        });

        // Dismissals without a known category are inferred from the label
        let category = existing.unwrap_or_else(|| {
            let label = request.label.to_lowercase();
            if request.analyst_action == AnalystAction::Resolve
                && (label.contains("normal") || label.contains("false"))
            {
                FALSE_POSITIVE_CATEGORY.to_string()
            } else {
                "Unknown".to_string()
            }
        });

        let status = request.analyst_action.target_status();
        for event in state
            .events
            .iter_mut()
            .filter(|e| e.scenario_id.as_deref() == Some(request.scenario_id.as_str()))
        {
            event.category = Some(category.clone());
        }
        set_scenario_status(
            &mut state.events,
            &request.scenario_id,
            status,
            request.analyst_action,
        );
        state.actions.push(RecordedAction {
            scenario_id: request.scenario_id.clone(),
            action: request.analyst_action,
            label: request.label.clone(),
        });

        Ok(ActionReceipt {
            message: None,
            status: Some("action logged".to_string()),
            action: Some(request.analyst_action.to_string()),
        })
    }

    async fn create_report(&self, draft: &ReportDraft) -> Result<ActionReceipt> {
        self.enter(Endpoint::CreateReport).await?;

        let mut state = self.state()?;
        let correct = scenario_category(&state.events, &draft.scenario_id);
        let matched = correct
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(&draft.threat_category))
            .unwrap_or(draft.threat_category.is_empty());

        let mut report = draft_to_report(Uuid::new_v4().to_string(), draft);
        report.timestamp = Utc::now();
        report.correct_category = correct;
        report.category_match = Some(matched);

        let label = state
            .events
            .iter()
            .find(|e| e.scenario_id.as_deref() == Some(draft.scenario_id.as_str()))
            .and_then(|e| e.label.clone())
            .unwrap_or_else(|| "unknown".to_string());

        set_scenario_status(
            &mut state.events,
            &draft.scenario_id,
            GroupStatus::Investigating,
            AnalystAction::Investigate,
        );
        state.actions.push(RecordedAction {
            scenario_id: draft.scenario_id.clone(),
            action: AnalystAction::Investigate,
            label,
        });
        state.reports.push(report);

        Ok(ActionReceipt::with_message(
            "Report submitted and scenario resolved",
        ))
    }

    async fn update_report(&self, report_id: &str, draft: &ReportDraft) -> Result<ActionReceipt> {
        self.enter(Endpoint::UpdateReport).await?;

        let mut state = self.state()?;
        let slot = state
            .reports
            .iter_mut()
            .find(|r| r.id == report_id)
            .ok_or_else(|| remote_error!("Report {} not found", report_id))?;
        *slot = draft_to_report(report_id.to_string(), draft);

        Ok(ActionReceipt::with_message("Report updated"))
    }

    async fn start_simulator(&self) -> Result<ActionReceipt> {
        self.enter(Endpoint::StartSimulator).await?;

        let mut state = self.state()?;
        let message = if state.simulator_running {
            "Simulator already running"
        } else {
            state.simulator_running = true;
            "Simulator started"
        };
        Ok(ActionReceipt::with_message(message))
    }

    async fn reset_simulator(&self) -> Result<ActionReceipt> {
        self.enter(Endpoint::ResetSimulator).await?;

        let mut state = self.state()?;
        state.events.clear();
        state.reports.clear();
        state.actions.clear();
        state.simulator_running = false;
        Ok(ActionReceipt::with_message(
            "Simulator reset. Click 'Simulate Events' to restart.",
        ))
    }

    async fn analytics(&self) -> Result<AnalyticsSummary> {
        self.enter(Endpoint::Analytics).await?;

        let state = self.state()?;
        let total = state.events.len();
        let critical = state
            .events
            .iter()
            .filter(|e| e.severity == "critical" && event_status(e) == GroupStatus::Active)
            .count();
        let high = state.events.iter().filter(|e| e.severity == "high").count();

        let mut weekly = WeeklyAlerts::empty_week();
        for event in &state.events {
            weekly.record(event.timestamp.weekday());
        }

        Ok(AnalyticsSummary {
            total_alerts: total,
            critical_alerts: critical,
            high_severity_rate: AnalyticsSummary::rate(critical + high, total),
            weekly_alerts: weekly.into_days(),
        })
    }

    async fn report_card(&self) -> Result<ReportCard> {
        self.enter(Endpoint::ReportCard).await?;

        let state = self.state()?;
        let label_categories: HashMap<String, String> = state
            .events
            .iter()
            .filter_map(|e| {
                let label = e.label.as_ref()?.to_lowercase();
                let category = e.category.as_ref()?.to_lowercase();
                Some((label, category))
            })
            .collect();
        let matched_reports: HashSet<&str> = state
            .reports
            .iter()
            .filter(|r| r.category_match == Some(true))
            .map(|r| r.scenario_id.as_str())
            .collect();

        let mut card = ReportCard::default();
        card.total_actions = state.actions.len();
        for action in &state.actions {
            let Some(truth) = label_categories.get(&action.label.to_lowercase()) else {
                continue;
            };
            let false_positive = truth.as_str() == FALSE_POSITIVE_CATEGORY.to_lowercase();
            match action.action {
                AnalystAction::Resolve if false_positive => card.resolved_false_positives += 1,
                AnalystAction::Escalate if !false_positive => card.escalated_true_threats += 1,
                AnalystAction::Investigate
                    if matched_reports.contains(action.scenario_id.as_str()) =>
                {
                    card.investigated_correct += 1
                }
                _ => {}
            }
        }
        card.finalize();

        Ok(card)
    }
}
