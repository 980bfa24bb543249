//! Incident lifecycle controller
//!
//! Drives a group from `active` to one of the closed states. The flow for a
//! commit is:
//! 1. Acquire the scenario in the [`SubmissionGuard`]; a commit already in
//!    flight turns the new one into a no-op.
//! 2. `escalate` / `resolve` are posted straight away. `investigate` first
//!    needs a report: it opens a report form, or is rejected if the scenario
//!    already has one.
//! 3. On success the group takes its new status locally, its selection is
//!    reset, and it is marked as departing. The guard is released when the
//!    departure window ends.
//! 4. On failure the guard is released (commits) or kept for a retry
//!    (report submissions), and the group is left as it was.

use crate::backend::TriageBackend;
use crate::engine::guard::{GuardResult, GuardTicket, SubmissionGuard};
use crate::engine::notice::Notifier;
use crate::engine::report::{ReportDraft, ReportForm, ReportLedger, ReportSubmission, ReportWorkflow};
use crate::engine::store::{GroupFeed, PollMergeStore};
use crate::types::{ActionReceipt, ActionRequest, AnalystAction, Group, GroupStatus};
use crate::{Error, Result, triage_error};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Partition of groups shown to the analyst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageTab {
    /// Groups awaiting a decision
    Active,
    /// Groups already investigated, escalated or resolved
    History,
}

impl TriageTab {
    pub fn includes(&self, status: GroupStatus) -> bool {
        match self {
            Self::Active => status == GroupStatus::Active,
            Self::History => status.is_closed(),
        }
    }
}

/// Result of a commit attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The backend accepted the action; the group is departing
    Committed {
        status: GroupStatus,
        receipt: ActionReceipt,
    },
    /// Investigation opened a report form; the guard stays held until it closes
    ReportRequired(ReportForm),
    /// A commit for this scenario is still in flight
    AlreadyInFlight,
    /// The group has already left the active state
    NotActive(GroupStatus),
    /// Investigation refused: the scenario already has a report
    DuplicateReport,
}

/// Scenarios currently showing the departure cue
#[derive(Debug, Clone, Default)]
pub struct DepartureBoard {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl DepartureBoard {
    pub fn contains(&self, scenario_id: &str) -> bool {
        self.ids
            .lock()
            .map(|ids| ids.contains(scenario_id))
            .unwrap_or(false)
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .ids
            .lock()
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn mark(&self, scenario_id: &str) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.insert(scenario_id.to_string());
        }
    }

    fn clear(&self, scenario_id: &str) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.remove(scenario_id);
        }
    }
}

/// Commits analyst decisions and keeps the local view consistent with them
pub struct IncidentController {
    backend: Arc<dyn TriageBackend>,
    groups: Arc<PollMergeStore<GroupFeed>>,
    reports: Arc<ReportLedger>,
    guard: SubmissionGuard,
    workflows: Mutex<HashMap<String, ReportWorkflow>>,
    departures: DepartureBoard,
    notifier: Notifier,
    departure_window: Duration,
}

impl IncidentController {
    pub fn new(
        backend: Arc<dyn TriageBackend>,
        groups: Arc<PollMergeStore<GroupFeed>>,
        reports: Arc<ReportLedger>,
        notifier: Notifier,
        departure_window: Duration,
    ) -> Self {
        Self {
            backend,
            groups,
            reports,
            guard: SubmissionGuard::new(),
            workflows: Mutex::new(HashMap::new()),
            departures: DepartureBoard::default(),
            notifier,
            departure_window,
        }
    }

    pub fn guard(&self) -> &SubmissionGuard {
        &self.guard
    }

    pub fn departures(&self) -> &DepartureBoard {
        &self.departures
    }

    /// Groups belonging to a tab, in snapshot order
    pub async fn groups_in_tab(&self, tab: TriageTab) -> Vec<Group> {
        self.groups
            .items()
            .await
            .into_iter()
            .filter(|g| tab.includes(g.status))
            .collect()
    }

    /// Change the pending selection of a group
    ///
    /// Refused (returns false) while a commit for the scenario is in flight
    /// or when the group is not in the current snapshot.
    pub async fn select_action(&self, scenario_id: &str, action: AnalystAction) -> bool {
        if self.guard.is_held(scenario_id) {
            tracing::debug!(scenario_id, "Selection change ignored while a commit is in flight");
            return false;
        }
        self.groups
            .update_item(scenario_id, |g| g.selected_action = action)
            .await
    }

    /// Commit the group's selected action
    pub async fn commit(&self, scenario_id: &str) -> Result<CommitOutcome> {
        let Some(group) = self.groups.get(scenario_id).await else {
            return Err(Error::conflict(format!(
                "Scenario {scenario_id} is not in the current snapshot"
            )));
        };
        let action = group.selected_action;

        let ticket = match self.guard.try_acquire(scenario_id, action)? {
            GuardResult::Acquired(ticket) => ticket,
            GuardResult::AlreadyHeld(existing) => {
                tracing::debug!(
                    scenario_id,
                    in_flight = %existing.action,
                    "Commit ignored, one is already in flight"
                );
                return Ok(CommitOutcome::AlreadyInFlight);
            }
        };

        if !group.is_active() {
            tracing::debug!(scenario_id, status = %group.status, "Commit refused on a closed group");
            return Ok(CommitOutcome::NotActive(group.status));
        }

        if action.requires_report() {
            return self.open_report(&group, ticket).await;
        }

        let request = ActionRequest::for_group(&group);
        match self.backend.commit_action(&request).await {
            Ok(receipt) => {
                let status = action.target_status();
                tracing::info!(scenario_id, %action, "✅ Scenario {} marked as {}", group.label, status);
                self.notifier
                    .success(format!("Scenario \"{}\" marked as {}", group.label, status));
                self.complete_transition(scenario_id, action, Some(ticket)).await;
                Ok(CommitOutcome::Committed { status, receipt })
            }
            Err(e) => {
                tracing::error!(scenario_id, %action, error = %e, "❌ Commit failed");
                self.notifier.error("Failed to lock in action. Please try again.");
                drop(ticket);
                Err(e)
            }
        }
    }

    async fn open_report(&self, group: &Group, ticket: GuardTicket) -> Result<CommitOutcome> {
        let scenario_id = group.scenario_id.as_str();
        if self.reports.for_scenario(scenario_id).await.is_some() {
            tracing::info!(scenario_id, "Investigation refused, report already exists");
            self.notifier
                .warning("A report has already been submitted for this scenario.");
            drop(ticket);
            return Ok(CommitOutcome::DuplicateReport);
        }

        let workflow = ReportWorkflow::open(scenario_id, &group.label, ticket);
        let form = workflow.form.clone();
        self.workflows
            .lock()
            .map_err(|_| triage_error!("Report workflow lock poisoned"))?
            .insert(scenario_id.to_string(), workflow);

        tracing::info!(scenario_id, "📝 Report form opened for investigation");
        Ok(CommitOutcome::ReportRequired(form))
    }

    /// The open report form for a scenario, if any
    pub fn report_form(&self, scenario_id: &str) -> Option<ReportForm> {
        self.workflows
            .lock()
            .ok()
            .and_then(|w| w.get(scenario_id).map(|wf| wf.form.clone()))
    }

    /// Scenarios with an open report form
    pub fn open_forms(&self) -> Vec<String> {
        self.workflows
            .lock()
            .map(|w| w.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Validate and submit the report gating an investigation
    pub async fn submit_report(
        &self,
        scenario_id: &str,
        draft: ReportDraft,
    ) -> Result<ReportSubmission> {
        let (payload, submitted_under) = {
            let mut workflows = self
                .workflows
                .lock()
                .map_err(|_| triage_error!("Report workflow lock poisoned"))?;
            let Some(workflow) = workflows.get_mut(scenario_id) else {
                return Ok(ReportSubmission::NotOpen);
            };

            workflow.form.draft = draft.clone();
            if let Err(errors) = draft.check() {
                workflow.form.errors = errors.clone();
                self.notifier.error("Please fix the highlighted fields.");
                return Ok(ReportSubmission::Invalid(errors));
            }
            if workflow.form.submitting {
                return Ok(ReportSubmission::InFlight);
            }
            workflow.form.errors.clear();
            workflow.form.submitting = true;

            let payload = ReportDraft {
                scenario_id: scenario_id.to_string(),
                ..draft
            };
            (payload, workflow.ticket_id())
        };

        match self.backend.create_report(&payload).await {
            Ok(receipt) => {
                // Cancelled while in flight: the server still recorded it, but
                // a form reopened since then belongs to a newer commit
                let ticket = self
                    .workflows
                    .lock()
                    .ok()
                    .and_then(|mut w| {
                        let same_form = w
                            .get(scenario_id)
                            .is_some_and(|wf| wf.ticket_id() == submitted_under);
                        if same_form { w.remove(scenario_id) } else { None }
                    })
                    .map(|w| w.ticket);

                tracing::info!(scenario_id, "✅ Report submitted");
                self.notifier.success("Report submitted");
                self.complete_transition(scenario_id, AnalystAction::Investigate, ticket)
                    .await;

                if let Err(e) = self.groups.force_refresh().await {
                    tracing::warn!(error = %e, "Group refresh after report failed");
                }
                if let Err(e) = self.reports.force_refresh().await {
                    tracing::warn!(error = %e, "Report refresh after submit failed");
                }
                Ok(ReportSubmission::Submitted(receipt))
            }
            Err(e) => {
                if let Ok(mut workflows) = self.workflows.lock() {
                    if let Some(workflow) = workflows
                        .get_mut(scenario_id)
                        .filter(|w| w.ticket_id() == submitted_under)
                    {
                        workflow.form.submitting = false;
                    }
                }
                tracing::error!(scenario_id, error = %e, "❌ Report submission failed");
                self.notifier.error("Failed to submit report. Please try again.");
                Err(e)
            }
        }
    }

    /// Close the report form without submitting
    ///
    /// Releases the guard and puts the selection back to the default.
    /// Returns false if no form was open.
    pub async fn cancel_report(&self, scenario_id: &str) -> bool {
        let removed = self
            .workflows
            .lock()
            .ok()
            .and_then(|mut w| w.remove(scenario_id));
        let Some(workflow) = removed else {
            return false;
        };
        drop(workflow);

        self.groups
            .update_item(scenario_id, |g| g.selected_action = AnalystAction::default())
            .await;
        tracing::info!(scenario_id, "Report form cancelled");
        true
    }

    /// Apply a confirmed transition locally and start the departure cue
    async fn complete_transition(
        &self,
        scenario_id: &str,
        action: AnalystAction,
        ticket: Option<GuardTicket>,
    ) {
        let status = action.target_status();
        self.groups
            .update_item(scenario_id, |g| {
                g.status = status;
                g.selected_action = AnalystAction::default();
            })
            .await;

        if self.departure_window.is_zero() {
            drop(ticket);
            return;
        }

        self.departures.mark(scenario_id);
        let departures = self.departures.clone();
        let window = self.departure_window;
        let scenario_id = scenario_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            departures.clear(&scenario_id);
            drop(ticket);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Endpoint, Failure, InMemoryBackend};
    use crate::engine::notice::NoticeLevel;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        groups: Arc<PollMergeStore<GroupFeed>>,
        reports: Arc<ReportLedger>,
        notifier: Notifier,
        controller: IncidentController,
    }

    async fn fixture(window: Duration) -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        backend.inject_scenario("s1", "brute_force", "Credential Access", "Brute Force", 3);
        backend.inject_scenario("s2", "noisy_scanner", "Discovery", "False Positive", 2);

        let groups = Arc::new(PollMergeStore::new(GroupFeed(backend.clone())));
        groups.refresh().await.unwrap();
        let reports = Arc::new(ReportLedger::new(backend.clone()));
        let notifier = Notifier::new();
        let controller = IncidentController::new(
            backend.clone(),
            groups.clone(),
            reports.clone(),
            notifier.clone(),
            window,
        );

        Fixture {
            backend,
            groups,
            reports,
            notifier,
            controller,
        }
    }

    fn filled_draft() -> ReportDraft {
        ReportDraft {
            title: "Password spraying".to_string(),
            description: "Hundreds of failed logins from one host".to_string(),
            threat_category: "Brute Force".to_string(),
            ..ReportDraft::new()
        }
    }

    #[tokio::test]
    async fn test_escalate_commits_and_departs() {
        let f = fixture(Duration::from_millis(40)).await;
        let mut notices = f.notifier.subscribe();

        assert!(f.controller.select_action("s1", AnalystAction::Escalate).await);
        let outcome = f.controller.commit("s1").await.unwrap();
        assert!(matches!(
            outcome,
            CommitOutcome::Committed { status: GroupStatus::Escalated, .. }
        ));

        let group = f.groups.get("s1").await.unwrap();
        assert_eq!(group.status, GroupStatus::Escalated);
        assert_eq!(group.selected_action, AnalystAction::Investigate);
        assert!(f.controller.departures().contains("s1"));
        assert!(f.controller.guard().is_held("s1"));
        assert_eq!(notices.recv().await.unwrap().level, NoticeLevel::Success);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!f.controller.departures().contains("s1"));
        assert!(!f.controller.guard().is_held("s1"));

        let history = f.controller.groups_in_tab(TriageTab::History).await;
        assert_eq!(history.len(), 1);
        assert_eq!(f.controller.groups_in_tab(TriageTab::Active).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_releases_guard() {
        let f = fixture(Duration::ZERO).await;
        f.controller.select_action("s2", AnalystAction::Resolve).await;
        f.backend.fail_next(Endpoint::CommitAction, Failure::Remote, 1);

        assert!(f.controller.commit("s2").await.is_err());
        let group = f.groups.get("s2").await.unwrap();
        assert_eq!(group.status, GroupStatus::Active);
        assert_eq!(group.selected_action, AnalystAction::Resolve);
        assert!(!f.controller.guard().is_held("s2"));

        // Retry goes through
        let outcome = f.controller.commit("s2").await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
        assert_eq!(f.backend.calls(Endpoint::CommitAction), 2);
    }

    #[tokio::test]
    async fn test_closed_group_is_not_committed() {
        let f = fixture(Duration::ZERO).await;
        f.controller.select_action("s1", AnalystAction::Escalate).await;
        f.controller.commit("s1").await.unwrap();

        let outcome = f.controller.commit("s1").await.unwrap();
        assert_eq!(outcome, CommitOutcome::NotActive(GroupStatus::Escalated));
        assert_eq!(f.backend.calls(Endpoint::CommitAction), 1);
        assert!(f.controller.commit("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_investigate_opens_form_and_submits() {
        let f = fixture(Duration::ZERO).await;

        let outcome = f.controller.commit("s1").await.unwrap();
        let CommitOutcome::ReportRequired(form) = outcome else {
            panic!("expected a report form, got {outcome:?}");
        };
        assert_eq!(form.draft.scenario_id, "s1");
        assert_eq!(form.draft.severity, "Medium");
        assert!(f.controller.guard().is_held("s1"));
        assert!(!f.controller.select_action("s1", AnalystAction::Resolve).await);
        assert_eq!(f.backend.calls(Endpoint::CommitAction), 0);

        // Invalid first: nothing sent, values kept
        let mut draft = filled_draft();
        draft.description.clear();
        let submission = f.controller.submit_report("s1", draft).await.unwrap();
        assert!(matches!(submission, ReportSubmission::Invalid(ref e) if e["description"] == "Description is required."));
        assert_eq!(f.controller.report_form("s1").unwrap().draft.title, "Password spraying");
        assert_eq!(f.backend.calls(Endpoint::CreateReport), 0);

        let submission = f.controller.submit_report("s1", filled_draft()).await.unwrap();
        assert!(matches!(submission, ReportSubmission::Submitted(_)));
        assert!(f.controller.report_form("s1").is_none());
        assert!(!f.controller.guard().is_held("s1"));
        assert_eq!(f.groups.get("s1").await.unwrap().status, GroupStatus::Investigating);

        let report = f.reports.for_scenario("s1").await.unwrap();
        assert_eq!(report.category_match, Some(true));
    }

    #[tokio::test]
    async fn test_failed_report_keeps_form_and_guard() {
        let f = fixture(Duration::ZERO).await;
        f.controller.commit("s1").await.unwrap();
        f.backend.fail_next(Endpoint::CreateReport, Failure::Remote, 1);

        assert!(f.controller.submit_report("s1", filled_draft()).await.is_err());
        let form = f.controller.report_form("s1").unwrap();
        assert!(!form.submitting);
        assert_eq!(form.draft.title, "Password spraying");
        assert!(f.controller.guard().is_held("s1"));
        assert_eq!(f.groups.get("s1").await.unwrap().status, GroupStatus::Active);

        // Cancel instead of retrying
        assert!(f.controller.cancel_report("s1").await);
        assert!(!f.controller.guard().is_held("s1"));
        assert!(!f.controller.cancel_report("s1").await);
        assert_eq!(f.controller.open_forms().len(), 0);
    }

    #[tokio::test]
    async fn test_late_report_leaves_reopened_form_alone() {
        let f = fixture(Duration::ZERO).await;
        f.controller.commit("s1").await.unwrap();
        f.backend.hold(Endpoint::CreateReport);

        let late_submit = f.controller.submit_report("s1", filled_draft());
        let analyst = async {
            while f.backend.calls(Endpoint::CreateReport) == 0 {
                tokio::task::yield_now().await;
            }
            assert!(f.controller.cancel_report("s1").await);
            let reopened = f.controller.commit("s1").await.unwrap();
            assert!(matches!(reopened, CommitOutcome::ReportRequired(_)));
            f.backend.open(Endpoint::CreateReport);
        };
        let (submission, ()) = tokio::join!(late_submit, analyst);
        assert!(matches!(submission.unwrap(), ReportSubmission::Submitted(_)));

        // The second form and its guard belong to the second commit
        let form = f.controller.report_form("s1").unwrap();
        assert!(!form.submitting);
        assert!(f.controller.guard().is_held("s1"));

        assert!(f.controller.cancel_report("s1").await);
        assert!(!f.controller.guard().is_held("s1"));
    }

    #[tokio::test]
    async fn test_duplicate_investigation_is_rejected() {
        let f = fixture(Duration::ZERO).await;
        let mut seeded = ReportDraft::for_scenario("s1");
        seeded.title = "Earlier report".to_string();
        f.backend.create_report(&seeded).await.unwrap();
        f.reports.refresh().await.unwrap();

        let mut notices = f.notifier.subscribe();
        let outcome = f.controller.commit("s1").await.unwrap();
        assert_eq!(outcome, CommitOutcome::DuplicateReport);
        assert!(!f.controller.guard().is_held("s1"));
        assert!(f.controller.report_form("s1").is_none());
        assert_eq!(notices.recv().await.unwrap().level, NoticeLevel::Warning);
        assert_eq!(f.backend.calls(Endpoint::CommitAction), 0);
    }

    #[tokio::test]
    async fn test_submit_without_form() {
        let f = fixture(Duration::ZERO).await;
        let submission = f.controller.submit_report("s2", filled_draft()).await.unwrap();
        assert_eq!(submission, ReportSubmission::NotOpen);
    }

    #[test]
    fn test_tabs() {
        assert!(TriageTab::Active.includes(GroupStatus::Active));
        assert!(!TriageTab::Active.includes(GroupStatus::Resolved));
        assert!(TriageTab::History.includes(GroupStatus::Investigating));
        assert!(TriageTab::History.includes(GroupStatus::Escalated));
        assert!(!TriageTab::History.includes(GroupStatus::Unknown));
    }
}
