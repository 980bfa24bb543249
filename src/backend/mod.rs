//! Remote boundary of the triage engine
//!
//! Everything the engine needs from the server goes through [`TriageBackend`].
//! [`HttpBackend`] talks to the real API; [`InMemoryBackend`] implements the
//! same contract in-process for tests and demos.

pub mod http;
pub mod memory;

use crate::Result;
use crate::engine::analytics::{AnalyticsSummary, ReportCard};
use crate::engine::report::ReportDraft;
use crate::types::{ActionReceipt, ActionRequest, Event, Group, Report};
use async_trait::async_trait;

pub use http::HttpBackend;
pub use memory::{Endpoint, Failure, InMemoryBackend};

/// Contract of the triage API
///
/// Server-assigned `id`/`scenario_id` values are opaque to the engine.
#[async_trait]
pub trait TriageBackend: Send + Sync {
    /// Raw events, oldest first
    async fn list_events(&self) -> Result<Vec<Event>>;

    /// Threat-pattern groups (without any client selection)
    async fn list_groups(&self) -> Result<Vec<Group>>;

    /// Submitted incident reports, oldest first
    async fn list_reports(&self) -> Result<Vec<Report>>;

    /// Commit a disposition for a scenario
    async fn commit_action(&self, request: &ActionRequest) -> Result<ActionReceipt>;

    /// Persist a new report; the draft already carries its `scenario_id`
    async fn create_report(&self, draft: &ReportDraft) -> Result<ActionReceipt>;

    /// Replace an existing report
    async fn update_report(&self, report_id: &str, draft: &ReportDraft) -> Result<ActionReceipt>;

    /// Start (or resume) the event simulator
    async fn start_simulator(&self) -> Result<ActionReceipt>;

    /// Clear events, actions and reports on the server
    async fn reset_simulator(&self) -> Result<ActionReceipt>;

    /// Alert counters for the stat cards
    async fn analytics(&self) -> Result<AnalyticsSummary>;

    /// Scoring of the analyst's committed actions
    async fn report_card(&self) -> Result<ReportCard>;
}
