//! Triage session: every store and controller wired to one backend
//!
//! A session is an owned resource. [`TriageSession::start`] begins polling,
//! [`TriageSession::stop`] (or dropping the session) ends it.

use crate::Result;
use crate::backend::{HttpBackend, TriageBackend};
use crate::config::Config;
use crate::engine::analytics::AnalyticsMonitor;
use crate::engine::event_view::EventTable;
use crate::engine::lifecycle::IncidentController;
use crate::engine::notice::{Notice, Notifier};
use crate::engine::report::{ReportEditor, ReportLedger};
use crate::engine::store::{EventFeed, GroupFeed, PollMergeStore};
use crate::types::ActionReceipt;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct TriageSession {
    config: Config,
    backend: Arc<dyn TriageBackend>,
    groups: Arc<PollMergeStore<GroupFeed>>,
    events: Arc<PollMergeStore<EventFeed>>,
    table: EventTable,
    reports: Arc<ReportLedger>,
    controller: IncidentController,
    editor: ReportEditor,
    analytics: AnalyticsMonitor,
    notifier: Notifier,
}

impl TriageSession {
    pub fn new(config: Config, backend: Arc<dyn TriageBackend>) -> Result<Self> {
        config.validate()?;

        let notifier = Notifier::new();
        let groups = Arc::new(PollMergeStore::new(GroupFeed(Arc::clone(&backend))));
        let events = Arc::new(PollMergeStore::new(EventFeed(Arc::clone(&backend))));
        let reports = Arc::new(ReportLedger::new(Arc::clone(&backend)));
        let table = EventTable::new(Arc::clone(&events), config.lifecycle.default_page_size)?;
        let controller = IncidentController::new(
            Arc::clone(&backend),
            Arc::clone(&groups),
            Arc::clone(&reports),
            notifier.clone(),
            config.lifecycle.departure_window(),
        );
        let editor = ReportEditor::new(Arc::clone(&backend), Arc::clone(&reports), notifier.clone());
        let analytics = AnalyticsMonitor::new(Arc::clone(&backend));

        Ok(Self {
            config,
            backend,
            groups,
            events,
            table,
            reports,
            controller,
            editor,
            analytics,
            notifier,
        })
    }

    /// Session against the HTTP API named in the config
    pub fn connect(config: Config) -> Result<Self> {
        let backend = HttpBackend::new(&config.backend)?;
        tracing::info!("🔌 Connecting to triage API at {}", backend.base_url());
        Self::new(config, Arc::new(backend))
    }

    /// Start every poll and load the report list once
    ///
    /// A failed initial report load is logged; the ledger fills in on the
    /// next refresh.
    pub async fn start(&self) -> Result<()> {
        let polling = &self.config.polling;
        self.events.start(polling.event_interval())?;
        self.groups.start(polling.group_interval())?;
        self.analytics.start(polling.analytics_interval())?;

        if let Err(e) = self.reports.refresh().await {
            tracing::warn!(error = %e, "Initial report load failed");
        }
        tracing::info!("✅ Triage session started");
        Ok(())
    }

    pub fn stop(&self) {
        self.events.stop();
        self.groups.stop();
        self.analytics.stop();
        tracing::info!("🛑 Triage session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.events.is_running() || self.groups.is_running()
    }

    pub async fn start_simulator(&self) -> Result<ActionReceipt> {
        match self.backend.start_simulator().await {
            Ok(receipt) => {
                self.notifier.success(receipt.summary().to_string());
                Ok(receipt)
            }
            Err(e) => {
                tracing::error!(error = %e, "❌ Failed to start simulator");
                self.notifier.error("Failed to start simulator");
                Err(e)
            }
        }
    }

    /// Clear the server and reload every view from page 1
    pub async fn reset_simulator(&self) -> Result<ActionReceipt> {
        let receipt = match self.backend.reset_simulator().await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::error!(error = %e, "❌ Failed to reset simulator");
                self.notifier.error("Failed to reset simulator");
                return Err(e);
            }
        };

        for (name, result) in [
            ("events", self.events.force_refresh().await),
            ("groups", self.groups.force_refresh().await),
            ("reports", self.reports.force_refresh().await),
        ] {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Refreshing {} after reset failed", name);
            }
        }

        self.notifier.success(receipt.summary().to_string());
        Ok(receipt)
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn groups(&self) -> &Arc<PollMergeStore<GroupFeed>> {
        &self.groups
    }

    pub fn events(&self) -> &Arc<PollMergeStore<EventFeed>> {
        &self.events
    }

    pub fn event_table(&self) -> &EventTable {
        &self.table
    }

    pub fn reports(&self) -> &Arc<ReportLedger> {
        &self.reports
    }

    pub fn controller(&self) -> &IncidentController {
        &self.controller
    }

    pub fn editor(&self) -> &ReportEditor {
        &self.editor
    }

    pub fn analytics(&self) -> &AnalyticsMonitor {
        &self.analytics
    }
}

impl Drop for TriageSession {
    fn drop(&mut self) {
        self.stop();
    }
}
