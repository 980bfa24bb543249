//! Triage engine: stores, lifecycle control and views

pub mod analytics;
pub mod event_view;
pub mod guard;
pub mod lifecycle;
pub mod merge;
pub mod notice;
pub mod report;
pub mod session;
pub mod store;

// Re-export store and reconciliation types
pub use merge::{Merged, Reconcile, merge};
pub use store::{EventFeed, GroupFeed, PollMergeStore, RemoteCollection, ReportFeed, Snapshot, StoreStats};

// Re-export lifecycle types
pub use guard::{GuardEntry, GuardResult, GuardTicket, SubmissionGuard};
pub use lifecycle::{CommitOutcome, DepartureBoard, IncidentController, TriageTab};
pub use notice::{Notice, NoticeLevel, Notifier};

// Re-export report workflow types
pub use report::{
    EditForm, FieldErrors, ReportDraft, ReportEditor, ReportForm, ReportLedger, ReportSubmission,
};

// Re-export views
pub use analytics::{AnalyticsMonitor, AnalyticsSummary, PerformanceGrade, ReportCard};
pub use event_view::{EventPage, EventRow, EventTable, PAGE_SIZES, PageLink, highlight, page_window};
pub use session::TriageSession;
