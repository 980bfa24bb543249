//! Alert statistics and analyst scoring
//!
//! [`AnalyticsSummary`] feeds the stat cards and is polled by
//! [`AnalyticsMonitor`]. [`ReportCard`] scores committed actions on demand and
//! [`PerformanceGrade`] turns its accuracy into a letter grade.

use crate::Result;
use crate::backend::TriageBackend;
use crate::engine::store::{PollTimer, issue_if_current};
use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

/// Percentage rounded to two decimals
fn percentage(numerator: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (numerator as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Alert count for one weekday
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAlerts {
    /// Short English day name (`Mon` .. `Sun`)
    pub day: String,
    pub alerts: usize,
}

/// Headline alert counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    #[serde(default)]
    pub total_alerts: usize,
    /// Critical alerts still active
    #[serde(default)]
    pub critical_alerts: usize,
    /// Share of critical and high alerts, as a percentage
    #[serde(default)]
    pub high_severity_rate: f64,
    #[serde(default)]
    pub weekly_alerts: Vec<DailyAlerts>,
}

impl AnalyticsSummary {
    pub fn rate(numerator: usize, total: usize) -> f64 {
        percentage(numerator, total)
    }

    /// Busiest day of the week, if any alert was recorded
    pub fn peak_day(&self) -> Option<&DailyAlerts> {
        self.weekly_alerts
            .iter()
            .filter(|d| d.alerts > 0)
            .max_by_key(|d| d.alerts)
    }
}

/// Per-weekday accumulator, Monday first
#[derive(Debug, Clone, Default)]
pub struct WeeklyAlerts {
    counts: [usize; 7],
}

impl WeeklyAlerts {
    pub fn empty_week() -> Self {
        Self::default()
    }

    pub fn record(&mut self, day: Weekday) {
        self.counts[day.num_days_from_monday() as usize] += 1;
    }

    pub fn into_days(self) -> Vec<DailyAlerts> {
        let mut day = Weekday::Mon;
        self.counts
            .iter()
            .map(|&alerts| {
                let entry = DailyAlerts {
                    day: day.to_string(),
                    alerts,
                };
                day = day.succ();
                entry
            })
            .collect()
    }
}

/// Scoring of the analyst's committed actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportCard {
    #[serde(default)]
    pub resolved_false_positives: usize,
    #[serde(default)]
    pub escalated_true_threats: usize,
    #[serde(default)]
    pub investigated_correct: usize,
    #[serde(default)]
    pub incorrect_actions: usize,
    #[serde(default)]
    pub total_actions: usize,
    /// Percentage of correct actions, two decimals
    #[serde(default)]
    pub accuracy: f64,
}

impl ReportCard {
    pub fn correct_actions(&self) -> usize {
        self.resolved_false_positives + self.escalated_true_threats + self.investigated_correct
    }

    /// Derive `incorrect_actions` and `accuracy` from the counters
    pub fn finalize(&mut self) {
        let correct = self.correct_actions();
        self.incorrect_actions = self.total_actions.saturating_sub(correct);
        self.accuracy = percentage(correct, self.total_actions);
    }

    pub fn grade(&self) -> PerformanceGrade {
        PerformanceGrade::from_accuracy(self.accuracy)
    }
}

/// Letter grade derived from accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceGrade {
    A,
    B,
    C,
    D,
    F,
}

impl PerformanceGrade {
    pub fn from_accuracy(accuracy: f64) -> Self {
        match accuracy {
            a if a >= 90.0 => Self::A,
            a if a >= 80.0 => Self::B,
            a if a >= 70.0 => Self::C,
            a if a >= 60.0 => Self::D,
            _ => Self::F,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
            Self::F => 'F',
        }
    }

    pub fn feedback(&self) -> &'static str {
        match self {
            Self::A => "Outstanding triage. Your decisions are consistently accurate.",
            Self::B => "Strong performance with minor room for improvement.",
            Self::C => "Decent work, but several calls need a closer look.",
            Self::D => "Accuracy is below expectations. Review the missed scenarios.",
            Self::F => "Most actions were incorrect. Revisit the triage playbook.",
        }
    }
}

/// Latest analytics plus the time it was fetched
#[derive(Debug, Clone, Default)]
pub struct AnalyticsView {
    pub summary: Option<AnalyticsSummary>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Polls the analytics endpoint for the stat cards
pub struct AnalyticsMonitor {
    backend: Arc<dyn TriageBackend>,
    latest: Arc<RwLock<AnalyticsView>>,
    epoch: Arc<Mutex<u64>>,
    timer: Mutex<Option<PollTimer>>,
}

impl AnalyticsMonitor {
    pub fn new(backend: Arc<dyn TriageBackend>) -> Self {
        Self {
            backend,
            latest: Arc::new(RwLock::new(AnalyticsView::default())),
            epoch: Arc::new(Mutex::new(0)),
            timer: Mutex::new(None),
        }
    }

    /// Fetch once now; a failure keeps the previous numbers
    pub async fn refresh(&self) -> Result<AnalyticsSummary> {
        Self::record(self.backend.analytics().await, &self.latest, &self.epoch, None).await
    }

    pub async fn latest(&self) -> AnalyticsView {
        self.latest.read().await.clone()
    }

    /// Fetch and grade the report card; not polled
    pub async fn report_card(&self) -> Result<(ReportCard, PerformanceGrade)> {
        let card = self.backend.report_card().await.inspect_err(|e| {
            tracing::warn!("❌ Failed to fetch report card: {}", e);
        })?;
        let grade = card.grade();
        Ok((card, grade))
    }

    pub fn start(&self, interval: Duration) -> Result<()> {
        let mut timer = self
            .timer
            .lock()
            .map_err(|_| crate::triage_error!("Analytics timer lock poisoned"))?;
        if timer.is_some() {
            return Ok(());
        }

        let backend = Arc::clone(&self.backend);
        let latest = Arc::clone(&self.latest);
        let epoch = Arc::clone(&self.epoch);
        *timer = Some(PollTimer::start(
            "analytics",
            interval,
            Arc::clone(&self.epoch),
            move |tick_epoch| {
                let backend = Arc::clone(&backend);
                let latest = Arc::clone(&latest);
                let epoch = Arc::clone(&epoch);
                tokio::spawn(async move {
                    let Some(fetched) =
                        issue_if_current(&epoch, tick_epoch, backend.analytics()).await
                    else {
                        tracing::debug!("Skipping analytics poll, monitor was stopped");
                        return;
                    };
                    let _ = Self::record(fetched, &latest, &epoch, Some(tick_epoch)).await;
                });
            },
        )?);
        Ok(())
    }

    pub fn stop(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(timer) = timer.take() {
                timer.stop();
            }
        }
    }

    async fn record(
        fetched: Result<AnalyticsSummary>,
        latest: &RwLock<AnalyticsView>,
        epoch: &Mutex<u64>,
        tick_epoch: Option<u64>,
    ) -> Result<AnalyticsSummary> {
        let summary = fetched.inspect_err(|e| {
            tracing::warn!("❌ Analytics fetch failed, keeping previous numbers: {}", e);
        })?;

        let mut view = latest.write().await;
        if let Some(tick_epoch) = tick_epoch {
            if epoch.lock().map(|e| *e != tick_epoch).unwrap_or(true) {
                tracing::debug!("Discarding analytics response from a stopped poll");
                return Ok(summary);
            }
        }
        view.summary = Some(summary.clone());
        view.last_updated = Some(Utc::now());
        Ok(summary)
    }
}

impl Drop for AnalyticsMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
