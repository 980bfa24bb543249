//! Single-flight guard for commits
//!
//! At most one commit per scenario may be in flight. A commit acquires a
//! [`GuardTicket`] for its scenario; while the ticket lives, further attempts
//! for the same scenario get [`GuardResult::AlreadyHeld`]. Dropping the ticket
//! releases the scenario, which lets ownership of a pending investigation or
//! a departure animation carry the release with it.

use crate::types::AnalystAction;
use crate::{Result, triage_error};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A commit that currently holds its scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardEntry {
    pub scenario_id: String,
    pub action: AnalystAction,
    pub acquired_at: DateTime<Utc>,
    pub ticket_id: Uuid,
}

/// Result of a guard acquisition attempt
#[derive(Debug)]
pub enum GuardResult {
    /// The scenario is ours until the ticket is dropped
    Acquired(GuardTicket),
    /// Another commit for this scenario is still in flight
    AlreadyHeld(GuardEntry),
}

type Entries = Arc<Mutex<HashMap<String, GuardEntry>>>;

/// Set of scenarios with a commit in flight
#[derive(Debug, Clone, Default)]
pub struct SubmissionGuard {
    entries: Entries,
}

impl SubmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-insert in one step
    pub fn try_acquire(&self, scenario_id: &str, action: AnalystAction) -> Result<GuardResult> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| triage_error!("Submission guard lock poisoned"))?;

        if let Some(existing) = entries.get(scenario_id) {
            return Ok(GuardResult::AlreadyHeld(existing.clone()));
        }

        let entry = GuardEntry {
            scenario_id: scenario_id.to_string(),
            action,
            acquired_at: Utc::now(),
            ticket_id: Uuid::new_v4(),
        };
        entries.insert(scenario_id.to_string(), entry.clone());
        tracing::debug!("🔒 Commit guard acquired: scenario={}, action={}", scenario_id, action);

        Ok(GuardResult::Acquired(GuardTicket {
            entry,
            entries: Arc::clone(&self.entries),
        }))
    }

    pub fn is_held(&self, scenario_id: &str) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains_key(scenario_id))
            .unwrap_or(false)
    }

    pub fn held(&self) -> Vec<GuardEntry> {
        self.entries
            .lock()
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ownership of one scenario in the guard set
#[derive(Debug)]
pub struct GuardTicket {
    entry: GuardEntry,
    entries: Entries,
}

impl GuardTicket {
    pub fn scenario_id(&self) -> &str {
        &self.entry.scenario_id
    }

    pub fn entry(&self) -> &GuardEntry {
        &self.entry
    }

    /// Release now rather than at end of scope
    pub fn release(self) {}
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        // Only remove the entry this ticket created
        if entries
            .get(&self.entry.scenario_id)
            .is_some_and(|e| e.ticket_id == self.entry.ticket_id)
        {
            entries.remove(&self.entry.scenario_id);
            tracing::debug!("🔓 Commit guard released: scenario={}", self.entry.scenario_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight_per_scenario() {
        let guard = SubmissionGuard::new();

        let ticket = match guard.try_acquire("s1", AnalystAction::Escalate).unwrap() {
            GuardResult::Acquired(ticket) => ticket,
            other => panic!("expected acquisition, got {other:?}"),
        };
        assert!(guard.is_held("s1"));

        match guard.try_acquire("s1", AnalystAction::Resolve).unwrap() {
            GuardResult::AlreadyHeld(existing) => {
                assert_eq!(existing.action, AnalystAction::Escalate);
                assert_eq!(existing.ticket_id, ticket.entry().ticket_id);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        // Other scenarios are independent
        assert!(matches!(
            guard.try_acquire("s2", AnalystAction::Resolve).unwrap(),
            GuardResult::Acquired(_)
        ));
        // ...and that ticket was dropped right away
        assert!(!guard.is_held("s2"));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let guard = SubmissionGuard::new();
        {
            let _ticket = guard.try_acquire("s1", AnalystAction::Investigate).unwrap();
            assert!(guard.is_held("s1"));
        }
        assert!(guard.is_empty());

        let GuardResult::Acquired(ticket) = guard.try_acquire("s1", AnalystAction::Resolve).unwrap()
        else {
            panic!("scenario should be free again");
        };
        assert_eq!(ticket.scenario_id(), "s1");
        ticket.release();
        assert!(!guard.is_held("s1"));
    }

    #[test]
    fn test_clones_share_state() {
        let guard = SubmissionGuard::new();
        let other = guard.clone();
        let _ticket = guard.try_acquire("s1", AnalystAction::Escalate).unwrap();
        assert!(other.is_held("s1"));
        assert_eq!(other.held()[0].scenario_id, "s1");
    }
}
