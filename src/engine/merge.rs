//! Identity-keyed reconciliation of a fresh snapshot against the previous one
//!
//! The incoming collection is authoritative for every server field. The only
//! things that survive from the previous snapshot are client-only annotations,
//! copied through [`Reconcile::carry_forward`]. Items that disappeared are
//! dropped together with their annotations.
//!
//! Lookup is by identity through a hash map, so a merge costs
//! O(|previous| + |incoming|), and the result depends only on the two
//! snapshots, never on the order in which responses arrived.

use crate::types::{Event, Group, Report};
use std::collections::{HashMap, HashSet};

/// An item that can be reconciled across polls
pub trait Reconcile {
    /// Opaque identity key assigned by the server
    fn identity(&self) -> &str;

    /// Copy client-only state from the previous version of this item
    fn carry_forward(&mut self, _previous: &Self) {}
}

/// Outcome of a merge
#[derive(Debug, Clone)]
pub struct Merged<T> {
    /// Incoming items in incoming order, annotations carried forward
    pub items: Vec<T>,
    /// Identities not present in the previous snapshot
    pub newly_inserted: HashSet<String>,
    /// Identities present before but absent now
    pub dropped: Vec<String>,
}

/// Reconcile `incoming` against `previous`
pub fn merge<T: Reconcile>(previous: &[T], incoming: Vec<T>) -> Merged<T> {
    let index: HashMap<&str, &T> = previous.iter().map(|p| (p.identity(), p)).collect();

    let mut seen: HashSet<String> = HashSet::with_capacity(incoming.len());
    let mut newly_inserted = HashSet::new();

    let items: Vec<T> = incoming
        .into_iter()
        .map(|mut item| {
            match index.get(item.identity()) {
                Some(prev) => item.carry_forward(prev),
                None => {
                    newly_inserted.insert(item.identity().to_string());
                }
            }
            seen.insert(item.identity().to_string());
            item
        })
        .collect();

    let dropped = index
        .keys()
        .filter(|id| !seen.contains(**id))
        .map(|id| id.to_string())
        .collect();

    Merged {
        items,
        newly_inserted,
        dropped,
    }
}

impl Reconcile for Group {
    fn identity(&self) -> &str {
        &self.scenario_id
    }

    fn carry_forward(&mut self, previous: &Self) {
        self.selected_action = previous.selected_action;
    }
}

impl Reconcile for Event {
    fn identity(&self) -> &str {
        &self.id
    }
}

impl Reconcile for Report {
    fn identity(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalystAction, GroupStatus};
    use chrono::Utc;

    fn group(id: &str, status: GroupStatus) -> Group {
        Group {
            scenario_id: id.to_string(),
            threat_pattern: "Lateral Movement".to_string(),
            label: format!("label-{id}"),
            severity: "critical".to_string(),
            status,
            category: None,
            log_count: 1,
            logs: Vec::new(),
            selected_action: AnalystAction::default(),
        }
    }

    fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            timestamp: Utc::now(),
            event_type: "dns_query".to_string(),
            source_ip: "10.1.1.1".to_string(),
            message: format!("event {id}"),
            severity: "low".to_string(),
            label: None,
            category: None,
            scenario_id: None,
            threat_pattern: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_selection_survives_refresh() {
        let mut previous = vec![group("s1", GroupStatus::Active), group("s2", GroupStatus::Active)];
        previous[0].selected_action = AnalystAction::Escalate;
        previous[1].selected_action = AnalystAction::Resolve;

        // Server-side fields change, selection must not
        let mut incoming = vec![group("s2", GroupStatus::Active), group("s1", GroupStatus::Active)];
        incoming[1].log_count = 7;

        let merged = merge(&previous, incoming);
        let s1 = merged.items.iter().find(|g| g.scenario_id == "s1").unwrap();
        let s2 = merged.items.iter().find(|g| g.scenario_id == "s2").unwrap();

        assert_eq!(s1.selected_action, AnalystAction::Escalate);
        assert_eq!(s1.log_count, 7);
        assert_eq!(s2.selected_action, AnalystAction::Resolve);
        assert!(merged.newly_inserted.is_empty());
        assert!(merged.dropped.is_empty());
    }

    #[test]
    fn test_server_status_is_authoritative() {
        let mut previous = vec![group("s1", GroupStatus::Active)];
        previous[0].selected_action = AnalystAction::Escalate;

        let merged = merge(&previous, vec![group("s1", GroupStatus::Escalated)]);
        assert_eq!(merged.items[0].status, GroupStatus::Escalated);
        assert_eq!(merged.items[0].selected_action, AnalystAction::Escalate);
    }

    #[test]
    fn test_stale_only_items_are_dropped() {
        let mut previous = vec![group("s1", GroupStatus::Active), group("gone", GroupStatus::Active)];
        previous[1].selected_action = AnalystAction::Resolve;

        let merged = merge(&previous, vec![group("s1", GroupStatus::Active)]);
        assert_eq!(merged.items.len(), 1);
        assert_eq!(merged.dropped, vec!["gone".to_string()]);

        // The dropped group's selection does not come back with it
        let again = merge(&merged.items, vec![group("s1", GroupStatus::Active), group("gone", GroupStatus::Active)]);
        let gone = again.items.iter().find(|g| g.scenario_id == "gone").unwrap();
        assert_eq!(gone.selected_action, AnalystAction::Investigate);
        assert!(again.newly_inserted.contains("gone"));
    }

    #[test]
    fn test_new_items_detected_by_identity_not_position() {
        let previous = vec![event("a"), event("b"), event("c")];

        let reordered = vec![event("c"), event("a"), event("b")];
        let merged = merge(&previous, reordered);
        assert!(merged.newly_inserted.is_empty());

        let grown = vec![event("d"), event("c"), event("b"), event("a")];
        let merged = merge(&previous, grown);
        assert_eq!(merged.newly_inserted, HashSet::from(["d".to_string()]));
        assert_eq!(merged.items[0].id, "d");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut previous = vec![group("s1", GroupStatus::Active)];
        previous[0].selected_action = AnalystAction::Resolve;
        let incoming = vec![group("s1", GroupStatus::Active), group("s3", GroupStatus::Active)];

        let once = merge(&previous, incoming.clone());
        let twice = merge(&once.items, incoming);

        assert_eq!(once.items, twice.items);
        assert!(twice.newly_inserted.is_empty());
    }

    #[test]
    fn test_first_snapshot_is_all_new() {
        let merged = merge::<Event>(&[], vec![event("a"), event("b")]);
        assert_eq!(merged.newly_inserted.len(), 2);
    }
}
