//! Local mirror of the server's report set.
use std::collections::{HashMap, HashSet};

use crate::{firehose::ReportEvent, models::Report};

/// What folding a single event did to the mirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    Inserted(String),
    Replaced(String),
    Removed(String),
    /// Held until the snapshot arrives.
    Buffered,
    /// Duplicate, stale or unknown; the mirror is unchanged.
    Ignored,
}

/// A viewer's copy of every live report, folded from a snapshot plus the event stream.
///
/// Events that arrive before the snapshot are buffered and replayed on top of
/// it, so the order in which the fetch and the subscription complete does not
/// matter.
///
/// Deleted ids are remembered until the next reset, so an `updated` event
/// that raced a deletion cannot bring the report back. Only `created` does.
#[derive(Debug)]
pub struct Mirror {
    reports: HashMap<String, Report>,
    deleted: HashSet<String>,
    /// `Some` while waiting for a snapshot.
    pending: Option<Vec<ReportEvent>>,
    selected: Option<String>,
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}

impl Mirror {
    /// An empty mirror awaiting its first snapshot.
    pub fn new() -> Self {
        Self {
            reports: HashMap::new(),
            deleted: HashSet::new(),
            pending: Some(Vec::new()),
            selected: None,
        }
    }

    /// Whether the snapshot has been loaded and events now apply directly.
    pub fn is_live(&self) -> bool {
        self.pending.is_none()
    }

    /// Drop everything after a lost connection. The next snapshot rebuilds the mirror.
    pub fn reset(&mut self) {
        self.reports.clear();
        self.deleted.clear();
        self.pending = Some(Vec::new());
    }

    /// Install a freshly fetched report list and replay buffered events over it.
    pub fn load_snapshot(&mut self, reports: Vec<Report>) -> Vec<Change> {
        self.reports = reports.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.deleted.clear();
        let pending = self.pending.take().unwrap_or_default();
        let changes = pending.into_iter().map(|e| self.fold(e)).collect();

        if self
            .selected
            .as_ref()
            .is_some_and(|id| !self.reports.contains_key(id))
        {
            self.selected = None;
        }
        changes
    }

    /// Fold one event.
    pub fn apply(&mut self, event: ReportEvent) -> Change {
        match self.pending {
            Some(ref mut pending) => {
                pending.push(event);
                Change::Buffered
            }
            None => self.fold(event),
        }
    }

    fn fold(&mut self, event: ReportEvent) -> Change {
        match event {
            ReportEvent::Created { report } => {
                if self.reports.contains_key(&report.id) {
                    return Change::Ignored;
                }
                let id = report.id.clone();
                let _ = self.deleted.remove(&id);
                let _ = self.reports.insert(id.clone(), report);
                Change::Inserted(id)
            }
            ReportEvent::Updated { report } => {
                let id = report.id.clone();
                match self.reports.get_mut(&id) {
                    Some(held) if held.version > report.version => Change::Ignored,
                    Some(held) => {
                        *held = report;
                        Change::Replaced(id)
                    }
                    None if self.deleted.contains(&id) => Change::Ignored,
                    None => {
                        let _ = self.reports.insert(id.clone(), report);
                        Change::Inserted(id)
                    }
                }
            }
            ReportEvent::Deleted { id } => {
                if self.selected.as_deref() == Some(id.as_str()) {
                    self.selected = None;
                }
                let removed = self.reports.remove(&id);
                let _ = self.deleted.insert(id.clone());
                match removed {
                    Some(_) => Change::Removed(id),
                    None => Change::Ignored,
                }
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Report> {
        self.reports.get(id)
    }

    pub fn reports(&self) -> impl Iterator<Item = &Report> {
        self.reports.values()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Open the detail view for `id`. Unknown ids clear the selection.
    pub fn select(&mut self, id: &str) {
        self.selected = self.reports.contains_key(id).then(|| id.to_owned());
    }

    pub fn selected(&self) -> Option<&Report> {
        self.selected.as_deref().and_then(|id| self.reports.get(id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{models::Category, storage::tests::sample};

    fn report(id: &str) -> Report {
        sample(id, Category::Help, Utc::now())
    }

    #[test]
    fn delete_then_recreate_converges() {
        let mut mirror = Mirror::new();
        let _ = mirror.load_snapshot(vec![report("a")]);

        assert_eq!(
            mirror.apply(ReportEvent::Deleted { id: "a".into() }),
            Change::Removed("a".into())
        );
        assert_eq!(
            mirror.apply(ReportEvent::Created {
                report: report("a")
            }),
            Change::Inserted("a".into())
        );
        assert_eq!(mirror.len(), 1);
        assert!(mirror.get("a").is_some());
    }

    #[test]
    fn late_update_does_not_revive_a_deleted_report() {
        let mut mirror = Mirror::new();
        let _ = mirror.load_snapshot(vec![report("a")]);

        assert_eq!(
            mirror.apply(ReportEvent::Deleted { id: "a".into() }),
            Change::Removed("a".into())
        );
        let mut late = report("a");
        late.version = 1;
        assert_eq!(
            mirror.apply(ReportEvent::Updated { report: late }),
            Change::Ignored
        );
        assert!(mirror.is_empty());

        // A buffered delete shadows an update replayed after it, too.
        mirror.reset();
        let _ = mirror.apply(ReportEvent::Deleted { id: "b".into() });
        let _ = mirror.apply(ReportEvent::Updated {
            report: report("b"),
        });
        let changes = mirror.load_snapshot(vec![report("b")]);
        assert_eq!(changes, [Change::Removed("b".into()), Change::Ignored]);
        assert!(mirror.get("b").is_none());
    }

    #[test]
    fn events_before_snapshot_are_replayed() {
        let mut mirror = Mirror::new();
        assert!(!mirror.is_live());

        let mut updated = report("a");
        updated.version = 3;
        updated.priority = 85;
        assert_eq!(
            mirror.apply(ReportEvent::Updated {
                report: updated.clone()
            }),
            Change::Buffered
        );
        assert_eq!(
            mirror.apply(ReportEvent::Deleted { id: "b".into() }),
            Change::Buffered
        );
        assert!(mirror.is_empty());

        let changes = mirror.load_snapshot(vec![report("a"), report("b")]);
        assert_eq!(
            changes,
            [Change::Replaced("a".into()), Change::Removed("b".into())]
        );
        assert!(mirror.is_live());
        assert_eq!(mirror.get("a").unwrap().priority, 85);
        assert!(mirror.get("b").is_none());
    }

    #[test]
    fn created_is_idempotent_and_updates_are_versioned() {
        let mut mirror = Mirror::new();
        let mut held = report("a");
        held.version = 5;
        let _ = mirror.load_snapshot(vec![held]);

        let mut fresh = report("a");
        fresh.description = "different".into();
        assert_eq!(
            mirror.apply(ReportEvent::Created {
                report: fresh.clone()
            }),
            Change::Ignored
        );

        fresh.version = 4;
        assert_eq!(
            mirror.apply(ReportEvent::Updated {
                report: fresh.clone()
            }),
            Change::Ignored
        );
        assert_ne!(mirror.get("a").unwrap().description, "different");

        fresh.version = 6;
        assert_eq!(
            mirror.apply(ReportEvent::Updated { report: fresh }),
            Change::Replaced("a".into())
        );
        assert_eq!(mirror.get("a").unwrap().description, "different");

        assert_eq!(
            mirror.apply(ReportEvent::Updated {
                report: report("new")
            }),
            Change::Inserted("new".into())
        );
    }

    #[test]
    fn deleting_the_selected_report_clears_selection() {
        let mut mirror = Mirror::new();
        let _ = mirror.load_snapshot(vec![report("a"), report("b")]);

        mirror.select("a");
        assert_eq!(mirror.selected().unwrap().id, "a");
        let _ = mirror.apply(ReportEvent::Deleted { id: "b".into() });
        assert!(mirror.selected().is_some());
        let _ = mirror.apply(ReportEvent::Deleted { id: "a".into() });
        assert!(mirror.selected().is_none());

        mirror.select("missing");
        assert!(mirror.selected().is_none());
    }

    #[test]
    fn reset_awaits_a_new_snapshot() {
        let mut mirror = Mirror::new();
        let _ = mirror.load_snapshot(vec![report("a")]);
        mirror.select("a");

        mirror.reset();
        assert!(!mirror.is_live());
        assert!(mirror.is_empty());
        assert_eq!(
            mirror.apply(ReportEvent::Deleted { id: "a".into() }),
            Change::Buffered
        );

        let _ = mirror.load_snapshot(vec![report("a")]);
        assert!(mirror.is_empty());
        assert!(mirror.selected().is_none());
    }
}
