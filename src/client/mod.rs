//! Viewer-side reconciliation.
//!
//! A [`Feed`] keeps one viewer's picture of the report set current: it folds
//! the initial snapshot and the live event stream into a [`Mirror`], derives
//! the displayed list with [`view::visible`], and raises nearby alerts.
mod mirror;
pub mod remote;
pub mod view;

pub use mirror::{Change, Mirror};
pub use view::{Alert, Criterion, ViewFilter, Viewer};

use crate::{firehose::ReportEvent, models::Report};

/// One viewer's live report feed.
#[derive(Debug, Default)]
pub struct Feed {
    mirror: Mirror,
    pub filter: ViewFilter,
    pub viewer: Viewer,
}

impl Feed {
    /// A feed for `viewer`, awaiting its first snapshot.
    pub fn new(viewer: Viewer) -> Self {
        Self {
            mirror: Mirror::new(),
            filter: ViewFilter::default(),
            viewer,
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut Mirror {
        &mut self.mirror
    }

    /// Install the fetched report list.
    pub fn load_snapshot(&mut self, reports: Vec<Report>) {
        let _ = self.mirror.load_snapshot(reports);
    }

    /// Fold an event, returning an alert if it announced a report near the viewer.
    ///
    /// Buffered events (before the snapshot) are folded silently later, so
    /// they never alert.
    pub fn on_event(&mut self, event: ReportEvent) -> Option<Alert> {
        let alert = view::nearby_alert(&event, &self.viewer);
        match self.mirror.apply(event) {
            Change::Inserted(_) => alert,
            _ => None,
        }
    }

    /// The connection dropped. Everything is discarded until the next snapshot.
    pub fn disconnected(&mut self) {
        self.mirror.reset();
    }

    /// The list to display under the current filter.
    pub fn visible(&self) -> Vec<&Report> {
        view::visible(self.mirror.reports(), &self.filter, &self.viewer)
    }
}
