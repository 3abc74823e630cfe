//! Filtering and ordering of the mirrored report set for display.
use std::cmp::Ordering;

use crate::{
    firehose::ReportEvent,
    lifecycle,
    models::{Actor, Category, Coordinates, Report},
};

/// Reports at or within this distance of the viewer count as nearby, in meters.
pub const NEARBY_RADIUS_M: f64 = 5_000.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Criterion {
    #[default]
    All,
    /// Reports with at least one abuse flag. Administrators only.
    Flagged,
    /// Within [`NEARBY_RADIUS_M`] of the viewer.
    Nearby,
    /// Same municipality as the viewer.
    Municipality,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewFilter {
    pub criterion: Criterion,
    /// `None` shows every category.
    pub category: Option<Category>,
}

/// Who is looking, and from where.
#[derive(Clone, Debug, Default)]
pub struct Viewer {
    pub actor: Option<Actor>,
    pub position: Option<Coordinates>,
    pub municipality: Option<String>,
}

impl Viewer {
    fn is_admin(&self) -> bool {
        self.actor.as_ref().is_some_and(Actor::is_admin)
    }

    fn distance(&self, report: &Report) -> Option<f64> {
        self.position.map(|p| p.distance_to(&report.location))
    }

    fn is_near(&self, report: &Report) -> bool {
        self.distance(report).is_some_and(|d| d <= NEARBY_RADIUS_M)
    }

    fn admits(&self, criterion: Criterion, report: &Report) -> bool {
        match criterion {
            Criterion::All => true,
            Criterion::Flagged => self.is_admin() && report.flag_count() > 0,
            Criterion::Nearby => self.is_near(report),
            Criterion::Municipality => self
                .municipality
                .as_deref()
                .is_some_and(|m| report.municipality.as_deref() == Some(m)),
        }
    }
}

/// The displayed list: filter, then sort.
///
/// A viewer with an unknown position sees nothing under [`Criterion::Nearby`],
/// and likewise for an unknown municipality under [`Criterion::Municipality`].
pub fn visible<'a>(
    reports: impl IntoIterator<Item = &'a Report>,
    filter: &ViewFilter,
    viewer: &Viewer,
) -> Vec<&'a Report> {
    let mut out: Vec<&Report> = reports
        .into_iter()
        .filter(|r| filter.category.map_or(true, |c| c == r.category))
        .filter(|r| viewer.admits(filter.criterion, r))
        .collect();

    if filter.criterion == Criterion::Flagged {
        out.sort_by(|a, b| {
            b.flag_count()
                .cmp(&a.flag_count())
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
    } else {
        out.sort_by(|a, b| compare(a, b, viewer));
    }

    out
}

/// A notification about a report that just appeared near the viewer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub report_id: String,
}

/// Raise an [`Alert`] for a newly created report within [`NEARBY_RADIUS_M`] of the viewer.
///
/// Updates and deletions never alert, nor do the viewer's own reports.
pub fn nearby_alert(event: &ReportEvent, viewer: &Viewer) -> Option<Alert> {
    let ReportEvent::Created { report } = event else {
        return None;
    };
    if viewer
        .actor
        .as_ref()
        .is_some_and(|a| a.id == report.created_by)
    {
        return None;
    }
    if !viewer.is_near(report) {
        return None;
    }

    Some(Alert {
        title: format!("New report nearby: {}", report.category),
        body: report.description.clone(),
        report_id: report.id.clone(),
    })
}

/// Ordering used by [`visible`] outside moderation, exposed for callers that
/// maintain their own sorted collections.
pub fn compare(a: &Report, b: &Report, viewer: &Viewer) -> Ordering {
    if viewer.position.is_none() {
        return lifecycle::rank(a, b, None);
    }
    let distance: &dyn Fn(&Report) -> f64 = &|r: &Report| viewer.distance(r).unwrap_or(0.0);
    lifecycle::rank(a, b, Some(distance))
}
