//! Report lifecycle rules.
//!
//! Everything here is pure: functions take the current state of a report and
//! the acting party, and either mutate the report in place or return the
//! reason the action is not allowed. Persistence and fan-out live in
//! [`crate::reports`].
use std::{cmp::Ordering, time::Duration};

use chrono::{DateTime, SubsecRound as _, Utc};
use serde::Serialize;

use crate::{
    error::ReportError,
    models::{Actor, Category, Coordinates, Report, Status},
};

/// Maximum description length, in code points.
pub const MAX_DESCRIPTION_LEN: usize = 500;
/// Priority bonus per confirmation.
pub const CONFIRMATION_WEIGHT: i64 = 5;

const HOUR: u64 = 60 * 60;

/// Fixed per-category weight used as the priority baseline.
pub const fn base_priority(category: Category) -> i64 {
    match category {
        Category::Emergency => 100,
        Category::TrafficIncident => 90,
        Category::BloodDonation => 80,
        Category::Help => 70,
        Category::ElectricalFailure | Category::WaterLeak => 60,
        Category::LostPet | Category::MissingPerson => 50,
        Category::CommunityNotice => 40,
        Category::RoadHazard | Category::PublicService => 30,
        Category::SocialEvent => 20,
        Category::Other => 10,
    }
}

/// Lifetime of a report in the given category. `None` means it never expires.
pub const fn ttl(category: Category) -> Option<Duration> {
    match category {
        Category::TrafficIncident => Some(Duration::from_secs(2 * HOUR)),
        Category::ElectricalFailure | Category::WaterLeak => Some(Duration::from_secs(6 * HOUR)),
        Category::Emergency => Some(Duration::from_secs(4 * HOUR)),
        Category::SocialEvent | Category::Other => Some(Duration::from_secs(24 * HOUR)),
        _ => None,
    }
}

/// Tie-break among equal priorities. Lower sorts first.
pub const fn relevance(category: Category) -> u8 {
    match category {
        Category::Emergency => 0,
        Category::TrafficIncident => 1,
        Category::BloodDonation => 2,
        Category::Help => 3,
        _ => u8::MAX,
    }
}

/// Base priority of `category` plus a fixed weight per confirmation.
pub fn priority(category: Category, confirmations: usize) -> i64 {
    let confirmations = i64::try_from(confirmations).unwrap_or(i64::MAX);
    base_priority(category).saturating_add(CONFIRMATION_WEIGHT.saturating_mul(confirmations))
}

/// Compare two reports for the default (non-moderation) ranking.
///
/// `distance` maps a report to its distance from the viewer, when known.
pub fn rank(a: &Report, b: &Report, distance: Option<&dyn Fn(&Report) -> f64>) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| relevance(a.category).cmp(&relevance(b.category)))
        .then_with(|| match distance {
            Some(d) => d(a).total_cmp(&d(b)),
            None => Ordering::Equal,
        })
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Clone, Debug)]
/// Raw, unvalidated creation input.
pub struct NewReport {
    pub description: String,
    pub category: Option<String>,
    pub coordinates: Vec<f64>,
    pub image_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
/// Creation input after validation.
pub struct ValidReport {
    pub description: String,
    pub category: Category,
    pub location: Coordinates,
    pub image_ref: Option<String>,
}

/// Validate creation input.
pub fn validate(input: NewReport) -> Result<ValidReport, ReportError> {
    let description = input.description.trim();
    if description.is_empty() {
        return Err(ReportError::Validation("description is required".into()));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ReportError::Validation(format!(
            "description exceeds {MAX_DESCRIPTION_LEN} characters"
        )));
    }

    let category = match input.category.as_deref() {
        None => Category::default(),
        Some(label) => label
            .parse::<Category>()
            .map_err(|e| ReportError::Validation(e.to_string()))?,
    };

    let location = Coordinates::from_pair(&input.coordinates).ok_or_else(|| {
        ReportError::Validation("coordinates must be a valid [lat, lng] pair".into())
    })?;

    let image_ref = input
        .image_ref
        .map(|r| r.trim().to_owned())
        .filter(|r| !r.is_empty());

    Ok(ValidReport {
        description: description.to_owned(),
        category,
        location,
        image_ref,
    })
}

/// Build a fresh report. The caller supplies the identifier, clock reading and
/// the resolved municipality.
pub fn build(
    id: String,
    input: ValidReport,
    author: &Actor,
    municipality: String,
    now: DateTime<Utc>,
) -> Report {
    let now = stamp(now);
    let expires_at = ttl(input.category).and_then(|ttl| {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
    });

    Report {
        id,
        description: input.description,
        category: input.category,
        location: input.location,
        municipality: Some(municipality),
        image_ref: input.image_ref,
        created_by: author.id.clone(),
        confirmed_by: Default::default(),
        flagged_by: Default::default(),
        status: Status::Active,
        priority: priority(input.category, 0),
        expires_at,
        created_at: now,
        updated_at: now,
        version: 0,
    }
}

/// Timestamps are kept at millisecond precision, the resolution of the store.
pub fn stamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// Which way a confirmation toggle went.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Applied {
    Added,
    Removed,
}

/// Flip `actor`'s confirmation. Priority is recomputed in the same step.
pub fn toggle_confirm(report: &mut Report, actor: &Actor) -> Result<Applied, ReportError> {
    if report.status != Status::Active {
        return Err(ReportError::InvalidState(format!(
            "cannot confirm a {} report",
            report.status
        )));
    }

    let applied = if report.confirmed_by.remove(&actor.id) {
        Applied::Removed
    } else {
        let _ = report.confirmed_by.insert(actor.id.clone());
        Applied::Added
    };
    report.priority = priority(report.category, report.confirmed_by.len());

    Ok(applied)
}

/// Record an abuse flag. Flags can never be withdrawn.
pub fn flag_abuse(report: &mut Report, actor: &Actor) -> Result<(), ReportError> {
    if !report.flagged_by.insert(actor.id.clone()) {
        return Err(ReportError::DuplicateAction(
            "you already flagged this report".into(),
        ));
    }
    Ok(())
}

/// Close a report. Only its author or an administrator may do this.
pub fn resolve(report: &mut Report, actor: &Actor) -> Result<(), ReportError> {
    if report.created_by != actor.id && !actor.is_admin() {
        return Err(ReportError::Forbidden(
            "only the author or an administrator may resolve a report".into(),
        ));
    }
    transition(report, Status::Resolved)
}

/// Mark a report verified. Administrators only.
pub fn verify(report: &mut Report, actor: &Actor) -> Result<(), ReportError> {
    if !actor.is_admin() {
        return Err(ReportError::Forbidden(
            "only administrators may verify reports".into(),
        ));
    }
    transition(report, Status::Verified)
}

/// Deletion is reserved for administrators.
pub fn authorize_delete(actor: &Actor) -> Result<(), ReportError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(ReportError::Forbidden(
            "only administrators may delete reports".into(),
        ))
    }
}

fn transition(report: &mut Report, to: Status) -> Result<(), ReportError> {
    if report.status != Status::Active {
        return Err(ReportError::InvalidState(format!(
            "report is already {}",
            report.status
        )));
    }
    report.status = to;
    Ok(())
}
