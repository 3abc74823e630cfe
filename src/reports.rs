//! Report lifecycle operations.
//!
//! [`ReportService`] ties the pure rules in [`crate::lifecycle`] to a
//! [`ReportStore`] and an [`EventSink`]. An event is only published after the
//! store accepted the corresponding write.
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng as _;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::ReportError,
    firehose::{EventSink, ReportEvent},
    geocode::{self, Geocoder},
    lifecycle::{self, Applied, NewReport},
    metrics::{REPORT_CONFLICT, REPORT_CREATE, REPORT_DELETE, REPORT_EXPIRE, REPORT_UPDATE},
    models::{Actor, Category, Report, ReportFilter, Status},
    storage::ReportStore,
};

/// Attempts at an optimistic write before giving up.
const MAX_ATTEMPTS: u32 = 64;
/// Number of entries in [`Stats::recent_activity`].
const RECENT_ACTIVITY: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOutcome {
    pub applied: Applied,
    pub confirmation_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FlagOutcome {
    pub accepted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub deleted: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: Category,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub category: Category,
    pub status: Status,
    pub municipality: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Dashboard summary over live reports.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: usize,
    pub active: usize,
    pub resolved: usize,
    pub verified: usize,
    pub by_category: Vec<CategoryCount>,
    pub recent_activity: Vec<Activity>,
}

/// Report operations over a store, publishing every accepted change.
pub struct ReportService {
    store: Arc<dyn ReportStore>,
    events: Arc<dyn EventSink>,
    geocoder: Arc<dyn Geocoder>,
    clock: Arc<dyn Clock>,
    geocode_timeout: Duration,
}

impl ReportService {
    pub fn new(
        store: Arc<dyn ReportStore>,
        events: Arc<dyn EventSink>,
        geocoder: Arc<dyn Geocoder>,
        clock: Arc<dyn Clock>,
        geocode_timeout: Duration,
    ) -> Self {
        Self {
            store,
            events,
            geocoder,
            clock,
            geocode_timeout,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Live reports matching `filter`, newest first.
    pub async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>, ReportError> {
        Ok(self.store.list(filter, self.clock.now()).await?)
    }

    pub async fn get_report(&self, id: &str) -> Result<Report, ReportError> {
        self.store
            .fetch(id, self.clock.now())
            .await?
            .ok_or_else(|| ReportError::NotFound(id.to_owned()))
    }

    #[tracing::instrument(skip_all, fields(actor = %actor.id))]
    pub async fn create_report(
        &self,
        input: NewReport,
        actor: &Actor,
    ) -> Result<Report, ReportError> {
        let input = lifecycle::validate(input)?;
        let municipality =
            geocode::resolve_municipality(&*self.geocoder, input.location, self.geocode_timeout)
                .await;

        let report = lifecycle::build(
            Uuid::new_v4().to_string(),
            input,
            actor,
            municipality,
            self.clock.now(),
        );
        self.store.insert(&report).await?;

        counter!(REPORT_CREATE).increment(1);
        info!(
            "new report {} ({}) in {}",
            report.id,
            report.category,
            report.municipality.as_deref().unwrap_or_default()
        );
        self.events
            .publish(ReportEvent::Created {
                report: report.clone(),
            })
            .await;

        Ok(report)
    }

    pub async fn toggle_confirm(
        &self,
        id: &str,
        actor: &Actor,
    ) -> Result<ConfirmOutcome, ReportError> {
        let (report, applied) = self
            .mutate(id, |report| lifecycle::toggle_confirm(report, actor))
            .await?;
        Ok(ConfirmOutcome {
            applied,
            confirmation_count: report.confirmation_count(),
        })
    }

    pub async fn flag_abuse(&self, id: &str, actor: &Actor) -> Result<FlagOutcome, ReportError> {
        let (report, ()) = self
            .mutate(id, |report| lifecycle::flag_abuse(report, actor))
            .await?;
        debug!("report {} now has {} flags", report.id, report.flag_count());
        Ok(FlagOutcome { accepted: true })
    }

    pub async fn resolve_report(&self, id: &str, actor: &Actor) -> Result<Report, ReportError> {
        let (report, ()) = self
            .mutate(id, |report| lifecycle::resolve(report, actor))
            .await?;
        Ok(report)
    }

    pub async fn verify_report(&self, id: &str, actor: &Actor) -> Result<Report, ReportError> {
        let (report, ()) = self
            .mutate(id, |report| lifecycle::verify(report, actor))
            .await?;
        Ok(report)
    }

    pub async fn delete_report(
        &self,
        id: &str,
        actor: &Actor,
    ) -> Result<DeleteOutcome, ReportError> {
        lifecycle::authorize_delete(actor)?;
        if !self.store.delete(id, self.clock.now()).await? {
            return Err(ReportError::NotFound(id.to_owned()));
        }

        counter!(REPORT_DELETE).increment(1);
        info!("report {id} deleted by {}", actor.id);
        self.events
            .publish(ReportEvent::Deleted { id: id.to_owned() })
            .await;

        Ok(DeleteOutcome {
            deleted: id.to_owned(),
        })
    }

    /// Remove every report past its expiry and announce each removal.
    pub async fn sweep_expired(&self) -> Result<usize, ReportError> {
        let ids = self.store.delete_expired(self.clock.now()).await?;
        let n = ids.len();
        if n > 0 {
            counter!(REPORT_EXPIRE).increment(n as u64);
            info!("expired {n} reports");
        }
        for id in ids {
            self.events.publish(ReportEvent::Deleted { id }).await;
        }
        Ok(n)
    }

    pub async fn stats(&self) -> Result<Stats, ReportError> {
        let reports = self
            .store
            .list(&ReportFilter::default(), self.clock.now())
            .await?;

        let count = |status: Status| reports.iter().filter(|r| r.status == status).count();
        let mut by_category = BTreeMap::new();
        for report in &reports {
            *by_category.entry(report.category).or_insert(0_usize) += 1;
        }

        Ok(Stats {
            total: reports.len(),
            active: count(Status::Active),
            resolved: count(Status::Resolved),
            verified: count(Status::Verified),
            by_category: by_category
                .into_iter()
                .map(|(category, count)| CategoryCount { category, count })
                .collect(),
            // `list` is newest first.
            recent_activity: reports
                .iter()
                .take(RECENT_ACTIVITY)
                .map(|r| Activity {
                    id: r.id.clone(),
                    category: r.category,
                    status: r.status,
                    municipality: r.municipality.clone(),
                    created_at: r.created_at,
                })
                .collect(),
        })
    }

    /// Read-modify-write `id` under optimistic concurrency.
    ///
    /// `rule` runs against a fresh copy on every attempt; the new state is
    /// written only if nobody else wrote in between. Rule failures abort
    /// without touching the store.
    async fn mutate<T>(
        &self,
        id: &str,
        rule: impl Fn(&mut Report) -> Result<T, ReportError>,
    ) -> Result<(Report, T), ReportError> {
        for attempt in 0..MAX_ATTEMPTS {
            let now = self.clock.now();
            let current = self
                .store
                .fetch(id, now)
                .await?
                .ok_or_else(|| ReportError::NotFound(id.to_owned()))?;

            let mut next = current.clone();
            let out = rule(&mut next)?;
            next.updated_at = lifecycle::stamp(now).max(current.updated_at);
            next.version = current.version + 1;

            if self.store.compare_and_swap(&next, current.version).await? {
                counter!(REPORT_UPDATE).increment(1);
                self.events
                    .publish(ReportEvent::Updated {
                        report: next.clone(),
                    })
                    .await;
                return Ok((next, out));
            }

            counter!(REPORT_CONFLICT).increment(1);
            let backoff = rand::thread_rng().gen_range(0..=attempt.min(10));
            debug!("write conflict on report {id}, retrying in {backoff}ms");
            tokio::time::sleep(Duration::from_millis(u64::from(backoff))).await;
        }

        warn!("giving up on report {id} after {MAX_ATTEMPTS} conflicting writes");
        Err(ReportError::Store(anyhow::anyhow!(
            "report {id} is under heavy contention, try again"
        )))
    }
}
