//! In-memory reference backend.
use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::ReportStore;
use crate::models::{Report, ReportFilter};

#[derive(Debug, Default)]
pub struct MemoryStore {
    reports: Mutex<HashMap<String, Report>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ReportStore for MemoryStore {
    async fn insert(&self, report: &Report) -> Result<()> {
        let mut reports = self.reports.lock().await;
        if reports.contains_key(&report.id) {
            bail!("report {} already exists", report.id);
        }
        drop(reports.insert(report.id.clone(), report.clone()));
        Ok(())
    }

    async fn fetch(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Report>> {
        let reports = self.reports.lock().await;
        Ok(reports.get(id).filter(|r| !r.is_expired(now)).cloned())
    }

    async fn list(&self, filter: &ReportFilter, now: DateTime<Utc>) -> Result<Vec<Report>> {
        let reports = self.reports.lock().await;
        let mut out: Vec<Report> = reports
            .values()
            .filter(|r| !r.is_expired(now) && filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn compare_and_swap(&self, report: &Report, expected: i64) -> Result<bool> {
        let mut reports = self.reports.lock().await;
        match reports.get_mut(&report.id) {
            Some(stored) if stored.version == expected => {
                stored.confirmed_by.clone_from(&report.confirmed_by);
                stored.flagged_by.clone_from(&report.flagged_by);
                stored.status = report.status;
                stored.priority = report.priority;
                stored.updated_at = report.updated_at;
                stored.version = report.version;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut reports = self.reports.lock().await;
        if reports.get(id).is_some_and(|r| !r.is_expired(now)) {
            drop(reports.remove(id));
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut reports = self.reports.lock().await;
        let expired: Vec<String> = reports
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            drop(reports.remove(id));
        }
        Ok(expired)
    }
}
