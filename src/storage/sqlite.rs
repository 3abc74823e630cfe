//! SQLite-based report storage implementation.

use std::{collections::BTreeSet, str::FromStr as _};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    types::Json,
    SqlitePool,
};
use tracing::debug;

use super::ReportStore;
use crate::models::{Category, Coordinates, Report, ReportFilter};

/// Embedded migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open a connection pool for `url` and apply pending migrations.
pub async fn open_pool(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");

    let mut opts = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("invalid database url {url:?}"))?
        .create_if_missing(true);
    if !in_memory {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool = SqlitePoolOptions::new();
    if in_memory {
        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        pool = pool
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        pool = pool.max_connections(max_connections.max(1));
    }

    let pool = pool
        .connect_with(opts)
        .await
        .with_context(|| format!("failed to connect to {url:?}"))?;

    MIGRATOR
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: String,
    description: String,
    category: String,
    latitude: f64,
    longitude: f64,
    municipality: Option<String>,
    image_ref: Option<String>,
    created_by: String,
    confirmed_by: Json<BTreeSet<String>>,
    flagged_by: Json<BTreeSet<String>>,
    status: String,
    priority: i64,
    expires_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("timestamp {ms} out of range"))
}

impl TryFrom<ReportRow> for Report {
    type Error = anyhow::Error;

    fn try_from(row: ReportRow) -> Result<Self> {
        Ok(Self {
            category: Category::from_str(&row.category)?,
            status: row.status.parse()?,
            expires_at: row.expires_at.map(from_millis).transpose()?,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            id: row.id,
            description: row.description,
            location: Coordinates {
                lat: row.latitude,
                lng: row.longitude,
            },
            municipality: row.municipality,
            image_ref: row.image_ref,
            created_by: row.created_by,
            confirmed_by: row.confirmed_by.0,
            flagged_by: row.flagged_by.0,
            priority: row.priority,
            version: row.version,
        })
    }
}

/// SQLite-based implementation of report storage.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReportStore for SqliteStore {
    async fn insert(&self, report: &Report) -> Result<()> {
        _ = sqlx::query(
            r#"
            INSERT INTO report (
                id, description, category, latitude, longitude, municipality, image_ref,
                created_by, confirmed_by, flagged_by, status, priority,
                expires_at, created_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.description)
        .bind(report.category.label())
        .bind(report.location.lat)
        .bind(report.location.lng)
        .bind(&report.municipality)
        .bind(&report.image_ref)
        .bind(&report.created_by)
        .bind(Json(&report.confirmed_by))
        .bind(Json(&report.flagged_by))
        .bind(report.status.as_str())
        .bind(report.priority)
        .bind(report.expires_at.map(|t| t.timestamp_millis()))
        .bind(report.created_at.timestamp_millis())
        .bind(report.updated_at.timestamp_millis())
        .bind(report.version)
        .execute(&self.pool)
        .await
        .context("failed to insert report")?;

        Ok(())
    }

    async fn fetch(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Report>> {
        let row: Option<ReportRow> = sqlx::query_as(
            r#"
            SELECT * FROM report
                WHERE id = ?
                AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(id)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .context("failed to query report")?;

        row.map(Report::try_from).transpose()
    }

    async fn list(&self, filter: &ReportFilter, now: DateTime<Utc>) -> Result<Vec<Report>> {
        let status = filter.status.map(|s| s.as_str());
        let category = filter.category.map(|c| c.label());

        let rows: Vec<ReportRow> = sqlx::query_as(
            r#"
            SELECT * FROM report
                WHERE (expires_at IS NULL OR expires_at > ?)
                AND (? IS NULL OR status = ?)
                AND (? IS NULL OR category = ?)
                AND (? IS NULL OR municipality = ?)
                ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(status)
        .bind(status)
        .bind(category)
        .bind(category)
        .bind(&filter.municipality)
        .bind(&filter.municipality)
        .fetch_all(&self.pool)
        .await
        .context("failed to list reports")?;

        rows.into_iter().map(Report::try_from).collect()
    }

    async fn compare_and_swap(&self, report: &Report, expected: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE report
                SET confirmed_by = ?, flagged_by = ?, status = ?, priority = ?,
                    updated_at = ?, version = ?
                WHERE id = ? AND version = ?
            "#,
        )
        .bind(Json(&report.confirmed_by))
        .bind(Json(&report.flagged_by))
        .bind(report.status.as_str())
        .bind(report.priority)
        .bind(report.updated_at.timestamp_millis())
        .bind(report.version)
        .bind(&report.id)
        .bind(expected)
        .execute(&self.pool)
        .await
        .context("failed to update report")?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM report
                WHERE id = ?
                AND (expires_at IS NULL OR expires_at > ?)
            "#,
        )
        .bind(id)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("failed to delete report")?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM report
                WHERE expires_at IS NOT NULL
                AND expires_at <= ?
                RETURNING id
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .context("failed to delete expired reports")?;

        debug!("removed {} expired reports", ids.len());
        Ok(ids)
    }
}
