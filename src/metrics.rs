//! Metric name constants.

use std::time::Duration;

use anyhow::Context;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const AUTH_FAILED: &str = "actua.auth.failed"; // Counter.

pub const FIREHOSE_LISTENERS: &str = "actua.firehose.listeners"; // Gauge.
pub const FIREHOSE_MESSAGES: &str = "actua.firehose.messages"; // Counter.

pub const GEOCODER_DEGRADED: &str = "actua.geocoder.degraded"; // Counter.

pub const REPORT_CREATE: &str = "actua.report.create"; // Counter.
pub const REPORT_UPDATE: &str = "actua.report.update"; // Counter.
pub const REPORT_DELETE: &str = "actua.report.delete"; // Counter.
pub const REPORT_EXPIRE: &str = "actua.report.expire"; // Counter.
pub const REPORT_CONFLICT: &str = "actua.report.conflict"; // Counter.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: Option<&config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(AUTH_FAILED, "The number of failed authentication attempts.");

    describe_gauge!(
        FIREHOSE_LISTENERS,
        "The number of active consumers on the firehose."
    );
    describe_counter!(
        FIREHOSE_MESSAGES,
        "All messages that have been broadcast on the firehose."
    );

    describe_counter!(
        GEOCODER_DEGRADED,
        "Reverse geocoding lookups that failed or timed out and fell back."
    );

    describe_counter!(REPORT_CREATE, "The count of created reports.");
    describe_counter!(REPORT_UPDATE, "The count of accepted report mutations.");
    describe_counter!(REPORT_DELETE, "The count of reports deleted by administrators.");
    describe_counter!(REPORT_EXPIRE, "The count of reports removed by the expiry sweep.");
    describe_counter!(
        REPORT_CONFLICT,
        "Optimistic write conflicts that forced a report mutation to retry."
    );

    if let Some(config) = config {
        match config {
            config::MetricConfig::PrometheusPush(prometheus_config) => {
                PrometheusBuilder::new()
                    .with_push_gateway(
                        prometheus_config.url.clone(),
                        Duration::from_secs(10),
                        None,
                        None,
                    )
                    .context("failed to set up push gateway")?
                    .install()
                    .context("failed to install metrics exporter")?;
            }
        }
    }

    Ok(())
}
