//! Background expiry sweep.
use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::reports::ReportService;

/// Periodically remove expired reports and announce their deletion.
///
/// Runs forever. A failed pass is logged and retried on the next tick.
pub async fn task(service: Arc<ReportService>, every: Duration) {
    let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let _ = interval.tick().await;
        match service.sweep_expired().await {
            Ok(0) => debug!("expiry sweep: nothing to do"),
            Ok(_) => {}
            Err(e) => error!("expiry sweep failed: {e:#}"),
        }
    }
}

/// Spawn [`task`] onto the runtime.
pub fn spawn(service: Arc<ReportService>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(task(service, every))
}
