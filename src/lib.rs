//! Geolocated citizen incident reports.
mod auth;
pub mod client;
pub mod clock;
mod config;
mod endpoints;
pub mod error;
pub mod firehose;
pub mod geocode;
pub mod lifecycle;
mod metrics;
pub mod models;
pub mod reports;
mod serve;
pub mod storage;
mod sweep;
#[cfg(test)]
mod tests;

pub use error::Error;
pub use serve::run;
use serve::{AppState, Result};

/// The index (/) route.
async fn index() -> impl axum::response::IntoResponse {
    r"
              __
  ____ ______/ /___  ______ _
 / __ `/ ___/ __/ / / / __ `/
/ /_/ / /__/ /_/ /_/ / /_/ /
\__,_/\___/\__/\__,_/\__,_/


This is Actua, a live feed of geolocated citizen incident reports.

   Reports: GET /reports
    Events: GET /subscribe (websocket)
     Stats: GET /stats
    "
}
