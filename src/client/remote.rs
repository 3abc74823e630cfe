//! Talking to a running server.
use anyhow::{Context as _, Result};
use url::Url;

use crate::{firehose::ReportEvent, models::Report};

/// Fetch the current report list, the snapshot a [`super::Mirror`] is built from.
pub async fn fetch_snapshot(
    client: &reqwest::Client,
    base: &Url,
    token: Option<&str>,
) -> Result<Vec<Report>> {
    let url = base.join("reports").context("invalid server url")?;

    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    request
        .send()
        .await
        .context("failed to reach server")?
        .error_for_status()
        .context("server rejected snapshot request")?
        .json()
        .await
        .context("failed to decode report list")
}

/// Decode one websocket text frame from `/subscribe`.
pub fn decode_event(frame: &str) -> Result<ReportEvent> {
    serde_json::from_str(frame).context("malformed event frame")
}
