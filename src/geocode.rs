//! Reverse geocoding: coordinates to municipality name.
use std::time::Duration;

use anyhow::{Context as _, Result};
use metrics::counter;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::{
    config::GeocoderConfig,
    metrics::GEOCODER_DEGRADED,
    models::{Coordinates, UNIDENTIFIED},
    serve::Client,
};

#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve the municipality containing `at`.
    async fn municipality(&self, at: Coordinates) -> Result<String>;
}

/// Resolve a municipality, never failing and never waiting longer than `timeout`.
///
/// Failures degrade to [`UNIDENTIFIED`].
pub async fn resolve_municipality(
    geocoder: &dyn Geocoder,
    at: Coordinates,
    timeout: Duration,
) -> String {
    let err = match tokio::time::timeout(timeout, geocoder.municipality(at)).await {
        Ok(Ok(name)) if !name.trim().is_empty() => return name.trim().to_owned(),
        Ok(Ok(_)) => anyhow::anyhow!("empty municipality"),
        Ok(Err(e)) => e,
        Err(_) => anyhow::anyhow!("timed out after {timeout:?}"),
    };

    counter!(GEOCODER_DEGRADED).increment(1);
    warn!(
        "reverse geocoding ({}, {}) failed: {err:#}",
        at.lat, at.lng
    );
    UNIDENTIFIED.to_owned()
}

#[derive(Deserialize, Debug, Default)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    state_district: Option<String>,
    county: Option<String>,
    state: Option<String>,
}

#[derive(Deserialize, Debug)]
struct NominatimResponse {
    #[serde(default)]
    address: NominatimAddress,
}

/// Geocoder backed by a Nominatim-compatible `/reverse` endpoint.
pub struct NominatimGeocoder {
    client: Client,
    url: Url,
    country_codes: Option<String>,
    language: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(client: Client, config: &GeocoderConfig) -> Result<Self> {
        Ok(Self {
            client,
            url: config
                .url
                .parse()
                .context("invalid geocoder url")?,
            country_codes: config.country_codes.clone(),
            language: config.language.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Geocoder for NominatimGeocoder {
    async fn municipality(&self, at: Coordinates) -> Result<String> {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            let _ = query
                .append_pair("format", "json")
                .append_pair("lat", &at.lat.to_string())
                .append_pair("lon", &at.lng.to_string());
            if let Some(codes) = &self.country_codes {
                let _ = query.append_pair("countrycodes", codes);
            }
            if let Some(language) = &self.language {
                let _ = query.append_pair("accept-language", language);
            }
        }

        let response: NominatimResponse = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to reach geocoder")?
            .error_for_status()
            .context("geocoder returned an error")?
            .json()
            .await
            .context("failed to decode geocoder response")?;

        let address = response.address;
        address
            .city
            .or(address.town)
            .or(address.state_district)
            .or(address.county)
            .or(address.state)
            .context("no municipality in geocoder response")
    }
}

/// Geocoder for offline and test deployments. Every point is unidentified.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineGeocoder;

#[async_trait::async_trait]
impl Geocoder for OfflineGeocoder {
    async fn municipality(&self, _at: Coordinates) -> Result<String> {
        Ok(UNIDENTIFIED.to_owned())
    }
}
