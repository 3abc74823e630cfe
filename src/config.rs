use std::net::SocketAddr;

use serde::Deserialize;
use url::Url;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub listen_address: Option<SocketAddr>,
    /// sqlx SQLite connection URL.
    #[serde(default = "default_db")]
    pub db: String,
    #[serde(default = "default_db_connections")]
    pub db_connections: u32,
    /// Test mode: no outbound geocoding requests.
    #[serde(default)]
    pub test: bool,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    pub metrics: Option<MetricConfig>,
}

fn default_db() -> String {
    "sqlite://data/actua.db".to_owned()
}

const fn default_db_connections() -> u32 {
    5
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GeocoderConfig {
    pub enabled: bool,
    /// Nominatim-compatible reverse geocoding endpoint.
    pub url: String,
    /// Upper bound on a single lookup, in milliseconds.
    pub timeout_ms: u64,
    /// Restrict results to these ISO country codes (comma separated).
    pub country_codes: Option<String>,
    pub language: Option<String>,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://nominatim.openstreetmap.org/reverse".to_owned(),
            timeout_ms: 5_000,
            country_codes: None,
            language: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between expiry sweeps.
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CorsConfig {
    /// Origins allowed to call the API. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PrometheusConfig {
    /// The URL of the Prometheus push gateway.
    pub url: Url,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum MetricConfig {
    PrometheusPush(PrometheusConfig),
}
