use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use axum::{extract::FromRef, http::HeaderValue, routing::get, Router};
use clap::Parser;
use clap_verbosity_flag::{log::LevelFilter, InfoLevel, Verbosity};
use figment::{providers::Format as _, Figment};
use http_cache_reqwest::{CacheMode, HttpCacheOptions, MokaManager};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub use super::error::Error;
use super::{
    clock::{Clock, SystemClock},
    config::{AppConfig, CorsConfig},
    firehose::{self, FirehoseProducer},
    geocode::{Geocoder, NominatimGeocoder, OfflineGeocoder},
    reports::ReportService,
    storage::{open_pool, SqliteStore},
    sweep,
};

/// The application user agent. Concatenates the package name and version. e.g. `actua/0.0.0`.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// The application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
/// The reqwest client type with middleware.
pub type Client = reqwest_middleware::ClientWithMiddleware;

#[derive(Parser, Debug, Clone)]
/// Command line arguments.
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "default.toml")]
    pub config: PathBuf,
    /// The verbosity level.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Clone, FromRef)]
/// The application state, shared across all routes.
pub struct AppState {
    /// The application configuration.
    pub(crate) config: AppConfig,
    /// The database connection pool. Sessions are read from here.
    pub db: SqlitePool,
    /// Report lifecycle operations.
    pub service: Arc<ReportService>,
    /// The firehose producer.
    pub firehose: FirehoseProducer,
}

/// Create the outbound HTTP client, with response caching.
pub fn http_client() -> anyhow::Result<Client> {
    let simple_client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("failed to build requester client")?;

    Ok(reqwest_middleware::ClientBuilder::new(simple_client)
        .with(http_cache_reqwest::Cache(http_cache_reqwest::HttpCache {
            mode: CacheMode::Default,
            manager: MokaManager::default(),
            options: HttpCacheOptions::default(),
        }))
        .build())
}

/// Pick the reverse geocoder for this deployment.
fn geocoder(config: &AppConfig, client: Client) -> anyhow::Result<Arc<dyn Geocoder>> {
    if config.test || !config.geocoder.enabled {
        info!("reverse geocoding disabled, municipalities will be unidentified");
        return Ok(Arc::new(OfflineGeocoder));
    }
    Ok(Arc::new(NominatimGeocoder::new(client, &config.geocoder)?))
}

/// Wire up storage, the firehose and the report service.
pub async fn build_state(
    config: AppConfig,
    client: Client,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<AppState> {
    let db = open_pool(&config.db, config.db_connections)
        .await
        .context("failed to establish database connection pool")?;

    let (_fh, firehose) = firehose::spawn();
    let service = Arc::new(ReportService::new(
        Arc::new(SqliteStore::new(db.clone())),
        Arc::new(firehose.clone()),
        geocoder(&config, client)?,
        clock,
        Duration::from_millis(config.geocoder.timeout_ms),
    ));

    Ok(AppState {
        config,
        db,
        service,
        firehose,
    })
}

fn cors(config: &CorsConfig) -> anyhow::Result<CorsLayer> {
    if config.allowed_origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }

    let origins = config
        .allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin {o:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Build the application router.
pub fn app(state: AppState) -> anyhow::Result<Router> {
    let cors = cors(&state.config.cors)?;

    Ok(Router::new()
        .route("/", get(super::index))
        .merge(super::endpoints::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// The main application entry point.
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up trace logging to console and account for the user-provided verbosity flag.
    if args.verbosity.log_level_filter() != LevelFilter::Off {
        let lvl = match args.verbosity.log_level_filter() {
            LevelFilter::Error => tracing::Level::ERROR,
            LevelFilter::Warn => tracing::Level::WARN,
            LevelFilter::Info | LevelFilter::Off => tracing::Level::INFO,
            LevelFilter::Debug => tracing::Level::DEBUG,
            LevelFilter::Trace => tracing::Level::TRACE,
        };
        tracing_subscriber::fmt().with_max_level(lvl).init();
    }

    if !args.config.exists() {
        // Throw up a warning if the config file does not exist.
        //
        // This is not fatal because users can specify all configuration settings via
        // the environment, but the most likely scenario here is that a user accidentally
        // omitted the config file for some reason (e.g. forgot to mount it into Docker).
        warn!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }

    // Read and parse the user-provided configuration.
    let config: AppConfig = Figment::new()
        .admerge(figment::providers::Toml::file(args.config))
        .admerge(figment::providers::Env::prefixed("ACTUA_"))
        .extract()
        .context("failed to load configuration")?;

    if config.test {
        warn!("Actua starting up in TEST mode.");
        warn!("This means no reverse geocoding requests will leave this machine.");
        warn!(
            "If you want to turn this off, either set `test` to false in the config or define `ACTUA_TEST = false`"
        );
    }

    // Initialize metrics reporting.
    super::metrics::setup(config.metrics.as_ref()).context("failed to set up metrics exporter")?;

    // Create a reqwest client that will be used for all outbound requests.
    let client = http_client()?;

    if let Some(dir) = config
        .db
        .strip_prefix("sqlite://")
        .and_then(|path| std::path::Path::new(path).parent())
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(dir)
            .await
            .context("failed to create database directory")?;
    }

    let addr = config
        .listen_address
        .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));
    let sweep_every = Duration::from_secs(config.sweep.interval_secs);

    let state = build_state(config, client, Arc::new(SystemClock)).await?;
    let service = Arc::clone(&state.service);
    let app = app(state)?;

    info!("listening on {addr}");
    info!("connect to: http://127.0.0.1:{}", addr.port());

    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind address")?;

    // Serve the app, and sweep expired reports in the background.
    let serve = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .context("failed to serve app")
    });

    info!("sweeping expired reports every {sweep_every:?}");
    drop(sweep::spawn(service, sweep_every));

    serve
        .await
        .map_err(Into::into)
        .and_then(|r| r)
        .context("failed to serve app")
}
