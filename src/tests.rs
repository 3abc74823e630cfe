//! End-to-end tests against a live server.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context as _, Result};
use chrono::Utc;
use figment::{providers::Format as _, Figment};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::{
    auth::tests::store_session,
    client::{remote, Feed, Viewer},
    clock::ManualClock,
    config::AppConfig,
    firehose::{ReportEvent, Subscription},
    models::{Report, Status},
    serve, AppState,
};

/// A server bound to an ephemeral port, backed by in-memory SQLite and a manual clock.
pub(crate) struct TestState {
    /// The address the test server is listening on.
    address: SocketAddr,
    /// The application state shared with the server.
    state: AppState,
    clock: Arc<ManualClock>,
    /// The HTTP client.
    client: reqwest::Client,
}

impl TestState {
    async fn new() -> Result<Self> {
        #[derive(Serialize, Deserialize)]
        struct TestConfigInput {
            db: String,
            test: bool,
        }

        let config: AppConfig = Figment::new()
            .merge(figment::providers::Serialized::defaults(TestConfigInput {
                db: "sqlite::memory:".to_owned(),
                test: true,
            }))
            .merge(figment::providers::Toml::string(
                r#"
                [geocoder]
                enabled = false

                [sweep]
                interval_secs = 3600
            "#,
            ))
            .extract()?;

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let state = serve::build_state(config, serve::http_client()?, clock.clone()).await?;
        let app = serve::app(state.clone())?;

        let listener = tokio::net::TcpListener::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
        ))
        .await
        .context("failed to bind address")?;
        let address = listener.local_addr()?;
        drop(tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await
        }));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let state = Self {
            address,
            state,
            clock,
            client,
        };
        state.login("owner-token", json!({"id": "owner", "displayName": "Owner"})).await?;
        state.login("a-token", json!({"googleId": "a", "displayName": "A"})).await?;
        state.login("b-token", json!({"googleId": "b", "displayName": "B"})).await?;
        state
            .login(
                "admin-token",
                json!({"id": "admin", "email": "admin@example.com", "role": "admin"}),
            )
            .await?;
        Ok(state)
    }

    async fn login(&self, token: &str, profile: Value) -> Result<()> {
        store_session(&self.state.db, token, &profile, None).await
    }

    /// Get a base URL for the test server.
    fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url()));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, body))
    }

    async fn create(&self, token: &str, body: Value) -> Result<Report> {
        let (status, body) = self
            .call(Method::POST, "/reports", Some(token), Some(body))
            .await?;
        anyhow::ensure!(status == StatusCode::CREATED, "create failed: {status} {body}");
        Ok(serde_json::from_value(body)?)
    }

    async fn subscribe(&self) -> Subscription {
        self.state.firehose.subscribe().await
    }
}

fn fire() -> Value {
    json!({
        "description": "fire",
        "category": "Emergency",
        "coordinates": [14.64, -90.51],
    })
}

#[tokio::test]
async fn index_banner() {
    let state = TestState::new().await.unwrap();
    let (status, body) = state.call(Method::GET, "/", None, None).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("Actua"));
}

#[tokio::test]
async fn report_lifecycle_over_http() {
    let state = TestState::new().await.unwrap();
    let mut events = state.subscribe().await;

    let (status, _) = state
        .call(Method::POST, "/reports", None, Some(fire()))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = state
        .call(Method::POST, "/reports", Some("bogus"), Some(fire()))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let report = state.create("owner-token", fire()).await.unwrap();
    assert_eq!(report.created_by, "owner");
    assert_eq!(report.priority, 100);
    assert_eq!(report.status, Status::Active);
    assert_eq!(report.municipality.as_deref(), Some("unidentified"));
    assert_eq!(events.recv().await.unwrap().kind(), "created");

    for token in ["a-token", "b-token"] {
        let (status, body) = state
            .call(
                Method::POST,
                &format!("/reports/{}/confirm", report.id),
                Some(token),
                None,
            )
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], "added");
    }
    let (_, body) = state
        .call(Method::GET, &format!("/reports/{}", report.id), None, None)
        .await
        .unwrap();
    assert_eq!(body["priority"], 110);
    assert_eq!(body["confirmedBy"], json!(["a", "b"]));

    let (status, body) = state
        .call(
            Method::POST,
            &format!("/reports/{}/resolve", report.id),
            Some("a-token"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "ForbiddenError");

    let (status, body) = state
        .call(
            Method::POST,
            &format!("/reports/{}/resolve", report.id),
            Some("owner-token"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "resolved");

    let (status, body) = state
        .call(
            Method::POST,
            &format!("/reports/{}/confirm", report.id),
            Some("a-token"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "InvalidStateError");

    let (_, listed) = state
        .call(Method::GET, "/reports?status=resolved", None, None)
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    let (_, listed) = state
        .call(Method::GET, "/reports?status=active", None, None)
        .await
        .unwrap();
    assert!(listed.as_array().unwrap().is_empty());

    // created, then 2 confirmations and a resolve.
    for _ in 0..3 {
        assert_eq!(events.recv().await.unwrap().kind(), "updated");
    }

    let path = format!("/reports/{}", report.id);
    let (status, _) = state
        .call(Method::DELETE, &path, Some("owner-token"), None)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = state
        .call(Method::DELETE, &path, Some("admin-token"), None)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], report.id);
    assert_eq!(
        *events.recv().await.unwrap(),
        ReportEvent::Deleted {
            id: report.id.clone()
        }
    );

    let (status, body) = state.call(Method::GET, &path, None, None).await.unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFoundError");
}

#[tokio::test]
async fn validation_errors_are_bad_requests() {
    let state = TestState::new().await.unwrap();

    let cases = [
        json!({"description": "   ", "coordinates": [14.64, -90.51]}),
        json!({"description": "fire", "category": "Fire", "coordinates": [14.64, -90.51]}),
        json!({"description": "fire", "coordinates": [14.64]}),
        json!({"description": "fire", "coordinates": [100.0, -90.51]}),
        json!({"description": "x".repeat(501), "coordinates": [14.64, -90.51]}),
    ];
    for case in cases {
        let (status, body) = state
            .call(Method::POST, "/reports", Some("owner-token"), Some(case))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "ValidationError");
    }

    let (status, _) = state
        .call(Method::GET, "/reports?status=pending", None, None)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Category defaults to Other.
    let report = state
        .create(
            "owner-token",
            json!({"description": "bench", "coordinates": [14.64, -90.51]}),
        )
        .await
        .unwrap();
    assert_eq!(report.priority, 10);
}

#[tokio::test]
async fn flags_are_only_shown_to_admins() {
    let state = TestState::new().await.unwrap();
    let report = state.create("owner-token", fire()).await.unwrap();
    let path = format!("/reports/{}/flag", report.id);

    let (status, body) = state
        .call(Method::POST, &path, Some("a-token"), None)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"accepted": true}));
    let (status, body) = state
        .call(Method::POST, &path, Some("a-token"), None)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "DuplicateActionError");

    let (_, public) = state.call(Method::GET, "/reports", None, None).await.unwrap();
    assert_eq!(public[0]["flaggedBy"], json!([]));
    let (_, admin) = state
        .call(Method::GET, "/reports", Some("admin-token"), None)
        .await
        .unwrap();
    assert_eq!(admin[0]["flaggedBy"], json!(["a"]));
}

#[tokio::test]
async fn expired_reports_disappear() {
    let state = TestState::new().await.unwrap();
    let mut events = state.subscribe().await;

    let traffic = state
        .create(
            "owner-token",
            json!({
                "description": "pileup",
                "category": "Traffic Incident",
                "coordinates": [14.64, -90.51],
            }),
        )
        .await
        .unwrap();
    let pet = state
        .create(
            "owner-token",
            json!({
                "description": "lost dog",
                "category": "Lost Pet",
                "coordinates": [14.64, -90.51],
            }),
        )
        .await
        .unwrap();
    assert!(pet.expires_at.is_none());
    let _ = events.recv().await.unwrap();
    let _ = events.recv().await.unwrap();

    state.clock.advance(chrono::Duration::hours(2));

    let (status, _) = state
        .call(Method::GET, &format!("/reports/{}", traffic.id), None, None)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = state.call(Method::GET, "/reports", None, None).await.unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], pet.id);

    assert_eq!(state.state.service.sweep_expired().await.unwrap(), 1);
    assert_eq!(
        *events.recv().await.unwrap(),
        ReportEvent::Deleted { id: traffic.id }
    );
}

#[tokio::test]
async fn stats_summary() {
    let state = TestState::new().await.unwrap();
    let report = state.create("owner-token", fire()).await.unwrap();
    let _ = state.create("a-token", fire()).await.unwrap();
    let (status, _) = state
        .call(
            Method::POST,
            &format!("/reports/{}/verify", report.id),
            Some("admin-token"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);

    let (status, stats) = state.call(Method::GET, "/stats", None, None).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["active"], 1);
    assert_eq!(stats["verified"], 1);
    assert_eq!(stats["resolved"], 0);
    assert_eq!(
        stats["byCategory"],
        json!([{"category": "Emergency", "count": 2}])
    );
    assert_eq!(stats["recentActivity"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn client_feed_converges_with_server() {
    let state = TestState::new().await.unwrap();
    let base = Url::parse(&format!("{}/", state.base_url())).unwrap();
    let mut events = state.subscribe().await;
    let mut feed = Feed::new(Viewer::default());

    let first = state.create("owner-token", fire()).await.unwrap();
    // Event lands before the snapshot is fetched.
    let _ = feed.on_event((*events.recv().await.unwrap()).clone());

    let snapshot = remote::fetch_snapshot(&state.client, &base, None)
        .await
        .unwrap();
    feed.load_snapshot(snapshot);
    assert_eq!(feed.visible().len(), 1);

    let _ = state
        .call(
            Method::POST,
            &format!("/reports/{}/confirm", first.id),
            Some("a-token"),
            None,
        )
        .await
        .unwrap();
    let _ = feed.on_event((*events.recv().await.unwrap()).clone());
    assert_eq!(feed.visible()[0].priority, 105);

    let _ = state
        .call(
            Method::DELETE,
            &format!("/reports/{}", first.id),
            Some("admin-token"),
            None,
        )
        .await
        .unwrap();
    let _ = feed.on_event((*events.recv().await.unwrap()).clone());
    assert!(feed.visible().is_empty());

    let server = remote::fetch_snapshot(&state.client, &base, None)
        .await
        .unwrap();
    assert!(server.is_empty());
}
