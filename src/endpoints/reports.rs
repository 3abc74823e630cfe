use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    auth::{AuthenticatedActor, MaybeActor},
    error::ReportError,
    lifecycle::NewReport,
    models::{Category, Report, ReportFilter, Status},
    reports::{ConfirmOutcome, DeleteOutcome, FlagOutcome, ReportService, Stats},
    AppState, Result,
};

#[derive(Deserialize, Debug, Default)]
struct ListParams {
    status: Option<String>,
    category: Option<String>,
    municipality: Option<String>,
}

impl TryFrom<ListParams> for ReportFilter {
    type Error = ReportError;

    fn try_from(params: ListParams) -> std::result::Result<Self, Self::Error> {
        let nonempty = |s: Option<String>| s.filter(|s| !s.trim().is_empty());

        Ok(Self {
            status: nonempty(params.status)
                .map(|s| s.parse::<Status>())
                .transpose()
                .map_err(|e| ReportError::Validation(e.to_string()))?,
            category: nonempty(params.category)
                .map(|s| s.parse::<Category>())
                .transpose()
                .map_err(|e| ReportError::Validation(e.to_string()))?,
            municipality: nonempty(params.municipality),
        })
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreateInput {
    #[serde(default)]
    description: String,
    category: Option<String>,
    #[serde(default)]
    coordinates: Vec<f64>,
    image_ref: Option<String>,
}

/// List live reports, newest first.
///
/// - GET /reports?status=&category=&municipality=
async fn list_reports(
    State(service): State<Arc<ReportService>>,
    MaybeActor(viewer): MaybeActor,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Report>>> {
    let filter = ReportFilter::try_from(params)?;
    let reports = service.list_reports(&filter).await?;

    Ok(Json(
        reports
            .into_iter()
            .map(|r| r.redacted_for(viewer.as_ref()))
            .collect(),
    ))
}

/// - POST /reports
async fn create_report(
    State(service): State<Arc<ReportService>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(input): Json<CreateInput>,
) -> Result<(StatusCode, Json<Report>)> {
    let report = service
        .create_report(
            NewReport {
                description: input.description,
                category: input.category,
                coordinates: input.coordinates,
                image_ref: input.image_ref,
            },
            &actor,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(report.redacted_for(Some(&actor)))))
}

/// - GET /reports/{id}
async fn get_report(
    State(service): State<Arc<ReportService>>,
    MaybeActor(viewer): MaybeActor,
    Path(id): Path<String>,
) -> Result<Json<Report>> {
    let report = service.get_report(&id).await?;
    Ok(Json(report.redacted_for(viewer.as_ref())))
}

/// - POST /reports/{id}/confirm
async fn confirm(
    State(service): State<Arc<ReportService>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<ConfirmOutcome>> {
    Ok(Json(service.toggle_confirm(&id, &actor).await?))
}

/// - POST /reports/{id}/flag
async fn flag(
    State(service): State<Arc<ReportService>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<FlagOutcome>> {
    Ok(Json(service.flag_abuse(&id, &actor).await?))
}

/// - POST /reports/{id}/resolve
async fn resolve(
    State(service): State<Arc<ReportService>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Report>> {
    let report = service.resolve_report(&id, &actor).await?;
    Ok(Json(report.redacted_for(Some(&actor))))
}

/// - POST /reports/{id}/verify
async fn verify(
    State(service): State<Arc<ReportService>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<Report>> {
    let report = service.verify_report(&id, &actor).await?;
    Ok(Json(report.redacted_for(Some(&actor))))
}

/// - DELETE /reports/{id}
async fn delete_report(
    State(service): State<Arc<ReportService>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<DeleteOutcome>> {
    Ok(Json(service.delete_report(&id, &actor).await?))
}

/// - GET /stats
async fn stats(State(service): State<Arc<ReportService>>) -> Result<Json<Stats>> {
    Ok(Json(service.stats().await?))
}

#[rustfmt::skip]
pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/reports",              get(list_reports).post(create_report))
        .route("/reports/{id}",         get(get_report).delete(delete_report))
        .route("/reports/{id}/confirm", post(confirm))
        .route("/reports/{id}/flag",    post(flag))
        .route("/reports/{id}/resolve", post(resolve))
        .route("/reports/{id}/verify",  post(verify))
        .route("/stats",                get(stats))
}
