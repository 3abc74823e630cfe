//! Authentication extractors.
//!
//! Sessions are issued by an external credential provider, which writes
//! `(token, profile, expires_at)` rows into the `session` table. Requests carry
//! the token as `Authorization: Bearer <token>`; the stored profile is
//! normalized here into an [`Actor`] so nothing past this module cares how the
//! person logged in.
use anyhow::{Context as _, Result};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::{
    metrics::AUTH_FAILED,
    models::{Actor, Role},
    AppState, Error,
};

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
/// Login-method specific identity documents.
enum SessionProfile {
    #[serde(rename_all = "camelCase")]
    OAuth {
        google_id: String,
        display_name: String,
        #[serde(default)]
        role: Role,
    },
    #[serde(rename_all = "camelCase")]
    Local {
        id: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        role: Role,
    },
}

impl From<SessionProfile> for Actor {
    fn from(profile: SessionProfile) -> Self {
        match profile {
            SessionProfile::OAuth {
                google_id,
                display_name,
                role,
            } => Self {
                id: google_id,
                display_name,
                role,
            },
            SessionProfile::Local {
                id,
                email,
                display_name,
                role,
            } => Self {
                display_name: display_name.or(email).unwrap_or_else(|| id.clone()),
                id,
                role,
            },
        }
    }
}

/// Look up a live session. Unknown and expired tokens both yield `None`.
pub async fn lookup_session(
    db: &SqlitePool,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<Actor>> {
    let row: Option<(String, Option<i64>)> =
        sqlx::query_as("SELECT profile, expires_at FROM session WHERE token = ?")
            .bind(token)
            .fetch_optional(db)
            .await
            .context("failed to query session")?;

    let Some((profile, expires_at)) = row else {
        return Ok(None);
    };
    if expires_at.is_some_and(|at| at <= now.timestamp_millis()) {
        debug!("session expired");
        return Ok(None);
    }

    let profile: SessionProfile =
        serde_json::from_str(&profile).context("malformed session profile")?;
    Ok(Some(profile.into()))
}

fn bearer_token(parts: &Parts) -> Option<Result<&str, Error>> {
    let header = parts.headers.get(AUTHORIZATION)?;
    Some(
        header
            .to_str()
            .ok()
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::unauthorized(anyhow::anyhow!("malformed authorization header"))),
    )
}

async fn authenticate(parts: &Parts, state: &AppState) -> Result<Option<Actor>, Error> {
    let Some(token) = bearer_token(parts) else {
        return Ok(None);
    };
    let token = token?;

    lookup_session(&state.db, token, state.service.now())
        .await?
        .map(Some)
        .ok_or_else(|| Error::unauthorized(anyhow::anyhow!("invalid or expired session")))
}

/// An authenticated caller. Rejects with 401 if credentials are missing or invalid.
pub struct AuthenticatedActor(pub Actor);

impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match authenticate(parts, state).await {
            Ok(Some(actor)) => Ok(Self(actor)),
            Ok(None) => {
                counter!(AUTH_FAILED).increment(1);
                Err(Error::unauthorized(anyhow::anyhow!("authentication required")))
            }
            Err(e) => {
                counter!(AUTH_FAILED).increment(1);
                Err(e)
            }
        }
    }
}

/// A caller who may be anonymous. Credentials that are present must still be valid.
pub struct MaybeActor(pub Option<Actor>);

impl FromRequestParts<AppState> for MaybeActor {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await.map(Self).inspect_err(|_| {
            counter!(AUTH_FAILED).increment(1);
        })
    }
}
