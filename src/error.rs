use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

/// Failures of a report lifecycle operation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Malformed input.
    #[error("{0}")]
    Validation(String),
    /// The actor lacks the role or ownership required.
    #[error("{0}")]
    Forbidden(String),
    /// The report does not exist (or has expired).
    #[error("report {0} not found")]
    NotFound(String),
    /// The action is illegal for the report's current status.
    #[error("{0}")]
    InvalidState(String),
    /// The action was already performed by this actor.
    #[error("{0}")]
    DuplicateAction(String),
    /// The storage layer failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ReportError {
    pub const fn status(&self) -> StatusCode {
        match *self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) | Self::DuplicateAction(_) => StatusCode::CONFLICT,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn kind(&self) -> &'static str {
        match *self {
            Self::Validation(_) => "ValidationError",
            Self::Forbidden(_) => "ForbiddenError",
            Self::NotFound(_) => "NotFoundError",
            Self::InvalidState(_) => "InvalidStateError",
            Self::DuplicateAction(_) => "DuplicateActionError",
            Self::Store(_) => "InternalError",
        }
    }
}

/// `axum`-compatible error handler.
#[derive(Error)]
pub struct Error {
    status: StatusCode,
    kind: &'static str,
    err: anyhow::Error,
}

impl Error {
    pub fn unauthorized(err: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: "Unauthorized",
            ..Self::with_status(StatusCode::UNAUTHORIZED, err)
        }
    }

    pub fn with_status(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            kind: "Error",
            err: err.into(),
        }
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

impl From<ReportError> for Error {
    fn from(err: ReportError) -> Self {
        let status = err.status();
        let kind = err.kind();
        match err {
            ReportError::Store(err) => Self { status, kind, err },
            err => Self {
                status,
                kind,
                err: anyhow::Error::new(err),
            },
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.status, self.err)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.err.fmt(f)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status.is_client_error() {
            let body = serde_json::json!({
                "error": self.kind,
                "message": self.err.to_string(),
            });
            return (self.status, Json(body)).into_response();
        }

        error!("{:?}", self.err);

        // N.B: Forward out the error message to the requester if this is a debug build.
        // This is insecure for production builds, so we'll return an empty body if this
        // is a release build.
        if cfg!(debug_assertions) {
            (self.status, format!("{:?}", self.err)).into_response()
        } else {
            self.status.into_response()
        }
    }
}
