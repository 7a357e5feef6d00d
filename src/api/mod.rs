//! Artifact HTTP surface
//!
//! Routes, all scoped to a team:
//!
//! | Method | Path | Result |
//! |--------|------|--------|
//! | POST | `/api/v1/teams/{team}/artifacts` | 201 + artifact JSON |
//! | GET | `/api/v1/teams/{team}/artifacts/{id}` | 200 + raw bytes |
//! | DELETE | `/api/v1/teams/{team}/artifacts/{id}` | 204 |
//!
//! Authentication and authorization are delegated to an [`Accessor`];
//! the core never evaluates permissions itself.

mod handlers;

use crate::artifact::ArtifactService;
use crate::config::schema::ApiConfig;
use crate::error::HangarError;
use crate::worker::TeamId;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::error;

/// Verdict of the access-control collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Unauthenticated,
    Unauthorized,
}

/// Decides whether a request may act for a team
pub trait Accessor: Send + Sync {
    fn check(&self, headers: &HeaderMap, team: &TeamId) -> Access;
}

/// Grants every request
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl Accessor for OpenAccess {
    fn check(&self, _headers: &HeaderMap, _team: &TeamId) -> Access {
        Access::Granted
    }
}

/// Single shared bearer token, optionally limited to some teams
#[derive(Debug, Clone)]
pub struct BearerAccessor {
    token: String,
    teams: BTreeSet<TeamId>,
}

impl BearerAccessor {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            teams: BTreeSet::new(),
        }
    }

    pub fn with_teams<I, S>(mut self, teams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.teams = teams.into_iter().map(TeamId::new).collect();
        self
    }
}

impl Accessor for BearerAccessor {
    fn check(&self, headers: &HeaderMap, team: &TeamId) -> Access {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match presented {
            Some(token) if token == self.token => {
                if self.teams.is_empty() || self.teams.contains(team) {
                    Access::Granted
                } else {
                    Access::Unauthorized
                }
            }
            _ => Access::Unauthenticated,
        }
    }
}

/// Accessor described by the `[api]` config section
pub fn accessor_from_config(config: &ApiConfig) -> Arc<dyn Accessor> {
    match &config.token {
        Some(token) => Arc::new(BearerAccessor::new(token.clone()).with_teams(config.teams.iter().cloned())),
        None => Arc::new(OpenAccess),
    }
}

/// Shared handler state
pub struct ApiState {
    pub artifacts: ArtifactService,
    pub accessor: Arc<dyn Accessor>,
    pub max_artifact_bytes: usize,
}

/// HTTP error with a JSON body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "not authenticated".to_string(),
        }
    }

    pub fn unauthorized(team: &TeamId) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: format!("not authorized for team {}", team),
        }
    }
}

impl From<HangarError> for ApiError {
    fn from(e: HangarError) -> Self {
        let status =
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("request failed: {}", e);
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

/// Build the artifact router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/teams/{team}/artifacts", post(handlers::create_artifact))
        .route(
            "/api/v1/teams/{team}/artifacts/{id}",
            get(handlers::get_artifact).delete(handlers::delete_artifact),
        )
        .with_state(state)
}
