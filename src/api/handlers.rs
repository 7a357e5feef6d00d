//! Artifact handlers

use super::{Access, ApiError, ApiState};
use crate::volume::ByteStream;
use crate::worker::TeamId;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use std::io;
use std::sync::Arc;

fn authorize(state: &ApiState, headers: &HeaderMap, team: String) -> Result<TeamId, ApiError> {
    let team = TeamId::new(team);
    match state.accessor.check(headers, &team) {
        Access::Granted => Ok(team),
        Access::Unauthenticated => Err(ApiError::unauthenticated()),
        Access::Unauthorized => Err(ApiError::unauthorized(&team)),
    }
}

/// Request body as a byte stream that fails once `limit` is exceeded
fn limited_stream(body: Body, limit: usize) -> ByteStream {
    let mut seen = 0usize;
    Box::pin(body.into_data_stream().map(move |chunk| {
        let chunk = chunk.map_err(io::Error::other)?;
        seen += chunk.len();
        if seen > limit {
            return Err(io::Error::other(format!(
                "artifact exceeds {} bytes",
                limit
            )));
        }
        Ok(chunk)
    }))
}

/// POST /api/v1/teams/{team}/artifacts
pub async fn create_artifact(
    State(state): State<Arc<ApiState>>,
    Path(team): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let team = authorize(&state, &headers, team)?;
    let data = limited_stream(body, state.max_artifact_bytes);
    let record = state.artifacts.create(&team, data).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

/// GET /api/v1/teams/{team}/artifacts/{id}
pub async fn get_artifact(
    State(state): State<Arc<ApiState>>,
    Path((team, id)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let team = authorize(&state, &headers, team)?;
    let stream = state.artifacts.fetch(&team, id).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response())
}

/// DELETE /api/v1/teams/{team}/artifacts/{id}
pub async fn delete_artifact(
    State(state): State<Arc<ApiState>>,
    Path((team, id)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let team = authorize(&state, &headers, team)?;
    state.artifacts.destroy(&team, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
