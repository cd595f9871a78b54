//! Meeting API endpoints.
//!
//! Provides HTTP endpoints for:
//! - Creating a meeting (POST /meetings)
//! - Getting a meeting (GET /meetings/:id)
//! - Getting its annotated transcript (GET /meetings/:id/transcript)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::db::{MeetingRecord, MeetingRepository, NewMeeting};
use crate::meeting::transcript::{self, AnnotatedItem};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/meetings", post(create_meeting))
        .route("/meetings/:id", get(get_meeting))
        .route("/meetings/:id/transcript", get(get_transcript))
        .with_state(state)
}

/// POST /meetings
async fn create_meeting(
    State(state): State<AppState>,
    Json(request): Json<NewMeeting>,
) -> ApiResult<(StatusCode, Json<MeetingRecord>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("Meeting name is required"));
    }

    info!(
        "Create meeting requested by {} with agent {}",
        request.user_id, request.agent_id
    );
    let meeting = state.lifecycle.create_meeting(request).await?;
    Ok((StatusCode::CREATED, Json(meeting)))
}

/// GET /meetings/:id
async fn get_meeting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MeetingRecord>> {
    Ok(Json(find_meeting(&state, id).await?))
}

/// GET /meetings/:id/transcript
///
/// An unavailable transcript is an empty list, not an error.
async fn get_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AnnotatedItem>>> {
    let meeting = find_meeting(&state, id).await?;
    let Some(url) = meeting.transcript_url else {
        return Ok(Json(Vec::new()));
    };

    match transcript::load_annotated(&state.db, &state.http, &url).await {
        Ok(items) => Ok(Json(items)),
        Err(e) => {
            warn!("Transcript for meeting {} unavailable: {:#}", meeting.id, e);
            Ok(Json(Vec::new()))
        }
    }
}

async fn find_meeting(state: &AppState, id: String) -> ApiResult<MeetingRecord> {
    let lookup = id.clone();
    state
        .db
        .call(move |conn| MeetingRepository::get(conn, &lookup))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Meeting {} not found", id)))
}
