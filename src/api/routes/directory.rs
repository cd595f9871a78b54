//! User and agent directory endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::db::{AgentRecord, AgentRepository, UserRecord, UserRepository};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub instructions: String,
    pub user_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(create_user))
        .route("/agents", post(create_agent))
        .route("/agents/:id", get(get_agent))
        .with_state(state)
}

/// POST /users
async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserRecord>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("User name is required"));
    }

    let user = state
        .db
        .call(move |conn| {
            UserRepository::insert(
                conn,
                request.name.trim(),
                request.email.as_deref(),
                request.image.as_deref(),
            )
        })
        .await?;

    info!("Registered user {}", user.id);
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /agents
async fn create_agent(
    State(state): State<AppState>,
    Json(request): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<AgentRecord>)> {
    if request.name.trim().is_empty() || request.instructions.trim().is_empty() {
        return Err(ApiError::bad_request("Agent name and instructions are required"));
    }

    let owner_id = request.user_id.clone();
    let owner = state
        .db
        .call(move |conn| UserRepository::get(conn, &owner_id))
        .await?;
    if owner.is_none() {
        return Err(ApiError::not_found(format!("User {} not found", request.user_id)));
    }

    let agent = state
        .db
        .call(move |conn| {
            AgentRepository::insert(
                conn,
                request.name.trim(),
                request.instructions.trim(),
                &request.user_id,
            )
        })
        .await?;

    info!("Registered agent {} for user {}", agent.id, agent.user_id);
    Ok((StatusCode::CREATED, Json(agent)))
}

/// GET /agents/:id
async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentRecord>> {
    let lookup = id.clone();
    let agent = state
        .db
        .call(move |conn| AgentRepository::get(conn, &lookup))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Agent {} not found", id)))?;

    Ok(Json(agent))
}
