//! User registration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use reservation_store::{AdminStore, NewPrincipal, Principal, TransactionCoordinator};
use serde::{Deserialize, Serialize};

use super::bookings::{AppState, parse_principal_id};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Principal> for UserResponse {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id.to_string(),
            email: principal.email,
            name: principal.name,
            created_at: principal.created_at.to_rfc3339(),
            updated_at: principal.updated_at.to_rfc3339(),
        }
    }
}

/// POST /api/users: register a user who may then hold bookings.
#[tracing::instrument(skip(state, body))]
pub async fn create<C: TransactionCoordinator + AdminStore + 'static>(
    State(state): State<Arc<AppState<C>>>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let principal = state
        .admin
        .register_principal(NewPrincipal::new(&req.email, req.name.as_deref()))
        .await?;

    tracing::info!(user_id = %principal.id, "user registered");
    Ok((StatusCode::CREATED, Json(principal.into())))
}

/// GET /api/users/{id}: load a user by id.
#[tracing::instrument(skip(state))]
pub async fn get<C: TransactionCoordinator + AdminStore + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let id = parse_principal_id(&id, "ID format")?;
    let principal = state
        .admin
        .get_principal(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(Json(principal.into()))
}
