//! Event administration endpoints. Capacity (`total_seats`) is written here
//! and only read by the reservation engine.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::ResourceId;
use engine::Pagination;
use reservation_store::{
    AdminStore, NewResource, Resource, ResourceUpdate, TransactionCoordinator,
};
use serde::{Deserialize, Serialize};

use super::bookings::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub total_seats: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub name: Option<String>,
    pub total_seats: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventListQuery {
    pub search: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: i64,
    pub name: String,
    pub total_seats: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Resource> for EventResponse {
    fn from(resource: Resource) -> Self {
        Self {
            id: resource.id.as_i64(),
            name: resource.name,
            total_seats: resource.capacity,
            created_at: resource.created_at.to_rfc3339(),
            updated_at: resource.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub items: Vec<EventResponse>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

// -- Handlers --

/// POST /api/events: create an event with a fixed number of seats.
#[tracing::instrument(skip(state, body))]
pub async fn create<C: TransactionCoordinator + AdminStore + 'static>(
    State(state): State<Arc<AppState<C>>>,
    body: Result<Json<CreateEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EventResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let resource = state
        .admin
        .create_resource(NewResource::new(req.name, req.total_seats))
        .await?;

    tracing::info!(event_id = %resource.id, total_seats = resource.capacity, "event created");
    Ok((StatusCode::CREATED, Json(resource.into())))
}

/// GET /api/events/{id}: load an event by id.
#[tracing::instrument(skip(state))]
pub async fn get<C: TransactionCoordinator + AdminStore + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Path(id): Path<String>,
) -> Result<Json<EventResponse>, ApiError> {
    let id = parse_event_id(&id)?;
    let resource = state
        .admin
        .get_resource(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Event not found".to_string()))?;
    Ok(Json(resource.into()))
}

/// GET /api/events: list events, newest first, optionally by name.
#[tracing::instrument(skip(state))]
pub async fn list<C: TransactionCoordinator + AdminStore + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Query(query): Query<EventListQuery>,
) -> Result<Json<EventListResponse>, ApiError> {
    let pagination = Pagination::from_optional(
        query.page.as_deref().and_then(|p| p.trim().parse().ok()),
        query.limit.as_deref().and_then(|l| l.trim().parse().ok()),
    );

    let page = state
        .admin
        .list_resources(
            query.search.as_deref(),
            pagination.offset(),
            u64::from(pagination.limit()),
        )
        .await?;

    Ok(Json(EventListResponse {
        items: page.items.into_iter().map(EventResponse::from).collect(),
        total: page.total,
        page: pagination.page(),
        limit: pagination.limit(),
    }))
}

/// PUT /api/events/{id}: rename an event or change its seat count.
#[tracing::instrument(skip(state, body))]
pub async fn update<C: TransactionCoordinator + AdminStore + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Path(id): Path<String>,
    body: Result<Json<UpdateEventRequest>, JsonRejection>,
) -> Result<Json<EventResponse>, ApiError> {
    let id = parse_event_id(&id)?;
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let update = ResourceUpdate {
        name: req.name,
        capacity: req.total_seats,
    };
    if update.is_empty() {
        return Err(ApiError::BadRequest("Nothing to update".to_string()));
    }

    let resource = state
        .admin
        .update_resource(id, update)
        .await?
        .ok_or_else(|| ApiError::NotFound("Event not found".to_string()))?;

    tracing::info!(event_id = %resource.id, total_seats = resource.capacity, "event updated");
    Ok(Json(resource.into()))
}

fn parse_event_id(raw: &str) -> Result<ResourceId, ApiError> {
    let id: ResourceId = raw
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    if id.as_i64() < 1 {
        return Err(ApiError::BadRequest(format!("Invalid ID format: {raw}")));
    }
    Ok(id)
}
