//! Booking endpoints over the reservation engine.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use common::{PrincipalId, ReservationId, ResourceId};
use engine::{Pagination, ReservationEngine};
use reservation_store::{Reservation, ReservationFilter, TransactionCoordinator};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header carrying the caller's principal id, set by the identity layer.
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// Shared application state accessible from all handlers.
///
/// Bookings go through the engine; events and users go through `admin`,
/// a second handle on the same store.
pub struct AppState<C: TransactionCoordinator> {
    pub engine: ReservationEngine<C>,
    pub admin: C,
}

impl<C: TransactionCoordinator + Clone> AppState<C> {
    pub fn new(store: C) -> Self {
        Self {
            engine: ReservationEngine::new(store.clone()),
            admin: store,
        }
    }
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub event_id: i64,
    pub user_id: String,
}

/// Query string of the listing endpoint. Kept as raw strings so a bad
/// `page` or `limit` falls back to its default instead of failing the call.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: i64,
    pub event_id: i64,
    pub user_id: String,
    pub created_at: String,
}

impl From<Reservation> for BookingResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            id: reservation.id.as_i64(),
            event_id: reservation.resource_id.as_i64(),
            user_id: reservation.principal_id.to_string(),
            created_at: reservation.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookingListResponse {
    pub items: Vec<BookingResponse>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

// -- Handlers --

/// POST /api/bookings/reserve: reserve one seat of an event.
#[tracing::instrument(skip(state, body))]
pub async fn reserve<C: TransactionCoordinator + 'static>(
    State(state): State<Arc<AppState<C>>>,
    body: Result<Json<ReserveRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if req.event_id < 1 {
        return Err(ApiError::BadRequest(format!(
            "event_id must be a positive integer, got {}",
            req.event_id
        )));
    }
    let principal_id = parse_principal_id(&req.user_id, "user_id")?;

    let reservation = state
        .engine
        .reserve(ResourceId::new(req.event_id), principal_id)
        .await?;

    Ok((StatusCode::CREATED, Json(reservation.into())))
}

/// GET /api/bookings/{id}: load a booking by id.
#[tracing::instrument(skip(state))]
pub async fn get<C: TransactionCoordinator + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Path(id): Path<String>,
) -> Result<Json<BookingResponse>, ApiError> {
    let id = parse_reservation_id(&id)?;
    let reservation = state.engine.get_by_id(id).await?;
    Ok(Json(reservation.into()))
}

/// GET /api/bookings: list bookings, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<C: TransactionCoordinator + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<BookingListResponse>, ApiError> {
    let mut filter = ReservationFilter::new();
    if let Some(raw) = query.event_id.as_deref().filter(|s| !s.is_empty()) {
        let id: ResourceId = raw
            .parse()
            .map_err(|e| ApiError::BadRequest(format!("Invalid event_id: {e}")))?;
        filter = filter.resource_id(id);
    }
    if let Some(raw) = query.user_id.as_deref().filter(|s| !s.is_empty()) {
        filter = filter.principal_id(parse_principal_id(raw, "user_id")?);
    }

    let pagination = Pagination::from_optional(
        query.page.as_deref().and_then(|p| p.trim().parse().ok()),
        query.limit.as_deref().and_then(|l| l.trim().parse().ok()),
    );

    let result = state.engine.list(filter, pagination).await?;

    Ok(Json(BookingListResponse {
        items: result.items.into_iter().map(BookingResponse::from).collect(),
        total: result.total,
        page: result.page,
        limit: result.limit,
    }))
}

/// DELETE /api/bookings/{id}: cancel the caller's own booking.
#[tracing::instrument(skip(state, headers))]
pub async fn cancel<C: TransactionCoordinator + 'static>(
    State(state): State<Arc<AppState<C>>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, ApiError> {
    let principal_id = caller(&headers)?;
    let id = parse_reservation_id(&id)?;

    state.engine.cancel(id, principal_id).await?;

    Ok(Json(StatusResponse { status: "ok" }))
}

fn caller(headers: &HeaderMap) -> Result<PrincipalId, ApiError> {
    let raw = headers
        .get(PRINCIPAL_HEADER)
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {PRINCIPAL_HEADER} header")))?
        .to_str()
        .map_err(|_| ApiError::Unauthorized(format!("Invalid {PRINCIPAL_HEADER} header")))?;

    raw.parse()
        .map_err(|_| ApiError::Unauthorized(format!("Invalid {PRINCIPAL_HEADER} header")))
}

pub(crate) fn parse_principal_id(raw: &str, field: &str) -> Result<PrincipalId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}

fn parse_reservation_id(raw: &str) -> Result<ReservationId, ApiError> {
    let id: ReservationId = raw
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    if id.as_i64() < 1 {
        return Err(ApiError::BadRequest(format!("Invalid ID format: {raw}")));
    }
    Ok(id)
}
