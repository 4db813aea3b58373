//! HTTP API server with observability for the reservation engine.
//!
//! Provides REST endpoints for reserving, listing and cancelling bookings,
//! plus event and user administration, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use reservation_store::{
    AdminStore, InMemoryStore, NewResource, PrincipalId, Resource, TransactionCoordinator,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::bookings::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<C: TransactionCoordinator + AdminStore + 'static>(
    state: Arc<AppState<C>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<C>))
        .route(
            "/api/events",
            post(routes::events::create::<C>).get(routes::events::list::<C>),
        )
        .route(
            "/api/events/{id}",
            get(routes::events::get::<C>).put(routes::events::update::<C>),
        )
        .route("/api/users", post(routes::users::create::<C>))
        .route("/api/users/{id}", get(routes::users::get::<C>))
        .route("/api/bookings/reserve", post(routes::bookings::reserve::<C>))
        .route("/api/bookings", get(routes::bookings::list::<C>))
        .route(
            "/api/bookings/{id}",
            get(routes::bookings::get::<C>).delete(routes::bookings::cancel::<C>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Seeds an in-memory store with one demo event and one demo user, so the
/// server is usable without a database.
pub async fn seed_demo(
    store: &InMemoryStore,
) -> reservation_store::Result<(Resource, PrincipalId)> {
    let resource = store
        .create_resource(NewResource::new("Demo Event", 100))
        .await?;
    let principal_id = store.create_principal().await?;
    Ok((resource, principal_id))
}
