//! Reservation engine for capacity-limited resources.
//!
//! This crate provides:
//! - `ReservationEngine` with the reserve / get / list / cancel operations
//! - `Pagination` and `ListResult` for listings
//! - `ReservationError`, the typed failure taxonomy callers match on

pub mod engine;
pub mod error;
pub mod pagination;

pub use engine::ReservationEngine;
pub use error::{NotFoundKind, ReservationError};
pub use pagination::{DEFAULT_LIMIT, DEFAULT_PAGE, ListResult, MAX_LIMIT, Pagination};
pub use reservation_store::{Reservation, ReservationFilter};
