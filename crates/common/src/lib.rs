//! Identifier types shared by every crate of the reservation system.

pub mod types;

pub use types::{PrincipalId, ReservationId, ResourceId};
