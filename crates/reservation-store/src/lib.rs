//! Stores and transaction coordinator for the reservation engine.
//!
//! The three leaf stores (resources, principals, reservations) are exposed as
//! capability traits over a single data handle. A [`TransactionCoordinator`]
//! hands out either a transaction-scoped handle or one bound to the live
//! connection, so the same store code runs in both situations.
//!
//! Events and users are created and maintained through [`AdminStore`], the
//! only path that writes a resource's capacity.

pub mod admin;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use admin::AdminStore;
pub use common::{PrincipalId, ReservationId, ResourceId};
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, MemoryHandle};
pub use model::{
    NewPrincipal, NewResource, Principal, Reservation, ReservationPage, Resource, ResourcePage,
    ResourceUpdate,
};
pub use postgres::{PgHandle, PostgresStore};
pub use query::ReservationFilter;
pub use store::{
    IdentityStore, LockMode, ReservationStore, ResourceStore, TransactionCoordinator,
    TransactionOptions, UnitOfWork, with_transaction,
};
