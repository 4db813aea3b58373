//! Reservation error types.

use common::{PrincipalId, ReservationId, ResourceId};
use reservation_store::StoreError;
use thiserror::Error;

/// Which entity a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Resource(ResourceId),
    Principal(PrincipalId),
    Reservation(ReservationId),
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFoundKind::Resource(id) => write!(f, "resource {id}"),
            NotFoundKind::Principal(id) => write!(f, "principal {id}"),
            NotFoundKind::Reservation(id) => write!(f, "reservation {id}"),
        }
    }
}

/// Errors returned by the reservation engine.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The resource, principal or reservation does not exist.
    #[error("Not found: {0}")]
    NotFound(NotFoundKind),

    /// Every unit of the resource's capacity is already reserved.
    #[error("No seats available: resource {resource_id} is at capacity {capacity}")]
    CapacityExceeded {
        resource_id: ResourceId,
        capacity: i32,
    },

    /// The principal already holds a reservation for the resource.
    #[error("Principal {principal_id} already reserved resource {resource_id}")]
    DuplicateReservation {
        resource_id: ResourceId,
        principal_id: PrincipalId,
    },

    /// The reservation belongs to another principal.
    #[error("Reservation {reservation_id} is not owned by principal {principal_id}")]
    Forbidden {
        reservation_id: ReservationId,
        principal_id: PrincipalId,
    },

    /// A row lock or the transaction budget timed out. Safe to retry.
    #[error("Lock timeout, the operation may be retried")]
    LockTimeout,

    /// The store cannot be reached. Safe to retry.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other store failure.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl ReservationError {
    /// Returns true for transient infrastructure failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReservationError::LockTimeout | ReservationError::StoreUnavailable(_)
        )
    }

    /// Short label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ReservationError::NotFound(NotFoundKind::Resource(_)) => "resource_not_found",
            ReservationError::NotFound(NotFoundKind::Principal(_)) => "principal_not_found",
            ReservationError::NotFound(NotFoundKind::Reservation(_)) => "reservation_not_found",
            ReservationError::CapacityExceeded { .. } => "capacity_exceeded",
            ReservationError::DuplicateReservation { .. } => "duplicate",
            ReservationError::Forbidden { .. } => "forbidden",
            ReservationError::LockTimeout => "lock_timeout",
            ReservationError::StoreUnavailable(_) => "store_unavailable",
            ReservationError::Store(_) => "store_error",
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout => ReservationError::LockTimeout,
            StoreError::Unavailable(msg) => ReservationError::StoreUnavailable(msg),
            StoreError::DuplicateReservation {
                resource_id,
                principal_id,
            } => ReservationError::DuplicateReservation {
                resource_id,
                principal_id,
            },
            other => ReservationError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_store_errors_keep_their_meaning() {
        assert!(matches!(
            ReservationError::from(StoreError::LockTimeout),
            ReservationError::LockTimeout
        ));
        assert!(matches!(
            ReservationError::from(StoreError::Unavailable("down".into())),
            ReservationError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn unique_violation_becomes_duplicate() {
        let principal_id = PrincipalId::new();
        let err = ReservationError::from(StoreError::DuplicateReservation {
            resource_id: ResourceId::new(1),
            principal_id,
        });
        assert!(matches!(
            err,
            ReservationError::DuplicateReservation { principal_id: p, .. } if p == principal_id
        ));
    }

    #[test]
    fn only_infrastructure_failures_are_retryable() {
        assert!(ReservationError::LockTimeout.is_retryable());
        assert!(ReservationError::StoreUnavailable("down".into()).is_retryable());
        assert!(
            !ReservationError::CapacityExceeded {
                resource_id: ResourceId::new(1),
                capacity: 3,
            }
            .is_retryable()
        );
        assert!(
            !ReservationError::Store(StoreError::InvalidResource("x".into())).is_retryable()
        );
    }

    #[test]
    fn not_found_names_the_missing_entity() {
        let err = ReservationError::NotFound(NotFoundKind::Reservation(ReservationId::new(12)));
        assert_eq!(err.to_string(), "Not found: reservation 12");
        assert_eq!(err.reason(), "reservation_not_found");
    }
}
