//! The reservation engine: create, query and cancel reservations.

use std::time::Instant;

use common::{PrincipalId, ReservationId, ResourceId};
use reservation_store::{
    Reservation, ReservationFilter, ReservationStore, TransactionCoordinator, UnitOfWork,
    with_transaction,
};

use crate::error::{NotFoundKind, ReservationError};
use crate::pagination::{ListResult, Pagination};

/// Enforces capacity, uniqueness and ownership rules on reservations.
///
/// Stateless between calls; all shared state lives in the store behind the
/// coordinator. Capacity-consuming inserts for one resource are serialized
/// by an exclusive lock on that resource's row, so the count-then-insert
/// sequence in [`ReservationEngine::reserve`] cannot oversell. Reservations
/// for different resources never contend.
pub struct ReservationEngine<C: TransactionCoordinator> {
    coordinator: C,
}

impl<C: TransactionCoordinator> ReservationEngine<C> {
    /// Creates a new engine over the given coordinator.
    pub fn new(coordinator: C) -> Self {
        Self { coordinator }
    }

    /// Returns a reference to the underlying coordinator.
    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    /// Reserves one unit of `resource_id`'s capacity for `principal_id`.
    ///
    /// Runs as a single transaction: lock the resource row, check the
    /// principal, re-count under the lock, reject duplicates, insert. Any
    /// failure rolls everything back.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        resource_id: ResourceId,
        principal_id: PrincipalId,
    ) -> Result<Reservation, ReservationError> {
        tracing::debug!("reserve attempt");
        let started = Instant::now();

        let result: Result<Reservation, ReservationError> =
            with_transaction(&self.coordinator, move |tx| {
                Box::pin(reserve_in(tx, resource_id, principal_id))
            })
            .await;

        metrics::histogram!("reservation_reserve_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(reservation) => {
                metrics::counter!("reservations_created_total").increment(1);
                tracing::info!(reservation_id = %reservation.id, "reservation created");
            }
            Err(err) => {
                metrics::counter!("reservations_rejected_total", "reason" => err.reason())
                    .increment(1);
                if err.is_retryable() {
                    tracing::warn!(error = %err, "reserve aborted by infrastructure failure");
                }
            }
        }
        result
    }

    /// Loads a reservation by id. Reads the live store, no transaction.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_id(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        let mut handle = self.coordinator.read_only().await?;
        match handle.find_by_id(id).await? {
            Some(reservation) => Ok(reservation),
            None => {
                tracing::warn!("reservation not found");
                Err(ReservationError::NotFound(NotFoundKind::Reservation(id)))
            }
        }
    }

    /// Lists reservations matching `filter`, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list(
        &self,
        filter: ReservationFilter,
        pagination: Pagination,
    ) -> Result<ListResult, ReservationError> {
        let mut handle = self.coordinator.read_only().await?;
        let page = handle
            .find_many(
                filter,
                pagination.offset(),
                u64::from(pagination.limit()),
            )
            .await?;

        tracing::debug!(total = page.total, returned = page.items.len(), "list ok");
        Ok(ListResult {
            items: page.items,
            total: page.total,
            page: pagination.page(),
            limit: pagination.limit(),
        })
    }

    /// Cancels a reservation on behalf of its owner.
    ///
    /// The reservation row is locked before the ownership check, so two
    /// concurrent cancels of the same id yield one success and one
    /// `NotFound`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        id: ReservationId,
        principal_id: PrincipalId,
    ) -> Result<(), ReservationError> {
        tracing::debug!("cancel attempt");

        let result: Result<(), ReservationError> = with_transaction(&self.coordinator, move |tx| {
            Box::pin(cancel_in(tx, id, principal_id))
        })
        .await;

        match &result {
            Ok(()) => {
                metrics::counter!("reservations_cancelled_total").increment(1);
                tracing::info!("reservation cancelled");
            }
            Err(err) => {
                metrics::counter!("reservation_cancel_rejected_total", "reason" => err.reason())
                    .increment(1);
            }
        }
        result
    }
}

async fn reserve_in<H: UnitOfWork>(
    tx: &mut H,
    resource_id: ResourceId,
    principal_id: PrincipalId,
) -> Result<Reservation, ReservationError> {
    let Some(resource) = tx.lock_resource(resource_id).await? else {
        tracing::warn!("resource not found");
        return Err(ReservationError::NotFound(NotFoundKind::Resource(
            resource_id,
        )));
    };

    if !tx.principal_exists(principal_id).await? {
        tracing::warn!("principal not found");
        return Err(ReservationError::NotFound(NotFoundKind::Principal(
            principal_id,
        )));
    }

    let taken = tx.count_by_resource(resource_id).await?;
    if !has_free_seat(taken, resource.capacity) {
        tracing::warn!(taken, capacity = resource.capacity, "no seats available");
        return Err(ReservationError::CapacityExceeded {
            resource_id,
            capacity: resource.capacity,
        });
    }

    if let Some(existing) = tx
        .find_by_resource_and_principal(resource_id, principal_id)
        .await?
    {
        tracing::warn!(existing = %existing.id, "duplicate reservation");
        return Err(ReservationError::DuplicateReservation {
            resource_id,
            principal_id,
        });
    }

    Ok(tx.create(resource_id, principal_id).await?)
}

/// A capacity that is not positive admits no reservation.
fn has_free_seat(taken: u64, capacity: i32) -> bool {
    u64::try_from(capacity).is_ok_and(|capacity| taken < capacity)
}

async fn cancel_in<H: UnitOfWork>(
    tx: &mut H,
    id: ReservationId,
    principal_id: PrincipalId,
) -> Result<(), ReservationError> {
    let not_found = || ReservationError::NotFound(NotFoundKind::Reservation(id));

    let Some(reservation) = tx.lock_reservation(id).await? else {
        tracing::warn!("reservation not found");
        return Err(not_found());
    };

    if reservation.principal_id != principal_id {
        tracing::warn!(owner = %reservation.principal_id, "cancel forbidden");
        return Err(ReservationError::Forbidden {
            reservation_id: id,
            principal_id,
        });
    }

    if !tx.delete(id).await? {
        return Err(not_found());
    }
    Ok(())
}
