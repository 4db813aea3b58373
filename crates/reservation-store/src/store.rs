use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use common::{PrincipalId, ReservationId, ResourceId};
use futures_util::future::BoxFuture;

use crate::{Reservation, ReservationFilter, ReservationPage, Resource, Result, StoreError};

/// How a transaction behaves when the row it wants to lock is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Wait for the holder, bounded by [`TransactionOptions::lock_timeout`].
    #[default]
    Wait,
    /// Fail immediately with [`StoreError::LockTimeout`].
    NoWait,
}

impl FromStr for LockMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(LockMode::Wait),
            "nowait" | "no_wait" | "no-wait" => Ok(LockMode::NoWait),
            other => Err(format!("unknown lock mode: {other}")),
        }
    }
}

/// Time bounds and locking behaviour applied to every transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Maximum wait for a single row lock.
    pub lock_timeout: Duration,
    /// Maximum duration of a whole unit of work, commit included.
    pub transaction_timeout: Duration,
    pub lock_mode: LockMode,
}

impl TransactionOptions {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            transaction_timeout: Duration::from_secs(15),
            lock_mode: LockMode::Wait,
        }
    }
}

/// Read access to resources.
#[async_trait]
pub trait ResourceStore: Send {
    /// Looks up a resource without locking it.
    async fn find_resource(&mut self, id: ResourceId) -> Result<Option<Resource>>;

    /// Looks up a resource and takes an exclusive lock on its row until the
    /// enclosing transaction ends. On a live handle this is a plain read.
    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<Resource>>;
}

/// Existence checks for principals.
#[async_trait]
pub trait IdentityStore: Send {
    async fn principal_exists(&mut self, id: PrincipalId) -> Result<bool>;
}

/// Reservation persistence primitives. No business rules live here.
#[async_trait]
pub trait ReservationStore: Send {
    async fn count_by_resource(&mut self, resource_id: ResourceId) -> Result<u64>;

    async fn find_by_resource_and_principal(
        &mut self,
        resource_id: ResourceId,
        principal_id: PrincipalId,
    ) -> Result<Option<Reservation>>;

    async fn find_by_id(&mut self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Looks up a reservation and locks its row until the enclosing
    /// transaction ends. A row deleted by a transaction that committed while
    /// we waited is reported as absent.
    async fn lock_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Lists reservations matching `filter`, newest (highest id) first.
    async fn find_many(
        &mut self,
        filter: ReservationFilter,
        skip: u64,
        take: u64,
    ) -> Result<ReservationPage>;

    async fn create(
        &mut self,
        resource_id: ResourceId,
        principal_id: PrincipalId,
    ) -> Result<Reservation>;

    /// Deletes a reservation. Returns false when no row was removed.
    async fn delete(&mut self, id: ReservationId) -> Result<bool>;
}

/// A data handle the coordinator hands out: either bound to a live
/// connection or scoped to a transaction. Store code is written once
/// against this trait and runs unchanged on both.
#[async_trait]
pub trait UnitOfWork: ResourceStore + IdentityStore + ReservationStore {
    /// Makes all writes of this handle visible and releases its locks.
    /// A no-op on live handles.
    async fn commit(self) -> Result<()>;

    /// Discards all writes of this handle and releases its locks.
    /// A no-op on live handles.
    async fn rollback(self) -> Result<()>;
}

/// Hands out data handles with atomicity and isolation guarantees.
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    type Handle: UnitOfWork + 'static;

    /// Options applied to every transaction this coordinator opens.
    fn options(&self) -> &TransactionOptions;

    /// Opens a transaction-scoped handle.
    async fn begin(&self) -> Result<Self::Handle>;

    /// Returns a handle bound to the live connection, for reads that
    /// tolerate staleness.
    async fn read_only(&self) -> Result<Self::Handle>;
}

/// Runs `work` inside a transaction.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err` and
/// hands that error back unchanged. The whole unit of work, commit included,
/// is bounded by [`TransactionOptions::transaction_timeout`]; exceeding it
/// drops the transaction (releasing its locks) and yields
/// [`StoreError::LockTimeout`].
pub async fn with_transaction<C, T, E, F>(coordinator: &C, work: F) -> std::result::Result<T, E>
where
    C: TransactionCoordinator + ?Sized,
    T: Send,
    E: From<StoreError> + Send,
    F: for<'h> FnOnce(&'h mut C::Handle) -> BoxFuture<'h, std::result::Result<T, E>> + Send,
{
    let budget = coordinator.options().transaction_timeout;

    let unit = async {
        let mut handle = coordinator.begin().await?;
        match work(&mut handle).await {
            Ok(value) => {
                handle.commit().await?;
                Ok::<T, E>(value)
            }
            Err(err) => {
                if let Err(rollback_err) = handle.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    };

    match tokio::time::timeout(budget, unit).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(budget_ms = budget.as_millis() as u64, "transaction timed out");
            Err(StoreError::LockTimeout.into())
        }
    }
}
