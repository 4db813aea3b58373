use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use common::{PrincipalId, ReservationId, ResourceId};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    AdminStore, NewPrincipal, NewResource, Principal, Reservation, ReservationFilter,
    ReservationPage, Resource, ResourcePage, ResourceUpdate, Result, StoreError,
    store::{
        IdentityStore, LockMode, ReservationStore, ResourceStore, TransactionCoordinator,
        TransactionOptions, UnitOfWork,
    },
};

type RowLock = Arc<Mutex<()>>;

/// Committed state.
#[derive(Debug, Default)]
struct Tables {
    resources: BTreeMap<ResourceId, Resource>,
    principals: HashMap<PrincipalId, Principal>,
    reservations: BTreeMap<ReservationId, Reservation>,
}

/// One lock per row id, created on first use.
///
/// The table itself sits behind a blocking mutex that is never held across
/// an await, so entries can be pruned from `Drop`.
struct RowLocks<K> {
    rows: std::sync::Mutex<HashMap<K, RowLock>>,
}

impl<K: Eq + Hash + Copy> RowLocks<K> {
    fn new() -> Self {
        Self {
            rows: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, RowLock>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row(&self, key: K) -> RowLock {
        self.entries().entry(key).or_default().clone()
    }

    /// Drops the lock entry once nobody holds or waits on it.
    fn forget(&self, key: K) {
        let mut rows = self.entries();
        if rows.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            rows.remove(&key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries().len()
    }
}

struct Shared {
    tables: RwLock<Tables>,
    resource_locks: RowLocks<ResourceId>,
    reservation_locks: RowLocks<ReservationId>,
    next_resource_id: AtomicI64,
    next_reservation_id: AtomicI64,
    unavailable: AtomicBool,
}

impl Shared {
    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory stores and transaction coordinator.
///
/// Mirrors the PostgreSQL backend: per-row exclusive locks bounded by the
/// configured timeout, writes staged per transaction and published on
/// commit, and a unique `(resource, principal)` check at insert and commit.
/// Used by tests, benches and the database-less binary.
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
    options: TransactionOptions,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store with default transaction options.
    pub fn new() -> Self {
        Self::with_options(TransactionOptions::default())
    }

    /// Creates an empty store with the given transaction options.
    pub fn with_options(options: TransactionOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                resource_locks: RowLocks::new(),
                reservation_locks: RowLocks::new(),
                next_resource_id: AtomicI64::new(1),
                next_reservation_id: AtomicI64::new(1),
                unavailable: AtomicBool::new(false),
            }),
            options,
        }
    }

    /// Registers a principal with a fresh id and a generated email
    /// (stand-in for the identity service).
    pub async fn create_principal(&self) -> Result<PrincipalId> {
        let id = PrincipalId::new();
        self.add_principal(id).await?;
        Ok(id)
    }

    /// Registers a principal with a known id and a generated email.
    pub async fn add_principal(&self, id: PrincipalId) -> Result<()> {
        self.insert_principal(id, NewPrincipal::new(format!("user-{id}@example.test"), None))
            .await?;
        Ok(())
    }

    async fn insert_principal(&self, id: PrincipalId, new: NewPrincipal) -> Result<Principal> {
        self.shared.ensure_available()?;
        new.validate()?;

        let mut tables = self.shared.tables.write().await;
        if tables.principals.values().any(|p| p.email == new.email) {
            return Err(StoreError::Conflict(format!(
                "email {} is already in use",
                new.email
            )));
        }

        let now = Utc::now();
        let principal = Principal {
            id,
            email: new.email,
            name: new.name,
            created_at: now,
            updated_at: now,
        };
        tables.principals.insert(id, principal.clone());
        Ok(principal)
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of committed reservations.
    pub async fn reservation_count(&self) -> usize {
        self.shared.tables.read().await.reservations.len()
    }
}

#[async_trait]
impl TransactionCoordinator for InMemoryStore {
    type Handle = MemoryHandle;

    fn options(&self) -> &TransactionOptions {
        &self.options
    }

    async fn begin(&self) -> Result<MemoryHandle> {
        self.shared.ensure_available()?;
        Ok(MemoryHandle {
            shared: self.shared.clone(),
            mode: Mode::Transaction(Box::new(TxState {
                options: self.options.clone(),
                locks: HeldLocks::new(self.shared.clone()),
                inserted: Vec::new(),
                deleted: HashSet::new(),
            })),
        })
    }

    async fn read_only(&self) -> Result<MemoryHandle> {
        self.shared.ensure_available()?;
        Ok(MemoryHandle {
            shared: self.shared.clone(),
            mode: Mode::Live,
        })
    }
}

#[async_trait]
impl AdminStore for InMemoryStore {
    async fn create_resource(&self, new: NewResource) -> Result<Resource> {
        self.shared.ensure_available()?;
        new.validate()?;

        let now = Utc::now();
        let id = ResourceId::new(self.shared.next_resource_id.fetch_add(1, Ordering::SeqCst));
        let resource = Resource {
            id,
            name: new.name,
            capacity: new.capacity,
            created_at: now,
            updated_at: now,
        };
        self.shared
            .tables
            .write()
            .await
            .resources
            .insert(id, resource.clone());
        Ok(resource)
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>> {
        self.shared.ensure_available()?;
        Ok(self.shared.tables.read().await.resources.get(&id).cloned())
    }

    async fn list_resources(
        &self,
        search: Option<&str>,
        skip: u64,
        take: u64,
    ) -> Result<ResourcePage> {
        self.shared.ensure_available()?;
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let tables = self.shared.tables.read().await;
        let matching: Vec<&Resource> = tables
            .resources
            .values()
            .rev()
            .filter(|r| {
                needle
                    .as_deref()
                    .is_none_or(|needle| r.name.to_lowercase().contains(needle))
            })
            .collect();

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(skip as usize)
            .take(take as usize)
            .cloned()
            .collect();

        Ok(ResourcePage { items, total })
    }

    async fn update_resource(
        &self,
        id: ResourceId,
        update: ResourceUpdate,
    ) -> Result<Option<Resource>> {
        update.validate()?;

        let mut handle = self.begin().await?;
        if handle.lock_resource(id).await?.is_none() {
            return Ok(None);
        }
        update.check_capacity(handle.count_by_resource(id).await?)?;

        let mut tables = self.shared.tables.write().await;
        let Some(resource) = tables.resources.get_mut(&id) else {
            return Ok(None);
        };
        update.apply(resource);
        resource.updated_at = Utc::now();
        Ok(Some(resource.clone()))
    }

    async fn register_principal(&self, new: NewPrincipal) -> Result<Principal> {
        self.insert_principal(PrincipalId::new(), new).await
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        self.shared.ensure_available()?;
        Ok(self.shared.tables.read().await.principals.get(&id).cloned())
    }
}

/// Row locks held by one transaction.
///
/// Dropping it releases every guard and prunes the lock tables without
/// awaiting, so the locks are also freed when a transaction future is
/// cancelled mid-flight.
struct HeldLocks {
    shared: Arc<Shared>,
    resources: HashMap<ResourceId, OwnedMutexGuard<()>>,
    reservations: HashMap<ReservationId, OwnedMutexGuard<()>>,
}

impl HeldLocks {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            resources: HashMap::new(),
            reservations: HashMap::new(),
        }
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let resources: Vec<ResourceId> = self.resources.keys().copied().collect();
        let reservations: Vec<ReservationId> = self.reservations.keys().copied().collect();
        self.resources.clear();
        self.reservations.clear();

        for id in resources {
            self.shared.resource_locks.forget(id);
        }
        for id in reservations {
            self.shared.reservation_locks.forget(id);
        }
    }
}

struct TxState {
    options: TransactionOptions,
    locks: HeldLocks,
    inserted: Vec<Reservation>,
    deleted: HashSet<ReservationId>,
}

impl TxState {
    fn hides(&self, id: ReservationId) -> bool {
        self.deleted.contains(&id)
    }
}

enum Mode {
    Live,
    Transaction(Box<TxState>),
}

/// Data handle of the in-memory store.
///
/// Dropping a transactional handle without committing discards its staged
/// writes and releases its row locks.
pub struct MemoryHandle {
    shared: Arc<Shared>,
    mode: Mode,
}

async fn acquire<K: Eq + Hash + Copy>(
    locks: &RowLocks<K>,
    key: K,
    options: &TransactionOptions,
) -> Result<OwnedMutexGuard<()>> {
    let lock = locks.row(key);
    let acquired = match options.lock_mode {
        LockMode::NoWait => lock.try_lock_owned().map_err(|_| StoreError::LockTimeout),
        LockMode::Wait => tokio::time::timeout(options.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout),
    };
    if acquired.is_err() {
        locks.forget(key);
    }
    acquired
}

impl MemoryHandle {
    /// Committed rows this handle can see, followed by its own staged inserts.
    fn visible<'a>(
        &'a self,
        tables: &'a Tables,
    ) -> impl Iterator<Item = &'a Reservation> + 'a {
        let tx: Option<&TxState> = match &self.mode {
            Mode::Live => None,
            Mode::Transaction(tx) => Some(&**tx),
        };
        let staged: &[Reservation] = tx.map(|tx| tx.inserted.as_slice()).unwrap_or_default();
        tables
            .reservations
            .values()
            .filter(move |r| tx.is_none_or(|tx| !tx.hides(r.id)))
            .chain(staged.iter())
    }

    async fn find_visible(&self, id: ReservationId) -> Option<Reservation> {
        let tables = self.shared.tables.read().await;
        self.visible(&tables).find(|r| r.id == id).cloned()
    }
}

#[async_trait]
impl ResourceStore for MemoryHandle {
    async fn find_resource(&mut self, id: ResourceId) -> Result<Option<Resource>> {
        self.shared.ensure_available()?;
        Ok(self.shared.tables.read().await.resources.get(&id).cloned())
    }

    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<Resource>> {
        if self.find_resource(id).await?.is_none() {
            return Ok(None);
        }

        if let Mode::Transaction(tx) = &mut self.mode
            && !tx.locks.resources.contains_key(&id)
        {
            let guard = acquire(&self.shared.resource_locks, id, &tx.options).await?;
            tx.locks.resources.insert(id, guard);
        }

        // Re-read under the lock.
        self.find_resource(id).await
    }
}

#[async_trait]
impl IdentityStore for MemoryHandle {
    async fn principal_exists(&mut self, id: PrincipalId) -> Result<bool> {
        self.shared.ensure_available()?;
        Ok(self
            .shared
            .tables
            .read()
            .await
            .principals
            .contains_key(&id))
    }
}

#[async_trait]
impl ReservationStore for MemoryHandle {
    async fn count_by_resource(&mut self, resource_id: ResourceId) -> Result<u64> {
        self.shared.ensure_available()?;
        let tables = self.shared.tables.read().await;
        Ok(self
            .visible(&tables)
            .filter(|r| r.resource_id == resource_id)
            .count() as u64)
    }

    async fn find_by_resource_and_principal(
        &mut self,
        resource_id: ResourceId,
        principal_id: PrincipalId,
    ) -> Result<Option<Reservation>> {
        self.shared.ensure_available()?;
        let tables = self.shared.tables.read().await;
        Ok(self
            .visible(&tables)
            .find(|r| r.resource_id == resource_id && r.principal_id == principal_id)
            .cloned())
    }

    async fn find_by_id(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        self.shared.ensure_available()?;
        Ok(self.find_visible(id).await)
    }

    async fn lock_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        self.shared.ensure_available()?;
        if self.find_visible(id).await.is_none() {
            return Ok(None);
        }

        if let Mode::Transaction(tx) = &mut self.mode
            && !tx.locks.reservations.contains_key(&id)
        {
            let guard = acquire(&self.shared.reservation_locks, id, &tx.options).await?;
            tx.locks.reservations.insert(id, guard);
        }

        // The holder we waited for may have deleted the row.
        Ok(self.find_visible(id).await)
    }

    async fn find_many(
        &mut self,
        filter: ReservationFilter,
        skip: u64,
        take: u64,
    ) -> Result<ReservationPage> {
        self.shared.ensure_available()?;
        let tables = self.shared.tables.read().await;
        let mut matching: Vec<Reservation> = self
            .visible(&tables)
            .filter(|r| filter.matches(r.resource_id, r.principal_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(skip as usize)
            .take(take as usize)
            .collect();

        Ok(ReservationPage { items, total })
    }

    async fn create(
        &mut self,
        resource_id: ResourceId,
        principal_id: PrincipalId,
    ) -> Result<Reservation> {
        self.shared.ensure_available()?;

        let mut tables = self.shared.tables.write().await;
        if !tables.resources.contains_key(&resource_id) {
            return Err(StoreError::DanglingReference(format!(
                "resource {resource_id} does not exist"
            )));
        }
        if !tables.principals.contains_key(&principal_id) {
            return Err(StoreError::DanglingReference(format!(
                "principal {principal_id} does not exist"
            )));
        }
        if self
            .visible(&tables)
            .any(|r| r.resource_id == resource_id && r.principal_id == principal_id)
        {
            return Err(StoreError::DuplicateReservation {
                resource_id,
                principal_id,
            });
        }

        let reservation = Reservation {
            id: ReservationId::new(
                self.shared
                    .next_reservation_id
                    .fetch_add(1, Ordering::SeqCst),
            ),
            resource_id,
            principal_id,
            created_at: Utc::now(),
        };

        match &mut self.mode {
            Mode::Live => {
                tables
                    .reservations
                    .insert(reservation.id, reservation.clone());
            }
            Mode::Transaction(tx) => tx.inserted.push(reservation.clone()),
        }

        Ok(reservation)
    }

    async fn delete(&mut self, id: ReservationId) -> Result<bool> {
        self.shared.ensure_available()?;

        let mut tables = self.shared.tables.write().await;
        match &mut self.mode {
            Mode::Live => Ok(tables.reservations.remove(&id).is_some()),
            Mode::Transaction(tx) => {
                if let Some(pos) = tx.inserted.iter().position(|r| r.id == id) {
                    tx.inserted.remove(pos);
                    return Ok(true);
                }
                if tables.reservations.contains_key(&id) && !tx.hides(id) {
                    tx.deleted.insert(id);
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryHandle {
    async fn commit(self) -> Result<()> {
        let MemoryHandle { shared, mode } = self;
        let Mode::Transaction(tx) = mode else {
            return Ok(());
        };
        shared.ensure_available()?;

        let TxState {
            locks,
            inserted,
            deleted,
            ..
        } = *tx;

        {
            let mut tables = shared.tables.write().await;

            // Unique (resource, principal) constraint, checked against rows
            // committed after our insert was staged.
            for staged in &inserted {
                let clash = tables.reservations.values().any(|r| {
                    !deleted.contains(&r.id)
                        && r.resource_id == staged.resource_id
                        && r.principal_id == staged.principal_id
                });
                if clash {
                    return Err(StoreError::DuplicateReservation {
                        resource_id: staged.resource_id,
                        principal_id: staged.principal_id,
                    });
                }
            }

            for id in &deleted {
                tables.reservations.remove(id);
            }
            for reservation in inserted {
                tables.reservations.insert(reservation.id, reservation);
            }
        }

        // Locks are released only after the writes are visible, and nothing
        // is awaited past this point: once published, the commit cannot be
        // cut short by a caller's timeout.
        drop(locks);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Dropping the handle discards staged writes and releases its locks.
        drop(self);
        Ok(())
    }
}
