use async_trait::async_trait;
use common::{PrincipalId, ReservationId, ResourceId};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    AdminStore, NewPrincipal, NewResource, Principal, Reservation, ReservationFilter,
    ReservationPage, Resource, ResourcePage, ResourceUpdate, Result, StoreError,
    store::{
        IdentityStore, LockMode, ReservationStore, ResourceStore, TransactionCoordinator,
        TransactionOptions, UnitOfWork, with_transaction,
    },
};

const BOOKING_PAIR_CONSTRAINT: &str = "bookings_event_id_user_id_key";
const USER_EMAIL_CONSTRAINT: &str = "users_email_key";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgreSQL-backed stores and transaction coordinator.
///
/// Every transaction sets `lock_timeout` and `statement_timeout` locally so a
/// stalled lock holder cannot block reservation attempts indefinitely.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    options: TransactionOptions,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store with default transaction options.
    pub fn new(pool: PgPool) -> Self {
        Self::with_options(pool, TransactionOptions::default())
    }

    /// Creates a new PostgreSQL store with the given transaction options.
    pub fn with_options(pool: PgPool, options: TransactionOptions) -> Self {
        Self { pool, options }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        options: TransactionOptions,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(options.lock_timeout)
            .connect(database_url)
            .await?;
        Ok(Self::with_options(pool, options))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionCoordinator for PostgresStore {
    type Handle = PgHandle;

    fn options(&self) -> &TransactionOptions {
        &self.options
    }

    async fn begin(&self) -> Result<PgHandle> {
        let mut tx = self.pool.begin().await?;

        // set_config(.., true) is SET LOCAL: reverts at commit/rollback.
        sqlx::query(
            "SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)",
        )
        .bind(format!("{}ms", self.options.lock_timeout.as_millis()))
        .bind(format!("{}ms", self.options.transaction_timeout.as_millis()))
        .execute(&mut *tx)
        .await?;

        Ok(PgHandle::Transaction {
            tx,
            lock_mode: self.options.lock_mode,
        })
    }

    async fn read_only(&self) -> Result<PgHandle> {
        Ok(PgHandle::Live(self.pool.acquire().await?))
    }
}

/// Data handle of the PostgreSQL store: a pooled connection, or an open
/// transaction on one.
pub enum PgHandle {
    Live(PoolConnection<Postgres>),
    Transaction {
        tx: Transaction<'static, Postgres>,
        lock_mode: LockMode,
    },
}

impl PgHandle {
    fn conn(&mut self) -> &mut PgConnection {
        match self {
            PgHandle::Live(conn) => &mut **conn,
            PgHandle::Transaction { tx, .. } => &mut **tx,
        }
    }

    /// Row-lock clause for the current tag. Outside a transaction a lock
    /// would be released immediately, so none is taken.
    fn lock_clause(&self) -> &'static str {
        match self {
            PgHandle::Live(_) => "",
            PgHandle::Transaction {
                lock_mode: LockMode::Wait,
                ..
            } => " FOR UPDATE",
            PgHandle::Transaction {
                lock_mode: LockMode::NoWait,
                ..
            } => " FOR UPDATE NOWAIT",
        }
    }
}

#[async_trait]
impl AdminStore for PostgresStore {
    async fn create_resource(&self, new: NewResource) -> Result<Resource> {
        new.validate()?;

        let row = sqlx::query(
            r#"
            INSERT INTO events (name, total_seats)
            VALUES ($1, $2)
            RETURNING id, name, total_seats, created_at, updated_at
            "#,
        )
        .bind(&new.name)
        .bind(new.capacity)
        .fetch_one(&self.pool)
        .await?;

        row_to_resource(row)
    }

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>> {
        let mut handle = self.read_only().await?;
        handle.find_resource(id).await
    }

    async fn list_resources(
        &self,
        search: Option<&str>,
        skip: u64,
        take: u64,
    ) -> Result<ResourcePage> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let where_sql = if search.is_some() {
            " WHERE strpos(lower(name), lower($1)) > 0"
        } else {
            ""
        };
        let param_count = usize::from(search.is_some());

        let count_sql = format!("SELECT COUNT(*) FROM events{where_sql}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(search) = search {
            count_query = count_query.bind(search);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let items_sql = format!(
            "SELECT id, name, total_seats, created_at, updated_at FROM events{where_sql} ORDER BY id DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );
        let mut items_query = sqlx::query(&items_sql);
        if let Some(search) = search {
            items_query = items_query.bind(search);
        }
        let rows = items_query
            .bind(take as i64)
            .bind(skip as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(row_to_resource)
            .collect::<Result<Vec<_>>>()?;

        Ok(ResourcePage {
            items,
            total: total as u64,
        })
    }

    async fn update_resource(
        &self,
        id: ResourceId,
        update: ResourceUpdate,
    ) -> Result<Option<Resource>> {
        update.validate()?;
        with_transaction(self, move |tx: &mut PgHandle| {
            Box::pin(update_resource_in(tx, id, update))
        })
        .await
    }

    async fn register_principal(&self, new: NewPrincipal) -> Result<Principal> {
        new.validate()?;

        let row = sqlx::query(
            r#"
            INSERT INTO users (id, email, name)
            VALUES ($1, $2, $3)
            RETURNING id, email, name, created_at, updated_at
            "#,
        )
        .bind(PrincipalId::new().as_uuid())
        .bind(&new.email)
        .bind(new.name.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(USER_EMAIL_CONSTRAINT)
            {
                return StoreError::Conflict(format!("email {} is already in use", new.email));
            }
            StoreError::from(e)
        })?;

        row_to_principal(row)
    }

    async fn get_principal(&self, id: PrincipalId) -> Result<Option<Principal>> {
        let row = sqlx::query(
            "SELECT id, email, name, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_principal).transpose()
    }
}

/// Locks the event row, checks the new capacity against the bookings it
/// already holds, then writes.
async fn update_resource_in(
    tx: &mut PgHandle,
    id: ResourceId,
    update: ResourceUpdate,
) -> Result<Option<Resource>> {
    if tx.lock_resource(id).await?.is_none() {
        return Ok(None);
    }
    update.check_capacity(tx.count_by_resource(id).await?)?;

    let row = sqlx::query(
        r#"
        UPDATE events
        SET name = COALESCE($2, name),
            total_seats = COALESCE($3, total_seats),
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, name, total_seats, created_at, updated_at
        "#,
    )
    .bind(id.as_i64())
    .bind(update.name.as_deref())
    .bind(update.capacity)
    .fetch_one(tx.conn())
    .await?;

    row_to_resource(row).map(Some)
}

fn row_to_principal(row: PgRow) -> Result<Principal> {
    Ok(Principal {
        id: PrincipalId::from_uuid(row.try_get::<Uuid, _>("id")?),
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_resource(row: PgRow) -> Result<Resource> {
    Ok(Resource {
        id: ResourceId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        capacity: row.try_get("total_seats")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    Ok(Reservation {
        id: ReservationId::new(row.try_get("id")?),
        resource_id: ResourceId::new(row.try_get("event_id")?),
        principal_id: PrincipalId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ResourceStore for PgHandle {
    async fn find_resource(&mut self, id: ResourceId) -> Result<Option<Resource>> {
        let row = sqlx::query(
            "SELECT id, name, total_seats, created_at, updated_at FROM events WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(self.conn())
        .await?;

        row.map(row_to_resource).transpose()
    }

    async fn lock_resource(&mut self, id: ResourceId) -> Result<Option<Resource>> {
        let sql = format!(
            "SELECT id, name, total_seats, created_at, updated_at FROM events WHERE id = $1{}",
            self.lock_clause()
        );
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(self.conn())
            .await?;

        row.map(row_to_resource).transpose()
    }
}

#[async_trait]
impl IdentityStore for PgHandle {
    async fn principal_exists(&mut self, id: PrincipalId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(self.conn())
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl ReservationStore for PgHandle {
    async fn count_by_resource(&mut self, resource_id: ResourceId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE event_id = $1")
            .bind(resource_id.as_i64())
            .fetch_one(self.conn())
            .await?;
        Ok(count as u64)
    }

    async fn find_by_resource_and_principal(
        &mut self,
        resource_id: ResourceId,
        principal_id: PrincipalId,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query(
            r#"
            SELECT id, event_id, user_id, created_at
            FROM bookings
            WHERE event_id = $1 AND user_id = $2
            "#,
        )
        .bind(resource_id.as_i64())
        .bind(principal_id.as_uuid())
        .fetch_optional(self.conn())
        .await?;

        row.map(row_to_reservation).transpose()
    }

    async fn find_by_id(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let row = sqlx::query("SELECT id, event_id, user_id, created_at FROM bookings WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(self.conn())
            .await?;

        row.map(row_to_reservation).transpose()
    }

    async fn lock_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let sql = format!(
            "SELECT id, event_id, user_id, created_at FROM bookings WHERE id = $1{}",
            self.lock_clause()
        );
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(self.conn())
            .await?;

        row.map(row_to_reservation).transpose()
    }

    async fn find_many(
        &mut self,
        filter: ReservationFilter,
        skip: u64,
        take: u64,
    ) -> Result<ReservationPage> {
        let mut where_sql = String::from(" WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic filter
        if filter.resource_id.is_some() {
            param_count += 1;
            where_sql.push_str(&format!(" AND event_id = ${param_count}"));
        }
        if filter.principal_id.is_some() {
            param_count += 1;
            where_sql.push_str(&format!(" AND user_id = ${param_count}"));
        }

        let count_sql = format!("SELECT COUNT(*) FROM bookings{where_sql}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(id) = filter.resource_id {
            count_query = count_query.bind(id.as_i64());
        }
        if let Some(id) = filter.principal_id {
            count_query = count_query.bind(id.as_uuid());
        }
        let total = count_query.fetch_one(self.conn()).await?;

        let items_sql = format!(
            "SELECT id, event_id, user_id, created_at FROM bookings{where_sql} ORDER BY id DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );
        let mut items_query = sqlx::query(&items_sql);
        if let Some(id) = filter.resource_id {
            items_query = items_query.bind(id.as_i64());
        }
        if let Some(id) = filter.principal_id {
            items_query = items_query.bind(id.as_uuid());
        }
        let rows = items_query
            .bind(take as i64)
            .bind(skip as i64)
            .fetch_all(self.conn())
            .await?;

        let items = rows
            .into_iter()
            .map(row_to_reservation)
            .collect::<Result<Vec<_>>>()?;

        Ok(ReservationPage {
            items,
            total: total as u64,
        })
    }

    async fn create(
        &mut self,
        resource_id: ResourceId,
        principal_id: PrincipalId,
    ) -> Result<Reservation> {
        let row = sqlx::query(
            r#"
            INSERT INTO bookings (event_id, user_id)
            VALUES ($1, $2)
            RETURNING id, event_id, user_id, created_at
            "#,
        )
        .bind(resource_id.as_i64())
        .bind(principal_id.as_uuid())
        .fetch_one(self.conn())
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some(BOOKING_PAIR_CONSTRAINT) {
                    return StoreError::DuplicateReservation {
                        resource_id,
                        principal_id,
                    };
                }
                if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
                    return StoreError::DanglingReference(db_err.message().to_string());
                }
            }
            StoreError::from(e)
        })?;

        row_to_reservation(row)
    }

    async fn delete(&mut self, id: ReservationId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id.as_i64())
            .execute(self.conn())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UnitOfWork for PgHandle {
    async fn commit(self) -> Result<()> {
        if let PgHandle::Transaction { tx, .. } = self {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        if let PgHandle::Transaction { tx, .. } = self {
            tx.rollback().await?;
        }
        Ok(())
    }
}
