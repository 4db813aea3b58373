use common::{PrincipalId, ResourceId};
use thiserror::Error;

/// Errors that can occur when interacting with the reservation stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be acquired in time, or the unit of work
    /// exceeded its time budget. Safe to retry.
    #[error("Lock timeout: row lock or transaction budget exceeded")]
    LockTimeout,

    /// The backing store cannot be reached (connection loss, closed pool,
    /// exhausted pool). Safe to retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The unique `(resource, principal)` constraint rejected an insert.
    #[error("Principal {principal_id} already holds a reservation for resource {resource_id}")]
    DuplicateReservation {
        resource_id: ResourceId,
        principal_id: PrincipalId,
    },

    /// A reservation referenced a resource or principal that no longer exists.
    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    /// A resource definition failed validation.
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// A principal definition failed validation.
    #[error("Invalid principal: {0}")]
    InvalidPrincipal(String),

    /// A unique attribute (such as a principal's email) is already taken.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true when the failure is infrastructural and the whole
    /// operation may be retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockTimeout | StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        classify(&err).unwrap_or(StoreError::Database(err))
    }
}

/// Maps connection-level failures and lock/timeout SQLSTATEs onto the
/// transient variants. Everything else stays a plain database error.
fn classify(err: &sqlx::Error) -> Option<StoreError> {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_) => Some(StoreError::Unavailable(err.to_string())),
        sqlx::Error::Database(db_err) => {
            let code = db_err.code()?;
            match code.as_ref() {
                // lock_not_available, query_canceled (statement_timeout), deadlock_detected
                "55P03" | "57014" | "40P01" => Some(StoreError::LockTimeout),
                // admin_shutdown, crash_shutdown, cannot_connect_now
                "57P01" | "57P02" | "57P03" => Some(StoreError::Unavailable(err.to_string())),
                c if c.starts_with("08") => Some(StoreError::Unavailable(err.to_string())),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
