//! Page/limit handling for reservation listings.

use reservation_store::Reservation;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// A validated page request. Out-of-range input is clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    limit: u32,
}

impl Pagination {
    /// Clamps `page` to at least 1 and `limit` into `1..=100`.
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: page.clamp(1, i64::from(u32::MAX)) as u32,
            limit: limit.clamp(1, i64::from(MAX_LIMIT)) as u32,
        }
    }

    /// Like [`Pagination::new`], with defaults for missing values.
    pub fn from_optional(page: Option<i64>, limit: Option<i64>) -> Self {
        Self::new(
            page.unwrap_or(i64::from(DEFAULT_PAGE)),
            limit.unwrap_or(i64::from(DEFAULT_LIMIT)),
        )
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of rows to skip: `(page - 1) * limit`.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// One page of a reservation listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResult {
    pub items: Vec<Reservation>,
    /// Filtered count, independent of pagination.
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}
