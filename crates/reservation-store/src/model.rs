use chrono::{DateTime, Utc};
use common::{PrincipalId, ReservationId, ResourceId};
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// A capacity-limited resource (an event with a fixed number of seats).
///
/// Capacity is managed by the administrative path; the reservation
/// engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub capacity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single principal's claim on one unit of a resource's capacity.
///
/// Reservations are immutable; the only mutation is deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub resource_id: ResourceId,
    pub principal_id: PrincipalId,
    pub created_at: DateTime<Utc>,
}

/// Definition of a resource to be created through the admin path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResource {
    pub name: String,
    pub capacity: i32,
}

impl NewResource {
    pub fn new(name: impl Into<String>, capacity: i32) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }

    /// Checks the name is non-blank and the capacity admits at least one seat.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidResource(
                "name must not be empty".to_string(),
            ));
        }
        if self.capacity < 1 {
            return Err(StoreError::InvalidResource(format!(
                "capacity must be at least 1, got {}",
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Partial update of a resource. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceUpdate {
    pub name: Option<String>,
    pub capacity: Option<i32>,
}

impl ResourceUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn capacity(mut self, capacity: i32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.capacity.is_none()
    }

    /// Checks the update carries at least one field and each present field
    /// satisfies the same rules as [`NewResource::validate`].
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(StoreError::InvalidResource("nothing to update".to_string()));
        }
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(StoreError::InvalidResource(
                "name must not be empty".to_string(),
            ));
        }
        if let Some(capacity) = self.capacity
            && capacity < 1
        {
            return Err(StoreError::InvalidResource(format!(
                "capacity must be at least 1, got {capacity}"
            )));
        }
        Ok(())
    }

    /// Rejects a capacity below the number of reservations already held.
    pub fn check_capacity(&self, taken: u64) -> Result<()> {
        if let Some(capacity) = self.capacity
            && i64::from(capacity) < taken as i64
        {
            return Err(StoreError::InvalidResource(format!(
                "capacity {capacity} is below the {taken} seats already reserved"
            )));
        }
        Ok(())
    }

    pub(crate) fn apply(self, resource: &mut Resource) {
        if let Some(name) = self.name {
            resource.name = name;
        }
        if let Some(capacity) = self.capacity {
            resource.capacity = capacity;
        }
    }
}

/// One page of resources plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePage {
    pub items: Vec<Resource>,
    pub total: u64,
}

/// A registered principal (a user who may hold reservations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_LEN: usize = 100;

/// Definition of a principal to be registered.
///
/// The email is trimmed and lowercased on construction; a blank name
/// becomes `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrincipal {
    pub email: String,
    pub name: Option<String>,
}

impl NewPrincipal {
    pub fn new(email: impl AsRef<str>, name: Option<&str>) -> Self {
        Self {
            email: email.as_ref().trim().to_lowercase(),
            name: name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let email = &self.email;
        if email.len() > MAX_EMAIL_LEN {
            return Err(StoreError::InvalidPrincipal(format!(
                "email must be at most {MAX_EMAIL_LEN} characters"
            )));
        }
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !email.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(StoreError::InvalidPrincipal(format!(
                "invalid email address: {email}"
            )));
        }
        if self
            .name
            .as_deref()
            .is_some_and(|name| name.chars().count() > MAX_NAME_LEN)
        {
            return Err(StoreError::InvalidPrincipal(format!(
                "name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// One page of reservations plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPage {
    pub items: Vec<Reservation>,
    /// Filtered count, independent of pagination.
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_resource_rejects_zero_capacity() {
        let err = NewResource::new("Concert", 0).validate().unwrap_err();
        assert!(matches!(err, StoreError::InvalidResource(_)));
    }

    #[test]
    fn new_resource_rejects_blank_name() {
        assert!(NewResource::new("   ", 10).validate().is_err());
    }

    #[test]
    fn new_resource_accepts_single_seat() {
        assert!(NewResource::new("Masterclass", 1).validate().is_ok());
    }

    #[test]
    fn empty_update_is_rejected() {
        let err = ResourceUpdate::default().validate().unwrap_err();
        assert!(matches!(err, StoreError::InvalidResource(_)));
        assert!(ResourceUpdate::default().name(" ").validate().is_err());
        assert!(ResourceUpdate::default().capacity(0).validate().is_err());
        assert!(ResourceUpdate::default().capacity(3).validate().is_ok());
    }

    #[test]
    fn capacity_cannot_drop_below_reserved_seats() {
        let update = ResourceUpdate::default().capacity(2);
        assert!(update.check_capacity(2).is_ok());
        assert!(update.check_capacity(3).is_err());
        assert!(ResourceUpdate::default().name("Renamed").check_capacity(50).is_ok());
    }

    #[test]
    fn new_principal_normalizes_email_and_name() {
        let new = NewPrincipal::new("  Ada@Example.COM ", Some("   "));
        assert_eq!(new.email, "ada@example.com");
        assert_eq!(new.name, None);
        assert!(new.validate().is_ok());
    }

    #[test]
    fn new_principal_rejects_malformed_email() {
        for email in ["", "ada", "@example.com", "ada@example", "ada@@example.com", "a da@example.com"] {
            let err = NewPrincipal::new(email, None).validate().unwrap_err();
            assert!(matches!(err, StoreError::InvalidPrincipal(_)), "{email}");
        }
    }

    #[test]
    fn new_principal_limits_lengths() {
        let long_email = format!("{}@example.com", "a".repeat(250));
        assert!(NewPrincipal::new(long_email, None).validate().is_err());

        let long_name = "n".repeat(101);
        assert!(
            NewPrincipal::new("ada@example.com", Some(&long_name))
                .validate()
                .is_err()
        );
    }
}
