use common::{PrincipalId, ResourceId};

/// Filter for listing reservations.
///
/// Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    /// Filter by resource.
    pub resource_id: Option<ResourceId>,

    /// Filter by owning principal.
    pub principal_id: Option<PrincipalId>,
}

impl ReservationFilter {
    /// Creates a filter that matches all reservations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter for a specific resource.
    pub fn for_resource(resource_id: ResourceId) -> Self {
        Self {
            resource_id: Some(resource_id),
            ..Default::default()
        }
    }

    /// Creates a filter for a specific principal.
    pub fn for_principal(principal_id: PrincipalId) -> Self {
        Self {
            principal_id: Some(principal_id),
            ..Default::default()
        }
    }

    /// Filters by resource.
    pub fn resource_id(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    /// Filters by principal.
    pub fn principal_id(mut self, id: PrincipalId) -> Self {
        self.principal_id = Some(id);
        self
    }

    /// Returns true if the given reservation coordinates pass the filter.
    pub fn matches(&self, resource_id: ResourceId, principal_id: PrincipalId) -> bool {
        self.resource_id.is_none_or(|id| id == resource_id)
            && self.principal_id.is_none_or(|id| id == principal_id)
    }
}
