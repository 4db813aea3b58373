use async_trait::async_trait;
use common::{PrincipalId, ResourceId};

use crate::{
    NewPrincipal, NewResource, Principal, Resource, ResourcePage, ResourceUpdate, Result,
};

/// Administrative access to resources and principals.
///
/// This is the only path that writes a resource's capacity. The reservation
/// engine works against [`crate::TransactionCoordinator`] handles, which can
/// read and lock resources but never modify them.
#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn create_resource(&self, new: NewResource) -> Result<Resource>;

    async fn get_resource(&self, id: ResourceId) -> Result<Option<Resource>>;

    /// Lists resources whose name contains `search` (case-insensitive),
    /// newest (highest id) first.
    async fn list_resources(
        &self,
        search: Option<&str>,
        skip: u64,
        take: u64,
    ) -> Result<ResourcePage>;

    /// Applies `update` under the resource's row lock, so a capacity change
    /// never interleaves with a reservation and never drops below the seats
    /// already reserved. Returns `None` when the resource does not exist.
    async fn update_resource(
        &self,
        id: ResourceId,
        update: ResourceUpdate,
    ) -> Result<Option<Resource>>;

    /// Registers a principal. A taken email yields [`crate::StoreError::Conflict`].
    async fn register_principal(&self, new: NewPrincipal) -> Result<Principal>;

    async fn get_principal(&self, id: PrincipalId) -> Result<Option<Principal>>;
}
