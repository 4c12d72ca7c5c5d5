//! The lifecycle glue between the host and the cloud. Every resource type implements
//! `Resource`; the `Provider` dispatches the host's calls to it with a `ResourceData` bag
//! holding the prior state and the planned values.
pub mod antiddos;
pub mod blockstorage;
pub mod compute;
pub mod data;
pub mod diff;
pub mod floatingip;
pub mod schema;
pub mod sdrs;

use crate::error::Error;
use crate::services::Clients;
use crate::waiter::state::{Refreshed, DELETED};
use crate::waiter::Context;

use async_trait::async_trait;
use serde_json::Value;

pub use self::data::{ResourceData, Timeouts};
pub use self::diff::{diff, AttributeDiff, DiffKind, InstanceDiff};
pub use self::schema::{Attribute, Schema, ValueType};

#[async_trait]
pub trait Resource: Send + Sync {
    /// The name the host knows the resource type by, like `blockstorage_volume_v2`
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Default time limits, overridden by the `timeouts` block of the configuration
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Adjusts a computed diff before the host sees it, typically to force replacement
    /// for changes the cloud cannot apply in place.
    fn customize_diff(
        &self,
        _diff: &mut InstanceDiff,
        _prior: &Value,
        _planned: &Value,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn create(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error>;

    /// Projects the cloud state into `data`. A resource that no longer exists clears the ID.
    async fn read(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error>;

    async fn update(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error>;

    async fn delete(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error>;

    /// Prepares `data` for the read that follows every import. The ID is the cloud ID by
    /// default; resources with compound IDs parse them here.
    async fn import(&self, _ctx: &Context, _clients: &Clients, _data: &mut ResourceData) -> Result<(), Error> {
        Ok(())
    }
}

/// Turns a not-found error into a removed resource: the ID is cleared and the error is
/// swallowed. Everything else is returned unchanged.
pub fn check_deleted(data: &mut ResourceData, err: Error, what: &str) -> Result<(), Error> {
    if err.is_not_found() {
        log::info!("{} {} no longer exists, removing it from state", what, data.id());
        data.clear_id();
        Ok(())
    } else {
        Err(err)
    }
}

/// For refresh functions: a not-found error means the entity reached `DELETED`
pub fn deleted_on_not_found<T: Default>(err: Error) -> Refreshed<T> {
    if err.is_not_found() {
        Ok((T::default(), DELETED.to_owned()))
    } else {
        Err(err)
    }
}

/// The region attribute of the resource, or the provider's region when unset
pub fn get_region(data: &ResourceData, clients: &Clients) -> String {
    match data.get_str("region") {
        "" => clients.region().to_owned(),
        region => region.to_owned(),
    }
}

/// The `region` attribute every regional resource carries
pub(crate) fn region_attribute() -> Attribute {
    Attribute::optional("region", ValueType::String)
        .with_computed()
        .force_new()
}
