//! A resource provider for the Open Telekom Cloud. It authenticates against the identity
//! service, builds clients for the regional services, and drives the lifecycle of cloud
//! resources (create, read, update, delete, import) on behalf of an infrastructure-as-code
//! host.
//!
//! The host configures a `Provider` once, then plans and applies changes per resource:
//! ```no_run
//! use otc_provider::serde_json::json;
//! use otc_provider::{Context, Error, Provider};
//!
//! async fn grow_volume() -> Result<(), Error> {
//!     let provider = Provider::new();
//!     let ctx = Context::background();
//!     // anything missing here is loaded from `OS_*` variables and clouds.yaml
//!     provider
//!         .configure(&ctx, json!({"cloud": "otc", "region": "eu-de"}))
//!         .await?;
//!
//!     let prior = provider
//!         .create(&ctx, "blockstorage_volume_v2", json!({"name": "data", "size": 10}))
//!         .await?;
//!     let planned = json!({"name": "data", "size": 20});
//!     let plan = provider.plan("blockstorage_volume_v2", &prior, &planned)?;
//!     println!("{}", plan);
//!     provider
//!         .update(&ctx, "blockstorage_volume_v2", prior, planned)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! Lower level building blocks are public as well: `Config::load_and_validate` yields the
//! authenticated `Clients`, whose service clients speak to the cloud APIs directly.

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate lazy_static;

pub mod client;
pub mod config;
pub mod error;
pub mod helpers;
pub mod identity;
pub mod metrics;
pub mod obs;
pub mod provider;
pub mod resource;
pub mod services;
pub mod tags;
pub mod transport;
pub mod waiter;

#[cfg(test)]
mod testutil;

pub use serde_json;

pub use crate::config::Config;
pub use crate::error::Error;
pub use crate::provider::Provider;
pub use crate::services::Clients;
pub use crate::waiter::Context;
