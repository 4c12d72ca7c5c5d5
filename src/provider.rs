//! The surface the host talks to: provider configuration, planning and the lifecycle
//! functions of every registered resource type.
use crate::config::Config;
use crate::error::{ConfigError, Error};
use crate::metrics::Metrics;
use crate::resource::antiddos::AntiDdos;
use crate::resource::blockstorage::BlockStorageVolume;
use crate::resource::compute::ComputeInstance;
use crate::resource::floatingip::FloatingIpAssociate;
use crate::resource::sdrs::{ReplicationAttach, ReplicationPairResource};
use crate::resource::{diff, Attribute, InstanceDiff, Resource, ResourceData, Schema, ValueType};
use crate::services::Clients;
use crate::waiter::Context;

use serde_json::{json, Map, Value};

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Everything the host needs to know to render configuration and plans
#[derive(Serialize, Debug, Clone)]
pub struct ProviderSchema {
    pub provider: Schema,
    pub resources: BTreeMap<&'static str, Schema>,
}

fn provider_schema() -> Schema {
    Schema::new(vec![
        Attribute::optional("auth_url", ValueType::String).describe("the identity endpoint, like https://iam.eu-de.otc.t-systems.com/v3"),
        Attribute::optional("region", ValueType::String),
        Attribute::optional("user_name", ValueType::String),
        Attribute::optional("user_id", ValueType::String),
        Attribute::optional("password", ValueType::String).sensitive(),
        Attribute::optional("passcode", ValueType::String).sensitive(),
        Attribute::optional("tenant_name", ValueType::String),
        Attribute::optional("tenant_id", ValueType::String),
        Attribute::optional("domain_name", ValueType::String),
        Attribute::optional("domain_id", ValueType::String),
        Attribute::optional("token", ValueType::String).sensitive(),
        Attribute::optional("access_key", ValueType::String).sensitive(),
        Attribute::optional("secret_key", ValueType::String).sensitive(),
        Attribute::optional("security_token", ValueType::String).sensitive(),
        Attribute::optional("cacert_file", ValueType::String),
        Attribute::optional("cert", ValueType::String),
        Attribute::optional("key", ValueType::String).sensitive(),
        Attribute::optional("insecure", ValueType::Bool).default_value(json!(false)),
        Attribute::optional("endpoint_type", ValueType::String),
        Attribute::optional("cloud", ValueType::String).describe("entry of clouds.yaml to load"),
        Attribute::optional("agency_name", ValueType::String),
        Attribute::optional("agency_domain_name", ValueType::String),
        Attribute::optional("delegated_project", ValueType::String),
        Attribute::optional("max_retries", ValueType::Int).default_value(json!(5)),
        Attribute::optional("allow_reauth", ValueType::Bool).default_value(json!(true)),
    ])
}

/// Maps the provider block onto a `Config`. Unset attributes stay empty so that `load` can
/// fill them from the environment and the clouds files.
pub fn config_from_attributes(attributes: &Map<String, Value>) -> Result<Config, Error> {
    let string = |key: &str| {
        attributes
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned()
    };
    let boolean = |key: &str, default: bool| attributes.get(key).and_then(Value::as_bool).unwrap_or(default);

    let mut config = Config::new(string("auth_url"));
    config.region = string("region");
    config.username = string("user_name");
    config.user_id = string("user_id");
    config.password = string("password");
    config.passcode = string("passcode");
    config.tenant_name = string("tenant_name");
    config.tenant_id = string("tenant_id");
    config.domain_name = string("domain_name");
    config.domain_id = string("domain_id");
    config.token = string("token");
    config.access_key = string("access_key");
    config.secret_key = string("secret_key");
    config.security_token = string("security_token");
    config.ca_cert_file = string("cacert_file");
    config.client_cert_file = string("cert");
    config.client_key_file = string("key");
    config.insecure = attributes.get("insecure").and_then(Value::as_bool);
    config.endpoint_type = string("endpoint_type");
    config.cloud = string("cloud");
    config.agency_name = string("agency_name");
    config.agency_domain_name = string("agency_domain_name");
    config.delegated_project = string("delegated_project");
    config.allow_reauth = boolean("allow_reauth", true);
    if let Some(retries) = attributes.get("max_retries").and_then(Value::as_i64) {
        config.max_retries = Some(u32::try_from(retries).map_err(|_| {
            ConfigError::Invalid(format!("max_retries must not be negative, got {}", retries))
        })?);
    }
    Ok(config)
}

fn into_object(value: Value, what: &str) -> Result<Map<String, Value>, Error> {
    match value {
        Value::Object(object) => Ok(object),
        Value::Null => Ok(Map::new()),
        other => Err(Error::invalid_input(format!(
            "{} must be a JSON object, got: {}",
            what, other
        ))),
    }
}

pub struct Provider {
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    clients: RwLock<Option<Clients>>,
    metrics: Metrics,
}

impl Default for Provider {
    fn default() -> Provider {
        Provider::new()
    }
}

impl Provider {
    /// A provider with all resource types registered and its own metrics registry
    pub fn new() -> Provider {
        Provider::with_metrics(Metrics::new())
    }

    pub fn with_metrics(metrics: Metrics) -> Provider {
        let mut provider = Provider {
            resources: BTreeMap::new(),
            clients: RwLock::new(None),
            metrics,
        };
        provider.register(BlockStorageVolume);
        provider.register(ComputeInstance);
        provider.register(FloatingIpAssociate);
        provider.register(AntiDdos);
        provider.register(ReplicationPairResource);
        provider.register(ReplicationAttach);
        provider
    }

    pub fn register(&mut self, resource: impl Resource + 'static) {
        self.resources.insert(resource.type_name(), Arc::new(resource));
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn resource_types(&self) -> Vec<&'static str> {
        self.resources.keys().copied().collect()
    }

    pub fn schema(&self) -> ProviderSchema {
        ProviderSchema {
            provider: provider_schema(),
            resources: self
                .resources
                .iter()
                .map(|(name, resource)| (*name, resource.schema()))
                .collect(),
        }
    }

    /// Validates the provider block, loads the remaining settings from the environment and
    /// the clouds files, and authenticates. A provider may be configured again, which
    /// replaces its clients.
    pub async fn configure(&self, ctx: &Context, attributes: Value) -> Result<(), Error> {
        let schema = provider_schema();
        let attributes = into_object(attributes, "provider configuration")?;
        schema.validate(&attributes)?;
        // defaults are filled by `load`, after the environment had its say
        let config = config_from_attributes(&attributes)?;

        let clients = ctx
            .run(config.load_and_validate_with_metrics(self.metrics.clone()))
            .await?;
        log::info!(
            "Configured provider for region '{}', project '{}'",
            clients.region(),
            clients.project_client().project_name()
        );
        self.set_clients(clients);
        Ok(())
    }

    /// Uses clients the host authenticated by itself
    pub fn set_clients(&self, clients: Clients) {
        let mut guard = self.clients.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(clients);
    }

    fn clients(&self) -> Result<Clients, Error> {
        let guard = self.clients.read().unwrap_or_else(|p| p.into_inner());
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| ConfigError::NotConfigured.into())
    }

    fn resource(&self, type_name: &str) -> Result<Arc<dyn Resource>, Error> {
        self.resources
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::invalid_input(format!("unsupported resource type '{}'", type_name)))
    }

    /// Validates the planned values and fills in defaults
    fn prepare(resource: &dyn Resource, planned: Value) -> Result<Value, Error> {
        let schema = resource.schema();
        let mut planned = into_object(planned, "planned values")?;
        schema.validate(&planned)?;
        schema.apply_defaults(&mut planned);
        Ok(Value::Object(planned))
    }

    /// Computes what applying `planned` to `prior` would do. `prior` is null for resources
    /// that do not exist yet.
    pub fn plan(&self, type_name: &str, prior: &Value, planned: &Value) -> Result<InstanceDiff, Error> {
        let resource = self.resource(type_name)?;
        let planned = Provider::prepare(resource.as_ref(), planned.clone())?;
        let mut instance_diff = diff(&resource.schema(), prior, &planned);
        resource.customize_diff(&mut instance_diff, prior, &planned)?;
        log::debug!("Plan for {}: {}", type_name, instance_diff);
        Ok(instance_diff)
    }

    async fn observe<F>(&self, ctx: &Context, type_name: &str, operation: &str, future: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), Error>>,
    {
        self.metrics.operation_started(type_name, operation);
        let result = ctx.run(future).await;
        if let Err(err) = result.as_ref() {
            log::error!("Failed to {} {}: {}", operation, type_name, err);
            self.metrics.operation_failed(type_name, operation);
        }
        result
    }

    /// Creates the resource and returns its state
    pub async fn create(&self, ctx: &Context, type_name: &str, planned: Value) -> Result<Value, Error> {
        let resource = self.resource(type_name)?;
        let clients = self.clients()?;
        let planned = Provider::prepare(resource.as_ref(), planned)?;
        let mut data = ResourceData::new(Value::Null, planned)?.with_schema(&resource.schema());
        data.resolve_timeouts(resource.timeouts())?;

        self.observe(ctx, type_name, "create", resource.create(ctx, &clients, &mut data))
            .await?;
        Ok(data.state())
    }

    /// Refreshes the stored state. Returns `Null` when the resource no longer exists.
    pub async fn read(&self, ctx: &Context, type_name: &str, state: Value) -> Result<Value, Error> {
        let resource = self.resource(type_name)?;
        let clients = self.clients()?;
        let mut data = ResourceData::from_state(state)?;
        data.resolve_timeouts(resource.timeouts())?;

        self.observe(ctx, type_name, "read", resource.read(ctx, &clients, &mut data))
            .await?;
        Ok(data.state())
    }

    pub async fn update(&self, ctx: &Context, type_name: &str, prior: Value, planned: Value) -> Result<Value, Error> {
        let resource = self.resource(type_name)?;
        let clients = self.clients()?;
        let planned = Provider::prepare(resource.as_ref(), planned)?;
        let mut data = ResourceData::new(prior, planned)?.with_schema(&resource.schema());
        data.resolve_timeouts(resource.timeouts())?;

        self.observe(ctx, type_name, "update", resource.update(ctx, &clients, &mut data))
            .await?;
        Ok(data.state())
    }

    pub async fn delete(&self, ctx: &Context, type_name: &str, state: Value) -> Result<(), Error> {
        let resource = self.resource(type_name)?;
        let clients = self.clients()?;
        let mut data = ResourceData::from_state(state)?;
        data.resolve_timeouts(resource.timeouts())?;

        self.observe(ctx, type_name, "delete", resource.delete(ctx, &clients, &mut data))
            .await
    }

    /// Imports an existing resource by its ID and returns the state read back from the cloud
    pub async fn import(&self, ctx: &Context, type_name: &str, id: &str) -> Result<Value, Error> {
        let resource = self.resource(type_name)?;
        let clients = self.clients()?;
        let mut data = ResourceData::for_import(id);
        data.resolve_timeouts(resource.timeouts())?;

        let operation = async {
            resource.import(ctx, &clients, &mut data).await?;
            resource.read(ctx, &clients, &mut data).await
        };
        self.observe(ctx, type_name, "import", operation).await?;
        if data.id().is_empty() {
            return Err(Error::invalid_input(format!(
                "cannot import non-existent {} '{}'",
                type_name, id
            )));
        }
        Ok(data.state())
    }
}
