//! Provider configuration. A `Config` is assembled from the attributes the host passes to
//! `configure`, then `load` fills whatever is still missing from the `OS_*` environment and
//! from a `clouds.yaml` file. `load_and_validate` performs the full sequence and hands back
//! the authenticated `Clients`.
mod clouds;
pub(crate) mod env;
pub mod tls;

use crate::error::{ConfigError, Error};
use crate::metrics::Metrics;
use crate::services::Clients;

use std::fmt::{self, Display};

pub use self::clouds::{find_clouds_file, find_secure_file};
pub use self::tls::{path_or_contents, TlsConfig};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_USER_AGENT: &str = concat!("otc-provider/", env!("CARGO_PKG_VERSION"));

/// Which endpoint of the catalogue a service client should talk to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndpointType {
    Public,
    Internal,
    Admin,
}

impl EndpointType {
    /// Parses the values accepted for `endpoint_type`. The empty string selects the public
    /// endpoint, and the `*URL` spellings are accepted as aliases.
    pub fn parse(value: &str) -> Result<EndpointType, ConfigError> {
        match value {
            "" | "public" | "publicURL" => Ok(EndpointType::Public),
            "internal" | "internalURL" => Ok(EndpointType::Internal),
            "admin" | "adminURL" => Ok(EndpointType::Admin),
            other => Err(ConfigError::InvalidEndpointType(other.to_owned())),
        }
    }

    /// The interface name as it appears in the identity catalogue
    pub fn interface(&self) -> &'static str {
        match *self {
            EndpointType::Public => "public",
            EndpointType::Internal => "internal",
            EndpointType::Admin => "admin",
        }
    }
}

impl Default for EndpointType {
    fn default() -> EndpointType {
        EndpointType::Public
    }
}

impl Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.interface())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CredentialMode {
    Token,
    AkSk,
    Password,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub cloud: String,
    pub identity_endpoint: String,
    pub region: String,

    pub tenant_id: String,
    pub tenant_name: String,
    pub domain_id: String,
    pub domain_name: String,

    pub username: String,
    pub user_id: String,
    pub password: String,
    pub passcode: String,
    pub token: String,
    pub access_key: String,
    pub secret_key: String,
    pub security_token: String,

    pub agency_name: String,
    pub agency_domain_name: String,
    pub delegated_project: String,

    /// CA bundle, as a path or as inline PEM
    pub ca_cert_file: String,
    /// client certificate, as a path or as inline PEM
    pub client_cert_file: String,
    /// client private key, as a path or as inline PEM
    pub client_key_file: String,
    /// unset until given explicitly or loaded, see `insecure()`
    pub insecure: Option<bool>,

    pub endpoint_type: String,
    /// unset until given explicitly or loaded, see `max_retries()`
    pub max_retries: Option<u32>,
    /// prepended to the crate's own user agent
    pub user_agent: String,
    pub allow_reauth: bool,
    /// renders requests and responses at debug level, also enabled by `OS_DEBUG`
    pub debug: Option<bool>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            cloud: String::new(),
            identity_endpoint: String::new(),
            region: String::new(),
            tenant_id: String::new(),
            tenant_name: String::new(),
            domain_id: String::new(),
            domain_name: String::new(),
            username: String::new(),
            user_id: String::new(),
            password: String::new(),
            passcode: String::new(),
            token: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            security_token: String::new(),
            agency_name: String::new(),
            agency_domain_name: String::new(),
            delegated_project: String::new(),
            ca_cert_file: String::new(),
            client_cert_file: String::new(),
            client_key_file: String::new(),
            insecure: None,
            endpoint_type: String::new(),
            max_retries: None,
            user_agent: String::new(),
            allow_reauth: true,
            debug: None,
        }
    }
}

/// Sets `dst` to `value` only if `dst` is still empty. Values the user supplied
/// directly are never overwritten by anything loaded later.
pub fn set_if_empty(dst: &mut String, value: &str) {
    if dst.is_empty() && !value.is_empty() {
        *dst = value.to_owned();
    }
}

impl Config {
    pub fn new(identity_endpoint: impl Into<String>) -> Config {
        Config {
            identity_endpoint: identity_endpoint.into(),
            ..Default::default()
        }
    }

    /// Merges in values from the process environment and the clouds files. Precedence,
    /// highest first: fields that are already set, `OS_*` environment variables, the
    /// selected cloud from `clouds.yaml`, then the same cloud in `secure.yaml`. Flags still
    /// unset afterwards get their defaults.
    pub fn load(&mut self) -> Result<(), ConfigError> {
        self.load_with_env(&env::process_env)
    }

    pub(crate) fn load_with_env(
        &mut self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        env::merge_env(self, lookup)?;

        if !self.cloud.is_empty() {
            let cloud = clouds::load_cloud(self.cloud.as_str(), lookup)?;
            log::debug!("Merging settings from cloud '{}'", self.cloud);
            cloud.merge_into(self);
        }

        if !self.user_id.is_empty() {
            // the identity API rejects requests naming both
            self.username.clear();
        }
        self.insecure.get_or_insert(false);
        self.max_retries.get_or_insert(DEFAULT_MAX_RETRIES);
        self.debug.get_or_insert(false);
        Ok(())
    }

    pub fn insecure(&self) -> bool {
        self.insecure.unwrap_or(false)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    pub fn validate_endpoint(&self) -> Result<EndpointType, ConfigError> {
        EndpointType::parse(self.endpoint_type.as_str())
    }

    pub fn validate_project(&self) -> Result<(), ConfigError> {
        if self.tenant_name.is_empty()
            && self.tenant_id.is_empty()
            && self.delegated_project.is_empty()
        {
            Err(ConfigError::MissingProject)
        } else {
            Ok(())
        }
    }

    /// Checks everything that can be checked without talking to the identity service
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity_endpoint.is_empty() {
            return Err(ConfigError::MissingIdentityEndpoint);
        }
        self.validate_endpoint()?;
        self.validate_project()?;
        self.credential_mode()?;
        if self.client_cert_file.is_empty() != self.client_key_file.is_empty() {
            return Err(ConfigError::InvalidTls(
                "'cert' and 'key' must be provided together".to_owned(),
            ));
        }
        Ok(())
    }

    /// Exactly one credential mode is used. A static token wins over an access key pair,
    /// which wins over a password.
    pub fn credential_mode(&self) -> Result<CredentialMode, ConfigError> {
        if !self.token.is_empty() {
            Ok(CredentialMode::Token)
        } else if !self.access_key.is_empty() && !self.secret_key.is_empty() {
            Ok(CredentialMode::AkSk)
        } else if !self.access_key.is_empty() || !self.secret_key.is_empty() {
            Err(ConfigError::Invalid(
                "'access_key' and 'secret_key' must be provided together".to_owned(),
            ))
        } else if !self.password.is_empty()
            && (!self.username.is_empty() || !self.user_id.is_empty())
        {
            Ok(CredentialMode::Password)
        } else {
            Err(ConfigError::MissingCredentials)
        }
    }

    pub fn has_agency(&self) -> bool {
        !self.agency_name.is_empty()
    }

    /// The region to use when the caller does not pass one explicitly. OTC project names
    /// are prefixed with their region, e.g. `eu-de_myproject`.
    pub fn default_region(&self) -> String {
        if !self.region.is_empty() {
            return self.region.clone();
        }
        region_from_project(self.tenant_name.as_str())
            .unwrap_or_default()
            .to_owned()
    }

    pub fn full_user_agent(&self) -> String {
        if self.user_agent.is_empty() {
            DEFAULT_USER_AGENT.to_owned()
        } else {
            format!("{} {}", self.user_agent, DEFAULT_USER_AGENT)
        }
    }

    /// Runs `load`, `validate`, then authenticates both base clients.
    pub async fn load_and_validate(self) -> Result<Clients, Error> {
        self.load_and_validate_with_metrics(Metrics::new()).await
    }

    pub async fn load_and_validate_with_metrics(mut self, metrics: Metrics) -> Result<Clients, Error> {
        self.load()?;
        self.validate()?;
        Clients::authenticate_with_metrics(self, metrics).await
    }
}

/// The default project of a region carries the region name itself, other projects are
/// prefixed with it: `eu-de_myproject`.
pub(crate) fn region_from_project(project_name: &str) -> Option<&str> {
    project_name
        .split('_')
        .next()
        .filter(|region| !region.is_empty())
}
