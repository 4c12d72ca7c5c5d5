//! The authenticated configuration and its per-service client constructors.
//!
//! Regional services resolve their endpoint from the catalogue of the project scoped client,
//! account level services (identity, tag management) from the domain scoped one. Clients are
//! cheap to create and are never cached.
use crate::client::{ProviderClient, ServiceClient};
use crate::config::{region_from_project, Config, EndpointType, TlsConfig};
use crate::error::Error;
use crate::identity::{self, Negotiator, Scope};
use crate::metrics::Metrics;
use crate::transport::{HyperTransport, RetryingTransport, RoundTrip};

use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Clients {
    config: Arc<Config>,
    project: ProviderClient,
    domain: ProviderClient,
    metrics: Metrics,
    endpoint_type: EndpointType,
}

/// Replaces the first occurrence of `/{from}/` in the endpoint path
fn replace_version(endpoint: &str, from: &str, to: &str) -> String {
    let from = format!("/{}/", from);
    let to = format!("/{}/", to);
    endpoint.replacen(from.as_str(), to.as_str(), 1)
}

/// `https://cce.eu-de.otc.t-systems.com/api/v3/projects/p1/` -> `https://cce.eu-de.otc.t-systems.com/`
fn endpoint_root(endpoint: &str) -> Result<String, Error> {
    let url = url::Url::parse(endpoint)
        .map_err(|err| Error::invalid_input(format!("invalid endpoint '{}': {}", endpoint, err)))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::invalid_input(format!("endpoint '{}' has no host", endpoint)))?;
    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
        None => format!("{}://{}/", url.scheme(), host),
    })
}

impl Clients {
    /// Builds the transport stack from the configuration and authenticates both base clients
    pub async fn authenticate(config: Config) -> Result<Clients, Error> {
        Clients::authenticate_with_metrics(config, Metrics::new()).await
    }

    pub async fn authenticate_with_metrics(config: Config, metrics: Metrics) -> Result<Clients, Error> {
        let tls = TlsConfig::from_config(&config)?;
        let transport = HyperTransport::new(&tls, metrics.client_metrics())?;
        let transport = RetryingTransport::new(transport, config.max_retries(), metrics.client_metrics())
            .with_debug(config.debug());
        Clients::authenticate_with_transport(config, Arc::new(transport), metrics).await
    }

    /// Authenticates both base clients over an existing transport
    pub async fn authenticate_with_transport(
        mut config: Config,
        transport: Arc<dyn RoundTrip>,
        metrics: Metrics,
    ) -> Result<Clients, Error> {
        let endpoint_type = config.validate_endpoint()?;
        let negotiator = Negotiator::new(transport, config.full_user_agent(), metrics.client_metrics());

        let project = identity::authenticate(&config, Scope::Project, &negotiator).await?;
        if config.region.is_empty() {
            config.region = project.region().to_owned();
        }

        // the domain flow needs a domain, which the project token always names
        let domain = if config.domain_id.is_empty() && config.domain_name.is_empty() {
            let mut domain_config = config.clone();
            domain_config.domain_id = project.domain_id().to_owned();
            identity::authenticate(&domain_config, Scope::Domain, &negotiator).await?
        } else {
            identity::authenticate(&config, Scope::Domain, &negotiator).await?
        };

        Ok(Clients {
            config: Arc::new(config),
            project,
            domain,
            metrics,
            endpoint_type,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(config: Config, project: ProviderClient, domain: ProviderClient) -> Clients {
        Clients {
            config: Arc::new(config),
            project,
            domain,
            metrics: Metrics::new(),
            endpoint_type: EndpointType::Public,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_client(&self) -> &ProviderClient {
        &self.project
    }

    pub fn domain_client(&self) -> &ProviderClient {
        &self.domain
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn endpoint_type(&self) -> EndpointType {
        self.endpoint_type
    }

    /// The configured region, or the one derived from the project name
    pub fn region(&self) -> &str {
        self.config.region.as_str()
    }

    fn region_or_default<'a>(&'a self, region: &'a str) -> &'a str {
        if region.is_empty() {
            self.region()
        } else {
            region
        }
    }

    fn service(
        &self,
        base: &ProviderClient,
        service_type: &str,
        region: &str,
    ) -> Result<ServiceClient, Error> {
        let region = self.region_or_default(region);
        let endpoint = base.locate(service_type, region, self.endpoint_type)?;
        Ok(ServiceClient::new(base.clone(), service_type, endpoint))
    }

    fn regional(&self, service_type: &str, region: &str) -> Result<ServiceClient, Error> {
        self.service(&self.project, service_type, region)
    }

    /// Identity v3 API, scoped to the domain
    pub fn identity_v3(&self) -> ServiceClient {
        let endpoint = format!("{}v3/", self.domain.identity_base());
        ServiceClient::new(self.domain.clone(), "identity", endpoint)
    }

    /// OTC extensions of the identity API live under `v3.0/`
    pub fn identity_v30(&self) -> ServiceClient {
        let endpoint = format!("{}v3.0/", self.domain.identity_base());
        ServiceClient::new(self.domain.clone(), "identity", endpoint)
    }

    pub fn compute_v2(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("compute", region)
    }

    pub fn ecs_v1(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("ecs", region)
    }

    pub fn ecs_v11(&self, region: &str) -> Result<ServiceClient, Error> {
        let client = self.ecs_v1(region)?;
        let endpoint = replace_version(client.endpoint.as_str(), "v1", "v1.1");
        Ok(ServiceClient::new(client.provider().clone(), "ecs", endpoint))
    }

    pub fn blockstorage_v2(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("volumev2", region)
    }

    pub fn blockstorage_v3(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("volumev3", region)
    }

    /// Elastic volume service, used for volume tags
    pub fn evs_v2(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("evs", region)
    }

    pub fn networking_v1(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("vpc", region)
    }

    pub fn networking_v2(&self, region: &str) -> Result<ServiceClient, Error> {
        let client = self.regional("network", region)?;
        let base = format!("{}v2.0/", client.endpoint);
        Ok(client.with_resource_base(base))
    }

    pub fn dns_v2(&self, region: &str) -> Result<ServiceClient, Error> {
        let client = self.regional("dns", region)?;
        let base = format!("{}v2/", client.endpoint);
        Ok(client.with_resource_base(base))
    }

    /// ELB v2 shares the networking endpoint
    pub fn elb_v2(&self, region: &str) -> Result<ServiceClient, Error> {
        self.networking_v2(region)
    }

    pub fn elb_v3(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("elbv3", region)
    }

    pub fn cce_v3(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("ccev2.0", region)
    }

    /// Addons are served from `api/v3/` at the root of the CCE endpoint
    pub fn cce_addon_v3(&self, region: &str) -> Result<ServiceClient, Error> {
        let client = self.cce_v3(region)?;
        let base = format!("{}api/v3/", endpoint_root(client.endpoint.as_str())?);
        Ok(client.with_resource_base(base))
    }

    pub fn css_v1(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("css", region)
    }

    pub fn dds_v3(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("ddsv3", region)
    }

    pub fn antiddos_v1(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("antiddos", region)
    }

    pub fn cbr_v3(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("cbr", region)
    }

    pub fn dws_v1(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("dws", region)
    }

    pub fn dws_v2(&self, region: &str) -> Result<ServiceClient, Error> {
        let client = self.dws_v1(region)?;
        let endpoint = replace_version(client.endpoint.as_str(), "v1.0", "v2");
        Ok(ServiceClient::new(client.provider().clone(), "dws", endpoint))
    }

    pub fn sdrs_v1(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("sdrs", region)
    }

    /// Tag management is an account level service
    pub fn tms_v1(&self) -> Result<ServiceClient, Error> {
        self.service(&self.domain, "tms", "")
    }

    pub fn cts_v1(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("cts", region)
    }

    pub fn smn_v2(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("smn", region)
    }

    pub fn rds_v3(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("rdsv3", region)
    }

    pub fn object_storage(&self, region: &str) -> Result<ServiceClient, Error> {
        self.regional("object", region)
    }

    /// Authenticates a second set of clients for another project of the same account.
    /// Runs the complete authentication again, so callers should hold on to the result.
    pub async fn for_project(&self, project_name: &str) -> Result<Clients, Error> {
        let mut config = (*self.config).clone();
        config.load()?;
        config.tenant_name = project_name.to_owned();
        config.tenant_id.clear();
        if let Some(region) = region_from_project(project_name) {
            config.region = region.to_owned();
        }
        config.validate()?;
        log::info!("Authenticating additional clients for project '{}'", project_name);
        Clients::authenticate_with_transport(config, self.project.transport(), self.metrics.clone())
            .await
    }

    pub async fn cts_v1_for_project(&self, project_name: &str, region: &str) -> Result<ServiceClient, Error> {
        self.for_project(project_name).await?.cts_v1(region)
    }

    pub async fn smn_v2_for_project(&self, project_name: &str, region: &str) -> Result<ServiceClient, Error> {
        self.for_project(project_name).await?.smn_v2(region)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::AUTH_TOKEN_HEADER;
    use crate::identity::SUBJECT_TOKEN_HEADER;
    use crate::testutil::{clients, MockCloud};
    use http::Method;
    use serde_json::json;

    #[tokio::test]
    async fn clients_for_another_project_reuse_the_credentials() {
        let cloud = MockCloud::new();
        cloud.on(
            Method::GET,
            "/v3/auth/tokens",
            200,
            json!({"token": {
                "catalog": [{"type": "cts", "endpoints": [
                    {"interface": "public", "region": "eu-nl", "url": "https://cts.example.com/v1.0/p2"}
                ]}],
                "project": {"id": "p2", "name": "eu-nl_audit", "domain": {"id": "d1", "name": "dom"}},
                "user": {"id": "u1", "domain": {"id": "d1"}}
            }}),
        );
        let base = clients(cloud.clone());
        let audit = base.for_project("eu-nl_audit").await.unwrap();

        assert_eq!("p2", audit.project_client().project_id());
        assert_eq!("eu-nl_audit", audit.config().tenant_name);
        assert_eq!("eu-nl", audit.region());
        assert_eq!("d1", audit.domain_client().domain_id());
        assert_eq!("", audit.domain_client().project_id());
        assert_eq!(
            "https://cts.example.com/v1.0/p2/",
            audit.cts_v1("").unwrap().endpoint
        );
        // the original clients are untouched
        assert_eq!("p1", base.project_client().project_id());
        assert_eq!("eu-de", base.region());

        let requests = cloud.requests();
        assert_eq!(2, requests.len());
        for request in requests.iter() {
            assert_eq!("/v3/auth/tokens", request.path);
            assert_eq!("t1", request.headers[SUBJECT_TOKEN_HEADER]);
            assert_eq!("t1", request.headers[AUTH_TOKEN_HEADER]);
        }
    }

    #[test]
    fn versions_are_rewritten_in_the_path_only() {
        assert_eq!(
            "https://dws.example.com/v2/p1/",
            replace_version("https://dws.example.com/v1.0/p1/", "v1.0", "v2")
        );
        assert_eq!(
            "https://ecs.example.com/v1.1/p1/",
            replace_version("https://ecs.example.com/v1/p1/", "v1", "v1.1")
        );
        assert_eq!(
            "https://v1.example.com/v1.1/p1/",
            replace_version("https://v1.example.com/v1/p1/", "v1", "v1.1")
        );
    }

    #[test]
    fn endpoint_root_keeps_the_port() {
        assert_eq!(
            "https://cce.example.com/",
            endpoint_root("https://cce.example.com/api/v3/projects/p1/").unwrap()
        );
        assert_eq!(
            "http://127.0.0.1:8080/",
            endpoint_root("http://127.0.0.1:8080/v3/p1/").unwrap()
        );
        assert!(endpoint_root("not a url").is_err());
    }
}
