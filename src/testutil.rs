//! A scripted cloud for unit tests: canned responses per method and path, and a record of
//! every request that was made.
use crate::client::{ClientSettings, ProviderClient, ServiceCatalog, ServiceClient};
use crate::config::Config;
use crate::error::TransportError;
use crate::identity::{Authenticated, Scope};
use crate::metrics::ClientMetrics;
use crate::services::Clients;
use crate::transport::{HttpRequest, HttpResponse, RoundTrip};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use serde_json::{json, Value};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct Canned {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
}

struct Route {
    method: Method,
    path: String,
    responses: VecDeque<Canned>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

#[derive(Default)]
pub struct MockCloud {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockCloud {
    pub fn new() -> Arc<MockCloud> {
        Arc::new(MockCloud::default())
    }

    /// Queues a response for `method path`. The last queued response is repeated.
    pub fn on(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        self.on_with_headers(method, path, status, body, &[])
    }

    pub fn on_with_headers(
        &self,
        method: Method,
        path: &str,
        status: u16,
        body: Value,
        headers: &[(&'static str, &str)],
    ) -> &Self {
        let body = if body.is_null() {
            Bytes::new()
        } else {
            Bytes::from(serde_json::to_vec(&body).unwrap())
        };
        let canned = Canned {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| (*name, (*value).to_owned()))
                .collect(),
            body,
        };
        let mut routes = self.routes.lock().unwrap();
        match routes
            .iter_mut()
            .find(|route| route.method == method && route.path == path)
        {
            Some(route) => route.responses.push_back(canned),
            None => {
                let mut responses = VecDeque::new();
                responses.push_back(canned);
                routes.push(Route {
                    method,
                    path: path.to_owned(),
                    responses,
                });
            }
        }
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// The recorded requests made with `method`, as paths
    pub fn paths(&self, method: Method) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method)
            .map(|request| request.path)
            .collect()
    }
}

#[async_trait]
impl RoundTrip for MockCloud {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = request.uri().path().to_owned();
        let body = if request.body().is_empty() {
            None
        } else {
            serde_json::from_slice(request.body().as_ref()).ok()
        };
        self.requests.lock().unwrap().push(Recorded {
            method: request.method().clone(),
            path: path.clone(),
            query: request.uri().query().unwrap_or("").to_owned(),
            headers: request.headers().clone(),
            body,
        });

        let mut routes = self.routes.lock().unwrap();
        let canned = match routes
            .iter_mut()
            .find(|route| &route.method == request.method() && route.path == path)
        {
            Some(route) if route.responses.len() > 1 => route.responses.pop_front().unwrap(),
            Some(route) => route.responses[0].clone(),
            None => Canned {
                status: 404,
                headers: Vec::new(),
                body: Bytes::from_static(b"{\"itemNotFound\":{}}"),
            },
        };
        let mut response = http::Response::builder().status(canned.status);
        for (name, value) in canned.headers.iter() {
            response = response.header(*name, value.as_str());
        }
        Ok(response.body(canned.body).unwrap())
    }
}

/// Catalogue entries for the services the resources talk to. Every service has its own path
/// prefix, since `MockCloud` routes on paths only.
pub fn catalog() -> ServiceCatalog {
    let entry = |service_type: &str, url: &str| {
        json!({
            "type": service_type,
            "endpoints": [{"interface": "public", "region": "eu-de", "url": url}]
        })
    };
    serde_json::from_value(json!([
        entry("compute", "https://ecs.example.com/v2.1/p1"),
        entry("ecs", "https://ecs.example.com/v1/p1"),
        entry("volumev2", "https://evs.example.com/v2/p1"),
        entry("evs", "https://evs.example.com/v2/p1"),
        entry("network", "https://vpc.example.com"),
        entry("antiddos", "https://antiddos.example.com/v1/p1"),
        entry("sdrs", "https://sdrs.example.com/v1/p1"),
    ]))
    .unwrap()
}

pub fn provider_client(cloud: Arc<MockCloud>) -> ProviderClient {
    provider_client_with_catalog(cloud, ServiceCatalog::default())
}

pub fn provider_client_with_catalog(cloud: Arc<MockCloud>, catalog: ServiceCatalog) -> ProviderClient {
    let settings = ClientSettings {
        transport: cloud,
        identity_endpoint: "https://iam.example.com/v3".to_owned(),
        scope: Scope::Project,
        signer: None,
        user_agent: "test-agent".to_owned(),
        region: "eu-de".to_owned(),
        metrics: ClientMetrics::default(),
    };
    let auth = Authenticated {
        token: "t1".to_owned(),
        project_id: "p1".to_owned(),
        project_name: "eu-de".to_owned(),
        domain_id: "d1".to_owned(),
        catalog,
        ..Default::default()
    };
    ProviderClient::new(settings, auth, None)
}

pub fn service_client(cloud: Arc<MockCloud>, service_type: &str, endpoint: &str) -> ServiceClient {
    ServiceClient::new(provider_client(cloud), service_type, endpoint)
}

/// Project and domain clients over the mock, with `catalog()` as their catalogue
pub fn clients(cloud: Arc<MockCloud>) -> Clients {
    let config = Config {
        identity_endpoint: "https://iam.example.com/v3".to_owned(),
        region: "eu-de".to_owned(),
        tenant_name: "eu-de".to_owned(),
        token: "t1".to_owned(),
        ..Default::default()
    };
    let project = provider_client_with_catalog(cloud.clone(), catalog());
    let domain = provider_client_with_catalog(cloud, catalog());
    Clients::from_parts(config, project, domain)
}
