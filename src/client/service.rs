use super::{ProviderClient, RequestOpts};
use crate::error::Error;
use crate::transport::HttpResponse;

use http::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A base client narrowed to the endpoint of one service
#[derive(Debug, Clone)]
pub struct ServiceClient {
    provider: ProviderClient,
    pub service_type: String,
    /// the catalogue endpoint, always ending with a slash
    pub endpoint: String,
    /// prefix for resource URLs, usually the same as `endpoint`
    pub resource_base: String,
}

/// Parses a JSON response body. An empty body parses as `null`.
pub fn parse_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, Error> {
    let body = response.body();
    if body.is_empty() {
        Ok(serde_json::from_value(Value::Null)?)
    } else {
        Ok(serde_json::from_slice(body.as_ref())?)
    }
}

impl ServiceClient {
    pub fn new(
        provider: ProviderClient,
        service_type: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> ServiceClient {
        let endpoint = super::catalog::normalize_url(endpoint.into().as_str());
        ServiceClient {
            provider,
            service_type: service_type.into(),
            resource_base: endpoint.clone(),
            endpoint,
        }
    }

    pub fn with_resource_base(mut self, resource_base: impl Into<String>) -> ServiceClient {
        self.resource_base = super::catalog::normalize_url(resource_base.into().as_str());
        self
    }

    pub fn provider(&self) -> &ProviderClient {
        &self.provider
    }

    pub fn project_id(&self) -> &str {
        self.provider.project_id()
    }

    pub fn domain_id(&self) -> &str {
        self.provider.domain_id()
    }

    /// Joins the parts onto the resource base: `service_url(&["volumes", id])`. Every part
    /// is a single path segment and gets percent-encoded.
    pub fn service_url(&self, parts: &[&str]) -> String {
        let segments = parts
            .iter()
            .map(|part| urlencoding::encode(part))
            .collect::<Vec<_>>();
        format!("{}{}", self.resource_base, segments.join("/"))
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        opts: RequestOpts,
    ) -> Result<HttpResponse, Error> {
        self.provider.request(method, url, opts).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let response = self
            .request(Method::GET, url, RequestOpts::default().ok_codes(&[200, 203]))
            .await?;
        parse_json(&response)
    }

    pub async fn post_json<T: DeserializeOwned>(&self, url: &str, body: Value) -> Result<T, Error> {
        let response = self
            .request(Method::POST, url, RequestOpts::json(body))
            .await?;
        parse_json(&response)
    }

    /// POST where the response body is irrelevant
    pub async fn post(&self, url: &str, body: Value) -> Result<(), Error> {
        self.request(Method::POST, url, RequestOpts::json(body))
            .await
            .map(|_| ())
    }

    pub async fn put_json<T: DeserializeOwned>(&self, url: &str, body: Value) -> Result<T, Error> {
        let response = self
            .request(Method::PUT, url, RequestOpts::json(body))
            .await?;
        parse_json(&response)
    }

    pub async fn delete(&self, url: &str) -> Result<(), Error> {
        self.request(Method::DELETE, url, RequestOpts::default())
            .await
            .map(|_| ())
    }

    pub async fn delete_with_body(&self, url: &str, body: Value) -> Result<(), Error> {
        self.request(Method::DELETE, url, RequestOpts::json(body))
            .await
            .map(|_| ())
    }
}
