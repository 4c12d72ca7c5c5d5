//! HTTP plumbing shared by every client. Requests and responses are fully buffered as
//! `Bytes`, which lets the retrying transport re-send the identical body on every attempt.
pub mod debug;
pub mod retry;
pub mod signer;

use crate::config::TlsConfig;
use crate::error::{ConfigError, TransportError};
use crate::metrics::ClientMetrics;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::client::{Client as HyperClient, HttpConnector};
use hyper::Body;
use hyper_openssl::HttpsConnector;

use std::sync::Arc;
use std::time::Instant;

pub use self::retry::RetryingTransport;

pub type HttpRequest = http::Request<Bytes>;
pub type HttpResponse = http::Response<Bytes>;

/// A single request/response exchange. An `Err` means that no response was received at all.
#[async_trait]
pub trait RoundTrip: Send + Sync + 'static {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: RoundTrip + ?Sized> RoundTrip for Arc<T> {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).round_trip(request).await
    }
}

/// Makes a copy of a buffered request, used for retries and redirects
pub fn clone_request(request: &HttpRequest) -> HttpRequest {
    let mut builder = http::Request::builder()
        .method(request.method().clone())
        .uri(request.uri().clone())
        .version(request.version());
    if let Some(headers) = builder.headers_mut() {
        headers.extend(
            request
                .headers()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
    }
    // the parts were all taken from a valid request
    builder
        .body(request.body().clone())
        .unwrap_or_else(|_| http::Request::new(request.body().clone()))
}

#[derive(Debug, Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>>,
    metrics: ClientMetrics,
}

impl HyperTransport {
    pub fn new(tls: &TlsConfig, metrics: ClientMetrics) -> Result<HyperTransport, ConfigError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let ssl = tls.connector()?;
        let https = HttpsConnector::with_connector(http, ssl)?;
        let client = HyperClient::builder().build(https);
        Ok(HyperTransport { client, metrics })
    }
}

#[async_trait]
impl RoundTrip for HyperTransport {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let start_time = Instant::now();
        let method = request.method().clone();
        let uri = request.uri().clone();
        let (parts, body) = request.into_parts();
        let request = http::Request::from_parts(parts, Body::from(body));

        let timer = self.metrics.request_started();
        let result = self.client.request(request).await;
        let duration = start_time.elapsed().as_millis();
        timer.observe_duration();
        let response = match result {
            Ok(response) => {
                log::debug!(
                    "Response status received for {} to: {}, status: {}, duration: {}ms",
                    method,
                    uri,
                    response.status().as_u16(),
                    duration
                );
                response
            }
            Err(err) => {
                log::error!(
                    "Failed to execute {} request to: {}, err: {}",
                    method,
                    uri,
                    err
                );
                return Err(err.into());
            }
        };
        let (parts, body) = response.into_parts();
        let body = hyper::body::to_bytes(body).await?;
        Ok(http::Response::from_parts(parts, body))
    }
}
