//! Access to the object storage service (OBS), which only understands its own S3 style
//! signature. Token based configurations get temporary access keys from the identity
//! service first.
use crate::config::env::process_env;
use crate::error::{Error, TransportError};
use crate::services::Clients;
use crate::transport::signer::{hmac, AkSk};
use crate::transport::{HttpRequest, RoundTrip};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE, DATE};
use http::{Method, StatusCode};
use openssl::hash::MessageDigest;
use serde_json::json;

use std::sync::Arc;
use std::time::Duration;

pub const OBS_SECURITY_TOKEN_HEADER: &str = "x-obs-security-token";
const OBS_HEADER_PREFIX: &str = "x-obs-";
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize, Debug, Clone, PartialEq)]
struct CredentialResponse {
    credential: TemporaryCredential,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
struct TemporaryCredential {
    access: String,
    secret: String,
    #[serde(default)]
    securitytoken: String,
    #[serde(default)]
    expires_at: String,
}

impl From<TemporaryCredential> for AkSk {
    fn from(credential: TemporaryCredential) -> AkSk {
        AkSk {
            access_key: credential.access,
            secret_key: credential.secret,
            security_token: credential.securitytoken,
        }
    }
}

fn metadata_timeout(lookup: &dyn Fn(&str) -> Option<String>) -> Duration {
    lookup("AWS_METADATA_TIMEOUT")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_METADATA_TIMEOUT)
}

impl Clients {
    /// The credentials used to sign OBS requests. Static keys from the configuration are
    /// passed through; otherwise the instance metadata service is asked when
    /// `AWS_METADATA_URL` is set; otherwise temporary keys are issued for the current token.
    pub async fn obs_credentials(&self) -> Result<AkSk, Error> {
        self.obs_credentials_with_env(&process_env).await
    }

    pub(crate) async fn obs_credentials_with_env(
        &self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<AkSk, Error> {
        let config = self.config();
        if !config.access_key.is_empty() && !config.secret_key.is_empty() {
            return Ok(AkSk {
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
                security_token: config.security_token.clone(),
            });
        }
        if let Some(url) = lookup("AWS_METADATA_URL").filter(|url| !url.is_empty()) {
            let timeout = metadata_timeout(lookup);
            return self.metadata_credentials(url.as_str(), timeout).await;
        }
        self.temporary_credentials().await
    }

    async fn metadata_credentials(&self, url: &str, timeout: Duration) -> Result<AkSk, Error> {
        log::debug!("Fetching OBS credentials from metadata service at {}", url);
        let request = http::Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(Bytes::new())?;
        let transport = self.project_client().transport();
        let response = tokio::time::timeout(timeout, transport.round_trip(request))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        if !response.status().is_success() {
            return Err(Error::invalid_input(format!(
                "metadata service at {} answered with status {}",
                url,
                response.status()
            )));
        }
        let parsed: CredentialResponse = serde_json::from_slice(response.body().as_ref())?;
        Ok(parsed.credential.into())
    }

    async fn temporary_credentials(&self) -> Result<AkSk, Error> {
        let client = self.identity_v30();
        let url = client.service_url(&["OS-CREDENTIAL", "securitytokens"]);
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["token"]
                }
            }
        });
        let parsed: CredentialResponse = client.post_json(url.as_str(), body).await?;
        log::info!(
            "Issued temporary OBS credentials, expiring at {}",
            parsed.credential.expires_at
        );
        Ok(parsed.credential.into())
    }

    /// An OBS client for the region, signed with `obs_credentials`
    pub async fn obs_client(&self, region: &str) -> Result<ObsClient, Error> {
        let credentials = self.obs_credentials().await?;
        let endpoint = self.object_storage(region)?.endpoint;
        Ok(ObsClient::new(
            self.project_client().transport(),
            endpoint,
            ObsSigner::new(credentials),
        ))
    }
}

/// Signs requests with the OBS variant of the S3 v2 signature:
/// `Authorization: OBS <ak>:base64(hmac-sha1(sk, string_to_sign))`
#[derive(Debug, Clone, PartialEq)]
pub struct ObsSigner {
    credentials: AkSk,
}

impl ObsSigner {
    pub fn new(credentials: AkSk) -> ObsSigner {
        ObsSigner { credentials }
    }

    pub fn credentials(&self) -> &AkSk {
        &self.credentials
    }

    /// `resource` is the canonical resource, `/bucket/key` or `/` for the service itself
    pub fn string_to_sign(request: &HttpRequest, resource: &str) -> String {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .trim()
                .to_owned()
        };
        let mut obs_headers = request
            .headers()
            .iter()
            .filter(|(name, _)| name.as_str().starts_with(OBS_HEADER_PREFIX))
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).trim().to_owned(),
                )
            })
            .collect::<Vec<_>>();
        obs_headers.sort();
        let canonical_headers = obs_headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect::<String>();

        format!(
            "{}\n{}\n{}\n{}\n{}{}",
            request.method().as_str(),
            header("content-md5"),
            header(CONTENT_TYPE.as_str()),
            header(DATE.as_str()),
            canonical_headers,
            resource
        )
    }

    pub fn sign(&self, request: &mut HttpRequest, resource: &str) -> Result<(), Error> {
        self.sign_at(request, resource, Utc::now())
    }

    pub fn sign_at(
        &self,
        request: &mut HttpRequest,
        resource: &str,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let date = now.format(HTTP_DATE_FORMAT).to_string();
        let headers = request.headers_mut();
        headers.insert(DATE, header_value(date.as_str())?);
        if !self.credentials.security_token.is_empty() {
            headers.insert(
                OBS_SECURITY_TOKEN_HEADER,
                header_value(self.credentials.security_token.as_str())?,
            );
        }
        let string_to_sign = ObsSigner::string_to_sign(request, resource);
        let signature = hmac(
            MessageDigest::sha1(),
            self.credentials.secret_key.as_bytes(),
            string_to_sign.as_bytes(),
        )?;
        let authorization = format!(
            "OBS {}:{}",
            self.credentials.access_key,
            base64::encode(signature.as_slice())
        );
        request
            .headers_mut()
            .insert(AUTHORIZATION, header_value(authorization.as_str())?);
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::invalid_input(format!("invalid header value: '{}'", value)))
}

/// Path style OBS requests over the shared transport
#[derive(Clone)]
pub struct ObsClient {
    transport: Arc<dyn RoundTrip>,
    endpoint: String,
    signer: ObsSigner,
}

impl ObsClient {
    pub fn new(transport: Arc<dyn RoundTrip>, endpoint: impl Into<String>, signer: ObsSigner) -> ObsClient {
        ObsClient {
            transport,
            endpoint: crate::client::catalog::normalize_url(endpoint.into().as_str()),
            signer,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Returns whether the bucket exists and is accessible. Both 403 and 404 count as absent.
    pub async fn head_bucket(&self, bucket: &str) -> Result<bool, Error> {
        let url = format!("{}{}", self.endpoint, bucket);
        let mut request = http::Request::builder()
            .method(Method::HEAD)
            .uri(url.as_str())
            .body(Bytes::new())?;
        self.signer.sign(&mut request, format!("/{}", bucket).as_str())?;
        let response = self.transport.round_trip(request).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                log::debug!("Bucket '{}' is absent (status {})", bucket, response.status());
                Ok(false)
            }
            status => Err(Error::from(crate::error::ApiError {
                status,
                method: Method::HEAD,
                url,
                body: String::from_utf8_lossy(response.body()).into_owned(),
            })),
        }
    }
}
