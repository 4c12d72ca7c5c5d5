//! The authenticated base clients. There are always two of them: one scoped to the project
//! (used by regional services) and one scoped to the domain (used by account level
//! services). Both share the same retrying transport.
pub mod catalog;
pub mod service;

use crate::config::EndpointType;
use crate::error::{ApiError, AuthError, Error};
use crate::identity::{Authenticated, Scope};
use crate::metrics::ClientMetrics;
use crate::transport::signer::{Signer, SDK_DATE_HEADER};
use crate::transport::{HttpRequest, HttpResponse, RoundTrip};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, HOST, LOCATION, USER_AGENT};
use http::{Method, StatusCode};
use serde_json::Value;

use std::fmt::{self, Debug};
use std::sync::{Arc, RwLock};

pub use self::catalog::{EndpointOpts, ServiceCatalog};
pub use self::service::ServiceClient;

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
const MAX_REDIRECTS: usize = 10;

/// Re-runs the authentication flow that produced the client
pub type ReauthFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Authenticated, Error>> + Send + Sync>;

/// Options for a single request made through a base client
#[derive(Debug, Clone, Default)]
pub struct RequestOpts {
    pub json_body: Option<Value>,
    pub raw_body: Option<Bytes>,
    /// accepted statuses; any 2xx when empty
    pub ok_codes: Vec<u16>,
    pub headers: Vec<(HeaderName, String)>,
    /// skips the token header and the signature, used by the identity flows themselves
    pub omit_auth: bool,
}

impl RequestOpts {
    pub fn json(body: Value) -> RequestOpts {
        RequestOpts {
            json_body: Some(body),
            ..Default::default()
        }
    }

    pub fn ok_codes(mut self, codes: &[u16]) -> Self {
        self.ok_codes = codes.to_vec();
        self
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.omit_auth = true;
        self
    }

    fn body(&self) -> Result<Bytes, Error> {
        if let Some(json) = self.json_body.as_ref() {
            Ok(Bytes::from(serde_json::to_vec(json)?))
        } else {
            Ok(self.raw_body.clone().unwrap_or_default())
        }
    }

    fn accepts(&self, status: StatusCode) -> bool {
        if self.ok_codes.is_empty() {
            status.is_success()
        } else {
            self.ok_codes.contains(&status.as_u16())
        }
    }
}

/// Everything a base client needs besides the result of the authentication
pub struct ClientSettings {
    pub transport: Arc<dyn RoundTrip>,
    pub identity_endpoint: String,
    pub scope: Scope,
    pub signer: Option<Signer>,
    pub user_agent: String,
    pub region: String,
    pub metrics: ClientMetrics,
}

struct ClientInner {
    transport: Arc<dyn RoundTrip>,
    identity_base: String,
    identity_endpoint: String,
    scope: Scope,
    signer: Option<Signer>,
    user_agent: String,
    region: String,
    project_id: String,
    project_name: String,
    domain_id: String,
    domain_name: String,
    user_id: String,
    token: RwLock<String>,
    catalog: RwLock<ServiceCatalog>,
    reauth: Option<ReauthFn>,
    reauth_lock: tokio::sync::Mutex<()>,
    metrics: ClientMetrics,
}

#[derive(Clone)]
pub struct ProviderClient(Arc<ClientInner>);

impl Debug for ProviderClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProviderClient")
            .field("scope", &self.0.scope)
            .field("identity_endpoint", &self.0.identity_endpoint)
            .field("region", &self.0.region)
            .field("project_id", &self.0.project_id)
            .field("domain_id", &self.0.domain_id)
            .field("aksk", &self.0.signer.is_some())
            .field("reauth", &self.0.reauth.is_some())
            .finish()
    }
}

/// Splits an identity URL such as `https://iam.example.com/v3` into the service root
/// (`https://iam.example.com/`) and the normalized v3 endpoint (`https://iam.example.com/v3/`).
pub fn split_identity_endpoint(url: &str) -> (String, String) {
    let endpoint = catalog::normalize_url(url);
    let trimmed = endpoint.trim_end_matches('/');
    let base = match trimmed.rfind('/') {
        Some(idx) if trimmed[idx + 1..].starts_with('v') && idx > "https://".len() => {
            format!("{}/", &trimmed[..idx])
        }
        _ => endpoint.clone(),
    };
    let endpoint = if base == endpoint {
        format!("{}v3/", base)
    } else {
        endpoint
    };
    (base, endpoint)
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::invalid_input(format!("invalid header value: '{}'", value)))
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

impl ProviderClient {
    pub fn new(
        settings: ClientSettings,
        auth: Authenticated,
        reauth: Option<ReauthFn>,
    ) -> ProviderClient {
        let (identity_base, identity_endpoint) =
            split_identity_endpoint(settings.identity_endpoint.as_str());
        let inner = ClientInner {
            transport: settings.transport,
            identity_base,
            identity_endpoint,
            scope: settings.scope,
            signer: settings.signer,
            user_agent: settings.user_agent,
            region: settings.region,
            project_id: auth.project_id,
            project_name: auth.project_name,
            domain_id: auth.domain_id,
            domain_name: auth.domain_name,
            user_id: auth.user_id,
            token: RwLock::new(auth.token),
            catalog: RwLock::new(auth.catalog),
            reauth,
            reauth_lock: tokio::sync::Mutex::new(()),
            metrics: settings.metrics,
        };
        ProviderClient(Arc::new(inner))
    }

    pub fn token(&self) -> String {
        match self.0.token.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn catalog(&self) -> ServiceCatalog {
        match self.0.catalog.read() {
            Ok(catalog) => catalog.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.0.scope
    }

    pub fn region(&self) -> &str {
        self.0.region.as_str()
    }

    pub fn project_id(&self) -> &str {
        self.0.project_id.as_str()
    }

    pub fn project_name(&self) -> &str {
        self.0.project_name.as_str()
    }

    pub fn domain_id(&self) -> &str {
        self.0.domain_id.as_str()
    }

    pub fn domain_name(&self) -> &str {
        self.0.domain_name.as_str()
    }

    pub fn user_id(&self) -> &str {
        self.0.user_id.as_str()
    }

    /// The identity service root, e.g. `https://iam.eu-de.otc.t-systems.com/`
    pub fn identity_base(&self) -> &str {
        self.0.identity_base.as_str()
    }

    /// The identity v3 endpoint, always ending with `/v3/`
    pub fn identity_endpoint(&self) -> &str {
        self.0.identity_endpoint.as_str()
    }

    pub fn signer(&self) -> Option<&Signer> {
        self.0.signer.as_ref()
    }

    pub fn user_agent(&self) -> &str {
        self.0.user_agent.as_str()
    }

    pub fn transport(&self) -> Arc<dyn RoundTrip> {
        self.0.transport.clone()
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.0.metrics
    }

    /// The callback that renews the token, `None` when reauthentication is disabled or
    /// the credentials do not allow it.
    pub fn reauth_callback(&self) -> Option<ReauthFn> {
        self.0.reauth.clone()
    }

    pub fn locate(&self, service_type: &str, region: &str, availability: EndpointType) -> Result<String, Error> {
        let opts = EndpointOpts {
            service_type,
            region,
            availability,
        };
        let catalog = self.0.catalog.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(catalog.locate(opts)?)
    }

    fn set_authenticated(&self, auth: Authenticated) {
        {
            let mut token = self.0.token.write().unwrap_or_else(|p| p.into_inner());
            *token = auth.token;
        }
        if !auth.catalog.is_empty() {
            let mut catalog = self.0.catalog.write().unwrap_or_else(|p| p.into_inner());
            *catalog = auth.catalog;
        }
    }

    /// Renews the token unconditionally
    pub async fn reauthenticate(&self) -> Result<(), Error> {
        let current = self.token();
        self.reauthenticate_if_current(current.as_str()).await
    }

    /// Renews the token unless another caller already replaced `stale_token` while we were
    /// waiting for the lock.
    async fn reauthenticate_if_current(&self, stale_token: &str) -> Result<(), Error> {
        let reauth = self.0.reauth.as_ref().ok_or_else(|| {
            AuthError::Unsupported("reauthentication is not enabled for this client".to_owned())
        })?;
        let _guard = self.0.reauth_lock.lock().await;
        if self.token() != stale_token {
            log::debug!("Token was already renewed by a concurrent request");
            return Ok(());
        }
        log::info!("Renewing {} scoped token", self.0.scope);
        let auth = reauth().await?;
        self.set_authenticated(auth);
        self.0.metrics.reauthenticated();
        Ok(())
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        opts: &RequestOpts,
        body: Bytes,
    ) -> Result<HttpRequest, Error> {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, self.0.user_agent.as_str());
        if !body.is_empty() && opts.json_body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let mut request = builder.body(body)?;
        for (name, value) in opts.headers.iter() {
            request
                .headers_mut()
                .insert(name.clone(), header_value(value.as_str())?);
        }
        if !opts.omit_auth {
            self.authorize(&mut request)?;
        }
        Ok(request)
    }

    fn authorize(&self, request: &mut HttpRequest) -> Result<(), Error> {
        if let Some(signer) = self.0.signer.as_ref() {
            signer.sign(request)?;
        } else {
            let token = self.token();
            if !token.is_empty() {
                request.headers_mut().insert(
                    HeaderName::from_static(AUTH_TOKEN_HEADER),
                    header_value(token.as_str())?,
                );
            }
        }
        Ok(())
    }

    /// Builds the follow-up request for a redirect. AK/SK signatures bind the host, so the
    /// new request is signed again. The token only follows redirects to the same host.
    fn redirect_request(
        &self,
        previous: &HttpRequest,
        status: StatusCode,
        location: &str,
        omit_auth: bool,
    ) -> Result<HttpRequest, Error> {
        let base = url::Url::parse(previous.uri().to_string().as_str())
            .map_err(|err| Error::invalid_input(format!("invalid request URL: {}", err)))?;
        let target = base.join(location).map_err(|err| {
            Error::invalid_input(format!("invalid redirect location '{}': {}", location, err))
        })?;

        let see_other = status == StatusCode::SEE_OTHER;
        let method = if see_other {
            Method::GET
        } else {
            previous.method().clone()
        };
        let body = if see_other {
            Bytes::new()
        } else {
            previous.body().clone()
        };
        let same_host = base.host_str() == target.host_str()
            && base.port_or_known_default() == target.port_or_known_default();
        let mut request = http::Request::builder()
            .method(method)
            .uri(target.as_str())
            .body(body)?;
        for (name, value) in previous.headers().iter() {
            if name == AUTHORIZATION || name == HOST || name.as_str() == SDK_DATE_HEADER {
                continue;
            }
            if !same_host && name.as_str() == AUTH_TOKEN_HEADER {
                log::debug!("Dropping the token on redirect to {}", target);
                continue;
            }
            if see_other && name == CONTENT_TYPE {
                continue;
            }
            request.headers_mut().append(name.clone(), value.clone());
        }
        if !omit_auth {
            if let Some(signer) = self.0.signer.as_ref() {
                signer.sign(&mut request)?;
            }
        }
        Ok(request)
    }

    async fn send(&self, mut request: HttpRequest, omit_auth: bool) -> Result<HttpResponse, Error> {
        for _ in 0..=MAX_REDIRECTS {
            let response = self.0.transport.round_trip(crate::transport::clone_request(&request)).await?;
            if !is_redirect(response.status()) {
                return Ok(response);
            }
            let location = match response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
            {
                Some(location) => location.to_owned(),
                None => return Ok(response),
            };
            log::debug!(
                "Following {} redirect from {} to {}",
                response.status().as_u16(),
                request.uri(),
                location
            );
            request = self.redirect_request(&request, response.status(), location.as_str(), omit_auth)?;
        }
        Err(Error::invalid_input(format!(
            "stopped after {} redirects",
            MAX_REDIRECTS
        )))
    }

    /// Sends a request, renewing the token once and replaying the request if the cloud
    /// answers with 401. Statuses not accepted by `opts` are returned as `ApiError`.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        opts: RequestOpts,
    ) -> Result<HttpResponse, Error> {
        let body = opts.body()?;
        let token_used = self.token();
        let request = self.build_request(method.clone(), url, &opts, body.clone())?;
        let mut response = self.send(request, opts.omit_auth).await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && self.0.reauth.is_some()
            && !opts.omit_auth
        {
            log::info!("Received 401 for {} {}, reauthenticating", method, url);
            self.reauthenticate_if_current(token_used.as_str()).await?;
            let request = self.build_request(method.clone(), url, &opts, body)?;
            response = self.send(request, opts.omit_auth).await?;
        }

        if opts.accepts(response.status()) {
            Ok(response)
        } else {
            let body = String::from_utf8_lossy(response.body()).into_owned();
            log::error!(
                "{} request to: {} failed with status: {}, body: {}",
                method,
                url,
                response.status(),
                body
            );
            Err(Error::from(ApiError {
                status: response.status(),
                method,
                url: url.to_owned(),
                body,
            }))
        }
    }
}
