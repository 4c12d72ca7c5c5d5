//! Authentication against the identity v3 service.
//!
//! Three flows are supported, selected by `Config::credential_mode`:
//!
//! * **token**: a pre-issued token is validated with `GET /v3/auth/tokens`, which also
//!   returns the catalogue. The token is used as is.
//! * **AK/SK**: every request is signed, so there is no token at all. Project and domain IDs
//!   are looked up when only names are known, and the catalogue is fetched from
//!   `GET /v3/auth/catalog`.
//! * **password**: `POST /v3/auth/tokens` with the user's password (and passcode for MFA).
//!
//! Each flow runs twice, once with project scope and once with domain scope. When an agency
//! is configured the resulting credentials are exchanged for a token of the delegating
//! account with an `assume_role` request.
mod tokens;

use crate::client::{
    ClientSettings, ProviderClient, ReauthFn, RequestOpts, ServiceCatalog, AUTH_TOKEN_HEADER,
};
use crate::client::service::parse_json;
use crate::config::{region_from_project, Config, CredentialMode};
use crate::error::{AuthError, ConfigError, Error};
use crate::metrics::ClientMetrics;
use crate::transport::signer::{AkSk, Signer};
use crate::transport::{HttpResponse, RoundTrip};

use futures::FutureExt;
use http::header::HeaderName;
use http::Method;
use serde_json::{json, Map, Value};

use std::fmt::{self, Display};
use std::sync::Arc;

use self::tokens::{CatalogResponse, DomainsResponse, ProjectsResponse, TokenResponse};

pub const SUBJECT_TOKEN_HEADER: &str = "x-subject-token";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Project,
    Domain,
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Scope::Project => f.write_str("project"),
            Scope::Domain => f.write_str("domain"),
        }
    }
}

/// The outcome of one successful authentication
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Authenticated {
    /// empty for AK/SK authentication, where requests are signed instead
    pub token: String,
    pub catalog: ServiceCatalog,
    pub project_id: String,
    pub project_name: String,
    pub domain_id: String,
    pub domain_name: String,
    pub user_id: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    Token(String),
    AkSk(AkSk),
    Password {
        user_id: String,
        username: String,
        password: String,
        passcode: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Agency {
    pub name: String,
    pub domain_name: String,
    pub delegated_project: String,
}

/// One of the two authentication records derived from a `Config`. They only differ in
/// `scope`: the project record binds the project, the domain record only the domain.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthOptions {
    pub identity_endpoint: String,
    pub scope: Scope,
    pub credentials: Credentials,
    pub domain_id: String,
    pub domain_name: String,
    pub project_id: String,
    pub project_name: String,
    pub agency: Option<Agency>,
}

impl AuthOptions {
    fn from_config(config: &Config, scope: Scope) -> Result<AuthOptions, ConfigError> {
        let credentials = match config.credential_mode()? {
            CredentialMode::Token => Credentials::Token(config.token.clone()),
            CredentialMode::AkSk => Credentials::AkSk(AkSk {
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
                security_token: config.security_token.clone(),
            }),
            CredentialMode::Password => Credentials::Password {
                user_id: config.user_id.clone(),
                username: config.username.clone(),
                password: config.password.clone(),
                passcode: config.passcode.clone(),
            },
        };
        let agency = if config.has_agency() {
            Some(Agency {
                name: config.agency_name.clone(),
                domain_name: config.agency_domain_name.clone(),
                delegated_project: config.delegated_project.clone(),
            })
        } else {
            None
        };
        let (project_id, project_name) = match scope {
            Scope::Project => (config.tenant_id.clone(), config.tenant_name.clone()),
            Scope::Domain => (String::new(), String::new()),
        };
        Ok(AuthOptions {
            identity_endpoint: crate::client::split_identity_endpoint(
                config.identity_endpoint.as_str(),
            )
            .1,
            scope,
            credentials,
            domain_id: config.domain_id.clone(),
            domain_name: config.domain_name.clone(),
            project_id,
            project_name,
            agency,
        })
    }

    pub fn project(config: &Config) -> Result<AuthOptions, ConfigError> {
        AuthOptions::from_config(config, Scope::Project)
    }

    pub fn domain(config: &Config) -> Result<AuthOptions, ConfigError> {
        AuthOptions::from_config(config, Scope::Domain)
    }

    /// Only flows that yield an expiring token can be repeated usefully
    pub fn supports_reauth(&self) -> bool {
        match self.credentials {
            Credentials::Password { .. } => true,
            _ => self.agency.is_some(),
        }
    }

    fn domain_ref(&self) -> Option<Value> {
        if !self.domain_id.is_empty() {
            Some(json!({ "id": self.domain_id }))
        } else if !self.domain_name.is_empty() {
            Some(json!({ "name": self.domain_name }))
        } else {
            None
        }
    }

    /// The scope of the first token request. With an agency the first token is always
    /// scoped to the user's own domain; the delegated scope comes from `assume_role`.
    pub fn scope_body(&self) -> Result<Value, ConfigError> {
        if self.scope == Scope::Project && self.agency.is_none() {
            if !self.project_id.is_empty() {
                return Ok(json!({ "project": { "id": self.project_id } }));
            }
            let mut project = Map::new();
            project.insert("name".to_owned(), Value::String(self.project_name.clone()));
            if let Some(domain) = self.domain_ref() {
                project.insert("domain".to_owned(), domain);
            }
            return Ok(json!({ "project": project }));
        }
        self.domain_ref()
            .map(|domain| json!({ "domain": domain }))
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "'domain_name' or 'domain_id' is required for domain scoped authentication"
                        .to_owned(),
                )
            })
    }

    pub fn password_request_body(&self) -> Result<Value, ConfigError> {
        let (user_id, username, password, passcode) = match self.credentials {
            Credentials::Password {
                ref user_id,
                ref username,
                ref password,
                ref passcode,
            } => (user_id, username, password, passcode),
            _ => {
                return Err(ConfigError::Invalid(
                    "password authentication requires a password".to_owned(),
                ))
            }
        };
        let mut user = Map::new();
        if !user_id.is_empty() {
            user.insert("id".to_owned(), Value::String(user_id.clone()));
        } else {
            user.insert("name".to_owned(), Value::String(username.clone()));
            let domain = self.domain_ref().ok_or_else(|| {
                ConfigError::Invalid(
                    "'domain_name' or 'domain_id' is required when authenticating with 'user_name'"
                        .to_owned(),
                )
            })?;
            user.insert("domain".to_owned(), domain);
        }
        user.insert("password".to_owned(), Value::String(password.clone()));
        if !passcode.is_empty() {
            user.insert("passcode".to_owned(), Value::String(passcode.clone()));
        }
        Ok(json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": { "user": user }
                },
                "scope": self.scope_body()?
            }
        }))
    }

    /// Exchanges the current credentials for a token of the delegating account
    pub fn assume_role_body(&self) -> Option<Value> {
        let agency = self.agency.as_ref()?;
        let scope = match self.scope {
            Scope::Project => json!({ "project": { "name": agency.delegated_project } }),
            Scope::Domain => json!({ "domain": { "name": agency.domain_name } }),
        };
        Some(json!({
            "auth": {
                "identity": {
                    "methods": ["assume_role"],
                    "assume_role": {
                        "domain_name": agency.domain_name,
                        "xrole_name": agency.name
                    }
                },
                "scope": scope
            }
        }))
    }
}

fn subject_token(response: &HttpResponse) -> Result<String, Error> {
    response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| Error::from(AuthError::MissingToken))
}

/// Turns errors from the identity service into `AuthError`s carrying its message
fn auth_error(err: Error) -> Error {
    match err {
        Error::Api(e) | Error::Conflict(e) => Error::Auth(AuthError::Rejected {
            status: e.status,
            message: e.body,
        }),
        other => other,
    }
}

/// The credentials a base client ends up with
pub struct Session {
    pub auth: Authenticated,
    pub signer: Option<Signer>,
}

/// Runs the authentication flows over a shared transport
#[derive(Clone)]
pub struct Negotiator {
    transport: Arc<dyn RoundTrip>,
    user_agent: String,
    metrics: ClientMetrics,
}

impl Negotiator {
    pub fn new(transport: Arc<dyn RoundTrip>, user_agent: String, metrics: ClientMetrics) -> Negotiator {
        Negotiator {
            transport,
            user_agent,
            metrics,
        }
    }

    /// A client without credentials, used to talk to the identity service during the flows
    fn bootstrap_client(&self, opts: &AuthOptions, signer: Option<Signer>) -> ProviderClient {
        let settings = ClientSettings {
            transport: self.transport.clone(),
            identity_endpoint: opts.identity_endpoint.clone(),
            scope: opts.scope,
            signer,
            user_agent: self.user_agent.clone(),
            region: String::new(),
            metrics: self.metrics.clone(),
        };
        ProviderClient::new(settings, Authenticated::default(), None)
    }

    pub async fn negotiate(&self, opts: &AuthOptions) -> Result<Session, Error> {
        log::debug!(
            "Authenticating {} scope against {}",
            opts.scope,
            opts.identity_endpoint
        );
        let session = match opts.credentials {
            Credentials::Token(ref token) => self.token_flow(opts, token.as_str()).await?,
            Credentials::AkSk(ref credentials) => self.aksk_flow(opts, credentials).await?,
            Credentials::Password { .. } => self.password_flow(opts).await?,
        };
        if opts.agency.is_some() {
            return self.assume_role(opts, session).await;
        }
        Ok(session)
    }

    async fn token_flow(&self, opts: &AuthOptions, token: &str) -> Result<Session, Error> {
        let client = self.bootstrap_client(opts, None);
        let url = format!("{}auth/tokens", opts.identity_endpoint);
        let request = RequestOpts::default()
            .ok_codes(&[200, 203])
            .header(HeaderName::from_static(AUTH_TOKEN_HEADER), token)
            .header(HeaderName::from_static(SUBJECT_TOKEN_HEADER), token)
            .without_auth();
        let response = client
            .request(Method::GET, url.as_str(), request)
            .await
            .map_err(auth_error)?;
        let parsed: TokenResponse = parse_json(&response)?;
        let mut auth = parsed.token.into_authenticated(token.to_owned());
        if opts.scope == Scope::Domain {
            auth.project_id.clear();
            auth.project_name.clear();
        }
        Ok(Session { auth, signer: None })
    }

    async fn password_flow(&self, opts: &AuthOptions) -> Result<Session, Error> {
        let client = self.bootstrap_client(opts, None);
        let url = format!("{}auth/tokens", opts.identity_endpoint);
        let body = opts.password_request_body()?;
        let response = client
            .request(
                Method::POST,
                url.as_str(),
                RequestOpts::json(body).ok_codes(&[201]).without_auth(),
            )
            .await
            .map_err(auth_error)?;
        let token = subject_token(&response)?;
        let parsed: TokenResponse = parse_json(&response)?;
        Ok(Session {
            auth: parsed.token.into_authenticated(token),
            signer: None,
        })
    }

    async fn aksk_flow(&self, opts: &AuthOptions, credentials: &AkSk) -> Result<Session, Error> {
        let unscoped = self.bootstrap_client(opts, Some(Signer::new(credentials.clone())));
        let mut auth = Authenticated::default();

        let signer = if opts.scope == Scope::Project && opts.agency.is_none() {
            let (project_id, project_name, domain_id) = if opts.project_id.is_empty() {
                let url = format!(
                    "{}projects?name={}",
                    opts.identity_endpoint,
                    urlencoding::encode(opts.project_name.as_str())
                );
                let projects: ProjectsResponse =
                    unscoped.get_json_unscoped(url.as_str()).await.map_err(auth_error)?;
                let project = projects
                    .projects
                    .into_iter()
                    .find(|project| project.name == opts.project_name)
                    .ok_or_else(|| AuthError::ProjectNotFound(opts.project_name.clone()))?;
                (project.id, project.name, project.domain_id)
            } else {
                (opts.project_id.clone(), opts.project_name.clone(), opts.domain_id.clone())
            };
            auth.project_id = project_id.clone();
            auth.project_name = project_name;
            auth.domain_id = domain_id;
            Signer::new(credentials.clone()).for_project(project_id)
        } else {
            let domain_id = if opts.domain_id.is_empty() {
                let url = format!("{}auth/domains", opts.identity_endpoint);
                let domains: DomainsResponse =
                    unscoped.get_json_unscoped(url.as_str()).await.map_err(auth_error)?;
                let domain = domains
                    .domains
                    .into_iter()
                    .find(|domain| opts.domain_name.is_empty() || domain.name == opts.domain_name)
                    .ok_or_else(|| {
                        AuthError::Rejected {
                            status: http::StatusCode::NOT_FOUND,
                            message: format!("domain '{}' is not accessible", opts.domain_name),
                        }
                    })?;
                auth.domain_name = domain.name;
                domain.id
            } else {
                auth.domain_name = opts.domain_name.clone();
                opts.domain_id.clone()
            };
            auth.domain_id = domain_id.clone();
            Signer::new(credentials.clone()).for_domain(domain_id)
        };

        let scoped = self.bootstrap_client(opts, Some(signer.clone()));
        let url = format!("{}auth/catalog", opts.identity_endpoint);
        let catalog: CatalogResponse = scoped.get_json_unscoped(url.as_str()).await.map_err(auth_error)?;
        auth.catalog = catalog.catalog;
        Ok(Session {
            auth,
            signer: Some(signer),
        })
    }

    /// Exchanges the session for a token of the agency's delegated project or domain
    async fn assume_role(&self, opts: &AuthOptions, session: Session) -> Result<Session, Error> {
        let body = match opts.assume_role_body() {
            Some(body) => body,
            None => return Ok(session),
        };
        let client = self.bootstrap_client(opts, session.signer.clone());
        let url = format!("{}auth/tokens", opts.identity_endpoint);
        let mut request = RequestOpts::json(body).ok_codes(&[201]);
        if session.signer.is_none() {
            request = request
                .header(HeaderName::from_static(AUTH_TOKEN_HEADER), session.auth.token.as_str())
                .without_auth();
        }
        let response = client
            .request(Method::POST, url.as_str(), request)
            .await
            .map_err(auth_error)?;
        let token = subject_token(&response)?;
        let parsed: TokenResponse = parse_json(&response)?;
        log::info!(
            "Assumed agency '{}' of domain '{}'",
            opts.agency.as_ref().map(|a| a.name.as_str()).unwrap_or(""),
            opts.agency.as_ref().map(|a| a.domain_name.as_str()).unwrap_or("")
        );
        Ok(Session {
            auth: parsed.token.into_authenticated(token),
            signer: None,
        })
    }
}

impl ProviderClient {
    /// GET used by the identity flows; the client signs if it has a signer and otherwise
    /// sends no credentials.
    async fn get_json_unscoped<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let response = self
            .request(Method::GET, url, RequestOpts::default().ok_codes(&[200, 203]))
            .await?;
        parse_json(&response)
    }
}

/// Authenticates one base client. With `allow_reauth` and a renewable flow, the client
/// gets a callback that repeats the same flow.
pub async fn authenticate(
    config: &Config,
    scope: Scope,
    negotiator: &Negotiator,
) -> Result<ProviderClient, Error> {
    let opts = match scope {
        Scope::Project => AuthOptions::project(config)?,
        Scope::Domain => AuthOptions::domain(config)?,
    };
    let session = negotiator.negotiate(&opts).await?;

    let reauth: Option<ReauthFn> = if config.allow_reauth && opts.supports_reauth() {
        let negotiator = negotiator.clone();
        let opts = opts.clone();
        Some(Arc::new(move || {
            let negotiator = negotiator.clone();
            let opts = opts.clone();
            async move { negotiator.negotiate(&opts).await.map(|session| session.auth) }.boxed()
        }))
    } else {
        None
    };

    let region = if config.region.is_empty() {
        region_from_project(session.auth.project_name.as_str())
            .unwrap_or_default()
            .to_owned()
    } else {
        config.region.clone()
    };
    log::info!(
        "Authenticated {} scoped client (project: '{}', domain: '{}', region: '{}')",
        scope,
        session.auth.project_id,
        session.auth.domain_id,
        region
    );
    let settings = ClientSettings {
        transport: negotiator.transport.clone(),
        identity_endpoint: config.identity_endpoint.clone(),
        scope,
        signer: session.signer,
        user_agent: negotiator.user_agent.clone(),
        region,
        metrics: negotiator.metrics.clone(),
    };
    Ok(ProviderClient::new(settings, session.auth, reauth))
}
