//! Error types shared across the crate. Every fallible public function returns
//! `Result<T, Error>`, where `Error` keeps the category of the failure so that
//! callers can branch on it (most commonly `Error::is_not_found` in `read` handlers).
use http::{Method, StatusCode};

use std::fmt::{self, Display};
use std::io;
use std::time::Duration;

/// Problems with the user supplied configuration. These are never retryable and
/// are meant to be shown to the user verbatim.
#[derive(Debug)]
pub enum ConfigError {
    MissingIdentityEndpoint,
    InvalidEndpointType(String),
    MissingProject,
    MissingCredentials,
    InvalidTls(String),
    CloudsFile(String),
    Io(io::Error),
    NotConfigured,
    EndpointNotFound {
        service_type: String,
        region: String,
        availability: String,
    },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConfigError::MissingIdentityEndpoint => {
                f.write_str("'auth_url' must be specified, either directly or through 'cloud'")
            }
            ConfigError::InvalidEndpointType(ref value) => {
                write!(f, "invalid endpoint type provided: '{}'", value)
            }
            ConfigError::MissingProject => {
                f.write_str("no project name/id or delegated project is provided")
            }
            ConfigError::MissingCredentials => f.write_str(
                "no credentials provided: one of 'token', 'access_key'/'secret_key' or a user with 'password' is required",
            ),
            ConfigError::InvalidTls(ref msg) => write!(f, "invalid TLS configuration: {}", msg),
            ConfigError::CloudsFile(ref msg) => write!(f, "clouds file error: {}", msg),
            ConfigError::Io(ref e) => write!(f, "IO error: {}", e),
            ConfigError::NotConfigured => f.write_str("provider has not been configured"),
            ConfigError::EndpointNotFound {
                ref service_type,
                ref region,
                ref availability,
            } => write!(
                f,
                "no suitable {} endpoint could be found for service '{}' in region '{}'",
                availability, service_type, region
            ),
            ConfigError::Invalid(ref msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> ConfigError {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> ConfigError {
        ConfigError::CloudsFile(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for ConfigError {
    fn from(err: openssl::error::ErrorStack) -> ConfigError {
        ConfigError::InvalidTls(err.to_string())
    }
}

/// The identity service rejected the credentials, or returned something we could
/// not make sense of.
#[derive(Debug)]
pub enum AuthError {
    Rejected { status: StatusCode, message: String },
    MissingToken,
    ProjectNotFound(String),
    Unsupported(String),
}

impl Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AuthError::Rejected {
                ref status,
                ref message,
            } => write!(f, "authentication failed with status {}: {}", status, message),
            AuthError::MissingToken => {
                f.write_str("identity response did not contain an X-Subject-Token header")
            }
            AuthError::ProjectNotFound(ref name) => write!(f, "project '{}' was not found", name),
            AuthError::Unsupported(ref msg) => write!(f, "unsupported authentication: {}", msg),
        }
    }
}
impl std::error::Error for AuthError {}

/// A network level failure: no response was received at all.
#[derive(Debug)]
pub enum TransportError {
    Hyper(hyper::Error),
    InvalidRequest(http::Error),
    Timeout(Duration),
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
    #[cfg(test)]
    Simulated(String),
}

impl TransportError {
    /// The innermost error, skipping over any `RetriesExhausted` wrappers.
    pub fn last_error(&self) -> &TransportError {
        match self {
            TransportError::RetriesExhausted { last, .. } => last.last_error(),
            other => other,
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TransportError::Hyper(ref e) => write!(f, "transport error: {}", e),
            TransportError::InvalidRequest(ref e) => write!(f, "invalid request: {}", e),
            TransportError::Timeout(ref d) => write!(f, "request timed out after {:?}", d),
            TransportError::RetriesExhausted {
                attempts,
                ref last,
            } => write!(f, "giving up after {} attempts: {}", attempts, last),
            #[cfg(test)]
            TransportError::Simulated(ref msg) => write!(f, "simulated: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Hyper(e) => Some(e),
            TransportError::InvalidRequest(e) => Some(e),
            TransportError::RetriesExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<hyper::Error> for TransportError {
    fn from(e: hyper::Error) -> TransportError {
        TransportError::Hyper(e)
    }
}

impl From<http::Error> for TransportError {
    fn from(e: http::Error) -> TransportError {
        TransportError::InvalidRequest(e)
    }
}

/// A response was received, but its status was not one the caller accepts.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub method: Method,
    pub url: String,
    pub body: String,
}

impl ApiError {
    pub fn is_status(&self, code: u16) -> bool {
        self.status.as_u16() == code
    }

    pub fn is_not_found(&self) -> bool {
        self.is_status(404)
    }

    pub fn is_forbidden(&self) -> bool {
        self.is_status(403)
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} returned status {}",
            self.method, self.url, self.status
        )?;
        if !self.body.is_empty() {
            write!(f, ": {}", self.body)?;
        }
        Ok(())
    }
}
impl std::error::Error for ApiError {}

/// Failures raised from inside the job and state waiters. Each variant carries the
/// last state the waiter observed.
#[derive(Debug)]
pub enum WaitError {
    Timeout {
        timeout: Duration,
        last_state: String,
        target: Vec<String>,
    },
    UnexpectedState {
        state: String,
        expected: Vec<String>,
    },
    Cancelled {
        last_state: String,
    },
    JobFailed {
        job_id: String,
        reason: String,
    },
    MissingEntity {
        job_id: String,
        key: String,
    },
    Fault {
        state: String,
        code: String,
        message: String,
    },
}

impl WaitError {
    pub fn last_state(&self) -> &str {
        match self {
            WaitError::Timeout { last_state, .. } => last_state,
            WaitError::UnexpectedState { state, .. } => state,
            WaitError::Cancelled { last_state } => last_state,
            WaitError::JobFailed { .. } => "FAIL",
            WaitError::MissingEntity { .. } => "SUCCESS",
            WaitError::Fault { state, .. } => state,
        }
    }
}

impl Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            WaitError::Timeout {
                ref timeout,
                ref last_state,
                ref target,
            } => write!(
                f,
                "timeout while waiting for state to become '{}' (last state: '{}', timeout: {:?})",
                target.join(", "),
                last_state,
                timeout
            ),
            WaitError::UnexpectedState {
                ref state,
                ref expected,
            } => write!(
                f,
                "unexpected state '{}', wanted target '{}'",
                state,
                expected.join(", ")
            ),
            WaitError::Cancelled { ref last_state } => write!(
                f,
                "context cancelled while waiting (last state: '{}')",
                last_state
            ),
            WaitError::JobFailed {
                ref job_id,
                ref reason,
            } => write!(f, "job {} failed: {}", job_id, reason),
            WaitError::MissingEntity {
                ref job_id,
                ref key,
            } => write!(f, "entity '{}' not found in job {}", key, job_id),
            WaitError::Fault {
                ref state,
                ref code,
                ref message,
            } => write!(f, "resource in state {}: {} {}", state, code, message),
        }
    }
}
impl std::error::Error for WaitError {}

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Auth(AuthError),
    Transport(TransportError),
    Api(ApiError),
    Wait(WaitError),
    /// The cloud reported that another operation is already in progress (HTTP 409).
    Conflict(ApiError),
    Serde(serde_json::Error),
    InvalidInput(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Error {
        Error::InvalidInput(msg.into())
    }

    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) | Error::Conflict(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_http_status(&self, code: u16) -> bool {
        self.api_error().map(|e| e.is_status(code)).unwrap_or(false)
    }

    /// True for HTTP 404 and for job entities that are missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Wait(WaitError::MissingEntity { .. }) => true,
            _ => self.is_http_status(404),
        }
    }

    pub fn is_forbidden(&self) -> bool {
        self.is_http_status(403)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Wait(WaitError::Cancelled { .. }))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Config(ref e) => Display::fmt(e, f),
            Error::Auth(ref e) => Display::fmt(e, f),
            Error::Transport(ref e) => Display::fmt(e, f),
            Error::Api(ref e) => Display::fmt(e, f),
            Error::Wait(ref e) => Display::fmt(e, f),
            Error::Conflict(ref e) => write!(f, "conflict: {}", e),
            Error::Serde(ref e) => write!(f, "(De)Serialization error: {}", e),
            Error::InvalidInput(ref msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Auth(e) => Some(e),
            Error::Transport(e) => Some(e),
            Error::Api(e) | Error::Conflict(e) => Some(e),
            Error::Wait(e) => Some(e),
            Error::Serde(e) => Some(e),
            Error::InvalidInput(_) => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Error {
        Error::Config(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Error {
        Error::Auth(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Error {
        Error::Transport(e)
    }
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Error {
        if e.is_status(409) {
            Error::Conflict(e)
        } else {
            Error::Api(e)
        }
    }
}

impl From<WaitError> for Error {
    fn from(e: WaitError) -> Error {
        Error::Wait(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Serde(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Error {
        Error::Transport(TransportError::InvalidRequest(e))
    }
}
