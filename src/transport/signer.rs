//! Access key / secret key request signing (`SDK-HMAC-SHA256`).
//!
//! The signature covers the method, path, sorted query, every header set on the request
//! and a hash of the body. It binds the `Host` header, so a request that is redirected to
//! another host has to be signed again, which `ProviderClient` does for every hop.
use super::HttpRequest;
use crate::error::Error;

use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;

use std::fmt::{self, Debug};

pub const ALGORITHM: &str = "SDK-HMAC-SHA256";
pub const SDK_DATE_HEADER: &str = "x-sdk-date";
pub const PROJECT_ID_HEADER: &str = "x-project-id";
pub const DOMAIN_ID_HEADER: &str = "x-domain-id";
pub const SECURITY_TOKEN_HEADER: &str = "x-security-token";

const SDK_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A long term access key pair, optionally with the security token of temporary credentials
#[derive(Clone, PartialEq)]
pub struct AkSk {
    pub access_key: String,
    pub secret_key: String,
    pub security_token: String,
}

impl Debug for AkSk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AkSk")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

pub fn hex_encode(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

fn hex_sha256(data: &[u8]) -> String {
    hex_encode(&openssl::sha::sha256(data))
}

pub(crate) fn hmac(digest: MessageDigest, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let key = PKey::hmac(key).map_err(crypto_error)?;
    let mut signer = openssl::sign::Signer::new(digest, &key).map_err(crypto_error)?;
    signer.update(data).map_err(crypto_error)?;
    signer.sign_to_vec().map_err(crypto_error)
}

fn crypto_error(err: openssl::error::ErrorStack) -> Error {
    Error::invalid_input(format!("unable to compute request signature: {}", err))
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::invalid_input(format!("invalid header value: '{}'", value)))
}

/// Each path segment is percent encoded, and the path always ends with a slash
fn canonical_uri(path: &str) -> String {
    let mut uri = path
        .split('/')
        .map(|segment| {
            let decoded = urlencoding::decode(segment).unwrap_or_else(|_| segment.to_owned());
            urlencoding::encode(decoded.as_str())
        })
        .collect::<Vec<_>>()
        .join("/");
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

fn canonical_query(query: Option<&str>) -> String {
    let mut pairs = query
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut split = pair.splitn(2, '=');
            let key = split.next().unwrap_or("");
            let value = split.next().unwrap_or("");
            let decode =
                |s: &str| urlencoding::decode(s).unwrap_or_else(|_| s.to_owned());
            (
                urlencoding::encode(decode(key).as_str()),
                urlencoding::encode(decode(value).as_str()),
            )
        })
        .collect::<Vec<_>>();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns the canonical header block and the list of signed header names
fn canonical_headers(request: &HttpRequest) -> (String, String) {
    let mut headers = request
        .headers()
        .iter()
        .filter(|(name, _)| *name != AUTHORIZATION)
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).trim().to_owned(),
            )
        })
        .collect::<Vec<_>>();
    headers.sort();
    let block = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect::<String>();
    let signed = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    (block, signed)
}

pub(crate) fn canonical_request(request: &HttpRequest) -> (String, String) {
    let (headers, signed_headers) = canonical_headers(request);
    let canonical = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method().as_str(),
        canonical_uri(request.uri().path()),
        canonical_query(request.uri().query()),
        headers,
        signed_headers,
        hex_sha256(request.body().as_ref())
    );
    (canonical, signed_headers)
}

/// Signs requests on behalf of a project or a domain
#[derive(Debug, Clone, PartialEq)]
pub struct Signer {
    credentials: AkSk,
    project_id: String,
    domain_id: String,
}

impl Signer {
    pub fn new(credentials: AkSk) -> Signer {
        Signer {
            credentials,
            project_id: String::new(),
            domain_id: String::new(),
        }
    }

    pub fn for_project(mut self, project_id: impl Into<String>) -> Signer {
        self.project_id = project_id.into();
        self
    }

    pub fn for_domain(mut self, domain_id: impl Into<String>) -> Signer {
        self.domain_id = domain_id.into();
        self
    }

    pub fn credentials(&self) -> &AkSk {
        &self.credentials
    }

    pub fn project_id(&self) -> &str {
        self.project_id.as_str()
    }

    pub fn domain_id(&self) -> &str {
        self.domain_id.as_str()
    }

    pub fn sign(&self, request: &mut HttpRequest) -> Result<(), Error> {
        self.sign_at(request, Utc::now())
    }

    /// Adds `Host`, `X-Sdk-Date`, the scope headers and `Authorization`. Any previous
    /// signature on the request is replaced.
    pub fn sign_at(&self, request: &mut HttpRequest, now: DateTime<Utc>) -> Result<(), Error> {
        let host = request
            .uri()
            .authority()
            .map(|authority| authority.as_str().to_owned())
            .ok_or_else(|| {
                Error::invalid_input(format!("cannot sign request without host: {}", request.uri()))
            })?;
        let date = now.format(SDK_DATE_FORMAT).to_string();

        let headers = request.headers_mut();
        headers.remove(AUTHORIZATION);
        headers.insert(HOST, header_value(host.as_str())?);
        headers.insert(
            HeaderName::from_static(SDK_DATE_HEADER),
            header_value(date.as_str())?,
        );
        if !self.project_id.is_empty() {
            headers.insert(
                HeaderName::from_static(PROJECT_ID_HEADER),
                header_value(self.project_id.as_str())?,
            );
        }
        if !self.domain_id.is_empty() {
            headers.insert(
                HeaderName::from_static(DOMAIN_ID_HEADER),
                header_value(self.domain_id.as_str())?,
            );
        }
        if !self.credentials.security_token.is_empty() {
            headers.insert(
                HeaderName::from_static(SECURITY_TOKEN_HEADER),
                header_value(self.credentials.security_token.as_str())?,
            );
        }

        let (canonical, signed_headers) = canonical_request(request);
        let string_to_sign = format!("{}\n{}\n{}", ALGORITHM, date, hex_sha256(canonical.as_bytes()));
        let signature = hmac(
            MessageDigest::sha256(),
            self.credentials.secret_key.as_bytes(),
            string_to_sign.as_bytes(),
        )?;
        let authorization = format!(
            "{} Access={}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.credentials.access_key,
            signed_headers,
            hex_encode(signature.as_slice())
        );
        request
            .headers_mut()
            .insert(AUTHORIZATION, header_value(authorization.as_str())?);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;

    fn credentials() -> AkSk {
        AkSk {
            access_key: "AKEXAMPLE".to_owned(),
            secret_key: "secret".to_owned(),
            security_token: String::new(),
        }
    }

    fn request(uri: &str) -> HttpRequest {
        http::Request::builder()
            .method("GET")
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.ymd(2020, 1, 1).and_hms(0, 0, 0)
    }

    #[test]
    fn canonical_request_is_built_from_sorted_parts() {
        let signer = Signer::new(credentials()).for_project("p1");
        let mut req = request("https://iam.example.com/v3/auth/catalog?b=2&a=1");
        signer.sign_at(&mut req, fixed_time()).unwrap();
        let (canonical, signed) = canonical_request(&req);
        let expected = "GET\n\
            /v3/auth/catalog/\n\
            a=1&b=2\n\
            host:iam.example.com\n\
            x-project-id:p1\n\
            x-sdk-date:20200101T000000Z\n\
            \n\
            host;x-project-id;x-sdk-date\n\
            e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(expected, canonical);
        assert_eq!("host;x-project-id;x-sdk-date", signed);
    }

    #[test]
    fn authorization_header_is_deterministic() {
        let signer = Signer::new(credentials()).for_domain("d1");
        let mut first = request("https://iam.example.com/v3/auth/domains");
        let mut second = request("https://iam.example.com/v3/auth/domains");
        signer.sign_at(&mut first, fixed_time()).unwrap();
        signer.sign_at(&mut second, fixed_time()).unwrap();
        let auth = first.headers()[AUTHORIZATION].to_str().unwrap().to_owned();
        assert_eq!(auth, second.headers()[AUTHORIZATION].to_str().unwrap());
        assert!(auth.starts_with(
            "SDK-HMAC-SHA256 Access=AKEXAMPLE, SignedHeaders=host;x-domain-id;x-sdk-date, Signature="
        ));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(64, signature.len());

        let other = Signer::new(AkSk {
            secret_key: "other".to_owned(),
            ..credentials()
        });
        let mut third = request("https://iam.example.com/v3/auth/domains");
        other.for_domain("d1").sign_at(&mut third, fixed_time()).unwrap();
        assert_ne!(auth, third.headers()[AUTHORIZATION].to_str().unwrap());
    }

    #[test]
    fn resigning_replaces_host_and_signature() {
        let signer = Signer::new(AkSk {
            security_token: "temp-token".to_owned(),
            ..credentials()
        });
        let mut req = request("https://a.example.com/v1/jobs/1");
        signer.sign_at(&mut req, fixed_time()).unwrap();
        let first = req.headers()[AUTHORIZATION].clone();
        assert_eq!("temp-token", req.headers()[SECURITY_TOKEN_HEADER]);

        *req.uri_mut() = "https://b.example.com/v1/jobs/1".parse().unwrap();
        signer.sign_at(&mut req, fixed_time()).unwrap();
        assert_eq!("b.example.com", req.headers()[HOST]);
        assert_ne!(first, req.headers()[AUTHORIZATION]);
        assert_eq!(1, req.headers().get_all(AUTHORIZATION).iter().count());
    }

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!("/v1/a%20b/", canonical_uri("/v1/a%20b"));
        assert_eq!("/", canonical_uri("/"));
        assert_eq!("a=x%2Fy&b=", canonical_query(Some("b=&a=x/y")));
        assert_eq!("", canonical_query(None));
    }

    #[test]
    fn hex_encoding() {
        assert_eq!("00ff10", hex_encode(&[0, 255, 16]));
    }
}
