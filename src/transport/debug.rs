//! Rendering of requests and responses for debug logging. Credentials never reach the log:
//! authentication headers are replaced with `***`, passwords in identity requests are
//! masked, and token responses (which carry the whole service catalogue) are dropped.
use super::{HttpRequest, HttpResponse};

use http::HeaderMap;
use serde_json::Value;

use std::fmt::Write;

const REDACTED: &str = "***";

const REDACTED_HEADERS: &[&str] = &[
    "x-auth-token",
    "x-auth-key",
    "x-service-token",
    "x-storage-token",
    "x-account-meta-temp-url-key",
    "x-account-meta-temp-url-key-2",
    "x-container-meta-temp-url-key",
    "x-container-meta-temp-url-key-2",
    "set-cookie",
    "x-subject-token",
];

pub fn is_redacted_header(name: &str) -> bool {
    REDACTED_HEADERS
        .iter()
        .any(|redacted| redacted.eq_ignore_ascii_case(name))
}

/// Formats headers one per line, sorted by name
pub fn format_headers<'a, I>(headers: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut lines = headers
        .into_iter()
        .map(|(name, value)| {
            if is_redacted_header(name) {
                format!("{}: {}", name, REDACTED)
            } else {
                format!("{}: {}", name, value)
            }
        })
        .collect::<Vec<_>>();
    lines.sort();
    lines.join("\n")
}

pub fn format_header_map(headers: &HeaderMap) -> String {
    format_headers(
        headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("<binary>"))),
    )
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("json"))
        .unwrap_or(false)
}

/// Masks `auth.identity.password.user.password` in an identity request body
pub fn mask_request_body(body: &mut Value) {
    if let Some(password) = body
        .pointer_mut("/auth/identity/password/user/password")
        .filter(|value| value.is_string())
    {
        *password = Value::String(REDACTED.to_owned());
    }
}

/// Pretty prints a JSON request body with the password masked
pub fn format_request_body(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            mask_request_body(&mut value);
            serde_json::to_string_pretty(&value).unwrap_or_default()
        }
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Pretty prints a JSON response body. Token responses render as the empty string
pub fn format_response_body(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            if value.pointer("/token/catalog").is_some() {
                String::new()
            } else {
                serde_json::to_string_pretty(&value).unwrap_or_default()
            }
        }
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

pub fn log_request(request: &HttpRequest) {
    let mut message = format!("OpenStack Request URL: {} {}", request.method(), request.uri());
    let headers = format_header_map(request.headers());
    if !headers.is_empty() {
        let _ = write!(message, "\nOpenStack Request Headers:\n{}", headers);
    }
    if !request.body().is_empty() {
        let body = if is_json(request.headers()) {
            format_request_body(request.body())
        } else {
            String::from_utf8_lossy(request.body()).into_owned()
        };
        let _ = write!(message, "\nOpenStack Request Body: {}", body);
    }
    log::debug!("{}", message);
}

pub fn log_response(response: &HttpResponse) {
    let mut message = format!("OpenStack Response Code: {}", response.status().as_u16());
    let headers = format_header_map(response.headers());
    if !headers.is_empty() {
        let _ = write!(message, "\nOpenStack Response Headers:\n{}", headers);
    }
    if !response.body().is_empty() {
        let body = if is_json(response.headers()) {
            format_response_body(response.body())
        } else {
            String::from_utf8_lossy(response.body()).into_owned()
        };
        if !body.is_empty() {
            let _ = write!(message, "\nOpenStack Response Body: {}", body);
        }
    }
    log::debug!("{}", message);
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacted_headers_are_masked_regardless_of_case() {
        let headers = vec![
            ("X-Auth-Token", "secret-token"),
            ("x-subject-token", "another-secret"),
            ("X-ACCOUNT-META-TEMP-URL-KEY-2", "k2"),
            ("X-Container-Meta-Temp-Url-Key", "k"),
            ("Set-Cookie", "session=1"),
            ("Content-Type", "application/json"),
        ];
        let rendered = format_headers(headers);
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("another-secret"));
        assert!(!rendered.contains("session=1"));
        assert!(rendered.contains("X-Auth-Token: ***"));
        assert!(rendered.contains("X-ACCOUNT-META-TEMP-URL-KEY-2: ***"));
        assert!(rendered.contains("Content-Type: application/json"));

        for name in REDACTED_HEADERS {
            assert!(is_redacted_header(&name.to_uppercase()));
        }
        assert!(!is_redacted_header("x-auth-token-expires"));
    }

    #[test]
    fn password_is_masked_in_request_bodies() {
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": "user",
                            "password": "hunter2",
                            "domain": {"name": "d"}
                        }
                    }
                }
            }
        });
        let rendered = format_request_body(body.to_string().as_bytes());
        assert!(!rendered.contains("hunter2"));
        let parsed: Value = serde_json::from_str(rendered.as_str()).unwrap();
        assert_eq!(
            "***",
            parsed.pointer("/auth/identity/password/user/password").unwrap()
        );
        assert_eq!("user", parsed.pointer("/auth/identity/password/user/name").unwrap());
    }

    #[test]
    fn token_catalog_responses_are_suppressed() {
        let body = json!({"token": {"catalog": [], "expires_at": "2030-01-01T00:00:00Z"}});
        assert_eq!("", format_response_body(body.to_string().as_bytes()));

        let body = json!({"token": {"expires_at": "2030-01-01T00:00:00Z"}});
        assert!(format_response_body(body.to_string().as_bytes()).contains("expires_at"));
    }

    #[test]
    fn non_json_bodies_are_echoed() {
        assert_eq!("plain text", format_response_body(b"plain text"));
        assert_eq!("<xml/>", format_request_body(b"<xml/>"));
    }
}
