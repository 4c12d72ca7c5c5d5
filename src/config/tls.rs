use super::Config;
use crate::error::ConfigError;

use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;

use std::path::PathBuf;

/// Reads `value` as a file if it names one, otherwise returns it unchanged as inline
/// contents. A leading `~/` is expanded to the home directory. The boolean tells whether
/// the contents were read from a file.
pub fn path_or_contents(value: &str) -> Result<(String, bool), ConfigError> {
    if value.is_empty() {
        return Ok((String::new(), false));
    }
    let path = expand_home(value);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok((contents, true)),
        Err(err) => {
            if looks_like_path(value) && !value.contains("-----BEGIN") {
                log::debug!(
                    "Treating '{}' as inline contents, reading it as a file failed: {}",
                    value,
                    err
                );
            }
            Ok((value.to_owned(), false))
        }
    }
}

fn looks_like_path(value: &str) -> bool {
    !value.contains('\n') && (value.starts_with('/') || value.starts_with("~/"))
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(value)
}

/// The PEM material and verification mode used for every connection to the cloud
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlsConfig {
    pub ca_pem: Option<Vec<u8>>,
    pub client_cert_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
    pub insecure: bool,
}

impl TlsConfig {
    pub fn from_config(config: &Config) -> Result<TlsConfig, ConfigError> {
        let read = |value: &str| -> Result<Option<Vec<u8>>, ConfigError> {
            let (contents, _) = path_or_contents(value)?;
            Ok(if contents.is_empty() {
                None
            } else {
                Some(contents.into_bytes())
            })
        };
        let tls = TlsConfig {
            ca_pem: read(config.ca_cert_file.as_str())?,
            client_cert_pem: read(config.client_cert_file.as_str())?,
            client_key_pem: read(config.client_key_file.as_str())?,
            insecure: config.insecure(),
        };
        if tls.client_cert_pem.is_some() != tls.client_key_pem.is_some() {
            return Err(ConfigError::InvalidTls(
                "a client certificate requires a client key and vice versa".to_owned(),
            ));
        }
        Ok(tls)
    }

    pub fn connector(&self) -> Result<SslConnectorBuilder, ConfigError> {
        let mut ssl = SslConnector::builder(SslMethod::tls())?;
        ssl.set_alpn_protos(b"\x02h2\x08http/1.1")?;

        if let Some(ca_pem) = self.ca_pem.as_ref() {
            let certs = X509::stack_from_pem(ca_pem.as_slice()).map_err(|err| {
                ConfigError::InvalidTls(format!("unable to parse CA bundle: {}", err))
            })?;
            if certs.is_empty() {
                return Err(ConfigError::InvalidTls(
                    "CA bundle does not contain any certificates".to_owned(),
                ));
            }
            let cert_store = ssl.cert_store_mut();
            for cert in certs {
                cert_store.add_cert(cert)?;
            }
        }

        if let (Some(cert_pem), Some(key_pem)) =
            (self.client_cert_pem.as_ref(), self.client_key_pem.as_ref())
        {
            let cert = X509::from_pem(cert_pem.as_slice()).map_err(|err| {
                ConfigError::InvalidTls(format!("unable to parse client certificate: {}", err))
            })?;
            let pkey = PKey::private_key_from_pem(key_pem.as_slice()).map_err(|err| {
                ConfigError::InvalidTls(format!("unable to parse client key: {}", err))
            })?;
            ssl.set_certificate(&*cert)?;
            ssl.set_private_key(&*pkey)?;
            ssl.check_private_key()?;
        }

        if self.insecure {
            log::warn!("TLS certificate verification has been disabled! All connections to the cloud will be insecure!");
            ssl.set_verify(SslVerifyMode::NONE);
        } else {
            ssl.set_verify(SslVerifyMode::PEER);
        }
        Ok(ssl)
    }
}
