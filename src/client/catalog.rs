use crate::config::EndpointType;
use crate::error::ConfigError;

/// The service catalogue returned by the identity service along with a token
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct ServiceCatalog {
    pub entries: Vec<CatalogEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Endpoint {
    #[serde(default)]
    pub id: String,
    pub interface: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub region_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointOpts<'a> {
    pub service_type: &'a str,
    /// empty to accept endpoints of any region
    pub region: &'a str,
    pub availability: EndpointType,
}

pub fn normalize_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_owned()
    } else {
        format!("{}/", url)
    }
}

impl ServiceCatalog {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_service(&self, service_type: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.service_type == service_type)
    }

    /// Finds the single endpoint URL for the service, region and availability. The URL
    /// always ends with a slash.
    pub fn locate(&self, opts: EndpointOpts<'_>) -> Result<String, ConfigError> {
        let mut urls = self
            .entries
            .iter()
            .filter(|entry| entry.service_type == opts.service_type)
            .flat_map(|entry| entry.endpoints.iter())
            .filter(|endpoint| endpoint.interface == opts.availability.interface())
            .filter(|endpoint| {
                opts.region.is_empty()
                    || endpoint.region == opts.region
                    || endpoint.region_id == opts.region
            })
            .map(|endpoint| normalize_url(endpoint.url.as_str()))
            .collect::<Vec<_>>();
        urls.sort();
        urls.dedup();

        match urls.len() {
            1 => Ok(urls.remove(0)),
            0 => Err(ConfigError::EndpointNotFound {
                service_type: opts.service_type.to_owned(),
                region: opts.region.to_owned(),
                availability: opts.availability.to_string(),
            }),
            _ => Err(ConfigError::Invalid(format!(
                "found {} different endpoints for service '{}' in region '{}': {}",
                urls.len(),
                opts.service_type,
                opts.region,
                urls.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn catalog() -> ServiceCatalog {
        serde_json::from_value(json!([
            {
                "type": "compute",
                "name": "nova",
                "endpoints": [
                    {"interface": "public", "region": "eu-de", "region_id": "eu-de", "url": "https://ecs.eu-de.otc.t-systems.com/v2.1/p1"},
                    {"interface": "internal", "region": "eu-de", "region_id": "eu-de", "url": "https://ecs.internal/v2.1/p1/"},
                    {"interface": "public", "region": "eu-nl", "region_id": "eu-nl", "url": "https://ecs.eu-nl.otc.t-systems.com/v2.1/p1"}
                ]
            },
            {
                "type": "identity",
                "endpoints": [
                    {"interface": "public", "region": "*", "url": "https://iam.eu-de.otc.t-systems.com/v3"}
                ]
            }
        ]))
        .unwrap()
    }

    #[test]
    fn locates_endpoint_by_region_and_availability() {
        let catalog = catalog();
        let url = catalog
            .locate(EndpointOpts {
                service_type: "compute",
                region: "eu-de",
                availability: EndpointType::Public,
            })
            .unwrap();
        assert_eq!("https://ecs.eu-de.otc.t-systems.com/v2.1/p1/", url);

        let url = catalog
            .locate(EndpointOpts {
                service_type: "compute",
                region: "eu-de",
                availability: EndpointType::Internal,
            })
            .unwrap();
        assert_eq!("https://ecs.internal/v2.1/p1/", url);
    }

    #[test]
    fn missing_and_ambiguous_endpoints_are_errors() {
        let catalog = catalog();
        let err = catalog
            .locate(EndpointOpts {
                service_type: "volumev2",
                region: "eu-de",
                availability: EndpointType::Public,
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::EndpointNotFound { .. }));

        let err = catalog
            .locate(EndpointOpts {
                service_type: "compute",
                region: "",
                availability: EndpointType::Public,
            })
            .unwrap_err();
        assert!(err.to_string().contains("2 different endpoints"));
    }
}
