use super::{set_if_empty, Config};
use crate::error::ConfigError;

pub(crate) fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Returns the value of the first variable that is set
fn first_of(lookup: &dyn Fn(&str) -> Option<String>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| lookup(key))
        .next()
        .unwrap_or_default()
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub(crate) fn merge_env(
    config: &mut Config,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let string_vars: [(&mut String, &[&str]); 21] = [
        (&mut config.cloud, &["OS_CLOUD"]),
        (&mut config.identity_endpoint, &["OS_AUTH_URL"]),
        (&mut config.region, &["OS_REGION_NAME"]),
        (&mut config.username, &["OS_USERNAME"]),
        (&mut config.user_id, &["OS_USER_ID"]),
        (&mut config.password, &["OS_PASSWORD"]),
        (&mut config.passcode, &["OS_PASSCODE"]),
        (&mut config.tenant_name, &["OS_PROJECT_NAME", "OS_TENANT_NAME"]),
        (&mut config.tenant_id, &["OS_PROJECT_ID", "OS_TENANT_ID"]),
        (
            &mut config.domain_name,
            &[
                "OS_DOMAIN_NAME",
                "OS_USER_DOMAIN_NAME",
                "OS_PROJECT_DOMAIN_NAME",
            ],
        ),
        (
            &mut config.domain_id,
            &["OS_DOMAIN_ID", "OS_USER_DOMAIN_ID", "OS_PROJECT_DOMAIN_ID"],
        ),
        (&mut config.token, &["OS_TOKEN", "OS_AUTH_TOKEN"]),
        (&mut config.access_key, &["OS_ACCESS_KEY"]),
        (&mut config.secret_key, &["OS_SECRET_KEY"]),
        (&mut config.security_token, &["OS_SECURITY_TOKEN"]),
        (&mut config.ca_cert_file, &["OS_CACERT"]),
        (&mut config.client_cert_file, &["OS_CERT"]),
        (&mut config.client_key_file, &["OS_KEY"]),
        (&mut config.endpoint_type, &["OS_ENDPOINT_TYPE", "OS_INTERFACE"]),
        (&mut config.agency_name, &["OS_AGENCY_NAME"]),
        (&mut config.agency_domain_name, &["OS_AGENCY_DOMAIN_NAME"]),
    ];
    for (field, keys) in string_vars {
        let value = first_of(lookup, keys);
        set_if_empty(field, value.as_str());
    }
    set_if_empty(
        &mut config.delegated_project,
        first_of(lookup, &["OS_DELEGATED_PROJECT"]).as_str(),
    );

    if config.insecure.is_none() {
        config.insecure = lookup("OS_INSECURE").map(|value| parse_bool(value.as_str()));
    }
    if config.debug.is_none() {
        config.debug = lookup("OS_DEBUG").map(|value| parse_bool(value.as_str()));
    }
    if config.max_retries.is_none() {
        if let Some(retries) = lookup("OS_MAX_RETRIES") {
            let retries = retries.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("OS_MAX_RETRIES must be a number, got '{}'", retries))
            })?;
            config.max_retries = Some(retries);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aliases_are_consulted_in_order() {
        let lookup = |key: &str| match key {
            "OS_TENANT_NAME" => Some("from-alias".to_owned()),
            "OS_PROJECT_DOMAIN_NAME" => Some("project-domain".to_owned()),
            "OS_USER_DOMAIN_NAME" => Some("user-domain".to_owned()),
            _ => None,
        };
        let mut config = Config::default();
        merge_env(&mut config, &lookup).unwrap();
        assert_eq!("from-alias", config.tenant_name);
        assert_eq!("user-domain", config.domain_name);
    }

    #[test]
    fn invalid_max_retries_is_rejected() {
        let lookup = |key: &str| {
            if key == "OS_MAX_RETRIES" {
                Some("lots".to_owned())
            } else {
                None
            }
        };
        let mut config = Config::default();
        assert!(merge_env(&mut config, &lookup).is_err());

        // never consulted when the value was given explicitly
        let mut config = Config {
            max_retries: Some(3),
            ..Default::default()
        };
        merge_env(&mut config, &lookup).unwrap();
        assert_eq!(Some(3), config.max_retries);
    }

    #[test]
    fn booleans_are_parsed_leniently() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool(" yes "));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
    }
}
