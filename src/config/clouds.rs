use super::{set_if_empty, Config};
use crate::error::ConfigError;

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

const CLOUDS_FILE_NAME: &str = "clouds.yaml";
const SECURE_FILE_NAME: &str = "secure.yaml";

fn candidate_paths(file_name: &str) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(3);
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(file_name));
    }
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("openstack").join(file_name));
    } else if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/openstack").join(file_name));
    }
    paths.push(Path::new("/etc/openstack").join(file_name));
    paths
}

fn find_file(
    env_var: &str,
    file_name: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    if let Some(path) = lookup(env_var) {
        return Some(PathBuf::from(path));
    }
    candidate_paths(file_name)
        .into_iter()
        .find(|path| path.is_file())
}

/// Location of the clouds file: `OS_CLIENT_CONFIG_FILE`, or the first `clouds.yaml` found
/// in the working directory, the user config directory and `/etc/openstack`.
pub fn find_clouds_file() -> Option<PathBuf> {
    find_file("OS_CLIENT_CONFIG_FILE", CLOUDS_FILE_NAME, &super::env::process_env)
}

pub fn find_secure_file() -> Option<PathBuf> {
    find_file("OS_CLIENT_SECURE_FILE", SECURE_FILE_NAME, &super::env::process_env)
}

fn read_clouds(path: &Path) -> Result<CloudsFile, ConfigError> {
    let reader = File::open(path).map_err(|err| {
        ConfigError::CloudsFile(format!("unable to open '{}': {}", path.display(), err))
    })?;
    let file = serde_yaml::from_reader(reader).map_err(|err| {
        ConfigError::CloudsFile(format!("invalid YAML in '{}': {}", path.display(), err))
    })?;
    Ok(file)
}

/// Loads the named cloud, with missing values filled from the secure file if there is one
pub(crate) fn load_cloud(
    name: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Cloud, ConfigError> {
    let path = find_file("OS_CLIENT_CONFIG_FILE", CLOUDS_FILE_NAME, lookup).ok_or_else(|| {
        ConfigError::CloudsFile(format!(
            "cloud '{}' was requested but no {} could be found",
            name, CLOUDS_FILE_NAME
        ))
    })?;
    log::debug!("Loading cloud '{}' from {}", name, path.display());
    let mut clouds = read_clouds(path.as_path())?;
    let mut cloud = clouds.clouds.remove(name).ok_or_else(|| {
        ConfigError::CloudsFile(format!(
            "cloud '{}' is not defined in {}",
            name,
            path.display()
        ))
    })?;

    if let Some(secure_path) = find_file("OS_CLIENT_SECURE_FILE", SECURE_FILE_NAME, lookup) {
        let mut secure = read_clouds(secure_path.as_path())?;
        if let Some(secure_cloud) = secure.clouds.remove(name) {
            log::debug!(
                "Merging secure settings for cloud '{}' from {}",
                name,
                secure_path.display()
            );
            cloud.fill_from(&secure_cloud);
        }
    }
    Ok(cloud)
}

// Deserialization types for clouds.yaml and secure.yaml. Only the settings this crate
// understands are declared; everything else in the file is ignored.

#[derive(Deserialize, Debug, Default, Clone)]
struct CloudsFile {
    #[serde(default)]
    clouds: HashMap<String, Cloud>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub(crate) struct Cloud {
    #[serde(default)]
    auth: CloudAuth,
    region_name: Option<String>,
    #[serde(alias = "endpoint_type")]
    interface: Option<String>,
    verify: Option<bool>,
    cacert: Option<String>,
    cert: Option<String>,
    key: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
struct CloudAuth {
    auth_url: Option<String>,
    token: Option<String>,
    username: Option<String>,
    user_id: Option<String>,
    password: Option<String>,
    passcode: Option<String>,
    #[serde(alias = "tenant_name")]
    project_name: Option<String>,
    #[serde(alias = "tenant_id")]
    project_id: Option<String>,
    domain_name: Option<String>,
    domain_id: Option<String>,
    project_domain_name: Option<String>,
    project_domain_id: Option<String>,
    user_domain_name: Option<String>,
    user_domain_id: Option<String>,
    default_domain: Option<String>,
    #[serde(alias = "ak")]
    access_key: Option<String>,
    #[serde(alias = "sk")]
    secret_key: Option<String>,
    security_token: Option<String>,
    agency_name: Option<String>,
    agency_domain_name: Option<String>,
    delegated_project: Option<String>,
}

macro_rules! fill_missing {
    ($dst:expr, $src:expr, $($field:ident),+) => {
        $(
            if $dst.$field.is_none() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

fn first_set<'a>(candidates: &[&'a Option<String>]) -> &'a str {
    candidates
        .iter()
        .filter_map(|value| value.as_deref())
        .find(|value| !value.is_empty())
        .unwrap_or("")
}

impl CloudAuth {
    /// plain, then project scoped, then user scoped, then the default domain
    fn resolved_domain_name(&self) -> &str {
        first_set(&[
            &self.domain_name,
            &self.project_domain_name,
            &self.user_domain_name,
            &self.default_domain,
        ])
    }

    fn resolved_domain_id(&self) -> &str {
        first_set(&[
            &self.domain_id,
            &self.project_domain_id,
            &self.user_domain_id,
        ])
    }
}

impl Cloud {
    fn fill_from(&mut self, other: &Cloud) {
        fill_missing!(self, other, region_name, interface, verify, cacert, cert, key);
        fill_missing!(
            self.auth,
            other.auth,
            auth_url,
            token,
            username,
            user_id,
            password,
            passcode,
            project_name,
            project_id,
            domain_name,
            domain_id,
            project_domain_name,
            project_domain_id,
            user_domain_name,
            user_domain_id,
            default_domain,
            access_key,
            secret_key,
            security_token,
            agency_name,
            agency_domain_name,
            delegated_project
        );
    }

    pub(crate) fn merge_into(&self, config: &mut Config) {
        let auth = &self.auth;
        let fields: [(&mut String, &Option<String>); 16] = [
            (&mut config.identity_endpoint, &auth.auth_url),
            (&mut config.token, &auth.token),
            (&mut config.username, &auth.username),
            (&mut config.user_id, &auth.user_id),
            (&mut config.password, &auth.password),
            (&mut config.passcode, &auth.passcode),
            (&mut config.tenant_name, &auth.project_name),
            (&mut config.tenant_id, &auth.project_id),
            (&mut config.access_key, &auth.access_key),
            (&mut config.secret_key, &auth.secret_key),
            (&mut config.security_token, &auth.security_token),
            (&mut config.agency_name, &auth.agency_name),
            (&mut config.agency_domain_name, &auth.agency_domain_name),
            (&mut config.delegated_project, &auth.delegated_project),
            (&mut config.region, &self.region_name),
            (&mut config.endpoint_type, &self.interface),
        ];
        for (field, value) in fields {
            set_if_empty(field, value.as_deref().unwrap_or(""));
        }
        set_if_empty(&mut config.domain_name, auth.resolved_domain_name());
        set_if_empty(&mut config.domain_id, auth.resolved_domain_id());
        set_if_empty(
            &mut config.ca_cert_file,
            self.cacert.as_deref().unwrap_or(""),
        );
        set_if_empty(
            &mut config.client_cert_file,
            self.cert.as_deref().unwrap_or(""),
        );
        set_if_empty(
            &mut config.client_key_file,
            self.key.as_deref().unwrap_or(""),
        );
        if config.insecure.is_none() {
            config.insecure = self.verify.map(|verify| !verify);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn parse(yaml: &str) -> CloudsFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn domain_is_resolved_in_order() {
        let file = parse(
            r#"
clouds:
  plain:
    auth:
      domain_name: plain
      project_domain_name: project
      user_domain_name: user
      default_domain: default
  project:
    auth:
      project_domain_name: project
      user_domain_name: user
      default_domain: default
  user:
    auth:
      user_domain_name: user
      default_domain: default
  default:
    auth:
      default_domain: default
"#,
        );
        for name in &["plain", "project", "user", "default"] {
            let cloud = &file.clouds[*name];
            assert_eq!(*name, cloud.auth.resolved_domain_name());
        }
    }

    #[test]
    fn secure_file_fills_missing_values_only() {
        let mut cloud = parse(
            r#"
clouds:
  test:
    region_name: eu-de
    auth:
      username: user
      password: from-clouds
"#,
        )
        .clouds
        .remove("test")
        .unwrap();
        let secure = parse(
            r#"
clouds:
  test:
    region_name: eu-nl
    auth:
      password: from-secure
      ak: secure-ak
"#,
        )
        .clouds
        .remove("test")
        .unwrap();
        cloud.fill_from(&secure);
        assert_eq!(Some("eu-de".to_owned()), cloud.region_name);
        assert_eq!(Some("from-clouds".to_owned()), cloud.auth.password);
        assert_eq!(Some("secure-ak".to_owned()), cloud.auth.access_key);
    }

    #[test]
    fn merge_does_not_overwrite_config_values() {
        let cloud = parse(
            r#"
clouds:
  test:
    verify: false
    interface: internal
    auth:
      auth_url: https://from-cloud/v3
      project_name: eu-de_cloud
"#,
        )
        .clouds
        .remove("test")
        .unwrap();
        let mut config = Config {
            identity_endpoint: "https://explicit/v3".to_owned(),
            ..Default::default()
        };
        cloud.merge_into(&mut config);
        assert_eq!("https://explicit/v3", config.identity_endpoint);
        assert_eq!("eu-de_cloud", config.tenant_name);
        assert_eq!("internal", config.endpoint_type);
        assert_eq!(Some(true), config.insecure);
    }

    #[test]
    fn unknown_cloud_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "clouds:\n  known:\n    auth:\n      username: u").unwrap();
        let path = file.path().to_str().unwrap().to_owned();
        let lookup = move |key: &str| {
            if key == "OS_CLIENT_CONFIG_FILE" {
                Some(path.clone())
            } else {
                None
            }
        };
        let err = load_cloud("unknown", &lookup).unwrap_err();
        assert!(err.to_string().contains("'unknown' is not defined"));
        assert!(load_cloud("known", &lookup).is_ok());
    }

    #[test]
    fn secure_file_is_merged_when_loading() {
        let dir = tempfile::tempdir().unwrap();
        let clouds_path = dir.path().join("clouds.yaml");
        let secure_path = dir.path().join("secure.yaml");
        std::fs::write(
            &clouds_path,
            "clouds:\n  c:\n    auth:\n      username: u\n      project_name: p\n",
        )
        .unwrap();
        std::fs::write(&secure_path, "clouds:\n  c:\n    auth:\n      password: s3cret\n").unwrap();
        let clouds = clouds_path.to_str().unwrap().to_owned();
        let secure = secure_path.to_str().unwrap().to_owned();
        let lookup = move |key: &str| match key {
            "OS_CLIENT_CONFIG_FILE" => Some(clouds.clone()),
            "OS_CLIENT_SECURE_FILE" => Some(secure.clone()),
            _ => None,
        };
        let cloud = load_cloud("c", &lookup).unwrap();
        assert_eq!(Some("s3cret".to_owned()), cloud.auth.password);
    }
}
