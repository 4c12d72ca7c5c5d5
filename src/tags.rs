//! Tag reconciliation for services exposing the `{resource_type}/{id}/tags` API.
//!
//! The API has no replace primitive, so reconciling deletes every current tag and then
//! creates the desired ones. The two batch calls are not atomic: a failure in between leaves
//! the resource without tags until the next reconcile.
use crate::client::ServiceClient;
use crate::error::Error;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use std::collections::BTreeMap;

lazy_static! {
    static ref TAG_KEY: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,36}$").unwrap();
    static ref TAG_VALUE: Regex = Regex::new(r"^[A-Za-z0-9._-]{0,43}$").unwrap();
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tag {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TagAction {
    Create,
    Delete,
}

impl TagAction {
    pub fn as_str(&self) -> &'static str {
        match *self {
            TagAction::Create => "create",
            TagAction::Delete => "delete",
        }
    }
}

/// The tags of one resource
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Tag>, Error>;

    async fn batch(&self, action: TagAction, tags: &[Tag]) -> Result<(), Error>;
}

#[derive(Deserialize, Debug)]
struct TagsResponse {
    #[serde(default)]
    tags: Vec<Tag>,
}

/// `TagStore` over `{resource_type}/{id}/tags` and `{resource_type}/{id}/tags/action`
#[derive(Debug, Clone)]
pub struct ResourceTags {
    client: ServiceClient,
    resource_type: String,
    resource_id: String,
}

impl ResourceTags {
    pub fn new(
        client: ServiceClient,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> ResourceTags {
        ResourceTags {
            client,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

#[async_trait]
impl TagStore for ResourceTags {
    async fn list(&self) -> Result<Vec<Tag>, Error> {
        let url = self
            .client
            .service_url(&[self.resource_type.as_str(), self.resource_id.as_str(), "tags"]);
        let response: TagsResponse = self.client.get_json(url.as_str()).await?;
        Ok(response.tags)
    }

    async fn batch(&self, action: TagAction, tags: &[Tag]) -> Result<(), Error> {
        let url = self.client.service_url(&[
            self.resource_type.as_str(),
            self.resource_id.as_str(),
            "tags",
            "action",
        ]);
        let body = json!({
            "action": action.as_str(),
            "tags": tags,
        });
        self.client.post(url.as_str(), body).await
    }
}

pub fn validate_tag(key: &str, value: &str) -> Result<(), Error> {
    if !TAG_KEY.is_match(key) {
        return Err(Error::invalid_input(format!(
            "invalid tag key '{}': up to 36 letters, digits, underscores or hyphens are allowed",
            key
        )));
    }
    if !TAG_VALUE.is_match(value) {
        return Err(Error::invalid_input(format!(
            "invalid value '{}' for tag '{}': up to 43 letters, digits, periods, underscores or hyphens are allowed",
            value, key
        )));
    }
    Ok(())
}

pub fn validate_tags(tags: &BTreeMap<String, String>) -> Result<(), Error> {
    tags.iter()
        .try_for_each(|(key, value)| validate_tag(key.as_str(), value.as_str()))
}

pub fn to_tag_list(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

pub async fn get_tags(store: &dyn TagStore) -> Result<BTreeMap<String, String>, Error> {
    let tags = store.list().await?;
    Ok(tags.into_iter().map(|tag| (tag.key, tag.value)).collect())
}

/// Makes the tags of the resource equal `desired`. Tags are validated before any call.
pub async fn reconcile(store: &dyn TagStore, desired: &BTreeMap<String, String>) -> Result<(), Error> {
    validate_tags(desired)?;

    let current = store.list().await?;
    if !current.is_empty() {
        log::debug!("Removing {} existing tags", current.len());
        store.batch(TagAction::Delete, current.as_slice()).await?;
    }
    if !desired.is_empty() {
        log::debug!("Creating {} tags", desired.len());
        store
            .batch(TagAction::Create, to_tag_list(desired).as_slice())
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::MockCloud;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        tags: Mutex<BTreeMap<String, String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TagStore for MemoryStore {
        async fn list(&self) -> Result<Vec<Tag>, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(to_tag_list(&self.tags.lock().unwrap()))
        }

        async fn batch(&self, action: TagAction, tags: &[Tag]) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut current = self.tags.lock().unwrap();
            for tag in tags {
                match action {
                    TagAction::Create => {
                        current.insert(tag.key.clone(), tag.value.clone());
                    }
                    TagAction::Delete => {
                        current.remove(&tag.key);
                    }
                }
            }
            Ok(())
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[tokio::test]
    async fn reconcile_converges_and_is_repeatable() {
        let store = MemoryStore::default();
        *store.tags.lock().unwrap() = tags(&[("env", "dev"), ("owner", "alice")]);

        let desired = tags(&[("env", "prod"), ("team", "core")]);
        reconcile(&store, &desired).await.unwrap();
        assert_eq!(desired, get_tags(&store).await.unwrap());

        reconcile(&store, &desired).await.unwrap();
        assert_eq!(desired, get_tags(&store).await.unwrap());

        reconcile(&store, &BTreeMap::new()).await.unwrap();
        assert!(get_tags(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_tags_are_rejected_before_any_call() {
        let store = MemoryStore::default();
        let err = reconcile(&store, &tags(&[("bad key", "v")])).await.unwrap_err();
        assert!(err.to_string().contains("invalid tag key"));
        let err = reconcile(&store, &tags(&[("k", "a/b")])).await.unwrap_err();
        assert!(err.to_string().contains("invalid value"));
        assert_eq!(0, store.calls.load(Ordering::SeqCst));
    }

    #[test]
    fn tag_rules() {
        assert!(validate_tag("a", "").is_ok());
        assert!(validate_tag(&"k".repeat(36), &"v".repeat(43)).is_ok());
        assert!(validate_tag(&"k".repeat(37), "v").is_err());
        assert!(validate_tag("k", &"v".repeat(44)).is_err());
        assert!(validate_tag("", "v").is_err());
        assert!(validate_tag("key.with.dot", "v").is_err());
        assert!(validate_tag("k", "1.0_beta-2").is_ok());
    }

    #[tokio::test]
    async fn resource_tags_use_the_action_api() {
        let cloud = MockCloud::new();
        cloud
            .on(Method::GET, "/v2/p1/cloudvolumes/v1/tags", 200, json!({"tags": [{"key": "old", "value": "x"}]}))
            .on(Method::POST, "/v2/p1/cloudvolumes/v1/tags/action", 204, serde_json::Value::Null);
        let client = crate::testutil::service_client(cloud.clone(), "evs", "https://evs.example.com/v2/p1");
        let store = ResourceTags::new(client, "cloudvolumes", "v1");

        reconcile(&store, &tags(&[("env", "prod")])).await.unwrap();

        let posts = cloud
            .requests()
            .into_iter()
            .filter(|request| request.method == Method::POST)
            .map(|request| request.body.unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                json!({"action": "delete", "tags": [{"key": "old", "value": "x"}]}),
                json!({"action": "create", "tags": [{"key": "env", "value": "prod"}]}),
            ],
            posts
        );
    }
}
