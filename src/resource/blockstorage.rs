//! `blockstorage_volume_v2`: block storage volumes, with their tags kept in the EVS service.
use super::schema::is_suppressed_key;
use super::{
    check_deleted, deleted_on_not_found, get_region, region_attribute, Attribute, InstanceDiff,
    Resource, ResourceData, Schema, ValueType,
};
use crate::client::ServiceClient;
use crate::error::Error;
use crate::helpers::{expand_string_map, expand_tags, flatten_string_map, merge_value_specs};
use crate::services::Clients;
use crate::tags::{self, ResourceTags};
use crate::waiter::state::{StateChangeConf, DELETED};
use crate::waiter::Context;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use std::collections::BTreeMap;
use std::time::Duration;

pub const TYPE_NAME: &str = "blockstorage_volume_v2";

/// Metadata keys the cloud adds on its own
const CLOUD_METADATA_KEYS: &[&str] = &["policy", "backupId", "hw:passthrough"];

const VOLUME_TAGS_TYPE: &str = "cloudvolumes";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct VolumeAttachment {
    pub attachment_id: String,
    pub server_id: String,
    pub device: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Volume {
    pub id: String,
    pub status: String,
    pub size: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub availability_zone: Option<String>,
    pub volume_type: Option<String>,
    pub snapshot_id: Option<String>,
    pub source_volid: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub attachments: Vec<VolumeAttachment>,
}

#[derive(Deserialize, Debug)]
struct VolumeResponse {
    volume: Volume,
}

pub async fn get_volume(client: &ServiceClient, id: &str) -> Result<Volume, Error> {
    let url = client.service_url(&["volumes", id]);
    let response: VolumeResponse = client.get_json(url.as_str()).await?;
    Ok(response.volume)
}

async fn wait_for_volume(
    ctx: &Context,
    client: &ServiceClient,
    id: &str,
    pending: &[&str],
    target: &[&str],
    timeout: Duration,
) -> Result<Volume, Error> {
    let refresh = move || async move {
        match get_volume(client, id).await {
            Ok(volume) => {
                let status = volume.status.clone();
                Ok((volume, status))
            }
            Err(err) => deleted_on_not_found(err),
        }
    };
    StateChangeConf::new(pending, target, refresh)
        .timeout(timeout)
        .delay(Duration::from_secs(10))
        .poll_interval(Duration::from_secs(3))
        .metrics(client.provider().metrics().clone())
        .wait_for_state(ctx)
        .await
}

fn suppress_cloud_metadata(key: &str, _old: &Value, _new: &Value) -> bool {
    is_suppressed_key(key, CLOUD_METADATA_KEYS)
}

fn volume_tags(clients: &Clients, region: &str, id: &str) -> Result<ResourceTags, Error> {
    Ok(ResourceTags::new(clients.evs_v2(region)?, VOLUME_TAGS_TYPE, id))
}

fn create_body(data: &ResourceData) -> Result<Value, Error> {
    let size = data
        .get_i64("size")
        .ok_or_else(|| Error::invalid_input("the attribute 'size' is required"))?;
    let mut volume = Map::new();
    volume.insert("size".to_owned(), json!(size));
    let fields = [
        ("availability_zone", "availability_zone"),
        ("name", "name"),
        ("description", "description"),
        ("image_id", "imageRef"),
        ("snapshot_id", "snapshot_id"),
        ("source_vol_id", "source_volid"),
        ("volume_type", "volume_type"),
    ];
    for (attribute, field) in fields.iter() {
        let value = data.get_str(attribute);
        if !value.is_empty() {
            volume.insert((*field).to_owned(), json!(value));
        }
    }
    let metadata = data.get_string_map("metadata");
    if !metadata.is_empty() {
        volume.insert("metadata".to_owned(), flatten_string_map(&metadata));
    }

    let mut volume = Value::Object(volume);
    merge_value_specs(&mut volume, &data.get_string_map("value_specs"))?;
    Ok(json!({ "volume": volume }))
}

pub struct BlockStorageVolume;

#[async_trait]
impl Resource for BlockStorageVolume {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            region_attribute(),
            Attribute::required("size", ValueType::Int).describe("size in GB, can only grow in place"),
            Attribute::optional("availability_zone", ValueType::String)
                .with_computed()
                .force_new(),
            Attribute::optional("name", ValueType::String),
            Attribute::optional("description", ValueType::String),
            Attribute::optional("image_id", ValueType::String).force_new(),
            Attribute::optional("snapshot_id", ValueType::String).force_new(),
            Attribute::optional("source_vol_id", ValueType::String).force_new(),
            Attribute::optional("volume_type", ValueType::String)
                .with_computed()
                .force_new(),
            Attribute::optional("metadata", ValueType::Map)
                .with_computed()
                .suppress_diff(suppress_cloud_metadata),
            Attribute::optional("value_specs", ValueType::Map).force_new(),
            Attribute::optional("tags", ValueType::Map),
            Attribute::optional("cascade", ValueType::Bool)
                .default_value(json!(false))
                .describe("delete the snapshots of the volume along with it"),
            Attribute::computed("attachment", ValueType::Set),
        ])
    }

    /// Shrinking a volume is impossible, a smaller size replaces it
    fn customize_diff(&self, diff: &mut InstanceDiff, _prior: &Value, _planned: &Value) -> Result<(), Error> {
        let shrinks = diff
            .get("size")
            .map(|change| match (change.old.as_i64(), change.new.as_i64()) {
                (Some(old), Some(new)) => new < old,
                _ => false,
            })
            .unwrap_or(false);
        if shrinks {
            diff.force_new("size")?;
        }
        Ok(())
    }

    async fn create(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.blockstorage_v2(region.as_str())?;
        let desired_tags = expand_tags(data.get("tags"));
        tags::validate_tags(&desired_tags)?;

        let body = create_body(data)?;
        log::debug!("Create volume options: {}", body);
        let url = client.service_url(&["volumes"]);
        let response: VolumeResponse = client.post_json(url.as_str(), body).await?;
        let id = response.volume.id;
        log::info!("Created volume {}", id);
        data.set_id(id.as_str());

        wait_for_volume(
            ctx,
            &client,
            id.as_str(),
            &["downloading", "creating"],
            &["available"],
            data.timeouts().create,
        )
        .await?;

        if !desired_tags.is_empty() {
            let store = volume_tags(clients, region.as_str(), id.as_str())?;
            tags::reconcile(&store, &desired_tags).await?;
        }
        self.read(ctx, clients, data).await
    }

    async fn read(&self, _ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.blockstorage_v2(region.as_str())?;
        let id = data.id().to_owned();
        let volume = match get_volume(&client, id.as_str()).await {
            Ok(volume) => volume,
            Err(err) => return check_deleted(data, err, "volume"),
        };
        log::debug!("Retrieved volume {}: {:?}", volume.id, volume);

        let attachments = volume
            .attachments
            .iter()
            .map(|attachment| {
                json!({
                    "id": attachment.attachment_id,
                    "instance_id": attachment.server_id,
                    "device": attachment.device,
                })
            })
            .collect::<Vec<_>>();
        data.set("region", region.as_str());
        data.set("size", volume.size);
        data.set("name", volume.name.clone().unwrap_or_default());
        data.set("description", volume.description.clone().unwrap_or_default());
        data.set("availability_zone", volume.availability_zone.clone().unwrap_or_default());
        data.set("volume_type", volume.volume_type.clone().unwrap_or_default());
        data.set("metadata", flatten_string_map(&volume.metadata));
        data.set("attachment", attachments);

        let store = volume_tags(clients, region.as_str(), volume.id.as_str())?;
        let current_tags = tags::get_tags(&store).await?;
        data.set("tags", flatten_string_map(&current_tags));
        Ok(())
    }

    async fn update(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.blockstorage_v2(region.as_str())?;
        let id = data.id().to_owned();

        if data.has_change("name") || data.has_change("description") || data.has_change("metadata") {
            let mut volume = Map::new();
            volume.insert("name".to_owned(), json!(data.get_str("name")));
            volume.insert("description".to_owned(), json!(data.get_str("description")));
            if data.has_change("metadata") {
                // the API replaces the whole map, keep what the cloud added
                let mut metadata = expand_string_map(data.get_prior("metadata"));
                metadata.retain(|key, _| is_suppressed_key(key, CLOUD_METADATA_KEYS));
                metadata.extend(data.get_string_map("metadata"));
                volume.insert("metadata".to_owned(), flatten_string_map(&metadata));
            }
            let url = client.service_url(&["volumes", id.as_str()]);
            client
                .put_json::<Value>(url.as_str(), json!({ "volume": volume }))
                .await?;
        }

        if data.has_change("size") {
            let (old, new) = data.get_change("size");
            let (old, new) = (old.as_i64().unwrap_or(0), new.as_i64().unwrap_or(0));
            if new < old {
                return Err(Error::invalid_input(format!(
                    "volume {} cannot shrink from {} to {} GB, it has to be replaced",
                    id, old, new
                )));
            }
            log::info!("Extending volume {} from {} to {} GB", id, old, new);
            let url = client.service_url(&["volumes", id.as_str(), "action"]);
            client
                .post(url.as_str(), json!({"os-extend": {"new_size": new}}))
                .await?;
            wait_for_volume(
                ctx,
                &client,
                id.as_str(),
                &["extending"],
                &["available", "in-use"],
                data.timeouts().update,
            )
            .await?;
        }

        if data.has_change("tags") {
            let store = volume_tags(clients, region.as_str(), id.as_str())?;
            tags::reconcile(&store, &expand_tags(data.get("tags"))).await?;
        }
        self.read(ctx, clients, data).await
    }

    async fn delete(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.blockstorage_v2(region.as_str())?;
        let id = data.id().to_owned();
        let timeout = data.timeouts().delete;

        let volume = match get_volume(&client, id.as_str()).await {
            Ok(volume) => volume,
            Err(err) => return check_deleted(data, err, "volume"),
        };

        if !volume.attachments.is_empty() {
            let compute = clients.compute_v2(region.as_str())?;
            for attachment in volume.attachments.iter() {
                log::debug!("Detaching volume {} from server {}", id, attachment.server_id);
                let url = compute.service_url(&[
                    "servers",
                    attachment.server_id.as_str(),
                    "os-volume_attachments",
                    id.as_str(),
                ]);
                compute.delete(url.as_str()).await?;
            }
            wait_for_volume(
                ctx,
                &client,
                id.as_str(),
                &["in-use", "attaching", "detaching"],
                &["available"],
                timeout,
            )
            .await?;
        }

        let url = format!(
            "{}?cascade={}",
            client.service_url(&["volumes", id.as_str()]),
            data.get_bool("cascade")
        );
        if let Err(err) = client.delete(url.as_str()).await {
            return check_deleted(data, err, "volume");
        }
        wait_for_volume(
            ctx,
            &client,
            id.as_str(),
            &["deleting", "downloading", "available"],
            &[DELETED],
            timeout,
        )
        .await?;
        log::info!("Deleted volume {}", id);
        data.clear_id();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::{diff, DiffKind};
    use crate::testutil::{clients, MockCloud};
    use http::Method;

    fn volume(status: &str, size: i64) -> Value {
        json!({"volume": {
            "id": "v1",
            "status": status,
            "size": size,
            "name": "data",
            "description": null,
            "availability_zone": "eu-de-01",
            "volume_type": "SATA",
            "metadata": {"policy": "p-1"},
            "attachments": []
        }})
    }

    fn no_tags(cloud: &MockCloud) {
        cloud.on(Method::GET, "/v2/p1/cloudvolumes/v1/tags", 200, json!({"tags": []}));
    }

    #[tokio::test]
    async fn create_waits_for_available_and_reads_back() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, "/v2/p1/volumes", 202, volume("creating", 10))
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("creating", 10))
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("downloading", 10))
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("available", 10))
            .on(Method::POST, "/v2/p1/cloudvolumes/v1/tags/action", 204, Value::Null);
        no_tags(&cloud);

        let mut data = ResourceData::new(
            Value::Null,
            json!({
                "size": 10,
                "name": "data",
                "value_specs": {"multiattach": "true", "name": "ignored"},
                "tags": {"env": "prod"}
            }),
        )
        .unwrap();
        BlockStorageVolume
            .create(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();

        assert_eq!("v1", data.id());
        let state = data.state();
        assert_eq!(json!("eu-de-01"), state["availability_zone"]);
        assert_eq!(json!({"policy": "p-1"}), state["metadata"]);

        let requests = cloud.requests();
        let create = requests
            .iter()
            .find(|request| request.method == Method::POST && request.path == "/v2/p1/volumes")
            .unwrap();
        assert_eq!(
            Some(json!({"volume": {"size": 10, "name": "data", "multiattach": "true"}})),
            create.body
        );
        assert_eq!(
            vec!["/v2/p1/volumes".to_owned(), "/v2/p1/cloudvolumes/v1/tags/action".to_owned()],
            cloud.paths(Method::POST)
        );
    }

    #[tokio::test]
    async fn error_state_fails_the_create() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, "/v2/p1/volumes", 202, volume("creating", 10))
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("error", 10));
        let mut data = ResourceData::new(Value::Null, json!({"size": 10})).unwrap();
        let err = BlockStorageVolume
            .create(&Context::background(), &clients(cloud), &mut data)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected state 'error'"));
    }

    #[tokio::test]
    async fn growing_extends_in_place() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, "/v2/p1/volumes/v1/action", 202, Value::Null)
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("extending", 10))
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("available", 20));
        no_tags(&cloud);

        let prior = json!({"id": "v1", "size": 10, "name": "data", "cascade": false});
        let mut data = ResourceData::new(prior, json!({"size": 20, "name": "data", "cascade": false})).unwrap();
        BlockStorageVolume
            .update(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();

        assert_eq!(Some(20), data.get_i64("size"));
        let action = cloud
            .requests()
            .into_iter()
            .find(|request| request.path == "/v2/p1/volumes/v1/action")
            .unwrap();
        assert_eq!(Some(json!({"os-extend": {"new_size": 20}})), action.body);
        assert!(cloud.paths(Method::DELETE).is_empty());
        assert!(cloud.paths(Method::PUT).is_empty());
    }

    #[tokio::test]
    async fn cloud_metadata_survives_a_resize() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, "/v2/p1/volumes/v1/action", 202, Value::Null)
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("available", 20));
        no_tags(&cloud);

        let prior = json!({"id": "v1", "size": 10, "name": "data", "metadata": {"policy": "p-1", "owner": "me"}});
        let planned = json!({"size": 20, "name": "data", "metadata": {"owner": "me"}});
        let schema = BlockStorageVolume.schema();
        assert_eq!(
            "1 differences: size: 10 => 20",
            diff(&schema, &prior, &planned).to_string()
        );

        let mut data = ResourceData::new(prior, planned).unwrap().with_schema(&schema);
        BlockStorageVolume
            .update(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();
        assert!(cloud.paths(Method::PUT).is_empty());
        assert_eq!(vec!["/v2/p1/volumes/v1/action".to_owned()], cloud.paths(Method::POST));
    }

    #[tokio::test]
    async fn metadata_updates_keep_cloud_keys() {
        let cloud = MockCloud::new();
        cloud
            .on(Method::PUT, "/v2/p1/volumes/v1", 200, volume("available", 10))
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("available", 10));
        no_tags(&cloud);

        let prior = json!({"id": "v1", "size": 10, "name": "data", "metadata": {"policy": "p-1", "owner": "me"}});
        let planned = json!({"size": 10, "name": "data", "metadata": {"owner": "you"}});
        let mut data = ResourceData::new(prior, planned)
            .unwrap()
            .with_schema(&BlockStorageVolume.schema());
        BlockStorageVolume
            .update(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();

        let put = cloud
            .requests()
            .into_iter()
            .find(|request| request.method == Method::PUT)
            .unwrap();
        assert_eq!(
            Some(json!({"volume": {
                "name": "data",
                "description": "",
                "metadata": {"owner": "you", "policy": "p-1"}
            }})),
            put.body
        );
    }

    #[test]
    fn shrinking_forces_replacement() {
        let resource = BlockStorageVolume;
        let schema = resource.schema();
        let prior = json!({"id": "v1", "size": 20, "metadata": {"policy": "p-1"}});

        let planned = json!({"size": 10});
        let mut shrink = diff(&schema, &prior, &planned);
        resource.customize_diff(&mut shrink, &prior, &planned).unwrap();
        assert_eq!(DiffKind::ForceNew, shrink.kind());

        let planned = json!({"size": 30, "metadata": {}});
        let mut grow = diff(&schema, &prior, &planned);
        resource.customize_diff(&mut grow, &prior, &planned).unwrap();
        assert_eq!(DiffKind::Update, grow.kind());
        assert!(grow.get("metadata.policy").is_none());
    }

    #[tokio::test]
    async fn read_of_missing_volume_clears_the_id() {
        let cloud = MockCloud::new();
        let mut data = ResourceData::from_state(json!({"id": "v1", "size": 10})).unwrap();
        BlockStorageVolume
            .read(&Context::background(), &clients(cloud), &mut data)
            .await
            .unwrap();
        assert_eq!(Value::Null, data.state());
    }

    #[tokio::test]
    async fn delete_cascades_and_waits_for_deleted() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("available", 10))
            .on(Method::GET, "/v2/p1/volumes/v1", 200, volume("deleting", 10))
            .on(Method::GET, "/v2/p1/volumes/v1", 404, json!({"itemNotFound": {}}))
            .on(Method::DELETE, "/v2/p1/volumes/v1", 202, Value::Null);
        let mut data = ResourceData::from_state(json!({"id": "v1", "size": 10, "cascade": true})).unwrap();
        BlockStorageVolume
            .delete(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();

        assert_eq!("", data.id());
        let delete = cloud
            .requests()
            .into_iter()
            .find(|request| request.method == Method::DELETE)
            .unwrap();
        assert_eq!("cascade=true", delete.query);
    }
}
