//! `compute_instance_v2`: servers of the compute API, enriched with the attributes only the
//! ECS API reports.
use super::{
    check_deleted, deleted_on_not_found, get_region, region_attribute, Attribute, Resource,
    ResourceData, Schema, Timeouts, ValueType,
};
use crate::client::ServiceClient;
use crate::error::{Error, WaitError};
use crate::helpers::flatten_string_map;
use crate::services::Clients;
use crate::waiter::state::{Refreshed, StateChangeConf, DELETED};
use crate::waiter::{wait_for_job_success, Context, JobResponse};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub const TYPE_NAME: &str = "compute_instance_v2";

const NETWORK_FIELDS: &[(&str, &str)] = &[("uuid", "uuid"), ("fixed_ip_v4", "fixed_ip"), ("port", "port")];

const BLOCK_DEVICE_FIELDS: &[&str] = &[
    "uuid",
    "source_type",
    "destination_type",
    "volume_size",
    "volume_type",
    "boot_index",
    "delete_on_termination",
];

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Fault {
    pub code: Value,
    pub message: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct NamedRef {
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Address {
    pub addr: String,
    pub version: u8,
    #[serde(rename = "OS-EXT-IPS:type")]
    pub kind: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: String,
    /// an object with the image ID, or an empty string for servers booted from a volume
    pub image: Value,
    pub flavor: Value,
    pub metadata: BTreeMap<String, String>,
    pub security_groups: Vec<NamedRef>,
    pub key_name: Option<String>,
    #[serde(rename = "accessIPv4")]
    pub access_ip_v4: Option<String>,
    pub addresses: BTreeMap<String, Vec<Address>>,
    #[serde(rename = "OS-EXT-AZ:availability_zone")]
    pub availability_zone: Option<String>,
    pub fault: Option<Fault>,
}

impl Server {
    fn is_deleted(&self) -> bool {
        self.status == "DELETED" || self.status == "SOFT_DELETED"
    }

    /// `accessIPv4`, or the first fixed IPv4 address
    fn access_ip_v4(&self) -> String {
        if let Some(ip) = self.access_ip_v4.as_ref().filter(|ip| !ip.is_empty()) {
            return ip.clone();
        }
        self.addresses
            .values()
            .flat_map(|addresses| addresses.iter())
            .find(|address| address.version == 4 && address.kind != "floating")
            .map(|address| address.addr.clone())
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Debug)]
struct ServerResponse {
    server: Server,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
struct AttachedVolume {
    id: String,
    device: String,
}

/// The part of the ECS view of a server the compute API lacks
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
struct ExtendedServer {
    #[serde(rename = "OS-EXT-AZ:availability_zone")]
    availability_zone: String,
    #[serde(rename = "os-extended-volumes:volumes_attached")]
    volumes_attached: Vec<AttachedVolume>,
}

#[derive(Deserialize, Debug)]
struct ExtendedServerResponse {
    server: ExtendedServer,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct Flavor {
    id: String,
    name: String,
}

#[derive(Deserialize, Debug)]
struct FlavorsResponse {
    flavors: Vec<Flavor>,
}

pub async fn get_server(client: &ServiceClient, id: &str) -> Result<Server, Error> {
    let url = client.service_url(&["servers", id]);
    let response: ServerResponse = client.get_json(url.as_str()).await?;
    Ok(response.server)
}

/// Reports the server status, `DELETED` once it is gone. With `fail_on_fault`, a server in
/// `ERROR` that carries a fault ends the wait with that fault.
async fn refresh_server(client: &ServiceClient, id: &str, fail_on_fault: bool) -> Refreshed<Server> {
    let server = match get_server(client, id).await {
        Ok(server) => server,
        Err(err) => return deleted_on_not_found(err),
    };
    if server.is_deleted() {
        return Ok((server, DELETED.to_owned()));
    }
    if fail_on_fault && server.status == "ERROR" {
        if let Some(fault) = server.fault.as_ref() {
            let code = match fault.code {
                Value::String(ref code) => code.clone(),
                ref other => other.to_string(),
            };
            return Err(WaitError::Fault {
                state: server.status.clone(),
                code,
                message: fault.message.clone(),
            }
            .into());
        }
    }
    let status = server.status.clone();
    Ok((server, status))
}

async fn wait_for_server(
    ctx: &Context,
    client: &ServiceClient,
    id: &str,
    pending: &[&str],
    target: &[&str],
    timeout: Duration,
) -> Result<Server, Error> {
    let fail_on_fault = !target.contains(&DELETED);
    let refresh = move || refresh_server(client, id, fail_on_fault);
    StateChangeConf::new(pending, target, refresh)
        .timeout(timeout)
        .delay(Duration::from_secs(10))
        .poll_interval(Duration::from_secs(3))
        .metrics(client.provider().metrics().clone())
        .wait_for_state(ctx)
        .await
}

async fn find_flavor_id(client: &ServiceClient, name: &str) -> Result<String, Error> {
    let url = client.service_url(&["flavors", "detail"]);
    let response: FlavorsResponse = client.get_json(url.as_str()).await?;
    response
        .flavors
        .into_iter()
        .find(|flavor| flavor.name == name)
        .map(|flavor| flavor.id)
        .ok_or_else(|| Error::invalid_input(format!("unable to find flavor with name '{}'", name)))
}

async fn planned_flavor_id(client: &ServiceClient, data: &ResourceData) -> Result<String, Error> {
    match (data.get_str("flavor_id"), data.get_str("flavor_name")) {
        ("", "") => Err(Error::invalid_input(
            "one of 'flavor_id' or 'flavor_name' must be set",
        )),
        ("", name) => find_flavor_id(client, name).await,
        (id, _) => Ok(id.to_owned()),
    }
}

fn string_set(value: &Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Copies the listed fields of every object in a list attribute, renaming them on the way
fn expand_objects(data: &ResourceData, key: &str, fields: &[(&str, &str)]) -> Vec<Value> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|item| {
                    let mut expanded = Map::new();
                    for (attribute, field) in fields {
                        match item.get(*attribute) {
                            None | Some(Value::Null) => {}
                            Some(Value::String(s)) if s.is_empty() => {}
                            Some(value) => {
                                expanded.insert((*field).to_owned(), value.clone());
                            }
                        }
                    }
                    Value::Object(expanded)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn create_body(data: &ResourceData, flavor_id: String) -> Value {
    let mut server = Map::new();
    server.insert("name".to_owned(), json!(data.get_str("name")));
    server.insert("flavorRef".to_owned(), json!(flavor_id));
    let fields = [
        ("image_id", "imageRef"),
        ("availability_zone", "availability_zone"),
        ("key_pair", "key_name"),
    ];
    for (attribute, field) in fields.iter() {
        let value = data.get_str(attribute);
        if !value.is_empty() {
            server.insert((*field).to_owned(), json!(value));
        }
    }
    let user_data = data.get_str("user_data");
    if !user_data.is_empty() {
        server.insert("user_data".to_owned(), json!(base64::encode(user_data)));
    }
    let security_groups = data
        .get_string_list("security_groups")
        .into_iter()
        .map(|name| json!({ "name": name }))
        .collect::<Vec<_>>();
    if !security_groups.is_empty() {
        server.insert("security_groups".to_owned(), json!(security_groups));
    }
    let metadata = data.get_string_map("metadata");
    if !metadata.is_empty() {
        server.insert("metadata".to_owned(), flatten_string_map(&metadata));
    }
    let networks = expand_objects(data, "network", NETWORK_FIELDS);
    if !networks.is_empty() {
        server.insert("networks".to_owned(), json!(networks));
    }
    let block_device_fields = BLOCK_DEVICE_FIELDS
        .iter()
        .map(|field| (*field, *field))
        .collect::<Vec<_>>();
    let block_devices = expand_objects(data, "block_device", block_device_fields.as_slice());
    if !block_devices.is_empty() {
        server.insert("block_device_mapping_v2".to_owned(), json!(block_devices));
    }
    json!({ "server": server })
}

pub struct ComputeInstance;

impl ComputeInstance {
    async fn server_action(client: &ServiceClient, id: &str, action: Value) -> Result<(), Error> {
        let url = client.service_url(&["servers", id, "action"]);
        client.post(url.as_str(), action).await
    }

    async fn extended_attributes(clients: &Clients, region: &str, id: &str) -> Result<ExtendedServer, Error> {
        let ecs = clients.ecs_v1(region)?;
        let url = ecs.service_url(&["cloudservers", id]);
        let response: ExtendedServerResponse = ecs.get_json(url.as_str()).await?;
        Ok(response.server)
    }

    async fn update_metadata(client: &ServiceClient, id: &str, data: &ResourceData) -> Result<(), Error> {
        let (old, _) = data.get_change("metadata");
        let old = crate::helpers::expand_string_map(Some(&old));
        let new = data.get_string_map("metadata");
        for key in old.keys().filter(|key| !new.contains_key(*key)) {
            log::debug!("Removing metadata key '{}' from server {}", key, id);
            let url = client.service_url(&["servers", id, "metadata", key.as_str()]);
            client.delete(url.as_str()).await?;
        }
        if !new.is_empty() {
            let url = client.service_url(&["servers", id, "metadata"]);
            client
                .post(url.as_str(), json!({ "metadata": flatten_string_map(&new) }))
                .await?;
        }
        Ok(())
    }

    async fn update_security_groups(client: &ServiceClient, id: &str, data: &ResourceData) -> Result<(), Error> {
        let (old, new) = data.get_change("security_groups");
        let (old, new) = (string_set(&old), string_set(&new));
        for name in old.difference(&new) {
            log::debug!("Removing security group '{}' from server {}", name, id);
            let result = ComputeInstance::server_action(client, id, json!({"removeSecurityGroup": {"name": name}})).await;
            match result {
                Err(err) if err.is_not_found() => {
                    log::warn!("Security group '{}' was already removed from server {}", name, id);
                }
                other => other?,
            }
        }
        for name in new.difference(&old) {
            log::debug!("Adding security group '{}' to server {}", name, id);
            ComputeInstance::server_action(client, id, json!({"addSecurityGroup": {"name": name}})).await?;
        }
        Ok(())
    }

    async fn resize(ctx: &Context, client: &ServiceClient, id: &str, flavor_id: &str, timeout: Duration) -> Result<(), Error> {
        log::info!("Resizing server {} to flavor {}", id, flavor_id);
        ComputeInstance::server_action(client, id, json!({"resize": {"flavorRef": flavor_id}})).await?;
        wait_for_server(ctx, client, id, &["RESIZE"], &["VERIFY_RESIZE"], timeout).await?;

        ComputeInstance::server_action(client, id, json!({ "confirmResize": null })).await?;
        wait_for_server(ctx, client, id, &["VERIFY_RESIZE"], &["ACTIVE"], timeout).await?;
        Ok(())
    }
}

#[async_trait]
impl Resource for ComputeInstance {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts {
            create: Duration::from_secs(30 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(30 * 60),
            ..Timeouts::default()
        }
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            region_attribute(),
            Attribute::required("name", ValueType::String),
            Attribute::optional("image_id", ValueType::String)
                .with_computed()
                .force_new(),
            Attribute::optional("flavor_id", ValueType::String).with_computed(),
            Attribute::optional("flavor_name", ValueType::String).with_computed(),
            Attribute::optional("availability_zone", ValueType::String)
                .with_computed()
                .force_new(),
            Attribute::optional("key_pair", ValueType::String).force_new(),
            Attribute::optional("user_data", ValueType::String).force_new(),
            Attribute::optional("security_groups", ValueType::Set).with_computed(),
            Attribute::optional("metadata", ValueType::Map),
            Attribute::optional("network", ValueType::List)
                .with_computed()
                .force_new(),
            Attribute::optional("block_device", ValueType::List).force_new(),
            Attribute::optional("delete_disks_on_termination", ValueType::Bool)
                .default_value(json!(false)),
            Attribute::optional("delete_eip_on_termination", ValueType::Bool)
                .default_value(json!(false)),
            Attribute::computed("access_ip_v4", ValueType::String),
            Attribute::computed("status", ValueType::String),
            Attribute::computed("volume_attached", ValueType::List),
        ])
    }

    async fn create(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.compute_v2(region.as_str())?;
        let flavor_id = planned_flavor_id(&client, data).await?;

        let url = client.service_url(&["servers"]);
        let response: ServerResponse = client.post_json(url.as_str(), create_body(data, flavor_id)).await?;
        let id = response.server.id;
        log::info!("Created server {}", id);
        data.set_id(id.as_str());

        wait_for_server(ctx, &client, id.as_str(), &["BUILD"], &["ACTIVE"], data.timeouts().create).await?;
        self.read(ctx, clients, data).await
    }

    async fn read(&self, _ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.compute_v2(region.as_str())?;
        let id = data.id().to_owned();
        let server = match get_server(&client, id.as_str()).await {
            Ok(server) => server,
            Err(err) => return check_deleted(data, err, "server"),
        };
        if server.is_deleted() {
            log::info!("Server {} is {}, removing it from state", id, server.status);
            data.clear_id();
            return Ok(());
        }

        data.set("region", region.as_str());
        data.set("name", server.name.as_str());
        data.set("status", server.status.as_str());
        data.set("flavor_id", server.flavor.get("id").cloned().unwrap_or(Value::Null));
        if let Some(image_id) = server.image.get("id") {
            data.set("image_id", image_id.clone());
        }
        data.set("metadata", flatten_string_map(&server.metadata));
        data.set(
            "security_groups",
            server
                .security_groups
                .iter()
                .map(|group| group.name.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>(),
        );
        data.set("key_pair", server.key_name.clone().unwrap_or_default());
        data.set("access_ip_v4", server.access_ip_v4());
        if let Some(zone) = server.availability_zone.as_ref() {
            data.set("availability_zone", zone.as_str());
        }

        // the primary result stands even if the ECS view is unavailable
        match ComputeInstance::extended_attributes(clients, region.as_str(), id.as_str()).await {
            Ok(extended) => {
                if !extended.availability_zone.is_empty() {
                    data.set("availability_zone", extended.availability_zone.as_str());
                }
                let volumes = extended
                    .volumes_attached
                    .iter()
                    .map(|volume| json!({"id": volume.id, "device": volume.device}))
                    .collect::<Vec<_>>();
                data.set("volume_attached", volumes);
            }
            Err(err) => {
                log::warn!("Unable to read the extended attributes of server {}: {}", id, err);
            }
        }
        Ok(())
    }

    async fn update(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.compute_v2(region.as_str())?;
        let id = data.id().to_owned();

        if data.has_change("name") {
            let url = client.service_url(&["servers", id.as_str()]);
            client
                .put_json::<Value>(url.as_str(), json!({"server": {"name": data.get_str("name")}}))
                .await?;
        }
        if data.has_change("metadata") {
            ComputeInstance::update_metadata(&client, id.as_str(), data).await?;
        }
        if data.has_change("security_groups") {
            ComputeInstance::update_security_groups(&client, id.as_str(), data).await?;
        }

        let new_flavor = if data.has_change("flavor_id") {
            Some(data.get_str("flavor_id").to_owned())
        } else if data.has_change("flavor_name") {
            Some(find_flavor_id(&client, data.get_str("flavor_name")).await?)
        } else {
            None
        };
        if let Some(flavor_id) = new_flavor {
            ComputeInstance::resize(ctx, &client, id.as_str(), flavor_id.as_str(), data.timeouts().update).await?;
        }
        self.read(ctx, clients, data).await
    }

    async fn delete(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.compute_v2(region.as_str())?;
        let id = data.id().to_owned();
        let timeout = data.timeouts().delete;
        let delete_volumes = data.get_bool("delete_disks_on_termination");
        let delete_eip = data.get_bool("delete_eip_on_termination");

        if delete_volumes || delete_eip {
            let ecs = clients.ecs_v1(region.as_str())?;
            let url = ecs.service_url(&["cloudservers", "delete"]);
            let body = json!({
                "servers": [{"id": id}],
                "delete_publicip": delete_eip,
                "delete_volume": delete_volumes,
            });
            let job = match ecs.post_json::<JobResponse>(url.as_str(), body).await {
                Ok(job) => job,
                Err(err) => return check_deleted(data, err, "server"),
            };
            wait_for_job_success(ctx, &ecs, job.job_id.as_str(), timeout).await?;
        } else {
            let url = client.service_url(&["servers", id.as_str()]);
            if let Err(err) = client.delete(url.as_str()).await {
                return check_deleted(data, err, "server");
            }
        }

        wait_for_server(
            ctx,
            &client,
            id.as_str(),
            &["ACTIVE", "SHUTOFF", "BUILD", "ERROR", "DELETING"],
            &[DELETED],
            timeout,
        )
        .await?;
        log::info!("Deleted server {}", id);
        data.clear_id();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{clients, MockCloud};
    use http::Method;

    const SERVER: &str = "/v2.1/p1/servers/s1";

    fn server(status: &str) -> Value {
        json!({"server": {
            "id": "s1",
            "name": "web",
            "status": status,
            "image": {"id": "img-1"},
            "flavor": {"id": "s2.medium.1"},
            "metadata": {"role": "web"},
            "security_groups": [{"name": "default"}],
            "key_name": null,
            "accessIPv4": "",
            "addresses": {"net-1": [{"addr": "192.168.0.10", "version": 4, "OS-EXT-IPS:type": "fixed"}]},
            "OS-EXT-AZ:availability_zone": "eu-de-01"
        }})
    }

    fn bodies(cloud: &MockCloud, path: &str) -> Vec<Value> {
        cloud
            .requests()
            .into_iter()
            .filter(|request| request.path == path && request.method == Method::POST)
            .filter_map(|request| request.body)
            .collect()
    }

    #[tokio::test]
    async fn create_waits_for_active_and_enriches() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, "/v2.1/p1/servers", 202, json!({"server": {"id": "s1"}}))
            .on(Method::GET, SERVER, 200, server("BUILD"))
            .on(Method::GET, SERVER, 200, server("ACTIVE"))
            .on(
                Method::GET,
                "/v1/p1/cloudservers/s1",
                200,
                json!({"server": {
                    "OS-EXT-AZ:availability_zone": "eu-de-02",
                    "os-extended-volumes:volumes_attached": [{"id": "v1", "device": "/dev/vda"}]
                }}),
            );

        let mut data = ResourceData::new(
            Value::Null,
            json!({
                "name": "web",
                "flavor_id": "s2.medium.1",
                "image_id": "img-1",
                "user_data": "#!/bin/sh",
                "security_groups": ["default"],
                "network": [{"uuid": "net-1", "fixed_ip_v4": ""}]
            }),
        )
        .unwrap();
        ComputeInstance
            .create(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();

        assert_eq!("s1", data.id());
        let state = data.state();
        assert_eq!(json!("ACTIVE"), state["status"]);
        assert_eq!(json!("eu-de-02"), state["availability_zone"]);
        assert_eq!(json!("192.168.0.10"), state["access_ip_v4"]);
        assert_eq!(json!([{"id": "v1", "device": "/dev/vda"}]), state["volume_attached"]);

        let create = &bodies(&cloud, "/v2.1/p1/servers")[0];
        assert_eq!(json!("IyEvYmluL3No"), create["server"]["user_data"]);
        assert_eq!(json!([{"uuid": "net-1"}]), create["server"]["networks"]);
        assert_eq!(json!([{"name": "default"}]), create["server"]["security_groups"]);
    }

    #[tokio::test]
    async fn faults_end_the_create() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        let mut failed = server("ERROR");
        failed["server"]["fault"] = json!({"code": 500, "message": "No valid host was found"});
        cloud
            .on(Method::POST, "/v2.1/p1/servers", 202, json!({"server": {"id": "s1"}}))
            .on(Method::GET, SERVER, 200, failed);
        let mut data = ResourceData::new(Value::Null, json!({"name": "web", "flavor_id": "f"})).unwrap();
        let err = ComputeInstance
            .create(&Context::background(), &clients(cloud), &mut data)
            .await
            .unwrap_err();
        match err {
            Error::Wait(WaitError::Fault { code, message, .. }) => {
                assert_eq!("500", code);
                assert_eq!("No valid host was found", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn enrichment_failure_keeps_the_primary_result() {
        let cloud = MockCloud::new();
        cloud
            .on(Method::GET, SERVER, 200, server("ACTIVE"))
            .on(Method::GET, "/v1/p1/cloudservers/s1", 500, json!({"error": "boom"}));
        let mut data = ResourceData::from_state(json!({"id": "s1", "name": "web"})).unwrap();
        ComputeInstance
            .read(&Context::background(), &clients(cloud), &mut data)
            .await
            .unwrap();
        assert_eq!("s1", data.id());
        assert_eq!("eu-de-01", data.get_str("availability_zone"));
        assert_eq!("s2.medium.1", data.get_str("flavor_id"));
    }

    #[tokio::test]
    async fn missing_server_is_removed_from_state() {
        let cloud = MockCloud::new();
        let mut data = ResourceData::from_state(json!({"id": "s1", "name": "web"})).unwrap();
        ComputeInstance
            .read(&Context::background(), &clients(cloud), &mut data)
            .await
            .unwrap();
        assert_eq!(Value::Null, data.state());
    }

    #[tokio::test]
    async fn update_applies_metadata_and_security_group_differences() {
        let cloud = MockCloud::new();
        cloud
            .on(Method::GET, SERVER, 200, server("ACTIVE"))
            .on(Method::POST, "/v2.1/p1/servers/s1/action", 202, Value::Null)
            .on(Method::POST, "/v2.1/p1/servers/s1/metadata", 200, json!({"metadata": {}}))
            .on(Method::DELETE, "/v2.1/p1/servers/s1/metadata/tier", 204, Value::Null);

        let prior = json!({
            "id": "s1",
            "name": "web",
            "metadata": {"role": "web", "tier": "1"},
            "security_groups": ["a", "b"]
        });
        let planned = json!({
            "name": "web",
            "metadata": {"role": "web"},
            "security_groups": ["b", "c"]
        });
        let mut data = ResourceData::new(prior, planned).unwrap();
        ComputeInstance
            .update(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();

        assert_eq!(
            vec![
                json!({"removeSecurityGroup": {"name": "a"}}),
                json!({"addSecurityGroup": {"name": "c"}}),
            ],
            bodies(&cloud, "/v2.1/p1/servers/s1/action")
        );
        assert_eq!(
            vec![json!({"metadata": {"role": "web"}})],
            bodies(&cloud, "/v2.1/p1/servers/s1/metadata")
        );
        assert_eq!(vec!["/v2.1/p1/servers/s1/metadata/tier".to_owned()], cloud.paths(Method::DELETE));
        assert!(cloud.paths(Method::PUT).is_empty());
    }

    #[tokio::test]
    async fn flavor_change_resizes_and_confirms() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, "/v2.1/p1/servers/s1/action", 202, Value::Null)
            .on(Method::GET, SERVER, 200, server("RESIZE"))
            .on(Method::GET, SERVER, 200, server("VERIFY_RESIZE"))
            .on(Method::GET, SERVER, 200, server("ACTIVE"));

        let prior = json!({"id": "s1", "name": "web", "flavor_id": "s2.small.1"});
        let planned = json!({"name": "web", "flavor_id": "s2.medium.1"});
        let mut data = ResourceData::new(prior, planned).unwrap();
        ComputeInstance
            .update(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();

        assert_eq!(
            vec![
                json!({"resize": {"flavorRef": "s2.medium.1"}}),
                json!({"confirmResize": null}),
            ],
            bodies(&cloud, "/v2.1/p1/servers/s1/action")
        );
    }

    #[tokio::test]
    async fn delete_through_ecs_job_removes_disks() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, "/v1/p1/cloudservers/delete", 200, json!({"job_id": "j1"}))
            .on(Method::GET, "/v1/p1/jobs/j1", 200, json!({"job_id": "j1", "status": "RUNNING"}))
            .on(Method::GET, "/v1/p1/jobs/j1", 200, json!({"job_id": "j1", "status": "SUCCESS"}));

        let mut data = ResourceData::from_state(json!({
            "id": "s1",
            "delete_disks_on_termination": true,
            "delete_eip_on_termination": false
        }))
        .unwrap();
        ComputeInstance
            .delete(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();

        assert_eq!("", data.id());
        assert_eq!(
            vec![json!({"servers": [{"id": "s1"}], "delete_publicip": false, "delete_volume": true})],
            bodies(&cloud, "/v1/p1/cloudservers/delete")
        );
        assert!(cloud.paths(Method::DELETE).is_empty());
    }

    #[tokio::test]
    async fn conflicting_delete_is_reported() {
        let cloud = MockCloud::new();
        cloud.on(Method::DELETE, SERVER, 409, json!({"conflictingRequest": {}}));
        let mut data = ResourceData::from_state(json!({"id": "s1"})).unwrap();
        let err = ComputeInstance
            .delete(&Context::background(), &clients(cloud), &mut data)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!("s1", data.id());
    }
}
