//! Storage disaster recovery: replication pairs between a production and a disaster
//! recovery volume (`sdrs_replication_pair_v1`), and their attachment to protected
//! instances (`sdrs_replication_attach_v1`). Both are created and deleted through jobs.
use super::{
    check_deleted, get_region, region_attribute, Attribute, Resource, ResourceData, Schema,
    ValueType,
};
use crate::client::service::parse_json;
use crate::client::RequestOpts;
use crate::error::Error;
use crate::services::Clients;
use crate::waiter::{get_job_entity, wait_for_job_success, Context, JobResponse};

use async_trait::async_trait;
use http::Method;
use serde_json::{json, Value};

pub const PAIR_TYPE_NAME: &str = "sdrs_replication_pair_v1";
pub const ATTACH_TYPE_NAME: &str = "sdrs_replication_attach_v1";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ReplicationPair {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub server_group_id: String,
    /// `production_volume_id,dr_volume_id`
    pub volume_ids: String,
    pub status: String,
    pub replication_model: String,
    pub fault_level: String,
}

#[derive(Deserialize, Debug)]
struct ReplicationPairResponse {
    replication: ReplicationPair,
}

pub struct ReplicationPairResource;

#[async_trait]
impl Resource for ReplicationPairResource {
    fn type_name(&self) -> &'static str {
        PAIR_TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            region_attribute(),
            Attribute::required("name", ValueType::String),
            Attribute::optional("description", ValueType::String).force_new(),
            Attribute::required("group_id", ValueType::String).force_new(),
            Attribute::required("volume_id", ValueType::String).force_new(),
            Attribute::optional("delete_target_volume", ValueType::Bool)
                .default_value(json!(false)),
            Attribute::computed("replication_model", ValueType::String),
            Attribute::computed("fault_level", ValueType::String),
            Attribute::computed("status", ValueType::String),
            Attribute::computed("target_volume_id", ValueType::String),
        ])
    }

    async fn create(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.sdrs_v1(region.as_str())?;
        let body = json!({"replication": {
            "server_group_id": data.get_str("group_id"),
            "volume_id": data.get_str("volume_id"),
            "name": data.get_str("name"),
            "description": data.get_str("description"),
        }});
        let url = client.service_url(&["replications"]);
        let job: JobResponse = client.post_json(url.as_str(), body).await?;

        let id = get_job_entity(
            ctx,
            &client,
            job.job_id.as_str(),
            "replication_pair_id",
            data.timeouts().create,
        )
        .await?;
        log::info!("Created replication pair {}", id);
        data.set_id(id);
        self.read(ctx, clients, data).await
    }

    async fn read(&self, _ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.sdrs_v1(region.as_str())?;
        let id = data.id().to_owned();
        let url = client.service_url(&["replications", id.as_str()]);
        let pair = match client.get_json::<ReplicationPairResponse>(url.as_str()).await {
            Ok(response) => response.replication,
            Err(err) => return check_deleted(data, err, "replication pair"),
        };

        let mut volume_ids = pair.volume_ids.split(',');
        let source = volume_ids.next().unwrap_or("").to_owned();
        let target = volume_ids.next().unwrap_or("").to_owned();
        data.set("region", region.as_str());
        data.set("name", pair.name.as_str());
        data.set("description", pair.description.clone().unwrap_or_default());
        data.set("group_id", pair.server_group_id.as_str());
        data.set("volume_id", source);
        data.set("target_volume_id", target);
        data.set("status", pair.status.as_str());
        data.set("replication_model", pair.replication_model.as_str());
        data.set("fault_level", pair.fault_level.as_str());
        Ok(())
    }

    async fn update(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        if data.has_change("name") {
            let region = get_region(data, clients);
            let client = clients.sdrs_v1(region.as_str())?;
            let url = client.service_url(&["replications", data.id()]);
            client
                .put_json::<Value>(url.as_str(), json!({"replication": {"name": data.get_str("name")}}))
                .await?;
        }
        self.read(ctx, clients, data).await
    }

    async fn delete(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.sdrs_v1(region.as_str())?;
        let id = data.id().to_owned();
        let body = json!({
            "server_group_id": data.get_str("group_id"),
            "delete_target_volume": data.get_bool("delete_target_volume"),
        });
        let url = client.service_url(&["replications", id.as_str()]);
        let response = match client
            .request(Method::DELETE, url.as_str(), RequestOpts::json(body))
            .await
        {
            Ok(response) => response,
            Err(err) => return check_deleted(data, err, "replication pair"),
        };
        let job: JobResponse = parse_json(&response)?;
        wait_for_job_success(ctx, &client, job.job_id.as_str(), data.timeouts().delete).await?;
        log::info!("Deleted replication pair {}", id);
        data.clear_id();
        Ok(())
    }
}

/// Splits `instance_id/replication_id`
pub fn parse_attach_id(id: &str) -> Result<(String, String), Error> {
    let parts = id.split('/').collect::<Vec<_>>();
    match parts.as_slice() {
        [instance_id, replication_id] if !instance_id.is_empty() && !replication_id.is_empty() => {
            Ok(((*instance_id).to_owned(), (*replication_id).to_owned()))
        }
        _ => Err(Error::invalid_input(format!(
            "invalid replication attach ID '{}', expected <instance_id>/<replication_id>",
            id
        ))),
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
struct ReplicationAttachment {
    replication: String,
    device: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
struct ProtectedInstance {
    id: String,
    status: String,
    attachment: Vec<ReplicationAttachment>,
}

#[derive(Deserialize, Debug)]
struct ProtectedInstanceResponse {
    protected_instance: ProtectedInstance,
}

pub struct ReplicationAttach;

#[async_trait]
impl Resource for ReplicationAttach {
    fn type_name(&self) -> &'static str {
        ATTACH_TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            region_attribute(),
            Attribute::required("instance_id", ValueType::String).force_new(),
            Attribute::required("replication_id", ValueType::String).force_new(),
            Attribute::required("device", ValueType::String).force_new(),
            Attribute::computed("status", ValueType::String),
        ])
    }

    async fn create(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.sdrs_v1(region.as_str())?;
        let instance_id = data.get_str("instance_id").to_owned();
        let replication_id = data.get_str("replication_id").to_owned();

        let url = client.service_url(&["protected-instances", instance_id.as_str(), "attachreplication"]);
        let body = json!({"replication_attachment": {
            "replication_id": replication_id,
            "device": data.get_str("device"),
        }});
        let job: JobResponse = client.post_json(url.as_str(), body).await?;
        wait_for_job_success(ctx, &client, job.job_id.as_str(), data.timeouts().create).await?;

        data.set_id(format!("{}/{}", instance_id, replication_id));
        self.read(ctx, clients, data).await
    }

    async fn read(&self, _ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.sdrs_v1(region.as_str())?;
        let (instance_id, replication_id) = parse_attach_id(data.id())?;
        let url = client.service_url(&["protected-instances", instance_id.as_str()]);
        let instance = match client.get_json::<ProtectedInstanceResponse>(url.as_str()).await {
            Ok(response) => response.protected_instance,
            Err(err) => return check_deleted(data, err, "replication attachment"),
        };
        let attachment = match instance
            .attachment
            .iter()
            .find(|attachment| attachment.replication == replication_id)
        {
            Some(attachment) => attachment,
            None => {
                log::info!("Replication {} is no longer attached to {}", replication_id, instance_id);
                data.clear_id();
                return Ok(());
            }
        };

        data.set("region", region.as_str());
        data.set("instance_id", instance_id.as_str());
        data.set("replication_id", replication_id.as_str());
        data.set("device", attachment.device.as_str());
        data.set("status", instance.status.as_str());
        Ok(())
    }

    async fn update(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        self.read(ctx, clients, data).await
    }

    async fn delete(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.sdrs_v1(region.as_str())?;
        let (instance_id, replication_id) = parse_attach_id(data.id())?;
        let url = client.service_url(&[
            "protected-instances",
            instance_id.as_str(),
            "detachreplication",
            replication_id.as_str(),
        ]);
        let response = match client
            .request(Method::DELETE, url.as_str(), RequestOpts::default())
            .await
        {
            Ok(response) => response,
            Err(err) => return check_deleted(data, err, "replication attachment"),
        };
        let job: JobResponse = parse_json(&response)?;
        wait_for_job_success(ctx, &client, job.job_id.as_str(), data.timeouts().delete).await?;
        data.clear_id();
        Ok(())
    }

    async fn import(&self, _ctx: &Context, _clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let (instance_id, replication_id) = parse_attach_id(data.id())?;
        data.set("instance_id", instance_id);
        data.set("replication_id", replication_id);
        Ok(())
    }
}
