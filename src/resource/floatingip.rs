//! `networking_floatingip_associate_v2`: binds a floating IP to the port of a server. The
//! association has no ID of its own, so the resource ID is `floating_ip/instance_id/fixed_ip`.
use super::{
    check_deleted, get_region, region_attribute, Attribute, Resource, ResourceData, Schema,
    ValueType,
};
use crate::client::ServiceClient;
use crate::error::Error;
use crate::services::Clients;
use crate::waiter::Context;

use async_trait::async_trait;
use serde_json::{json, Value};

pub const TYPE_NAME: &str = "networking_floatingip_associate_v2";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    pub port_id: Option<String>,
    pub fixed_ip_address: Option<String>,
}

#[derive(Deserialize, Debug)]
struct FloatingIpsResponse {
    floatingips: Vec<FloatingIp>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
struct FixedIp {
    ip_address: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
struct Port {
    id: String,
    device_id: String,
    fixed_ips: Vec<FixedIp>,
}

#[derive(Deserialize, Debug)]
struct PortsResponse {
    ports: Vec<Port>,
}

#[derive(Deserialize, Debug)]
struct PortResponse {
    port: Port,
}

pub fn association_id(floating_ip: &str, instance_id: &str, fixed_ip: &str) -> String {
    format!("{}/{}/{}", floating_ip, instance_id, fixed_ip)
}

/// Splits `floating_ip/instance_id/fixed_ip`. The fixed IP may be empty, the other parts
/// may not.
pub fn parse_association_id(id: &str) -> Result<(String, String, String), Error> {
    let parts = id.split('/').collect::<Vec<_>>();
    match parts.as_slice() {
        [floating_ip, instance_id, fixed_ip] if !floating_ip.is_empty() && !instance_id.is_empty() => Ok((
            (*floating_ip).to_owned(),
            (*instance_id).to_owned(),
            (*fixed_ip).to_owned(),
        )),
        _ => Err(Error::invalid_input(format!(
            "unable to determine floating ip association ID from '{}'",
            id
        ))),
    }
}

fn suppress_unset_fixed_ip(_key: &str, _old: &Value, new: &Value) -> bool {
    new.as_str().map(str::is_empty).unwrap_or(true)
}

async fn find_floating_ip(client: &ServiceClient, address: &str) -> Result<Option<FloatingIp>, Error> {
    let url = format!(
        "{}?floating_ip_address={}",
        client.service_url(&["floatingips"]),
        urlencoding::encode(address)
    );
    let response: FloatingIpsResponse = client.get_json(url.as_str()).await?;
    Ok(response
        .floatingips
        .into_iter()
        .find(|fip| fip.floating_ip_address == address))
}

/// The port of the server that carries `fixed_ip`, or its first port when no fixed IP is
/// requested. Returns the port ID and the fixed IP to bind to.
async fn find_port(client: &ServiceClient, instance_id: &str, fixed_ip: &str) -> Result<(String, String), Error> {
    let url = format!(
        "{}?device_id={}",
        client.service_url(&["ports"]),
        urlencoding::encode(instance_id)
    );
    let response: PortsResponse = client.get_json(url.as_str()).await?;
    response
        .ports
        .into_iter()
        .filter(|port| port.device_id == instance_id)
        .find_map(|port| {
            port.fixed_ips
                .iter()
                .find(|ip| fixed_ip.is_empty() || ip.ip_address == fixed_ip)
                .map(|ip| (port.id.clone(), ip.ip_address.clone()))
        })
        .ok_or_else(|| {
            Error::invalid_input(format!(
                "server {} has no port with fixed IP '{}'",
                instance_id, fixed_ip
            ))
        })
}

async fn set_port(client: &ServiceClient, floating_ip_id: &str, port: Value) -> Result<(), Error> {
    let url = client.service_url(&["floatingips", floating_ip_id]);
    client
        .put_json::<Value>(url.as_str(), json!({ "floatingip": port }))
        .await
        .map(|_| ())
}

pub struct FloatingIpAssociate;

#[async_trait]
impl Resource for FloatingIpAssociate {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            region_attribute(),
            Attribute::required("floating_ip", ValueType::String).force_new(),
            Attribute::required("instance_id", ValueType::String).force_new(),
            Attribute::optional("fixed_ip", ValueType::String)
                .with_computed()
                .force_new()
                .suppress_diff(suppress_unset_fixed_ip),
        ])
    }

    async fn create(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.networking_v2(region.as_str())?;
        let address = data.get_str("floating_ip").to_owned();
        let instance_id = data.get_str("instance_id").to_owned();

        let floating_ip = find_floating_ip(&client, address.as_str())
            .await?
            .ok_or_else(|| Error::invalid_input(format!("floating IP {} does not exist", address)))?;
        let (port_id, fixed_ip) = find_port(&client, instance_id.as_str(), data.get_str("fixed_ip")).await?;

        log::debug!("Associating floating IP {} with port {} ({})", address, port_id, fixed_ip);
        set_port(
            &client,
            floating_ip.id.as_str(),
            json!({"port_id": port_id, "fixed_ip_address": fixed_ip}),
        )
        .await?;
        data.set_id(association_id(address.as_str(), instance_id.as_str(), fixed_ip.as_str()));
        self.read(ctx, clients, data).await
    }

    async fn read(&self, _ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.networking_v2(region.as_str())?;
        let (address, instance_id, _) = parse_association_id(data.id())?;

        let floating_ip = match find_floating_ip(&client, address.as_str()).await? {
            Some(floating_ip) => floating_ip,
            None => {
                log::info!("Floating IP {} no longer exists, removing the association", address);
                data.clear_id();
                return Ok(());
            }
        };
        let port_id = match floating_ip.port_id.as_ref().filter(|id| !id.is_empty()) {
            Some(port_id) => port_id.clone(),
            None => {
                log::info!("Floating IP {} is no longer associated", address);
                data.clear_id();
                return Ok(());
            }
        };
        let url = client.service_url(&["ports", port_id.as_str()]);
        let port = match client.get_json::<PortResponse>(url.as_str()).await {
            Ok(response) => response.port,
            Err(err) => return check_deleted(data, err, "floating IP association"),
        };
        if port.device_id != instance_id {
            log::info!(
                "Floating IP {} moved from server {} to {}, removing the association",
                address,
                instance_id,
                port.device_id
            );
            data.clear_id();
            return Ok(());
        }

        data.set("region", region.as_str());
        data.set("floating_ip", address.as_str());
        data.set("instance_id", instance_id.as_str());
        data.set("fixed_ip", floating_ip.fixed_ip_address.clone().unwrap_or_default());
        Ok(())
    }

    async fn update(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        self.read(ctx, clients, data).await
    }

    async fn delete(&self, _ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.networking_v2(region.as_str())?;
        let (address, _, _) = parse_association_id(data.id())?;
        if let Some(floating_ip) = find_floating_ip(&client, address.as_str()).await? {
            if let Err(err) = set_port(&client, floating_ip.id.as_str(), json!({ "port_id": null })).await {
                return check_deleted(data, err, "floating IP association");
            }
            log::info!("Disassociated floating IP {}", address);
        }
        data.clear_id();
        Ok(())
    }

    async fn import(&self, _ctx: &Context, _clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let (floating_ip, instance_id, fixed_ip) = parse_association_id(data.id())?;
        data.set("floating_ip", floating_ip);
        data.set("instance_id", instance_id);
        data.set("fixed_ip", fixed_ip);
        Ok(())
    }
}
