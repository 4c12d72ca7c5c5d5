//! `antiddos_v1`: Anti-DDoS protection of a floating IP. The protection has no ID of its own
//! and is addressed by the ID of the floating IP.
use super::{
    check_deleted, get_region, region_attribute, Attribute, Resource, ResourceData, Schema,
    ValueType,
};
use crate::client::ServiceClient;
use crate::error::Error;
use crate::services::Clients;
use crate::waiter::state::{Refreshed, StateChangeConf};
use crate::waiter::Context;

use async_trait::async_trait;
use serde_json::{json, Value};

use std::time::Duration;

pub const TYPE_NAME: &str = "antiddos_v1";

pub const STATUS_CONFIGURING: &str = "configging";
pub const STATUS_NORMAL: &str = "normal";
pub const STATUS_NOT_CONFIGURED: &str = "notConfig";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Protection {
    #[serde(rename = "enable_L7")]
    pub enable_l7: bool,
    pub traffic_pos_id: i64,
    pub http_request_pos_id: i64,
    pub cleaning_access_pos_id: i64,
    pub app_type_id: i64,
}

#[derive(Deserialize, Debug)]
struct StatusResponse {
    status: String,
}

fn protection_body(data: &ResourceData) -> Result<Value, Error> {
    let number = |key: &str| {
        data.get_i64(key)
            .ok_or_else(|| Error::invalid_input(format!("the attribute '{}' is required", key)))
    };
    Ok(json!({
        "enable_L7": data.get_bool("enable_l7"),
        "traffic_pos_id": number("traffic_pos_id")?,
        "http_request_pos_id": number("http_request_pos_id")?,
        "cleaning_access_pos_id": number("cleaning_access_pos_id")?,
        "app_type_id": number("app_type_id")?,
    }))
}

async fn get_status(client: &ServiceClient, id: &str) -> Result<String, Error> {
    let url = client.service_url(&["antiddos", id, "status"]);
    let response: StatusResponse = client.get_json(url.as_str()).await?;
    Ok(response.status)
}

/// While protection is being removed the API answers 403 for the floating IP, which counts
/// as `notConfig` when `forbidden_is_unconfigured` is set.
async fn refresh_status(client: &ServiceClient, id: &str, forbidden_is_unconfigured: bool) -> Refreshed<String> {
    match get_status(client, id).await {
        Ok(status) => Ok((status.clone(), status)),
        Err(err) if forbidden_is_unconfigured && err.is_forbidden() => {
            log::debug!("Anti-DDoS status of {} is forbidden, treating it as {}", id, STATUS_NOT_CONFIGURED);
            Ok((STATUS_NOT_CONFIGURED.to_owned(), STATUS_NOT_CONFIGURED.to_owned()))
        }
        Err(err) => Err(err),
    }
}

async fn wait_for_status(
    ctx: &Context,
    client: &ServiceClient,
    id: &str,
    pending: &[&str],
    target: &str,
    timeout: Duration,
) -> Result<String, Error> {
    let forbidden_is_unconfigured = target == STATUS_NOT_CONFIGURED;
    let refresh = move || refresh_status(client, id, forbidden_is_unconfigured);
    StateChangeConf::new(pending, &[target], refresh)
        .timeout(timeout)
        .delay(Duration::from_secs(5))
        .poll_interval(Duration::from_secs(3))
        .metrics(client.provider().metrics().clone())
        .wait_for_state(ctx)
        .await
}

pub struct AntiDdos;

#[async_trait]
impl Resource for AntiDdos {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            region_attribute(),
            Attribute::required("floating_ip_id", ValueType::String).force_new(),
            Attribute::required("enable_l7", ValueType::Bool),
            Attribute::required("traffic_pos_id", ValueType::Int),
            Attribute::required("http_request_pos_id", ValueType::Int),
            Attribute::required("cleaning_access_pos_id", ValueType::Int),
            Attribute::required("app_type_id", ValueType::Int),
        ])
    }

    async fn create(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.antiddos_v1(region.as_str())?;
        let id = data.get_str("floating_ip_id").to_owned();

        let url = client.service_url(&["antiddos", id.as_str()]);
        client.post(url.as_str(), protection_body(data)?).await?;
        data.set_id(id.as_str());

        wait_for_status(
            ctx,
            &client,
            id.as_str(),
            &[STATUS_CONFIGURING],
            STATUS_NORMAL,
            data.timeouts().create,
        )
        .await?;
        log::info!("Enabled Anti-DDoS protection of floating IP {}", id);
        self.read(ctx, clients, data).await
    }

    async fn read(&self, _ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.antiddos_v1(region.as_str())?;
        let id = data.id().to_owned();
        let url = client.service_url(&["antiddos", id.as_str()]);
        let protection = match client.get_json::<Protection>(url.as_str()).await {
            Ok(protection) => protection,
            Err(err) => return check_deleted(data, err, "Anti-DDoS protection"),
        };

        data.set("region", region.as_str());
        data.set("floating_ip_id", id.as_str());
        data.set("enable_l7", protection.enable_l7);
        data.set("traffic_pos_id", protection.traffic_pos_id);
        data.set("http_request_pos_id", protection.http_request_pos_id);
        data.set("cleaning_access_pos_id", protection.cleaning_access_pos_id);
        data.set("app_type_id", protection.app_type_id);
        Ok(())
    }

    async fn update(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.antiddos_v1(region.as_str())?;
        let id = data.id().to_owned();

        let url = client.service_url(&["antiddos", id.as_str()]);
        client
            .put_json::<Value>(url.as_str(), protection_body(data)?)
            .await?;
        wait_for_status(
            ctx,
            &client,
            id.as_str(),
            &[STATUS_CONFIGURING],
            STATUS_NORMAL,
            data.timeouts().update,
        )
        .await?;
        self.read(ctx, clients, data).await
    }

    async fn delete(&self, ctx: &Context, clients: &Clients, data: &mut ResourceData) -> Result<(), Error> {
        let region = get_region(data, clients);
        let client = clients.antiddos_v1(region.as_str())?;
        let id = data.id().to_owned();

        let url = client.service_url(&["antiddos", id.as_str()]);
        if let Err(err) = client.delete(url.as_str()).await {
            return check_deleted(data, err, "Anti-DDoS protection");
        }
        wait_for_status(
            ctx,
            &client,
            id.as_str(),
            &[STATUS_NORMAL, STATUS_CONFIGURING],
            STATUS_NOT_CONFIGURED,
            data.timeouts().delete,
        )
        .await?;
        log::info!("Disabled Anti-DDoS protection of floating IP {}", id);
        data.clear_id();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{clients, MockCloud};
    use http::Method;

    const PROTECTION: &str = "/v1/p1/antiddos/fip-1";
    const STATUS: &str = "/v1/p1/antiddos/fip-1/status";

    fn planned() -> Value {
        json!({
            "floating_ip_id": "fip-1",
            "enable_l7": true,
            "traffic_pos_id": 1,
            "http_request_pos_id": 2,
            "cleaning_access_pos_id": 3,
            "app_type_id": 0
        })
    }

    #[tokio::test]
    async fn create_waits_for_normal() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, PROTECTION, 200, json!({"task_id": "t1"}))
            .on(Method::GET, STATUS, 200, json!({"status": "configging"}))
            .on(Method::GET, STATUS, 200, json!({"status": "normal"}))
            .on(
                Method::GET,
                PROTECTION,
                200,
                json!({"enable_L7": true, "traffic_pos_id": 1, "http_request_pos_id": 2, "cleaning_access_pos_id": 3, "app_type_id": 0}),
            );
        let mut data = ResourceData::new(Value::Null, planned()).unwrap();
        AntiDdos
            .create(&Context::background(), &clients(cloud.clone()), &mut data)
            .await
            .unwrap();
        assert_eq!("fip-1", data.id());
        assert_eq!(Some(2), data.get_i64("http_request_pos_id"));
        let post = cloud
            .requests()
            .into_iter()
            .find(|request| request.method == Method::POST)
            .unwrap();
        assert_eq!(Some(json!(true)), post.body.map(|body| body["enable_L7"].clone()));
    }

    #[tokio::test]
    async fn forbidden_status_completes_the_delete() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::DELETE, PROTECTION, 200, json!({"task_id": "t2"}))
            .on(Method::GET, STATUS, 200, json!({"status": "normal"}))
            .on(Method::GET, STATUS, 403, json!({"error_code": "10001"}));
        let mut state = planned();
        state["id"] = json!("fip-1");
        let mut data = ResourceData::from_state(state).unwrap();
        AntiDdos
            .delete(&Context::background(), &clients(cloud), &mut data)
            .await
            .unwrap();
        assert_eq!("", data.id());
    }

    #[tokio::test]
    async fn forbidden_status_fails_the_create() {
        tokio::time::pause();
        let cloud = MockCloud::new();
        cloud
            .on(Method::POST, PROTECTION, 200, json!({"task_id": "t1"}))
            .on(Method::GET, STATUS, 403, json!({"error_code": "10001"}));
        let mut data = ResourceData::new(Value::Null, planned()).unwrap();
        let err = AntiDdos
            .create(&Context::background(), &clients(cloud), &mut data)
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
    }
}
