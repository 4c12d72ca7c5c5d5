use super::state::StateChangeConf;
use super::Context;
use crate::client::ServiceClient;
use crate::error::{Error, WaitError};

use serde_json::{Map, Value};

use std::time::Duration;

/// Jobs are polled at a fixed cadence, only the total wait time is up to the caller
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const JOB_SUCCESS: &str = "SUCCESS";
pub const JOB_FAIL: &str = "FAIL";
const JOB_PENDING: &[&str] = &["INIT", "RUNNING"];

/// The reply of APIs that start a job
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct JobResponse {
    pub job_id: String,
}

/// The record of an asynchronous operation, as returned by `GET jobs/{id}`
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Job {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub job_type: String,
    pub status: String,
    #[serde(default)]
    pub entities: Map<String, Value>,
    #[serde(default)]
    pub fail_reason: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl Job {
    /// Sub jobs are nested under `entities.sub_jobs`
    pub fn sub_jobs(&self) -> Vec<Job> {
        self.entities
            .get("sub_jobs")
            .and_then(|value| serde_json::from_value::<Vec<Job>>(value.clone()).ok())
            .unwrap_or_default()
    }

    /// Looks up `key` in the entities of the job, then of each sub job
    pub fn entity(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.entities.get(key).filter(|value| !value.is_null()) {
            return Some(value.clone());
        }
        self.sub_jobs().iter().find_map(|sub_job| sub_job.entity(key))
    }

    fn failure(&self) -> String {
        let mut reason = self.fail_reason.clone().unwrap_or_default();
        if reason.is_empty() {
            reason = self.error_code.clone().unwrap_or_default();
        }
        if reason.is_empty() {
            reason = Value::Object(self.entities.clone()).to_string();
        }
        reason
    }
}

pub async fn get_job(client: &ServiceClient, job_id: &str) -> Result<Job, Error> {
    let url = client.service_url(&["jobs", job_id]);
    client.get_json(url.as_str()).await
}

/// Polls the job until it reports `SUCCESS`. `FAIL` is returned as `WaitError::JobFailed`
/// carrying the fail reason or error payload of the job.
pub async fn wait_for_job_success(
    ctx: &Context,
    client: &ServiceClient,
    job_id: &str,
    timeout: Duration,
) -> Result<Job, Error> {
    log::debug!("Waiting for job {} to succeed", job_id);
    let refresh = move || async move {
        let job = get_job(client, job_id).await?;
        if job.status == JOB_FAIL {
            return Err(WaitError::JobFailed {
                job_id: job_id.to_owned(),
                reason: job.failure(),
            }
            .into());
        }
        let status = job.status.clone();
        Ok((job, status))
    };
    StateChangeConf::new(JOB_PENDING, &[JOB_SUCCESS], refresh)
        .timeout(timeout)
        .poll_interval(JOB_POLL_INTERVAL)
        .metrics(client.provider().metrics().clone())
        .wait_for_state(ctx)
        .await
}

/// Waits for the job to succeed and returns the entity it produced under `key`, such as
/// `server_id` or `replication_pair_id`. A missing key is a `WaitError::MissingEntity`,
/// which `Error::is_not_found` recognises.
pub async fn get_job_entity(
    ctx: &Context,
    client: &ServiceClient,
    job_id: &str,
    key: &str,
    timeout: Duration,
) -> Result<String, Error> {
    let job = wait_for_job_success(ctx, client, job_id, timeout).await?;
    match job.entity(key) {
        Some(Value::String(value)) => Ok(value),
        Some(other) => Ok(other.to_string()),
        None => Err(WaitError::MissingEntity {
            job_id: job_id.to_owned(),
            key: key.to_owned(),
        }
        .into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn job(value: Value) -> Job {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn entities_are_found_in_sub_jobs() {
        let job = job(json!({
            "job_id": "j1",
            "status": "SUCCESS",
            "entities": {
                "sub_jobs": [
                    {"job_id": "j2", "status": "SUCCESS", "entities": {"server_id": "s1"}},
                    {"job_id": "j3", "status": "SUCCESS", "entities": {"volume_id": "v1"}}
                ]
            }
        }));
        assert_eq!(Some(json!("s1")), job.entity("server_id"));
        assert_eq!(Some(json!("v1")), job.entity("volume_id"));
        assert_eq!(None, job.entity("nic_id"));
    }

    #[test]
    fn top_level_entities_win() {
        let job = job(json!({
            "status": "SUCCESS",
            "entities": {
                "replication_pair_id": "top",
                "sub_jobs": [{"status": "SUCCESS", "entities": {"replication_pair_id": "nested"}}]
            }
        }));
        assert_eq!(Some(json!("top")), job.entity("replication_pair_id"));
    }

    #[test]
    fn failure_prefers_fail_reason() {
        let failed = job(json!({
            "status": "FAIL",
            "fail_reason": "quota exceeded",
            "error_code": "Ecs.0000"
        }));
        assert_eq!("quota exceeded", failed.failure());

        let failed = job(json!({"status": "FAIL", "entities": {"error": "x"}}));
        assert_eq!("{\"error\":\"x\"}", failed.failure());
    }
}
