use super::diff::{diff, InstanceDiff};
use super::schema::Schema;
use crate::error::Error;

use serde_json::{Map, Value};

use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Per-operation time limits, taken from the `timeouts` block of the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Timeouts {
        Timeouts {
            create: DEFAULT_OPERATION_TIMEOUT,
            read: DEFAULT_OPERATION_TIMEOUT,
            update: DEFAULT_OPERATION_TIMEOUT,
            delete: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Parses durations like `30s`, `10m`, `1h30m`
pub fn parse_duration(value: &str) -> Result<Duration, Error> {
    let invalid = || Error::invalid_input(format!("invalid duration: '{}'", value));
    let mut total = 0u64;
    let mut number = String::new();
    for c in value.trim().chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let amount = number.parse::<u64>().map_err(|_| invalid())?;
        number.clear();
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(invalid()),
        };
        total = amount
            .checked_mul(unit)
            .and_then(|seconds| total.checked_add(seconds))
            .ok_or_else(invalid)?;
    }
    if !number.is_empty() || value.trim().is_empty() {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

impl Timeouts {
    /// Overrides `defaults` with whatever the `timeouts` block sets
    pub fn from_value(value: Option<&Value>, defaults: Timeouts) -> Result<Timeouts, Error> {
        let mut timeouts = defaults;
        let object = match value.and_then(Value::as_object) {
            Some(object) => object,
            None => return Ok(timeouts),
        };
        for (name, value) in object.iter() {
            let duration = match value.as_str() {
                Some(s) => parse_duration(s)?,
                None => continue,
            };
            match name.as_str() {
                "create" => timeouts.create = duration,
                "read" => timeouts.read = duration,
                "update" => timeouts.update = duration,
                "delete" => timeouts.delete = duration,
                other => {
                    return Err(Error::invalid_input(format!(
                        "unsupported timeout '{}'",
                        other
                    )))
                }
            }
        }
        Ok(timeouts)
    }
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// The data bag of one resource instance. `prior` is the state the host stored last,
/// `values` start out as the planned values and are overwritten by whatever the resource
/// reads back from the cloud.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceData {
    id: String,
    prior: Map<String, Value>,
    config: Map<String, Value>,
    values: Map<String, Value>,
    timeouts: Timeouts,
    planned_diff: Option<InstanceDiff>,
}

fn into_object(value: Value) -> Result<Map<String, Value>, Error> {
    match value {
        Value::Object(object) => Ok(object),
        Value::Null => Ok(Map::new()),
        other => Err(Error::invalid_input(format!(
            "resource data must be a JSON object, got: {}",
            other
        ))),
    }
}

impl ResourceData {
    /// Data for create and update: the prior state (null for create) overlaid with the
    /// planned values.
    pub fn new(prior: Value, planned: Value) -> Result<ResourceData, Error> {
        let prior = into_object(prior)?;
        let planned = into_object(planned)?;
        let mut values = prior.clone();
        for (key, value) in planned.iter() {
            values.insert(key.clone(), value.clone());
        }
        let id = values
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();
        let timeouts = Timeouts::from_value(values.get("timeouts"), Timeouts::default())?;
        Ok(ResourceData {
            id,
            prior,
            config: planned,
            values,
            timeouts,
            planned_diff: None,
        })
    }

    /// Makes `has_change` follow the plan of `schema`, so that changes the schema
    /// suppresses are not applied either
    pub fn with_schema(mut self, schema: &Schema) -> ResourceData {
        let prior = if self.prior.is_empty() {
            Value::Null
        } else {
            Value::Object(self.prior.clone())
        };
        self.planned_diff = Some(diff(schema, &prior, &Value::Object(self.config.clone())));
        self
    }

    /// Data for read and delete, where the stored state is all there is
    pub fn from_state(state: Value) -> Result<ResourceData, Error> {
        let mut data = ResourceData::new(state.clone(), state)?;
        data.config = Map::new();
        Ok(data)
    }

    /// Data for import, which only knows the ID
    pub fn for_import(id: impl Into<String>) -> ResourceData {
        let mut data = ResourceData::default();
        data.set_id(id);
        data
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
        self.values.insert("id".to_owned(), Value::String(self.id.clone()));
    }

    /// Marks the resource as gone. The host then drops it from its state.
    pub fn clear_id(&mut self) {
        self.id.clear();
        self.values.remove("id");
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Re-reads the `timeouts` block on top of the defaults of a resource type
    pub fn resolve_timeouts(&mut self, defaults: Timeouts) -> Result<(), Error> {
        self.timeouts = Timeouts::from_value(self.values.get("timeouts"), defaults)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        non_null(self.values.get(key))
    }

    pub fn get_prior(&self, key: &str) -> Option<&Value> {
        non_null(self.prior.get(key))
    }

    /// The value as the user configured it, `None` when unset or when reading
    pub fn get_config(&self, key: &str) -> Option<&Value> {
        non_null(self.config.get(key))
    }

    pub fn get_str(&self, key: &str) -> &str {
        self.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_string_map(&self, key: &str) -> BTreeMap<String, String> {
        crate::helpers::expand_string_map(self.get(key))
    }

    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_change(&self, key: &str) -> bool {
        if let Some(planned_diff) = self.planned_diff.as_ref() {
            return planned_diff.has_change(key);
        }
        let (old, new) = self.get_change(key);
        old != new
    }

    /// The prior and the current value, `Null` when unset
    pub fn get_change(&self, key: &str) -> (Value, Value) {
        (
            self.get_prior(key).cloned().unwrap_or(Value::Null),
            self.get(key).cloned().unwrap_or(Value::Null),
        )
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_owned(), value.into());
    }

    /// The state handed back to the host, `Null` once the ID was cleared
    pub fn state(&self) -> Value {
        if self.id.is_empty() {
            return Value::Null;
        }
        let mut state = self.values.clone();
        state.insert("id".to_owned(), Value::String(self.id.clone()));
        Value::Object(state)
    }
}
