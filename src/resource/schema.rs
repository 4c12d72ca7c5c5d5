//! The attribute schema a resource exposes to the host.
use crate::error::Error;

use serde_json::{Map, Value};

use std::fmt::{self, Debug};

#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Float,
    Bool,
    Map,
    List,
    Set,
}

impl ValueType {
    fn accepts(&self, value: &Value) -> bool {
        match (*self, value) {
            (_, Value::Null) => true,
            (ValueType::String, Value::String(_)) => true,
            (ValueType::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ValueType::Float, Value::Number(_)) => true,
            (ValueType::Bool, Value::Bool(_)) => true,
            (ValueType::Map, Value::Object(_)) => true,
            (ValueType::List, Value::Array(_)) | (ValueType::Set, Value::Array(_)) => true,
            _ => false,
        }
    }
}

/// Decides whether the change of `key` from `old` to `new` should be hidden from the plan.
/// For map attributes `key` is `attribute.map_key`.
pub type DiffSuppressFn = fn(key: &str, old: &Value, new: &Value) -> bool;

#[derive(Serialize, Clone)]
pub struct Attribute {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub force_new: bool,
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub description: &'static str,
    #[serde(skip)]
    pub diff_suppress: Option<DiffSuppressFn>,
}

impl Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("type", &self.value_type)
            .field("required", &self.required)
            .field("computed", &self.computed)
            .field("force_new", &self.force_new)
            .finish()
    }
}

impl Attribute {
    fn new(name: &'static str, value_type: ValueType) -> Attribute {
        Attribute {
            name,
            value_type,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            sensitive: false,
            default: None,
            description: "",
            diff_suppress: None,
        }
    }

    pub fn required(name: &'static str, value_type: ValueType) -> Attribute {
        Attribute {
            required: true,
            ..Attribute::new(name, value_type)
        }
    }

    pub fn optional(name: &'static str, value_type: ValueType) -> Attribute {
        Attribute {
            optional: true,
            ..Attribute::new(name, value_type)
        }
    }

    /// Set by the cloud only
    pub fn computed(name: &'static str, value_type: ValueType) -> Attribute {
        Attribute {
            computed: true,
            ..Attribute::new(name, value_type)
        }
    }

    /// Optional, filled in by the cloud when not configured
    pub fn with_computed(mut self) -> Attribute {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Attribute {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Attribute {
        self.sensitive = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Attribute {
        self.default = Some(value);
        self
    }

    pub fn describe(mut self, description: &'static str) -> Attribute {
        self.description = description;
        self
    }

    pub fn suppress_diff(mut self, suppress: DiffSuppressFn) -> Attribute {
        self.diff_suppress = Some(suppress);
        self
    }

    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.required && !self.optional
    }
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct Schema {
    pub attributes: Vec<Attribute>,
}

impl Schema {
    pub fn new(attributes: Vec<Attribute>) -> Schema {
        Schema { attributes }
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    /// Checks a configuration object: required attributes are present, no unknown or
    /// computed-only attributes are set, and every value has the declared type.
    pub fn validate(&self, config: &Map<String, Value>) -> Result<(), Error> {
        for attr in self.attributes.iter() {
            let value = config.get(attr.name).unwrap_or(&Value::Null);
            if attr.required && value.is_null() {
                return Err(Error::invalid_input(format!(
                    "the attribute '{}' is required",
                    attr.name
                )));
            }
            if attr.is_computed_only() && !value.is_null() {
                return Err(Error::invalid_input(format!(
                    "the attribute '{}' is computed and cannot be set",
                    attr.name
                )));
            }
            if !attr.value_type.accepts(value) {
                return Err(Error::invalid_input(format!(
                    "the attribute '{}' must be of type {:?}, got: {}",
                    attr.name, attr.value_type, value
                )));
            }
        }
        if let Some(unknown) = config
            .keys()
            .find(|key| key.as_str() != "id" && key.as_str() != "timeouts" && self.get(key).is_none())
        {
            return Err(Error::invalid_input(format!(
                "unsupported attribute '{}'",
                unknown
            )));
        }
        Ok(())
    }

    /// Fills in defaults for attributes the configuration leaves unset
    pub fn apply_defaults(&self, config: &mut Map<String, Value>) {
        for attr in self.attributes.iter() {
            if let Some(default) = attr.default.as_ref() {
                let missing = config.get(attr.name).map(Value::is_null).unwrap_or(true);
                if missing {
                    config.insert(attr.name.to_owned(), default.clone());
                }
            }
        }
    }
}

/// True when the last segment of a map key such as `metadata.policy` is in `suppressed`
pub fn is_suppressed_key(key: &str, suppressed: &[&str]) -> bool {
    key.rsplit('.')
        .next()
        .map(|last| suppressed.contains(&last))
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(vec![
            Attribute::required("size", ValueType::Int),
            Attribute::optional("name", ValueType::String),
            Attribute::optional("cascade", ValueType::Bool).default_value(json!(false)),
            Attribute::computed("status", ValueType::String),
        ])
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn validation_checks_presence_and_types() {
        let schema = schema();
        assert!(schema.validate(&object(json!({"size": 10}))).is_ok());
        assert!(schema
            .validate(&object(json!({"name": "x"})))
            .unwrap_err()
            .to_string()
            .contains("'size' is required"));
        assert!(schema.validate(&object(json!({"size": "ten"}))).is_err());
        assert!(schema.validate(&object(json!({"size": 1, "status": "x"}))).is_err());
        assert!(schema.validate(&object(json!({"size": 1, "bogus": 1}))).is_err());
    }

    #[test]
    fn defaults_fill_missing_values_only() {
        let schema = schema();
        let mut config = object(json!({"size": 1}));
        schema.apply_defaults(&mut config);
        assert_eq!(json!(false), config["cascade"]);

        let mut config = object(json!({"size": 1, "cascade": true}));
        schema.apply_defaults(&mut config);
        assert_eq!(json!(true), config["cascade"]);
    }

    #[test]
    fn schema_serializes_for_the_host() {
        let value = serde_json::to_value(schema()).unwrap();
        assert_eq!("int", value["attributes"][0]["type"]);
        assert_eq!(true, value["attributes"][0]["required"]);
        assert!(value["attributes"][0].get("diff_suppress").is_none());
    }

    #[test]
    fn suppressed_keys_match_the_last_segment() {
        assert!(is_suppressed_key("metadata.policy", &["policy", "backupId"]));
        assert!(!is_suppressed_key("metadata.owner", &["policy"]));
    }
}
