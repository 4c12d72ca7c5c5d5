//! Small conversions shared by the resources.
pub mod hashcode;

use crate::error::Error;
use crate::tags::Tag;

use serde_json::{Map, Value};

use std::collections::BTreeMap;

pub use crate::config::path_or_contents;

/// Reads a `map(string)` attribute. Non-string values are rendered as JSON.
pub fn expand_string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|object| {
            object
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The `tags` attribute as the desired tag map
pub fn expand_tags(value: Option<&Value>) -> BTreeMap<String, String> {
    expand_string_map(value)
}

pub fn flatten_tags(tags: &[Tag]) -> Value {
    let object = tags
        .iter()
        .map(|tag| (tag.key.clone(), Value::String(tag.value.clone())))
        .collect::<Map<String, Value>>();
    Value::Object(object)
}

pub fn flatten_string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect(),
    )
}

/// Adds the user supplied `value_specs` to a request body object. Keys the resource already
/// set are never overwritten.
pub fn merge_value_specs(body: &mut Value, value_specs: &BTreeMap<String, String>) -> Result<(), Error> {
    let object = body
        .as_object_mut()
        .ok_or_else(|| Error::invalid_input("value_specs can only be merged into a JSON object"))?;
    for (key, value) in value_specs {
        if object.contains_key(key) {
            log::warn!("Ignoring value_specs entry '{}', the attribute is already set", key);
            continue;
        }
        object.insert(key.clone(), Value::String(value.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_specs_never_overwrite() {
        let mut body = json!({"name": "vol", "size": 10});
        let mut specs = BTreeMap::new();
        specs.insert("name".to_owned(), "other".to_owned());
        specs.insert("multiattach".to_owned(), "true".to_owned());
        merge_value_specs(&mut body, &specs).unwrap();
        assert_eq!(json!({"name": "vol", "size": 10, "multiattach": "true"}), body);

        assert!(merge_value_specs(&mut json!([]), &specs).is_err());
    }

    #[test]
    fn tags_expand_and_flatten() {
        let value = json!({"env": "prod", "count": 3});
        let tags = expand_tags(Some(&value));
        assert_eq!(Some(&"prod".to_owned()), tags.get("env"));
        assert_eq!(Some(&"3".to_owned()), tags.get("count"));
        assert!(expand_tags(None).is_empty());

        let flat = flatten_tags(&[Tag {
            key: "env".to_owned(),
            value: "prod".to_owned(),
        }]);
        assert_eq!(json!({"env": "prod"}), flat);
    }
}
