//! Plan classification: compares the prior state of a resource with the planned values,
//! attribute by attribute, and decides whether the change can be applied in place.
use super::schema::{Attribute, Schema, ValueType};
use crate::error::Error;

use serde_json::Value;

use std::collections::BTreeMap;
use std::fmt::{self, Display, Write};

type JsonObject = serde_json::Map<String, Value>;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AttributeDiff {
    pub old: Value,
    pub new: Value,
    pub requires_new: bool,
}

#[derive(Serialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    NoChange,
    Create,
    Update,
    ForceNew,
}

/// The planned changes of one resource instance, keyed by attribute path
/// (`size`, `metadata.owner`, `block_device.0.volume_size`)
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct InstanceDiff {
    pub attributes: BTreeMap<String, AttributeDiff>,
    pub create: bool,
}

impl InstanceDiff {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && !self.create
    }

    pub fn requires_new(&self) -> bool {
        self.attributes.values().any(|diff| diff.requires_new)
    }

    pub fn kind(&self) -> DiffKind {
        if self.create {
            DiffKind::Create
        } else if self.attributes.is_empty() {
            DiffKind::NoChange
        } else if self.requires_new() {
            DiffKind::ForceNew
        } else {
            DiffKind::Update
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeDiff> {
        self.attributes.get(key)
    }

    /// True if the attribute or any of its nested paths changed
    pub fn has_change(&self, key: &str) -> bool {
        let nested = format!("{}.", key);
        self.attributes
            .keys()
            .any(|path| path == key || path.starts_with(nested.as_str()))
    }

    /// Marks a changed attribute as requiring replacement, used from `customize_diff`
    pub fn force_new(&mut self, key: &str) -> Result<(), Error> {
        match self.attributes.get_mut(key) {
            Some(diff) => {
                diff.requires_new = true;
                Ok(())
            }
            None => Err(Error::invalid_input(format!(
                "cannot force replacement on '{}', the attribute has no change",
                key
            ))),
        }
    }
}

impl Display for InstanceDiff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("<empty>");
        }
        write!(f, "{} differences: ", self.attributes.len())?;
        for (i, (path, diff)) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {} => {}", path, diff.old, diff.new)?;
            if diff.requires_new {
                f.write_str(" (forces new resource)")?;
            }
        }
        Ok(())
    }
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn render_path(path: &[Segment]) -> String {
    let mut rendered = String::with_capacity(16);
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            rendered.push('.');
        }
        match segment {
            Segment::Key(key) => rendered.push_str(key),
            Segment::Index(index) => {
                let _ = write!(rendered, "{}", index);
            }
        }
    }
    rendered
}

/// Records `(path, old, new)` for every value of `planned` that `prior` does not match.
/// Values only present in `prior` are ignored, since the cloud adds attributes to nested
/// objects that the configuration never mentions. Arrays must keep their length.
fn nested_diffs<'a>(
    diffs: &mut Vec<(String, Value, Value)>,
    path: &mut Vec<Segment<'a>>,
    prior: &'a Value,
    planned: &'a Value,
) {
    match (prior, planned) {
        (Value::Object(prior_map), Value::Object(planned_map)) => {
            compare_objects(diffs, path, prior_map, planned_map);
        }
        (Value::Array(prior_items), Value::Array(planned_items))
            if prior_items.len() == planned_items.len() =>
        {
            for (i, planned_item) in planned_items.iter().enumerate() {
                path.push(Segment::Index(i));
                nested_diffs(diffs, path, &prior_items[i], planned_item);
                path.pop();
            }
        }
        (a, b) if !values_equal(a, b) => {
            diffs.push((render_path(path), a.clone(), b.clone()));
        }
        _ => {}
    }
}

fn compare_objects<'a>(
    diffs: &mut Vec<(String, Value, Value)>,
    path: &mut Vec<Segment<'a>>,
    prior: &'a JsonObject,
    planned: &'a JsonObject,
) {
    for (key, planned_value) in planned.iter() {
        path.push(Segment::Key(key));
        match prior.get(key) {
            Some(prior_value) => nested_diffs(diffs, path, prior_value, planned_value),
            None if planned_value.is_null() => {}
            None => diffs.push((render_path(path), Value::Null, planned_value.clone())),
        }
        path.pop();
    }
}

/// Numbers compare by value, so `10` equals `10.0`
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn sorted_set(value: &Value) -> Vec<String> {
    let mut items = value
        .as_array()
        .map(|items| items.iter().map(Value::to_string).collect::<Vec<_>>())
        .unwrap_or_default();
    items.sort();
    items.dedup();
    items
}

fn diff_map(
    attr: &Attribute,
    old: &Value,
    new: &Value,
    out: &mut BTreeMap<String, AttributeDiff>,
) {
    let empty = JsonObject::new();
    let old_map = old.as_object().unwrap_or(&empty);
    let new_map = new.as_object().unwrap_or(&empty);
    let keys = old_map
        .keys()
        .chain(new_map.keys())
        .collect::<std::collections::BTreeSet<_>>();
    for key in keys {
        let old_value = old_map.get(key).unwrap_or(&Value::Null);
        let new_value = new_map.get(key).unwrap_or(&Value::Null);
        if values_equal(old_value, new_value) {
            continue;
        }
        let path = format!("{}.{}", attr.name, key);
        if let Some(suppress) = attr.diff_suppress {
            if suppress(path.as_str(), old_value, new_value) {
                continue;
            }
        }
        out.insert(
            path,
            AttributeDiff {
                old: old_value.clone(),
                new: new_value.clone(),
                requires_new: attr.force_new,
            },
        );
    }
}

/// Computes the diff of one instance. `prior` is `Null` for instances that do not exist yet.
/// Computed-only attributes never show up, and optional computed attributes only when the
/// plan sets them.
pub fn diff(schema: &Schema, prior: &Value, planned: &Value) -> InstanceDiff {
    let mut result = InstanceDiff {
        create: prior.is_null(),
        ..Default::default()
    };
    for attr in schema.attributes.iter() {
        if attr.is_computed_only() {
            continue;
        }
        let old = prior.get(attr.name).unwrap_or(&Value::Null);
        let new = planned.get(attr.name).unwrap_or(&Value::Null);
        if new.is_null() && (attr.computed || old.is_null()) {
            continue;
        }

        match attr.value_type {
            ValueType::Map => diff_map(attr, old, new, &mut result.attributes),
            ValueType::Set => {
                if sorted_set(old) != sorted_set(new) {
                    let suppressed = attr
                        .diff_suppress
                        .map(|suppress| suppress(attr.name, old, new))
                        .unwrap_or(false);
                    if !suppressed {
                        result.attributes.insert(
                            attr.name.to_owned(),
                            AttributeDiff {
                                old: old.clone(),
                                new: new.clone(),
                                requires_new: attr.force_new,
                            },
                        );
                    }
                }
            }
            _ => {
                let mut changes = Vec::new();
                let mut path = vec![Segment::Key(attr.name)];
                if new.is_null() {
                    changes.push((attr.name.to_owned(), old.clone(), Value::Null));
                } else {
                    nested_diffs(&mut changes, &mut path, old, new);
                }
                for (path, old_value, new_value) in changes {
                    if let Some(suppress) = attr.diff_suppress {
                        if suppress(path.as_str(), &old_value, &new_value) {
                            continue;
                        }
                    }
                    result.attributes.insert(
                        path,
                        AttributeDiff {
                            old: old_value,
                            new: new_value,
                            requires_new: attr.force_new,
                        },
                    );
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::resource::schema::is_suppressed_key;
    use serde_json::json;

    fn suppress_policy(key: &str, _old: &Value, _new: &Value) -> bool {
        is_suppressed_key(key, &["policy"])
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Attribute::required("size", ValueType::Int),
            Attribute::required("availability_zone", ValueType::String).force_new(),
            Attribute::optional("name", ValueType::String),
            Attribute::optional("metadata", ValueType::Map)
                .with_computed()
                .suppress_diff(suppress_policy),
            Attribute::optional("security_groups", ValueType::Set),
            Attribute::optional("block_device", ValueType::List),
            Attribute::computed("status", ValueType::String),
        ])
    }

    #[test]
    fn missing_prior_is_a_create() {
        let diff = diff(&schema(), &Value::Null, &json!({"size": 10, "availability_zone": "eu-de-01"}));
        assert_eq!(DiffKind::Create, diff.kind());
    }

    #[test]
    fn changes_are_classified() {
        let prior = json!({
            "size": 10,
            "availability_zone": "eu-de-01",
            "name": "a",
            "metadata": {"policy": "x", "owner": "me"},
            "security_groups": ["b", "a"],
            "status": "available"
        });
        let same = json!({
            "size": 10.0,
            "availability_zone": "eu-de-01",
            "name": "a",
            "metadata": {"owner": "me"},
            "security_groups": ["a", "b"]
        });
        assert_eq!(DiffKind::NoChange, diff(&schema(), &prior, &same).kind());

        let mut renamed = same.clone();
        renamed["name"] = json!("b");
        renamed["metadata"] = json!({"owner": "you"});
        let update = diff(&schema(), &prior, &renamed);
        assert_eq!(DiffKind::Update, update.kind());
        assert!(update.has_change("metadata"));
        assert!(update.get("metadata.owner").is_some());
        assert!(update.get("metadata.policy").is_none());

        let mut moved = same;
        moved["availability_zone"] = json!("eu-de-02");
        assert_eq!(DiffKind::ForceNew, diff(&schema(), &prior, &moved).kind());
    }

    #[test]
    fn nested_values_added_by_the_cloud_are_ignored() {
        let prior = json!({
            "size": 1,
            "availability_zone": "az",
            "block_device": [{"uuid": "img", "volume_size": 10, "device_name": "/dev/vda"}]
        });
        let planned = json!({
            "size": 1,
            "availability_zone": "az",
            "block_device": [{"uuid": "img", "volume_size": 20}]
        });
        let result = diff(&schema(), &prior, &planned);
        assert_eq!(1, result.attributes.len());
        assert_eq!(json!(20), result.get("block_device.0.volume_size").unwrap().new);
    }

    #[test]
    fn customize_diff_can_force_replacement() {
        let prior = json!({"size": 20, "availability_zone": "az"});
        let planned = json!({"size": 10, "availability_zone": "az"});
        let mut result = diff(&schema(), &prior, &planned);
        assert_eq!(DiffKind::Update, result.kind());
        result.force_new("size").unwrap();
        assert_eq!(DiffKind::ForceNew, result.kind());
        assert!(result.force_new("name").is_err());
        assert!(result.to_string().contains("forces new resource"));
    }
}
