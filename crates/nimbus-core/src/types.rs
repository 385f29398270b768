//! Shared types used across Nimbus crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The account/region pair every emulated resource lives in.
///
/// Backends are never shared across scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub account_id: String,
    pub region: String,
}

impl Scope {
    pub fn new(account_id: &str, region: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            region: region.to_string(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.region)
    }
}

/// A key/value resource tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Tags to apply to resources of one type at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagSpecification {
    pub resource_type: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl TagSpecification {
    pub const INSTANCE: &'static str = "instance";

    pub fn for_instances(tags: Vec<Tag>) -> Self {
        Self {
            resource_type: Self::INSTANCE.to_string(),
            tags,
        }
    }
}

/// Collect the tags that apply to instances from a list of tag specifications.
pub fn instance_tags(specs: &[TagSpecification]) -> Vec<Tag> {
    specs
        .iter()
        .filter(|s| s.resource_type == TagSpecification::INSTANCE)
        .flat_map(|s| s.tags.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_display() {
        assert_eq!(Scope::new("123", "us-west-2").to_string(), "123/us-west-2");
    }

    #[test]
    fn instance_tags_ignores_other_resource_types() {
        let specs = vec![
            TagSpecification::for_instances(vec![Tag::new("tag-1", "foo")]),
            TagSpecification {
                resource_type: "volume".to_string(),
                tags: vec![Tag::new("ignored", "x")],
            },
            TagSpecification::for_instances(vec![Tag::new("tag-2", "bar")]),
        ];

        let tags = instance_tags(&specs);
        assert_eq!(tags, vec![Tag::new("tag-1", "foo"), Tag::new("tag-2", "bar")]);
    }

    #[test]
    fn tag_specification_uses_wire_field_names() {
        let json = r#"{"ResourceType":"instance","Tags":[{"Key":"k","Value":"v"}]}"#;
        let spec: TagSpecification = serde_json::from_str(json).unwrap();
        assert_eq!(spec, TagSpecification::for_instances(vec![Tag::new("k", "v")]));
    }
}
