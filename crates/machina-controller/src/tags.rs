//! Ownership tags and tag list assembly

use crate::api::{Infrastructure, ResourceTag, TagSpecification};
use machina_cloud::{Filter, Tag};
use std::collections::{BTreeMap, HashSet};

pub const CLUSTER_TAG_PREFIX: &str = "kubernetes.io/cluster/";
pub const OWNED_TAG_VALUE: &str = "owned";
pub const NAME_TAG_KEY: &str = "Name";

/// `kubernetes.io/cluster/<cluster-id>`
pub fn cluster_tag_key(cluster_id: &str) -> String {
    format!("{}{}", CLUSTER_TAG_PREFIX, cluster_id)
}

fn is_reserved(key: &str) -> bool {
    key == NAME_TAG_KEY || key.starts_with(CLUSTER_TAG_PREFIX)
}

/// Builds the tag list sent to the cloud.
///
/// User tags are deduplicated by key (first occurrence wins), reserved keys are
/// dropped, and the ownership and `Name` tags are appended last.
pub fn build_tag_list(name: &str, cluster_id: &str, user_tags: &[TagSpecification]) -> Vec<Tag> {
    let mut seen = HashSet::new();
    let mut tags: Vec<Tag> = user_tags
        .iter()
        .filter(|t| !is_reserved(&t.name))
        .filter(|t| seen.insert(t.name.as_str()))
        .map(|t| Tag::new(&t.name, &t.value))
        .collect();
    tags.push(Tag::new(cluster_tag_key(cluster_id), OWNED_TAG_VALUE));
    tags.push(Tag::new(NAME_TAG_KEY, name));
    tags
}

/// Filters matching instances created for `name` in `cluster_id`.
pub fn ownership_filters(name: &str, cluster_id: &str) -> Vec<Filter> {
    vec![
        Filter::tag(&cluster_tag_key(cluster_id), OWNED_TAG_VALUE),
        Filter::tag(NAME_TAG_KEY, name),
    ]
}

/// Whether `tags` carry the ownership tag for `cluster_id`.
pub fn is_owned(tags: &[Tag], cluster_id: &str) -> bool {
    let key = cluster_tag_key(cluster_id);
    tags.iter().any(|t| t.key == key && t.value == OWNED_TAG_VALUE)
}

/// Resource tags declared on the infrastructure object.
///
/// Status tags come first; spec entries override them by key and empty values
/// are dropped.
pub fn infrastructure_tags(infra: &Infrastructure) -> Vec<ResourceTag> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for tag in infra
        .status
        .resource_tags
        .iter()
        .chain(infra.spec.resource_tags.iter())
    {
        if !merged.contains_key(&tag.key) {
            order.push(tag.key.clone());
        }
        merged.insert(tag.key.clone(), tag.value.clone());
    }
    order
        .into_iter()
        .filter_map(|key| {
            let value = merged.remove(&key)?;
            (!value.is_empty()).then(|| ResourceTag::new(key, value))
        })
        .collect()
}

/// Provider config tags followed by infrastructure tags they do not override.
pub fn merge_infrastructure_tags(
    spec_tags: &[TagSpecification],
    infra_tags: &[ResourceTag],
) -> Vec<TagSpecification> {
    let mut tags = spec_tags.to_vec();
    for tag in infra_tags {
        if !spec_tags.iter().any(|t| t.name == tag.key) {
            tags.push(TagSpecification::new(&tag.key, &tag.value));
        }
    }
    tags
}

/// Whether `actual` already carries every expected key with the expected value.
pub fn tags_in_sync(expected: &[Tag], actual: &[Tag]) -> bool {
    let actual: BTreeMap<&str, &str> = actual
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();
    expected
        .iter()
        .all(|t| actual.get(t.key.as_str()) == Some(&t.value.as_str()))
}
