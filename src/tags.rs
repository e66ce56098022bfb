//! Ownership tags
//!
//! The registry only stores a flat list of strings per entry, so ownership is
//! written as `key=value` tags. Format version 1 is exactly four keys, always
//! written in this order:
//!
//! ```text
//! name=<service name>  ns=<namespace>  kube=<cluster id>  id=<entry id>
//! ```
//!
//! Decoding splits each tag on its first `=` only, so a value may itself
//! contain `=`. Values are not escaped, which means a name containing `=` is
//! written verbatim and cannot be told apart from a differently split tag;
//! orchestrator names never contain `=` so this is accepted as a limitation.
//! Unknown keys are ignored so newer writers can add tags.

use serde::{Deserialize, Serialize};

/// Version of the tag layout produced by [`OwnershipTags::encode`]
pub const TAG_FORMAT_VERSION: u32 = 1;

pub const NAME_KEY: &str = "name";
pub const NAMESPACE_KEY: &str = "ns";
pub const CLUSTER_KEY: &str = "kube";
pub const ID_KEY: &str = "id";

/// Identity of a registry entry as recorded in its tags
///
/// Decoding is total: a missing key leaves the field empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTags {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub id: String,
}

impl OwnershipTags {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        cluster: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            cluster: cluster.into(),
            id: id.into(),
        }
    }

    /// Render as registry tags in canonical order
    pub fn encode(&self) -> Vec<String> {
        vec![
            format_tag(NAME_KEY, &self.name),
            format_tag(NAMESPACE_KEY, &self.namespace),
            format_tag(CLUSTER_KEY, &self.cluster),
            format_tag(ID_KEY, &self.id),
        ]
    }

    /// Recover identity from a registry entry's tags
    pub fn decode<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut decoded = Self::default();
        for tag in tags {
            let Some((key, value)) = split_tag(tag.as_ref()) else {
                continue;
            };
            let slot = match key {
                NAME_KEY => &mut decoded.name,
                NAMESPACE_KEY => &mut decoded.namespace,
                CLUSTER_KEY => &mut decoded.cluster,
                ID_KEY => &mut decoded.id,
                _ => continue,
            };
            *slot = value.to_string();
        }
        decoded
    }

    /// Exact match on the cluster identifier. An entry without a `kube`
    /// tag is never owned by anyone.
    pub fn is_owned_by(&self, cluster: &str) -> bool {
        !self.cluster.is_empty() && self.cluster == cluster
    }
}

/// Tags identifying a service of a cluster, without the per-entry id.
/// Used for presence checks against existing registry entries.
pub fn identity_tags(name: &str, namespace: &str, cluster: &str) -> [String; 3] {
    [
        format_tag(NAME_KEY, name),
        format_tag(NAMESPACE_KEY, namespace),
        format_tag(CLUSTER_KEY, cluster),
    ]
}

/// True if every tag in `needle` is present in `haystack`
pub fn contains_all<S: AsRef<str>>(haystack: &[S], needle: &[String]) -> bool {
    needle
        .iter()
        .all(|wanted| haystack.iter().any(|tag| tag.as_ref() == wanted))
}

fn format_tag(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

fn split_tag(tag: &str) -> Option<(&str, &str)> {
    tag.split_once('=')
}
