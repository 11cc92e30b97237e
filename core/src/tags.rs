//! Ownership and metadata encoding on resource tags
//!
//! Tags are the only persistence this crate has: every resource a guard owns
//! carries the management marker and its guard id, and discovery finds
//! resources by nothing else. Encoding and decoding live here and nowhere else.

use crate::model::{normalize_mesh_cidrs, GuardId};
use crate::resource::{ResourceKind, TagFilter, Tags};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

pub const MANAGED_BY_KEY: &str = "managed-by";
pub const GUARD_ID_KEY: &str = "guard-id";
pub const MESH_CIDRS_KEY: &str = "mesh-cidrs";
pub const CREATED_AT_KEY: &str = "created-at";
pub const METADATA_PREFIX: &str = "meta-";

pub const DEFAULT_MARKER: &str = "guardctl";

/// Longest value the cloud accepts for a single tag
pub const TAG_VALUE_MAX: usize = 256;
const METADATA_KEY_MAX: usize = 64;

/// Semantic fields recovered from a resource's tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTags {
    pub guard_id: GuardId,
    pub mesh_cidrs: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

/// Maps a guard's identity and configuration to tags and back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagScheme {
    marker: String,
}

impl Default for TagScheme {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl TagScheme {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Tags applied to every resource a guard owns
    pub fn guard_tags(&self, guard_id: &GuardId, mesh_cidrs: &[String]) -> Tags {
        let mut tags = Tags::new();
        tags.insert(MANAGED_BY_KEY.to_string(), self.marker.clone());
        tags.insert(GUARD_ID_KEY.to_string(), guard_id.to_string());
        tags.insert(MESH_CIDRS_KEY.to_string(), encode_cidrs(mesh_cidrs));
        tags
    }

    /// Boundary tags additionally carry creation time and operator metadata
    pub fn boundary_tags(
        &self,
        guard_id: &GuardId,
        mesh_cidrs: &[String],
        created_at: DateTime<Utc>,
        metadata: &BTreeMap<String, String>,
    ) -> Tags {
        let mut tags = self.guard_tags(guard_id, mesh_cidrs);
        tags.insert(CREATED_AT_KEY.to_string(), created_at.to_rfc3339());
        for (key, value) in metadata {
            tags.insert(format!("{}{}", METADATA_PREFIX, key), value.clone());
        }
        tags
    }

    pub fn is_managed(&self, tags: &Tags) -> bool {
        tags.get(MANAGED_BY_KEY).map(|m| m == &self.marker).unwrap_or(false)
    }

    /// Decode ownership tags; `None` if the resource isn't ours or the id is unusable
    pub fn decode(&self, tags: &Tags) -> Option<DecodedTags> {
        if !self.is_managed(tags) {
            return None;
        }
        let raw_id = tags.get(GUARD_ID_KEY)?;
        let guard_id = match GuardId::parse(raw_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("Ignoring resource with malformed guard id tag '{}': {}", raw_id, e);
                return None;
            }
        };

        let mesh_cidrs = tags
            .get(MESH_CIDRS_KEY)
            .map(|v| decode_cidrs(v))
            .unwrap_or_default();

        let created_at = tags
            .get(CREATED_AT_KEY)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc));

        let metadata = tags
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(METADATA_PREFIX)
                    .map(|key| (key.to_string(), v.clone()))
            })
            .collect();

        Some(DecodedTags {
            guard_id,
            mesh_cidrs,
            created_at,
            metadata,
        })
    }

    /// Everything this system manages, of the given kinds
    pub fn managed_filter(&self, kinds: &[ResourceKind]) -> TagFilter {
        TagFilter {
            tags: vec![(MANAGED_BY_KEY.to_string(), self.marker.clone())],
            kinds: kinds.to_vec(),
        }
    }

    /// Everything one guard owns
    pub fn guard_filter(&self, guard_id: &GuardId) -> TagFilter {
        TagFilter {
            tags: vec![
                (MANAGED_BY_KEY.to_string(), self.marker.clone()),
                (GUARD_ID_KEY.to_string(), guard_id.to_string()),
            ],
            kinds: Vec::new(),
        }
    }
}

pub fn encode_cidrs(cidrs: &[String]) -> String {
    cidrs.join(",")
}

/// The whole mesh set has to fit in one tag value
pub fn validate_mesh_tag(cidrs: &[String]) -> Result<()> {
    let encoded = encode_cidrs(cidrs);
    if encoded.len() > TAG_VALUE_MAX {
        return Err(Error::validation(format!(
            "{} mesh CIDRs encode to {} characters; the tag limit is {}",
            cidrs.len(),
            encoded.len(),
            TAG_VALUE_MAX
        )));
    }
    Ok(())
}

/// Operator metadata becomes `meta-<key>` tags on the boundary
pub fn validate_metadata(metadata: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in metadata {
        if key.is_empty() || key.len() > METADATA_KEY_MAX {
            return Err(Error::validation(format!(
                "Metadata key '{}' must be 1-{} characters",
                key, METADATA_KEY_MAX
            )));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::validation(format!(
                "Metadata key '{}' may only contain letters, digits, '-', '_' and '.'",
                key
            )));
        }
        if value.len() > TAG_VALUE_MAX {
            return Err(Error::validation(format!(
                "Metadata value for '{}' exceeds {} characters",
                key, TAG_VALUE_MAX
            )));
        }
    }
    Ok(())
}

/// Lenient decode: entries that fail to parse are dropped with a warning
pub fn decode_cidrs(value: &str) -> Vec<String> {
    let parts: Vec<&str> = value.split(',').collect();
    match normalize_mesh_cidrs(&parts) {
        Ok(cidrs) => cidrs,
        Err(e) => {
            warn!("Malformed {} tag '{}': {}", MESH_CIDRS_KEY, value, e);
            parts
                .iter()
                .filter_map(|p| normalize_mesh_cidrs(&[*p]).ok())
                .flatten()
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> GuardId {
        GuardId::parse(s).unwrap()
    }

    #[test]
    fn test_guard_tags_round_trip() {
        let scheme = TagScheme::default();
        let cidrs = vec!["10.200.0.0/16".to_string(), "10.201.0.0/16".to_string()];
        let tags = scheme.guard_tags(&id("guard-a"), &cidrs);

        assert_eq!(tags.get(MANAGED_BY_KEY).unwrap(), "guardctl");
        assert_eq!(tags.get(MESH_CIDRS_KEY).unwrap(), "10.200.0.0/16,10.201.0.0/16");

        let decoded = scheme.decode(&tags).unwrap();
        assert_eq!(decoded.guard_id, id("guard-a"));
        assert_eq!(decoded.mesh_cidrs, cidrs);
        assert!(decoded.metadata.is_empty());
    }

    #[test]
    fn test_empty_mesh_cidrs() {
        let scheme = TagScheme::default();
        let tags = scheme.guard_tags(&id("guard-a"), &[]);
        assert_eq!(tags.get(MESH_CIDRS_KEY).unwrap(), "");
        assert!(scheme.decode(&tags).unwrap().mesh_cidrs.is_empty());
    }

    #[test]
    fn test_boundary_tags_carry_metadata_and_time() {
        let scheme = TagScheme::default();
        let mut meta = BTreeMap::new();
        meta.insert("owner".to_string(), "netops".to_string());
        let now = Utc::now();
        let tags = scheme.boundary_tags(&id("guard-a"), &[], now, &meta);

        assert_eq!(tags.get("meta-owner").unwrap(), "netops");
        let decoded = scheme.decode(&tags).unwrap();
        assert_eq!(decoded.metadata.get("owner").unwrap(), "netops");
        assert_eq!(decoded.created_at.unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn test_foreign_marker_is_not_decoded() {
        let ours = TagScheme::default();
        let theirs = TagScheme::new("someone-else");
        let tags = theirs.guard_tags(&id("guard-a"), &[]);
        assert!(!ours.is_managed(&tags));
        assert!(ours.decode(&tags).is_none());
    }

    #[test]
    fn test_malformed_tags_are_tolerated() {
        let scheme = TagScheme::default();
        let mut tags = scheme.guard_tags(&id("guard-a"), &[]);
        tags.insert(MESH_CIDRS_KEY.to_string(), "10.1.0.0/16,garbage,10.2.0.0/16".to_string());
        let decoded = scheme.decode(&tags).unwrap();
        assert_eq!(decoded.mesh_cidrs, vec!["10.1.0.0/16", "10.2.0.0/16"]);

        tags.insert(GUARD_ID_KEY.to_string(), "NOT VALID".to_string());
        assert!(scheme.decode(&tags).is_none());
    }

    #[test]
    fn test_tag_size_limits() {
        let few = vec!["10.200.0.0/16".to_string()];
        assert!(validate_mesh_tag(&few).is_ok());
        let many: Vec<String> = (0..40).map(|i| format!("10.{}.0.0/16", i)).collect();
        assert!(validate_mesh_tag(&many).is_err());

        let mut meta = BTreeMap::new();
        meta.insert("owner".to_string(), "netops".to_string());
        assert!(validate_metadata(&meta).is_ok());
        meta.insert("bad key".to_string(), "x".to_string());
        assert!(matches!(validate_metadata(&meta), Err(Error::Validation(_))));

        let mut long = BTreeMap::new();
        long.insert("owner".to_string(), "x".repeat(TAG_VALUE_MAX + 1));
        assert!(validate_metadata(&long).is_err());
    }

    #[test]
    fn test_filters() {
        let scheme = TagScheme::default();
        let tags = scheme.guard_tags(&id("guard-a"), &[]);

        assert!(scheme.guard_filter(&id("guard-a")).matches(ResourceKind::Network, &tags));
        assert!(!scheme.guard_filter(&id("guard-b")).matches(ResourceKind::Network, &tags));

        let boundaries = scheme.managed_filter(&[ResourceKind::Boundary]);
        assert!(boundaries.matches(ResourceKind::Boundary, &tags));
        assert!(!boundaries.matches(ResourceKind::Interface, &tags));
    }
}
