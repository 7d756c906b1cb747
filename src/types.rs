//! Core types for booru-dl

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Opaque, source-specific identifier of one remote media item
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Create a new ResourceId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ResourceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ResourceId> for u64 {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// One entry of a listing page
///
/// Only the fields the pipeline needs are decoded; everything else in the
/// remote payload is ignored.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PostRecord {
    /// Resource id
    pub id: ResourceId,

    /// Rating label in the source's own vocabulary
    #[serde(default)]
    pub rating: Option<String>,

    /// Parent resource, when this post is a variant of another one
    #[serde(default, deserialize_with = "parent_id_serde")]
    pub parent_id: Option<ResourceId>,
}

impl PostRecord {
    /// True when the post is a variant of a parent resource
    pub fn has_parent(&self) -> bool {
        self.parent_id.is_some()
    }
}

// Sources disagree on how "no parent" is spelled: null, 0, "" or a missing key.
fn parent_id_serde<'de, D>(deserializer: D) -> Result<Option<ResourceId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None | Some(Raw::Num(0)) => None,
        Some(Raw::Num(n)) => Some(ResourceId(n)),
        Some(Raw::Text(s)) => match s.trim().parse::<u64>() {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(ResourceId(n)),
        },
    })
}

/// Materialized payload of one resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Raw media bytes held in memory
    Bytes(Vec<u8>),
    /// Media file on scratch storage
    File(PathBuf),
}

/// A resource id paired with its materialized payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievedItem {
    /// Resource id
    pub id: ResourceId,
    /// Bytes or local file
    pub payload: Payload,
    /// Payload size in bytes
    pub size: u64,
}

impl RetrievedItem {
    /// Item carrying in-memory bytes
    pub fn from_bytes(id: ResourceId, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            id,
            payload: Payload::Bytes(data),
            size,
        }
    }

    /// Item pointing at a file of known size
    pub fn from_file(id: ResourceId, path: PathBuf, size: u64) -> Self {
        Self {
            id,
            payload: Payload::File(path),
            size,
        }
    }

    /// Local path, if the payload is a file
    pub fn path(&self) -> Option<&std::path::Path> {
        match &self.payload {
            Payload::File(path) => Some(path),
            Payload::Bytes(_) => None,
        }
    }
}

/// Stopping caps for a collection run
///
/// Both caps are optional; with neither set the collector drains the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Quota {
    /// Maximum number of accepted items
    pub max_count: Option<usize>,
    /// Maximum cumulative payload size in bytes
    pub max_total_size: Option<u64>,
}

impl Quota {
    /// Cap on item count only
    pub fn count(max_count: usize) -> Self {
        Self {
            max_count: Some(max_count),
            max_total_size: None,
        }
    }

    /// Cap on cumulative size only
    pub fn size(max_total_size: u64) -> Self {
        Self {
            max_count: None,
            max_total_size: Some(max_total_size),
        }
    }
}

/// Outcome of draining a retrieval session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionResult {
    /// Accepted items in acceptance order
    pub items: Vec<RetrievedItem>,
    /// Sum of accepted item sizes
    pub total_size: u64,
    /// Ids the retrieval session skipped because they failed to materialize
    pub skipped: u64,
}

impl CollectionResult {
    /// Number of accepted items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing was accepted
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Accepted ids in acceptance order
    pub fn ids(&self) -> Vec<ResourceId> {
        self.items.iter().map(|item| item.id).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_record_parent_spellings() {
        let posts: Vec<PostRecord> = serde_json::from_str(
            r#"[
                {"id": 1, "rating": "g", "parent_id": null},
                {"id": 2, "rating": "s", "parent_id": 0},
                {"id": 3, "rating": "q"},
                {"id": 4, "rating": "e", "parent_id": 1},
                {"id": 5, "rating": "general", "parent_id": "0"},
                {"id": 6, "rating": "general", "parent_id": "17"},
                {"id": 7, "rating": "general", "parent_id": ""}
            ]"#,
        )
        .unwrap();

        let parents: Vec<Option<u64>> = posts
            .iter()
            .map(|p| p.parent_id.map(|id| id.get()))
            .collect();
        assert_eq!(
            parents,
            vec![None, None, None, Some(1), None, Some(17), None]
        );
        assert!(posts[3].has_parent());
        assert!(!posts[0].has_parent());
    }

    #[test]
    fn post_record_tolerates_missing_rating_and_extra_fields() {
        let post: PostRecord =
            serde_json::from_str(r#"{"id": 9, "md5": "abc", "tag_string": "a b"}"#).unwrap();
        assert_eq!(post.id, ResourceId(9));
        assert_eq!(post.rating, None);
    }

    #[test]
    fn retrieved_item_sizes() {
        let item = RetrievedItem::from_bytes(ResourceId(1), vec![0u8; 12]);
        assert_eq!(item.size, 12);
        assert!(item.path().is_none());

        let item = RetrievedItem::from_file(ResourceId(2), PathBuf::from("/tmp/2.webp"), 99);
        assert_eq!(item.path(), Some(std::path::Path::new("/tmp/2.webp")));
        assert_eq!(item.size, 99);
    }

    #[test]
    fn resource_id_parse_and_display() {
        let id: ResourceId = "12345".parse().unwrap();
        assert_eq!(id, ResourceId::new(12345));
        assert_eq!(id.to_string(), "12345");
        assert!("abc".parse::<ResourceId>().is_err());
    }
}
