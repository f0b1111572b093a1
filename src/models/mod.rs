mod identifiers;

pub use identifiers::{ContainerId, ItemId};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of characters of the remote content id that participate in URLs
/// and cache keys. The truncated id acts as an opaque shared secret that
/// prevents item enumeration.
pub const CONTENT_ID_LEN: usize = 6;

/// Everything needed to stream one remote file.
///
/// The `handle` is an opaque remote token that may expire at any time, so
/// descriptors are fetched fresh for every streaming operation and never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub handle: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub content_id: String,
}

impl TransferDescriptor {
    /// The URL-facing prefix of the content id.
    pub fn short_content_id(&self) -> &str {
        let end = self
            .content_id
            .char_indices()
            .nth(CONTENT_ID_LEN)
            .map(|(i, _)| i)
            .unwrap_or(self.content_id.len());
        &self.content_id[..end]
    }

    /// Verify the capability hash a client presented in the URL.
    pub fn matches_hash(&self, hash: &str) -> bool {
        !hash.is_empty() && self.short_content_id() == hash
    }
}

/// Deterministic identifier for a cached file: `container:item:content_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub container_id: ContainerId,
    pub item_id: ItemId,
    pub content_id: String,
}

impl CacheKey {
    pub fn new(
        container_id: ContainerId,
        item_id: ItemId,
        content_id: impl Into<String>,
    ) -> Self {
        Self {
            container_id,
            item_id,
            content_id: content_id.into(),
        }
    }

    /// Filename stem inside the cache root. Hashing keeps arbitrary remote
    /// ids filesystem-safe.
    pub fn file_stem(&self) -> String {
        format!("{:x}", md5::compute(self.to_string().as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.container_id, self.item_id, self.content_id
        )
    }
}

/// A catalog row the predictor can turn into a population task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheableCandidate {
    pub item_id: ItemId,
    pub content_id: String,
    pub file_name: String,
}
