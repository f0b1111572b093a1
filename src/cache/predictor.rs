use anyhow::Result;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use super::populator::{Admission, Populator};
use super::store::CacheStore;
use crate::db::repository::CatalogRepository;
use crate::models::{CacheKey, ContainerId};
use crate::remote::{RemoteStore, SessionPool};

/// Filename shapes that carry an episode number, tried in order. Each
/// pattern captures (prefix, number, suffix).
fn episode_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Title - 04 [1080p]...
            Regex::new(r"^(.* - )(\d{2,3})( \[.*)$").expect("episode pattern"),
            // Title--04 720p
            Regex::new(r"^(.*--)(\d{2,3})(.*)$").expect("episode pattern"),
            // Generic: Title 4 suffix
            Regex::new(r"^(.* )(\d{1,3})( .*)$").expect("episode pattern"),
        ]
    })
}

/// Catalog search pattern for the episode after `current_name`, or `None`
/// when the name does not look episodic.
///
/// The number is incremented and zero-padded back to its original width;
/// the suffix is left open because release tags drift between episodes.
pub fn next_episode_pattern(current_name: &str) -> Option<String> {
    for pattern in episode_patterns() {
        let Some(captures) = pattern.captures(current_name) else {
            continue;
        };
        let prefix = &captures[1];
        let episode = &captures[2];
        let Ok(number) = episode.parse::<u32>() else {
            continue;
        };
        let next = format!("{:0width$}", number + 1, width = episode.len());
        return Some(format!("^{}{}.*", regex::escape(prefix), next));
    }
    None
}

/// Heuristic next-episode pre-fetcher.
///
/// Serial watching produces tightly correlated sequential access, so every
/// live access tries to find episode N+1 in the catalog and hand it to the
/// populator before the viewer asks for it.
pub struct Predictor {
    catalog: Arc<dyn CatalogRepository>,
    remote: Arc<dyn RemoteStore>,
    pool: Arc<SessionPool>,
    store: Arc<CacheStore>,
    populator: Arc<Populator>,
}

impl Predictor {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        remote: Arc<dyn RemoteStore>,
        pool: Arc<SessionPool>,
        store: Arc<CacheStore>,
        populator: Arc<Populator>,
    ) -> Self {
        Self {
            catalog,
            remote,
            pool,
            store,
            populator,
        }
    }

    /// Called on every live access. Best effort: failures are logged and
    /// swallowed, the viewer's stream is never affected.
    pub async fn on_access(&self, container_id: &ContainerId, current_name: &str) {
        match self.try_prefetch(container_id, current_name).await {
            Ok(Some(admission)) => {
                debug!("Pre-cache admission for next episode: {admission:?}")
            }
            Ok(None) => {}
            Err(e) => warn!("Pre-cache attempt failed: {e}"),
        }
    }

    async fn try_prefetch(
        &self,
        container_id: &ContainerId,
        current_name: &str,
    ) -> Result<Option<Admission>> {
        let Some(pattern) = next_episode_pattern(current_name) else {
            debug!("No episode number recognised in {current_name:?}");
            return Ok(None);
        };
        debug!("Looking for next episode matching {pattern}");

        let Some(candidate) = self
            .catalog
            .find_by_container_and_title_regex(container_id, &pattern)
            .await?
        else {
            debug!("Next episode not found in catalog");
            return Ok(None);
        };

        let key = CacheKey::new(
            container_id.clone(),
            candidate.item_id.clone(),
            candidate.content_id.clone(),
        );
        if self.populator.is_downloading(&key) || self.store.lookup(&key).await?.is_some() {
            debug!("Next episode already cached or downloading: {key}");
            return Ok(None);
        }

        // Fetch fresh metadata on the least-loaded session; the download
        // itself goes to a different session.
        let session = self.pool.pick_least_loaded();
        let descriptor = self
            .remote
            .locate(session, container_id, &candidate.item_id)
            .await?;
        if !descriptor.matches_hash(&candidate.content_id) {
            warn!(
                "Catalog row for {} is stale, content id changed",
                candidate.file_name
            );
            return Ok(None);
        }

        info!("Pre-caching next episode: {}", candidate.file_name);
        let admission = self
            .populator
            .admit(
                key,
                container_id.clone(),
                candidate.item_id,
                &descriptor,
                self.pool.pick_other(session),
            )
            .await?;
        Ok(Some(admission))
    }
}
