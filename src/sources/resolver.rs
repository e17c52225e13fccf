use std::sync::Arc;

use tracing::{debug, warn};

use crate::common::errors::PlaybackError;
use crate::sources::track::Song;
use crate::sources::SearchSource;

/// Turns a user query into a playable [`Song`].
///
/// Exact track URLs are resolved directly; everything else goes through
/// fuzzy search, and the top hit is re-resolved for authoritative duration
/// data when possible.
pub struct SongResolver {
    source: Arc<dyn SearchSource>,
}

impl SongResolver {
    pub fn new(source: Arc<dyn SearchSource>) -> Self {
        Self { source }
    }

    pub async fn resolve(
        &self,
        query: &str,
        requested_by: &str,
    ) -> Result<Song, PlaybackError> {
        let raw = if self.source.is_track_url(query) {
            debug!("Resolving track URL: {}", query);
            self.source
                .resolve_url(query)
                .await
                .map_err(PlaybackError::Search)?
        } else {
            debug!("Searching for: {}", query);
            match self
                .source
                .search(query)
                .await
                .map_err(PlaybackError::Search)?
            {
                Some(hit) => {
                    // The top hit often lacks reliable duration data; look it
                    // up again by URL and keep the hit if the lookup fails.
                    match hit.effective_url().map(str::to_string) {
                        Some(url) => match self.source.resolve_url(&url).await {
                            Ok(Some(full)) => Some(full),
                            Ok(None) => Some(hit),
                            Err(e) => {
                                warn!("Detail lookup failed for {}: {}", url, e);
                                Some(hit)
                            }
                        },
                        None => Some(hit),
                    }
                }
                None => None,
            }
        };

        let raw = raw.ok_or(PlaybackError::NoResults)?;
        Song::from_raw(raw, requested_by).ok_or(PlaybackError::MissingUrl)
    }
}
