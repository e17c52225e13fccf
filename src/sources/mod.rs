//! Search/lookup boundary: turns a user query into one canonical [`Song`].

pub mod resolver;
pub mod track;
pub mod ytdlp;

pub use resolver::SongResolver;
pub use track::{RawTrack, Song};
pub use ytdlp::YtDlpSearch;

use async_trait::async_trait;

use crate::common::types::AnyResult;

/// A backend that can match exact track URLs and run fuzzy searches.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Whether `query` is a direct track URL this source can resolve.
    fn is_track_url(&self, query: &str) -> bool;

    /// Resolve a direct URL to full track metadata. `Ok(None)` on a miss.
    async fn resolve_url(&self, url: &str) -> AnyResult<Option<RawTrack>>;

    /// Fuzzy search, returning the top-ranked result. `Ok(None)` on a miss.
    async fn search(&self, query: &str) -> AnyResult<Option<RawTrack>>;
}
