use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::types::now_ms;

/// Loosely-typed track metadata as upstream sources report it. Different
/// payloads fill different duration fields; [`Song::from_raw`] is the single
/// place that sorts it out.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTrack {
    pub id: Option<String>,
    pub title: Option<String>,
    /// Direct media URL, present in flat search payloads.
    pub url: Option<String>,
    /// Canonical page URL, present in full extractions.
    pub webpage_url: Option<String>,
    /// Seconds, possibly fractional.
    pub duration: Option<f64>,
    /// Whole seconds, when the source reports them directly.
    pub duration_secs: Option<u64>,
    /// Textual `m:ss` form.
    #[serde(alias = "duration_string")]
    pub duration_raw: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

impl RawTrack {
    /// The URL a song should carry: the canonical page when known,
    /// otherwise whatever direct URL the payload had.
    pub fn effective_url(&self) -> Option<&str> {
        self.webpage_url
            .as_deref()
            .or(self.url.as_deref())
            .filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

/// The canonical track record everything downstream consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub title: String,
    pub url: String,
    /// Length in whole seconds; 0 when unknown.
    pub duration: u64,
    pub thumbnail: Option<String>,
    /// Display name of the member who queued it.
    pub requested_by: String,
    /// Stable identifier used as the download-cache key. Falls back to a
    /// Unix-millis timestamp when the source provides none.
    pub id: String,
}

impl Song {
    /// Normalize a raw upstream record. `None` when it carries no URL.
    pub fn from_raw(raw: RawTrack, requested_by: &str) -> Option<Self> {
        let url = raw.effective_url()?.to_string();
        let thumbnail = raw
            .thumbnail
            .clone()
            .or_else(|| raw.thumbnails.first().map(|t| t.url.clone()));
        let id = raw
            .id
            .clone()
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| now_ms().to_string());

        Some(Self {
            title: raw
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Unknown Title".to_string()),
            url,
            duration: parse_duration(&raw),
            thumbnail,
            requested_by: requested_by.to_string(),
            id,
        })
    }
}

/// Best-effort duration from whichever field the upstream filled, checked in
/// priority order: whole seconds, the `m:ss` text form, fractional seconds.
pub fn parse_duration(raw: &RawTrack) -> u64 {
    if let Some(secs) = raw.duration_secs {
        return secs;
    }
    if let Some(text) = &raw.duration_raw {
        if let Some(secs) = parse_clock(text) {
            return secs;
        }
    }
    if let Some(secs) = raw.duration {
        if secs.is_finite() && secs >= 0.0 {
            return secs.round() as u64;
        }
    }
    0
}

fn clock_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+):(\d{1,2})").expect("clock regex"))
}

/// Parse a `m:ss` duration like "4:23" into seconds.
fn parse_clock(text: &str) -> Option<u64> {
    let caps = clock_regex().captures(text)?;
    let minutes: u64 = caps.get(1)?.as_str().parse().ok()?;
    let seconds: u64 = caps.get(2)?.as_str().parse().ok()?;
    Some(minutes * 60 + seconds)
}
