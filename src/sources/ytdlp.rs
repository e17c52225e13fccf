use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::common::types::AnyResult;
use crate::sources::track::RawTrack;
use crate::sources::SearchSource;

fn track_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://(www\.|music\.|m\.)?(youtube\.com/watch\?|youtu\.be/)")
            .expect("track url regex")
    })
}

/// Envelope yt-dlp emits for search queries: hits live under `entries`.
#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    entries: Vec<RawTrack>,
}

/// Metadata lookups via the yt-dlp executable (`-J` JSON dumps).
pub struct YtDlpSearch {
    binary: String,
}

impl YtDlpSearch {
    pub fn new() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn dump_json(&self, target: &str) -> AnyResult<Option<Vec<u8>>> {
        let output = Command::new(&self.binary)
            .args(["-J", "--no-playlist", target])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            // Unknown video / zero hits exit nonzero; that is a miss, not
            // a transport failure.
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp lookup miss for {}: {}", target, stderr.trim());
            return Ok(None);
        }

        Ok(Some(output.stdout))
    }
}

impl Default for YtDlpSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchSource for YtDlpSearch {
    fn is_track_url(&self, query: &str) -> bool {
        track_url_regex().is_match(query)
    }

    async fn resolve_url(&self, url: &str) -> AnyResult<Option<RawTrack>> {
        let Some(stdout) = self.dump_json(url).await? else {
            return Ok(None);
        };
        let track: RawTrack = serde_json::from_slice(&stdout)?;
        Ok(Some(track))
    }

    async fn search(&self, query: &str) -> AnyResult<Option<RawTrack>> {
        let target = format!("ytsearch1:{}", query);
        let Some(stdout) = self.dump_json(&target).await? else {
            return Ok(None);
        };
        let envelope: SearchEnvelope = serde_json::from_slice(&stdout)?;
        Ok(envelope.entries.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_url_detection() {
        let source = YtDlpSearch::new();
        assert!(source.is_track_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(source.is_track_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(source.is_track_url("https://music.youtube.com/watch?v=abc"));
        assert!(!source.is_track_url("never gonna give you up"));
        assert!(!source.is_track_url("https://example.com/watch?v=abc"));
    }

    #[test]
    fn test_search_envelope_takes_first_entry() {
        let json = r#"{"entries": [
            {"id": "one", "title": "First"},
            {"id": "two", "title": "Second"}
        ]}"#;
        let envelope: SearchEnvelope = serde_json::from_str(json).unwrap();
        let first = envelope.entries.into_iter().next().unwrap();
        assert_eq!(first.id.as_deref(), Some("one"));
    }
}
