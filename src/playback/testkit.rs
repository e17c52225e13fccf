//! Shared fakes for playback tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::common::types::{AnyResult, ChannelId, GuildId};
use crate::configs::PlayerConfig;
use crate::playback::engine::PlaybackEngine;
use crate::sources::track::RawTrack;
use crate::sources::{SearchSource, SongResolver};
use crate::transport::context::{Member, VoiceChannelInfo};
use crate::transport::memory::{MemoryRoster, MemoryTextChannel, MemoryTransport};
use crate::transport::process::{AudioTranscoder, SongDownloader};

/// Deterministic search source: every query resolves to a track whose id is
/// the dash-joined query and whose title round-trips back to it.
pub(crate) struct FakeSource;

fn query_to_id(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join("-")
}

fn id_to_track(id: &str) -> RawTrack {
    RawTrack {
        id: Some(id.to_string()),
        title: Some(id.replace('-', " ")),
        webpage_url: Some(format!("https://tracks.test/{}", id)),
        duration: Some(180.0),
        ..RawTrack::default()
    }
}

#[async_trait]
impl SearchSource for FakeSource {
    fn is_track_url(&self, query: &str) -> bool {
        query.starts_with("https://tracks.test/")
    }

    async fn resolve_url(&self, url: &str) -> AnyResult<Option<RawTrack>> {
        let id = url.rsplit('/').next().unwrap_or_default();
        Ok(Some(id_to_track(id)))
    }

    async fn search(&self, query: &str) -> AnyResult<Option<RawTrack>> {
        Ok(Some(id_to_track(&query_to_id(query))))
    }
}

/// Writes a small payload instead of shelling out; fails for marked urls.
pub(crate) struct FakeDownloader {
    pub fail_markers: Mutex<Vec<String>>,
}

impl FakeDownloader {
    pub(crate) fn new() -> Self {
        Self {
            fail_markers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_for(&self, marker: &str) {
        self.fail_markers.lock().push(marker.to_string());
    }
}

#[async_trait]
impl SongDownloader for FakeDownloader {
    async fn download(&self, url: &str, dest: &Path) -> AnyResult<()> {
        if self.fail_markers.lock().iter().any(|m| url.contains(m.as_str())) {
            return Err(format!("download refused for {}", url).into());
        }
        tokio::fs::write(dest, b"fake-audio").await?;
        Ok(())
    }
}

/// Copies the input; optionally fails to exercise the fallback path.
pub(crate) struct FakeTranscoder {
    pub fail: AtomicBool,
}

impl FakeTranscoder {
    pub(crate) fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AudioTranscoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> AnyResult<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err("transcode refused".into());
        }
        let bytes = tokio::fs::read(input).await?;
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }
}

pub(crate) struct Harness {
    pub engine: PlaybackEngine,
    pub transport: Arc<MemoryTransport>,
    pub roster: Arc<MemoryRoster>,
    pub channel: Arc<MemoryTextChannel>,
    pub downloader: Arc<FakeDownloader>,
    pub transcoder: Arc<FakeTranscoder>,
    _downloads: TempDir,
}

pub(crate) fn harness() -> Harness {
    let downloads = tempfile::tempdir().expect("temp downloads dir");
    let transport = Arc::new(MemoryTransport::new());
    let roster = Arc::new(MemoryRoster::new());
    let channel = Arc::new(MemoryTextChannel::new());
    let downloader = Arc::new(FakeDownloader::new());
    let transcoder = Arc::new(FakeTranscoder::new());

    let config = PlayerConfig {
        downloads_dir: downloads.path().to_string_lossy().into_owned(),
        self_deaf: true,
    };

    let engine = PlaybackEngine::new(
        transport.clone(),
        roster.clone(),
        Arc::new(SongResolver::new(Arc::new(FakeSource))),
        downloader.clone(),
        transcoder.clone(),
        config,
    );

    Harness {
        engine,
        transport,
        roster,
        channel,
        downloader,
        transcoder,
        _downloads: downloads,
    }
}

pub(crate) fn member_in(channel: &str) -> Member {
    Member {
        display_name: "tester".to_string(),
        voice_channel: Some(VoiceChannelInfo {
            id: ChannelId::from(channel),
            name: format!("Voice {}", channel),
            user_limit: None,
            occupants: 2,
            bot_can_connect: true,
            bot_can_speak: true,
        }),
    }
}

pub(crate) fn member_outside() -> Member {
    Member {
        display_name: "tester".to_string(),
        voice_channel: None,
    }
}

pub(crate) fn guild(id: &str) -> GuildId {
    GuildId::from(id)
}

/// Poll an async condition under paused time until it holds.
pub(crate) async fn wait_for<F, Fut>(what: &str, mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..2000 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
