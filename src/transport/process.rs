use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::common::types::AnyResult;

/// Fetches source audio to a local file.
#[async_trait]
pub trait SongDownloader: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> AnyResult<()>;
}

/// Re-encodes a local file to the transport-native codec.
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> AnyResult<()>;
}

/// yt-dlp backed downloader: extract best-quality audio as mp3.
pub struct YtDlpDownloader {
    binary: String,
}

impl YtDlpDownloader {
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
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SongDownloader for YtDlpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> AnyResult<()> {
        let dest_str = dest.to_string_lossy();
        debug!("Downloading {} -> {}", url, dest_str);

        let output = Command::new(&self.binary)
            .arg(url)
            .args(["-o", &dest_str])
            .args(["-x", "--audio-format", "mp3", "--audio-quality", "0"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )
            .into());
        }

        info!("Download completed: {}", dest_str);
        Ok(())
    }
}

/// ffmpeg backed transcoder: libopus at 128k / 48 kHz / stereo.
pub struct FfmpegTranscoder {
    binary: String,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> AnyResult<()> {
        debug!("Transcoding {} -> {}", input.display(), output.display());

        let result = Command::new(&self.binary)
            .args(["-i", &input.to_string_lossy()])
            .args(["-c:a", "libopus"])
            .args(["-b:a", "128k"])
            .args(["-ar", "48000"])
            .args(["-ac", "2"])
            .args(["-f", "opus"])
            .arg(output)
            .arg("-y")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )
            .into());
        }

        info!("Transcode completed: {}", output.display());
        Ok(())
    }
}
