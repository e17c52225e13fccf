//! The per-session playback loop: acquire audio for the head song, stream
//! it, advance on end or error, repeat until the queue runs dry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::errors::PlaybackError;
use crate::common::types::{GuildId, format_duration};
use crate::messaging::Card;
use crate::playback::constants::REPLAY_READY_TIMEOUT_MS;
use crate::playback::engine::PlaybackEngine;
use crate::sources::Song;
use crate::transport::text::TextChannel;
use crate::transport::voice::{
    AudioPlayer, AudioSource, PlayerEvent, PlayerState, VoiceConnection, enters_state,
};

enum PlayOutcome {
    /// The render ended, naturally or via a forced stop.
    Finished,
    /// The session is going away; stop looping.
    Cancelled,
}

/// Run playback for a guild until its queue is exhausted or the session is
/// torn down. One loop task exists per session; starting a new one aborts
/// the old, so each render has exactly one listener.
pub(crate) async fn run(engine: PlaybackEngine, guild_id: GuildId) {
    loop {
        let Some(shared) = engine.session(&guild_id) else {
            return;
        };

        let (song, connection, player, text_channel, volume, cancel) = {
            let mut session = shared.lock().await;
            let Some(song) = session.songs.front().cloned() else {
                session.playing = false;
                debug!("[{}] Queue exhausted; going idle", guild_id);
                return;
            };
            session.playing = true;
            (
                song,
                session.connection.clone(),
                session.player.clone(),
                session.text_channel.clone(),
                session.volume,
                session.cancel.clone(),
            )
        };

        let outcome = play_song(
            &engine,
            &guild_id,
            &song,
            connection,
            player.clone(),
            text_channel.clone(),
            volume,
            &cancel,
        )
        .await;

        match outcome {
            Ok(PlayOutcome::Cancelled) => return,
            Ok(PlayOutcome::Finished) => {
                let mut session = shared.lock().await;
                if session.loop_current {
                    debug!("[{}] Loop enabled; replaying {}", guild_id, song.title);
                } else {
                    session.songs.pop_front();
                }
            }
            Err(e) => {
                error!("[{}] Error playing {}: {}", guild_id, song.title, e);
                let notice = Card::new(
                    "Error Playing Song",
                    format!("Failed to play **{}**", song.title),
                )
                .field(
                    "Error",
                    "Could not create an audio stream. Please try another song.",
                    false,
                );
                if let Err(send_err) = text_channel.send(notice.into()).await {
                    warn!("[{}] Failed to post error notice: {}", guild_id, send_err);
                }
                // Drop the offending song; one bad entry must never stall
                // the rest of the queue.
                let mut session = shared.lock().await;
                session.songs.pop_front();
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn play_song(
    engine: &PlaybackEngine,
    guild_id: &GuildId,
    song: &Song,
    connection: Arc<dyn VoiceConnection>,
    player: Arc<dyn AudioPlayer>,
    text_channel: Arc<dyn TextChannel>,
    volume: f32,
    cancel: &CancellationToken,
) -> Result<PlayOutcome, PlaybackError> {
    let path = acquire_audio(engine, song).await?;

    if !connection.state().is_ready() {
        warn!("[{}] Voice connection not ready; waiting", guild_id);
        let mut rx = connection.subscribe();
        enters_state(
            &mut rx,
            Duration::from_millis(REPLAY_READY_TIMEOUT_MS),
            |s| s.is_ready(),
        )
        .await
        .map_err(PlaybackError::Transport)?;
    }

    // A previous render may still be up (loop restarts, rapid enqueues);
    // force it down before starting ours.
    if player.state().is_active() {
        debug!("[{}] Player still active; stopping previous render", guild_id);
        player.stop().await;
    }

    let events = player.subscribe();
    player
        .play(AudioSource { path, volume })
        .await
        .map_err(PlaybackError::Transport)?;

    info!("[{}] Now playing: {}", guild_id, song.title);
    let notice = Card::new("Now Playing", format!("**{}**", song.title))
        .field("Duration", format_duration(song.duration), true)
        .field("Requested by", song.requested_by.clone(), true)
        .thumbnail(song.thumbnail.clone());
    if let Err(e) = text_channel.send(notice.into()).await {
        warn!("[{}] Failed to post now-playing notice: {}", guild_id, e);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(PlayOutcome::Cancelled),
            event = events.recv_async() => match event {
                // Player dropped with the session.
                Err(_) => return Ok(PlayOutcome::Cancelled),
                Ok(PlayerEvent::StateChange(PlayerState::Idle)) => {
                    return Ok(PlayOutcome::Finished);
                }
                Ok(PlayerEvent::Error(message)) => {
                    return Err(PlaybackError::Transport(message.into()));
                }
                Ok(PlayerEvent::StateChange(state)) => {
                    debug!("[{}] Player state: {:?}", guild_id, state);
                }
            },
        }
    }
}

/// Produce a playable local file for the song.
///
/// Downloads are cached under the configured directory keyed by song id and
/// skipped when a non-empty file is already present. Transcoding to the
/// transport codec is attempted once; on failure the original download is
/// used as-is.
async fn acquire_audio(engine: &PlaybackEngine, song: &Song) -> Result<PathBuf, PlaybackError> {
    let downloads = Path::new(&engine.config.downloads_dir);
    tokio::fs::create_dir_all(downloads)
        .await
        .map_err(|e| PlaybackError::Download(e.into()))?;

    let path = downloads.join(format!("{}.mp3", song.id));
    if file_has_content(&path).await {
        info!("Using cached download: {}", path.display());
    } else {
        info!("Downloading song: {}", song.title);
        engine
            .downloader
            .download(&song.url, &path)
            .await
            .map_err(PlaybackError::Download)?;
    }

    if !file_has_content(&path).await {
        return Err(PlaybackError::UnreadableDownload);
    }

    let converted = downloads.join(format!("{}_converted.opus", song.id));
    if file_has_content(&converted).await {
        return Ok(converted);
    }

    match engine.transcoder.transcode(&path, &converted).await {
        Ok(()) if file_has_content(&converted).await => Ok(converted),
        Ok(()) => {
            warn!("Transcode produced an empty file; using original");
            Ok(path)
        }
        Err(e) => {
            warn!("Transcode failed, using original file: {}", e);
            Ok(path)
        }
    }
}

async fn file_has_content(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.len() > 0)
}
