use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::common::types::GuildId;
use crate::sources::Song;
use crate::transport::text::TextChannel;
use crate::transport::voice::{AudioPlayer, VoiceConnection, VoiceHandle};

/// Per-guild playback state. At most one exists per guild at any time.
///
/// The session exclusively owns its voice connection and audio player; both
/// die with it. Background work tied to the session (the playback loop, the
/// disconnect watcher, a pending empty-channel leave) is held as task
/// handles here so that dropping the session structurally cancels all of it.
pub struct PlaybackSession {
    pub guild_id: GuildId,
    /// FIFO queue; the head is the song currently playing.
    pub songs: VecDeque<Song>,
    /// Volume fraction in [0, 1]. Applied to the next acquired audio
    /// resource, not retroactively to one already in flight.
    pub volume: f32,
    /// True while a song is actively being rendered to the transport.
    pub playing: bool,
    /// When set, the head song replays instead of being dequeued.
    pub loop_current: bool,
    pub text_channel: Arc<dyn TextChannel>,
    pub connection: Arc<dyn VoiceConnection>,
    pub player: Arc<dyn AudioPlayer>,
    /// The running playback loop. Replacing it aborts the previous loop,
    /// which is what keeps event handling single-subscriber.
    pub playback_task: Option<JoinHandle<()>>,
    /// Deferred empty-channel disconnect. Owned by the session so a timer
    /// can never outlive it.
    pub pending_leave: Option<JoinHandle<()>>,
    /// Watches the connection for unexpected disconnects.
    pub watcher_task: Option<JoinHandle<()>>,
    pub cancel: CancellationToken,
}

impl PlaybackSession {
    pub fn new(guild_id: GuildId, handle: VoiceHandle, text_channel: Arc<dyn TextChannel>) -> Self {
        Self {
            guild_id,
            songs: VecDeque::new(),
            volume: 1.0,
            playing: false,
            loop_current: false,
            text_channel,
            connection: handle.connection,
            player: handle.player,
            playback_task: None,
            pending_leave: None,
            watcher_task: None,
            cancel: CancellationToken::new(),
        }
    }

    /// The song currently playing, if any.
    pub fn current(&self) -> Option<&Song> {
        self.songs.front()
    }

    pub fn cancel_pending_leave(&mut self) {
        if let Some(task) = self.pending_leave.take() {
            debug!("[{}] Cancelled empty-channel timer", self.guild_id);
            task.abort();
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = &self.playback_task {
            debug!("[{}] Aborting playback task", self.guild_id);
            task.abort();
        }
        if let Some(task) = &self.pending_leave {
            task.abort();
        }
        if let Some(task) = &self.watcher_task {
            debug!("[{}] Aborting connection watcher", self.guild_id);
            task.abort();
        }
    }
}
