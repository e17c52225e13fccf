use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::common::errors::PlaybackError;
use crate::common::types::{ChannelId, GuildId, Shared, format_duration};
use crate::configs::PlayerConfig;
use crate::messaging::{Card, CommandOutcome, MessageContent};
use crate::playback::connect;
use crate::playback::constants::{EMPTY_CHANNEL_LEAVE_MS, QUEUE_PAGE_SIZE};
use crate::playback::pipeline;
use crate::playback::session::PlaybackSession;
use crate::sources::SongResolver;
use crate::transport::context::{Member, VoiceChannelInfo, VoiceRoster, VoiceStateUpdate};
use crate::transport::process::{AudioTranscoder, SongDownloader};
use crate::transport::text::TextChannel;
use crate::transport::voice::VoiceTransport;

/// Per-guild playback orchestration.
///
/// Owns the guild → session map and every operation the command front-end
/// dispatches. Constructed once at process start and passed by reference;
/// cloning is cheap and shares all state.
///
/// Operations are not mutex-protected across await points: two enqueues
/// racing on first-session creation for the same guild can both try to
/// join. The second join reuses the first connection, but the window is
/// real and accepted.
#[derive(Clone)]
pub struct PlaybackEngine {
    pub(crate) sessions: Arc<DashMap<GuildId, Shared<PlaybackSession>>>,
    pub(crate) transport: Arc<dyn VoiceTransport>,
    pub(crate) roster: Arc<dyn VoiceRoster>,
    pub(crate) resolver: Arc<SongResolver>,
    pub(crate) downloader: Arc<dyn SongDownloader>,
    pub(crate) transcoder: Arc<dyn AudioTranscoder>,
    pub(crate) config: PlayerConfig,
}

impl PlaybackEngine {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        roster: Arc<dyn VoiceRoster>,
        resolver: Arc<SongResolver>,
        downloader: Arc<dyn SongDownloader>,
        transcoder: Arc<dyn AudioTranscoder>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            transport,
            roster,
            resolver,
            downloader,
            transcoder,
            config,
        }
    }

    pub fn session(&self, guild_id: &GuildId) -> Option<Shared<PlaybackSession>> {
        self.sessions.get(guild_id).map(|s| s.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Resolve a query to a song and append it to the guild's queue,
    /// creating the session (and joining voice) when none exists.
    pub async fn enqueue(
        &self,
        guild_id: &GuildId,
        member: &Member,
        query: &str,
        text_channel: Arc<dyn TextChannel>,
    ) -> CommandOutcome {
        match self.enqueue_inner(guild_id, member, query, text_channel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if !e.is_user_error() {
                    error!("[{}] Enqueue failed: {}", guild_id, e);
                }
                CommandOutcome::fail(e.to_string())
            }
        }
    }

    async fn enqueue_inner(
        &self,
        guild_id: &GuildId,
        member: &Member,
        query: &str,
        text_channel: Arc<dyn TextChannel>,
    ) -> Result<CommandOutcome, PlaybackError> {
        let channel = member
            .voice_channel
            .as_ref()
            .ok_or(PlaybackError::NotInVoiceChannel)?;
        if !channel.bot_can_connect {
            return Err(PlaybackError::MissingPermission("connect"));
        }
        if !channel.bot_can_speak {
            return Err(PlaybackError::MissingPermission("speak"));
        }
        if channel.is_full() {
            return Err(PlaybackError::ChannelFull);
        }

        // Resolve before creating anything so a search miss leaves no
        // half-built session behind.
        let song = self.resolver.resolve(query, &member.display_name).await?;
        debug!(
            "[{}] Resolved \"{}\" -> {} ({}s)",
            guild_id, query, song.title, song.duration
        );

        let shared = match self.session(guild_id) {
            Some(shared) => shared,
            None => self.create_session(guild_id, channel, text_channel).await?,
        };

        let mut session = shared.lock().await;
        session.songs.push_back(song.clone());
        let position = session.songs.len();
        if !session.playing {
            self.start_playback(guild_id, &mut session);
        }
        drop(session);

        Ok(CommandOutcome::ok(
            Card::new("Added to Queue", format!("**{}**", song.title))
                .field("Duration", format_duration(song.duration), true)
                .field("Requested by", song.requested_by.clone(), true)
                .field("Position in queue", position.to_string(), true)
                .thumbnail(song.thumbnail.clone()),
        ))
    }

    async fn create_session(
        &self,
        guild_id: &GuildId,
        channel: &VoiceChannelInfo,
        text_channel: Arc<dyn TextChannel>,
    ) -> Result<Shared<PlaybackSession>, PlaybackError> {
        let handle =
            connect::acquire(self.transport.as_ref(), guild_id, channel, &self.config).await?;

        let watcher = connect::spawn_disconnect_watcher(
            self.clone(),
            guild_id.clone(),
            handle.connection.subscribe(),
        );

        let mut session = PlaybackSession::new(guild_id.clone(), handle, text_channel);
        session.watcher_task = Some(watcher);

        let shared = Arc::new(Mutex::new(session));
        self.sessions.insert(guild_id.clone(), shared.clone());
        info!("[{}] Session created in channel {}", guild_id, channel.name);
        Ok(shared)
    }

    /// Spawn (or restart) the playback loop for a session.
    fn start_playback(&self, guild_id: &GuildId, session: &mut PlaybackSession) {
        if let Some(task) = session.playback_task.take() {
            task.abort();
        }
        session.playing = true;
        let engine = self.clone();
        let guild_id = guild_id.clone();
        session.playback_task = Some(tokio::spawn(async move {
            pipeline::run(engine, guild_id).await;
        }));
    }

    /// Force the current render to end, advancing to the next song.
    pub async fn skip(&self, guild_id: &GuildId) -> CommandOutcome {
        let Some(shared) = self.session(guild_id) else {
            return CommandOutcome::fail(PlaybackError::NothingPlaying.to_string());
        };

        let mut session = shared.lock().await;
        if session.songs.is_empty() {
            session.playing = false;
            return CommandOutcome::fail(PlaybackError::NothingPlaying.to_string());
        }

        let state = session.player.state();
        if !state.is_active() {
            warn!(
                "[{}] Player state is {:?} but queue has {} songs",
                guild_id,
                state,
                session.songs.len()
            );
            session.playing = false;
            return CommandOutcome::fail(PlaybackError::NothingPlaying.to_string());
        }

        if let Some(song) = session.current() {
            info!("[{}] Skipping current song: {}", guild_id, song.title);
        }
        let player = session.player.clone();
        drop(session);

        // The forced stop surfaces as end-of-stream; the playback loop
        // advances the queue exactly as on natural completion.
        player.stop().await;
        CommandOutcome::ok("Skipped the current song!")
    }

    /// Clear the queue and tear the session down. Idempotent.
    pub async fn stop(&self, guild_id: &GuildId) -> CommandOutcome {
        if self.destroy_session(guild_id, None).await {
            CommandOutcome::ok("Stopped the music and cleared the queue!")
        } else {
            CommandOutcome::fail(PlaybackError::NothingPlaying.to_string())
        }
    }

    pub async fn pause(&self, guild_id: &GuildId) -> CommandOutcome {
        let Some(player) = self.active_player(guild_id).await else {
            return CommandOutcome::fail(PlaybackError::NothingPlaying.to_string());
        };
        player.pause().await;
        CommandOutcome::ok("Paused the music!")
    }

    pub async fn resume(&self, guild_id: &GuildId) -> CommandOutcome {
        let Some(player) = self.active_player(guild_id).await else {
            return CommandOutcome::fail(PlaybackError::NothingPlaying.to_string());
        };
        player.resume().await;
        CommandOutcome::ok("Resumed the music!")
    }

    /// The session's player, when the session reports `playing`.
    async fn active_player(
        &self,
        guild_id: &GuildId,
    ) -> Option<Arc<dyn crate::transport::voice::AudioPlayer>> {
        let shared = self.session(guild_id)?;
        let session = shared.lock().await;
        if !session.playing {
            return None;
        }
        Some(session.player.clone())
    }

    /// Store a new volume level (0-100).
    ///
    /// The stored fraction is attached to the next acquired audio resource;
    /// a resource already in flight keeps the volume it started with.
    pub async fn volume(&self, guild_id: &GuildId, level: i64) -> CommandOutcome {
        let Some(shared) = self.session(guild_id) else {
            return CommandOutcome::fail(PlaybackError::NothingPlaying.to_string());
        };
        if !(0..=100).contains(&level) {
            return CommandOutcome::fail(PlaybackError::InvalidVolume(level).to_string());
        }

        shared.lock().await.volume = level as f32 / 100.0;
        info!("[{}] Volume set to {}%", guild_id, level);
        CommandOutcome::ok(format!("Volume set to {}%!", level))
    }

    /// Toggle loop mode and report the new state.
    pub async fn toggle_loop(&self, guild_id: &GuildId) -> CommandOutcome {
        let Some(shared) = self.session(guild_id) else {
            return CommandOutcome::fail(PlaybackError::NothingPlaying.to_string());
        };

        let mut session = shared.lock().await;
        session.loop_current = !session.loop_current;
        let message = if session.loop_current {
            "Loop mode enabled!"
        } else {
            "Loop mode disabled!"
        };
        CommandOutcome::ok(message)
    }

    /// Read-only queue snapshot: the first page of entries plus a remainder
    /// count.
    pub async fn queue(&self, guild_id: &GuildId) -> CommandOutcome {
        let Some(shared) = self.session(guild_id) else {
            return CommandOutcome::fail(PlaybackError::EmptyQueue.to_string());
        };

        let session = shared.lock().await;
        if session.songs.is_empty() {
            return CommandOutcome::fail(PlaybackError::EmptyQueue.to_string());
        }

        let total = session.songs.len();
        let listing = session
            .songs
            .iter()
            .take(QUEUE_PAGE_SIZE)
            .enumerate()
            .map(|(i, song)| {
                format!(
                    "{}. **{}** - {} ({})",
                    i + 1,
                    song.title,
                    format_duration(song.duration),
                    song.requested_by
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut card =
            Card::new("Music Queue", format!("**{} songs in queue**", total))
                .field("Current Queue", listing, false);
        if total > QUEUE_PAGE_SIZE {
            card = card.footer(format!("And {} more songs...", total - QUEUE_PAGE_SIZE));
        }
        CommandOutcome::ok(card)
    }

    /// React to a member joining or leaving voice: arm the empty-channel
    /// leave timer when the last human departs the bot's channel, cancel it
    /// when someone comes back.
    pub async fn handle_voice_state_update(&self, update: &VoiceStateUpdate) {
        if update.is_bot {
            return;
        }
        let Some(shared) = self.session(&update.guild_id) else {
            return;
        };
        let Some(bot_channel) = self.roster.bot_channel(&update.guild_id) else {
            return;
        };

        if update.is_leave() && update.old_channel.as_ref() == Some(&bot_channel) {
            info!(
                "[{}] {} left voice channel {}",
                update.guild_id, update.member_name, bot_channel
            );
            self.arm_empty_channel_timer(&update.guild_id, &bot_channel, &shared)
                .await;
        } else if update.is_join() && update.new_channel.as_ref() == Some(&bot_channel) {
            info!(
                "[{}] {} joined voice channel {}",
                update.guild_id, update.member_name, bot_channel
            );
            shared.lock().await.cancel_pending_leave();
        }
    }

    async fn arm_empty_channel_timer(
        &self,
        guild_id: &GuildId,
        channel_id: &ChannelId,
        shared: &Shared<PlaybackSession>,
    ) {
        let mut session = shared.lock().await;
        // One live timer per guild; a new departure restarts the clock.
        session.cancel_pending_leave();

        if self.roster.human_count(channel_id) > 0 {
            return;
        }

        info!(
            "[{}] Voice channel {} is empty; starting {}s disconnect timer",
            guild_id,
            channel_id,
            EMPTY_CHANNEL_LEAVE_MS / 1000
        );

        let engine = self.clone();
        let guild_id = guild_id.clone();
        let channel_id = channel_id.clone();
        session.pending_leave = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(EMPTY_CHANNEL_LEAVE_MS)).await;
            engine.leave_if_still_empty(guild_id, channel_id).await;
        }));
    }

    async fn leave_if_still_empty(&self, guild_id: GuildId, channel_id: ChannelId) {
        let Some(shared) = self.session(&guild_id) else {
            return;
        };
        // Detach our own handle before teardown so the abort in
        // destroy_session cannot cancel us mid-run.
        shared.lock().await.pending_leave.take();

        if self.roster.human_count(&channel_id) > 0 {
            debug!(
                "[{}] Channel {} repopulated; dropping stale leave timer",
                guild_id, channel_id
            );
            return;
        }

        info!("[{}] Leaving empty voice channel {}", guild_id, channel_id);
        let notice = Card::new(
            "Left Voice Channel",
            "I left the voice channel because it was empty for too long.",
        )
        .field(
            "Info",
            "Use the play command when you want me to rejoin!",
            false,
        );
        self.destroy_session(&guild_id, Some(notice.into())).await;
    }

    /// Tear down a guild's session: clear the queue, stop the transport,
    /// destroy the connection, drop the map entry. Returns whether a
    /// session existed. Optionally posts a final notice first.
    pub(crate) async fn destroy_session(
        &self,
        guild_id: &GuildId,
        notice: Option<MessageContent>,
    ) -> bool {
        let Some((_, shared)) = self.sessions.remove(guild_id) else {
            return false;
        };

        let mut session = shared.lock().await;
        session.songs.clear();
        session.playing = false;
        session.cancel_pending_leave();
        if let Some(task) = session.playback_task.take() {
            task.abort();
        }
        session.cancel.cancel();
        session.player.stop().await;
        session.connection.destroy();

        if let Some(content) = notice {
            if let Err(e) = session.text_channel.send(content).await {
                warn!("[{}] Failed to post teardown notice: {}", guild_id, e);
            }
        }

        // Abort the watcher last: when the watcher itself triggered the
        // teardown it has already detached its handle, and aborting here
        // must not cut the steps above short.
        if let Some(task) = session.watcher_task.take() {
            task.abort();
        }

        info!("[{}] Session destroyed", guild_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::playback::testkit::*;
    use crate::transport::context::VoiceStateUpdate;
    use crate::transport::voice::{
        AudioPlayer, ConnectionState, DisconnectReason, PlayerState, VoiceConnection,
    };

    fn leave_update(guild_id: &GuildId, channel: &str) -> VoiceStateUpdate {
        VoiceStateUpdate {
            guild_id: guild_id.clone(),
            member_name: "tester".to_string(),
            is_bot: false,
            old_channel: Some(ChannelId::from(channel)),
            new_channel: None,
        }
    }

    fn join_update(guild_id: &GuildId, channel: &str) -> VoiceStateUpdate {
        VoiceStateUpdate {
            guild_id: guild_id.clone(),
            member_name: "tester".to_string(),
            is_bot: false,
            old_channel: None,
            new_channel: Some(ChannelId::from(channel)),
        }
    }

    fn card_titles(channel: &crate::transport::memory::MemoryTextChannel) -> Vec<String> {
        channel
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                MessageContent::Card(card) => Some(card.title),
                MessageContent::Text(_) => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_creates_session_and_plays() {
        let h = harness();
        let g = guild("G1");

        let outcome = h
            .engine
            .enqueue(&g, &member_in("V1"), "song A", h.channel.clone())
            .await;

        assert!(outcome.success);
        assert_eq!(h.engine.session_count(), 1);

        let shared = h.engine.session(&g).unwrap();
        assert!(shared.lock().await.playing);
        assert_eq!(shared.lock().await.songs.len(), 1);

        let player = h.transport.player(&g).unwrap();
        wait_for("first play to start", || async { player.play_count() >= 1 }).await;

        match outcome.message {
            MessageContent::Card(card) => {
                assert_eq!(card.title, "Added to Queue");
                assert_eq!(card.fields[2].value, "1");
            }
            other => panic!("expected a card, got {:?}", other),
        }

        wait_for("now-playing notice", || async {
            card_titles(&h.channel).contains(&"Now Playing".to_string())
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_outside_voice_fails_without_session() {
        let h = harness();
        let g = guild("G1");

        let outcome = h
            .engine
            .enqueue(&g, &member_outside(), "song A", h.channel.clone())
            .await;

        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            MessageContent::Text("You need to be in a voice channel to use this command!".into())
        );
        assert_eq!(h.engine.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_denied_permissions() {
        let h = harness();
        let g = guild("G1");
        let mut member = member_in("V1");
        member.voice_channel.as_mut().unwrap().bot_can_speak = false;

        let outcome = h.engine.enqueue(&g, &member, "x", h.channel.clone()).await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            MessageContent::Text("I need permission to speak in this voice channel!".into())
        );

        let mut member = member_in("V1");
        member.voice_channel.as_mut().unwrap().user_limit = Some(2);

        let outcome = h.engine.enqueue(&g, &member, "x", h.channel.clone()).await;
        assert_eq!(
            outcome.message,
            MessageContent::Text("This voice channel is full!".into())
        );
        assert_eq!(h.engine.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_session_per_guild() {
        let h = harness();
        let g = guild("G1");

        h.engine
            .enqueue(&g, &member_in("V1"), "first song", h.channel.clone())
            .await;
        let connection = h.transport.connection(&g).unwrap();

        h.engine
            .enqueue(&g, &member_in("V1"), "second song", h.channel.clone())
            .await;

        assert_eq!(h.engine.session_count(), 1);
        let shared = h.engine.session(&g).unwrap();
        assert_eq!(shared.lock().await.songs.len(), 2);
        // The live connection was reused, not replaced.
        assert!(Arc::ptr_eq(
            &connection,
            &h.transport.connection(&g).unwrap()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_without_session_is_safe() {
        let h = harness();
        let outcome = h.engine.skip(&guild("G1")).await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.message,
            MessageContent::Text("Nothing is currently playing!".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_advances_queue() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "first song", h.channel.clone())
            .await;
        h.engine
            .enqueue(&g, &member_in("V1"), "second song", h.channel.clone())
            .await;

        let player = h.transport.player(&g).unwrap();
        wait_for("first song to play", || async { player.play_count() >= 1 }).await;

        let outcome = h.engine.skip(&g).await;
        assert!(outcome.success);

        let shared = h.engine.session(&g).unwrap();
        wait_for("queue to advance", || {
            let shared = shared.clone();
            async move {
                let session = shared.lock().await;
                session.songs.len() == 1
                    && session.current().map(|s| s.title.as_str()) == Some("second song")
            }
        })
        .await;
        wait_for("second song to play", || async { player.play_count() >= 2 }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_after_queue_drained_reports_nothing_playing() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "only song", h.channel.clone())
            .await;

        let player = h.transport.player(&g).unwrap();
        wait_for("song to play", || async { player.play_count() >= 1 }).await;
        player.finish();

        let shared = h.engine.session(&g).unwrap();
        wait_for("session to go idle", || {
            let shared = shared.clone();
            async move {
                let session = shared.lock().await;
                session.songs.is_empty() && !session.playing
            }
        })
        .await;

        let outcome = h.engine.skip(&g).await;
        assert!(!outcome.success);
        // Going idle never destroys the session.
        assert_eq!(h.engine.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_while_paused_reports_nothing_playing() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;

        let player = h.transport.player(&g).unwrap();
        wait_for("song to play", || async { player.play_count() >= 1 }).await;
        h.engine.pause(&g).await;

        // The transport is not actively rendering, so skip refuses and
        // corrects the playing flag.
        let outcome = h.engine.skip(&g).await;
        assert!(!outcome.success);
        let shared = h.engine.session(&g).unwrap();
        assert!(!shared.lock().await.playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_toggle_twice_restores_flag() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;
        let shared = h.engine.session(&g).unwrap();
        let initial = shared.lock().await.loop_current;

        let first = h.engine.toggle_loop(&g).await;
        assert!(first.success);
        assert_eq!(
            first.message,
            MessageContent::Text("Loop mode enabled!".into())
        );

        let second = h.engine.toggle_loop(&g).await;
        assert_eq!(
            second.message,
            MessageContent::Text("Loop mode disabled!".into())
        );
        assert_eq!(shared.lock().await.loop_current, initial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_mode_replays_head_song() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "repeat me", h.channel.clone())
            .await;
        h.engine.toggle_loop(&g).await;

        let player = h.transport.player(&g).unwrap();
        wait_for("first play", || async { player.play_count() >= 1 }).await;
        player.finish();

        wait_for("replay of the same song", || async {
            player.play_count() >= 2
        })
        .await;

        let shared = h.engine.session(&g).unwrap();
        let session = shared.lock().await;
        assert_eq!(session.songs.len(), 1);
        assert_eq!(session.current().map(|s| s.title.as_str()), Some("repeat me"));
        assert!(session.playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_natural_end_goes_idle_not_destroyed() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "only song", h.channel.clone())
            .await;

        let player = h.transport.player(&g).unwrap();
        wait_for("song to play", || async { player.play_count() >= 1 }).await;
        player.finish();

        let shared = h.engine.session(&g).unwrap();
        wait_for("idle transition", || {
            let shared = shared.clone();
            async move {
                let session = shared.lock().await;
                session.songs.is_empty() && !session.playing
            }
        })
        .await;
        assert_eq!(h.engine.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_destroys_session_and_is_idempotent() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;
        let connection = h.transport.connection(&g).unwrap();

        let outcome = h.engine.stop(&g).await;
        assert!(outcome.success);
        assert_eq!(h.engine.session_count(), 0);
        assert_eq!(connection.state(), ConnectionState::Destroyed);

        let again = h.engine.stop(&g).await;
        assert!(!again.success);
        assert_eq!(
            again.message,
            MessageContent::Text("Nothing is currently playing!".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume() {
        let h = harness();
        let g = guild("G1");

        assert!(!h.engine.pause(&g).await.success);

        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;
        let player = h.transport.player(&g).unwrap();
        wait_for("song to play", || async {
            player.state() == PlayerState::Playing
        })
        .await;

        assert!(h.engine.pause(&g).await.success);
        assert_eq!(player.state(), PlayerState::Paused);

        assert!(h.engine.resume(&g).await.success);
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_validates_and_applies_to_next_resource() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "first song", h.channel.clone())
            .await;
        h.engine
            .enqueue(&g, &member_in("V1"), "second song", h.channel.clone())
            .await;

        let player = h.transport.player(&g).unwrap();
        wait_for("first song to play", || async { player.play_count() >= 1 }).await;
        let first_volume = player.current_source().unwrap().volume;
        assert_eq!(first_volume, 1.0);

        assert!(!h.engine.volume(&g, 150).await.success);
        assert!(!h.engine.volume(&g, -1).await.success);

        let outcome = h.engine.volume(&g, 50).await;
        assert!(outcome.success);
        // The in-flight resource keeps its volume.
        assert_eq!(player.current_source().unwrap().volume, 1.0);

        h.engine.skip(&g).await;
        wait_for("second song to play", || async { player.play_count() >= 2 }).await;
        assert_eq!(player.current_source().unwrap().volume, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_snapshot_pagination() {
        let h = harness();
        let g = guild("G1");

        assert!(!h.engine.queue(&g).await.success);

        for i in 1..=12 {
            h.engine
                .enqueue(&g, &member_in("V1"), &format!("song {}", i), h.channel.clone())
                .await;
        }

        let outcome = h.engine.queue(&g).await;
        assert!(outcome.success);
        match outcome.message {
            MessageContent::Card(card) => {
                assert_eq!(card.description, "**12 songs in queue**");
                let listing = &card.fields[0].value;
                assert_eq!(listing.lines().count(), 10);
                assert!(listing.starts_with("1. **song 1** - 3:00 (tester)"));
                assert_eq!(card.footer.as_deref(), Some("And 2 more songs..."));
            }
            other => panic!("expected a card, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_channel_leave_after_timeout() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;
        h.roster.set_bot_channel(g.clone(), ChannelId::from("V1"));
        h.roster.set_humans(ChannelId::from("V1"), 0);

        h.engine.handle_voice_state_update(&leave_update(&g, "V1")).await;

        {
            let shared = h.engine.session(&g).unwrap();
            assert!(shared.lock().await.pending_leave.is_some());
        }

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for("session teardown", || async {
            h.engine.session_count() == 0
        })
        .await;
        assert!(card_titles(&h.channel).contains(&"Left Voice Channel".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_cancels_leave_timer() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;
        h.roster.set_bot_channel(g.clone(), ChannelId::from("V1"));
        h.roster.set_humans(ChannelId::from("V1"), 0);

        h.engine.handle_voice_state_update(&leave_update(&g, "V1")).await;
        h.roster.set_humans(ChannelId::from("V1"), 1);
        h.engine.handle_voice_state_update(&join_update(&g, "V1")).await;

        {
            let shared = h.engine.session(&g).unwrap();
            assert!(shared.lock().await.pending_leave.is_none());
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.engine.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_leave_timer_rechecks_occupancy() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;
        h.roster.set_bot_channel(g.clone(), ChannelId::from("V1"));
        h.roster.set_humans(ChannelId::from("V1"), 0);

        h.engine.handle_voice_state_update(&leave_update(&g, "V1")).await;
        // Someone comes back without the join event reaching us; the fired
        // timer must still notice and stand down.
        h.roster.set_humans(ChannelId::from("V1"), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for("timer to stand down", || async {
            let shared = h.engine.session(&g).unwrap();
            shared.lock().await.pending_leave.is_none()
        })
        .await;
        assert_eq!(h.engine.session_count(), 1);
        assert!(!card_titles(&h.channel).contains(&"Left Voice Channel".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_leaves_no_session() {
        let h = harness();
        let g = guild("G1");
        h.transport.set_join_ready(false);

        let outcome = h
            .engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;

        assert!(!outcome.success);
        match outcome.message {
            MessageContent::Text(text) => assert!(text.contains("after 3 attempts")),
            other => panic!("expected text, got {:?}", other),
        }
        assert_eq!(h.engine.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_disconnect_recovers_within_window() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;
        let connection = h.transport.connection(&g).unwrap();

        connection.force_state(ConnectionState::Disconnected(
            DisconnectReason::WebsocketClose,
        ));
        tokio::time::sleep(Duration::from_secs(2)).await;
        connection.force_state(ConnectionState::Connecting);
        tokio::time::sleep(Duration::from_secs(1)).await;
        connection.force_state(ConnectionState::Ready);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(h.engine.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_tears_down_and_notifies() {
        let h = harness();
        let g = guild("G1");
        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;
        let connection = h.transport.connection(&g).unwrap();

        connection.force_state(ConnectionState::Disconnected(
            DisconnectReason::WebsocketClose,
        ));

        tokio::time::sleep(Duration::from_secs(11)).await;
        wait_for("session teardown", || async {
            h.engine.session_count() == 0
        })
        .await;

        let notices = h.channel.sent();
        assert!(notices.iter().any(|m| matches!(
            m,
            MessageContent::Text(text) if text.contains("could not be restored")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_song_never_stalls_the_queue() {
        let h = harness();
        let g = guild("G1");
        h.downloader.fail_for("bad-song");

        h.engine
            .enqueue(&g, &member_in("V1"), "bad song", h.channel.clone())
            .await;
        h.engine
            .enqueue(&g, &member_in("V1"), "good song", h.channel.clone())
            .await;

        let shared = h.engine.session(&g).unwrap();
        wait_for("good song to reach the head and play", || {
            let shared = shared.clone();
            async move {
                let session = shared.lock().await;
                session.playing
                    && session.current().map(|s| s.title.as_str()) == Some("good song")
            }
        })
        .await;

        assert!(card_titles(&h.channel).contains(&"Error Playing Song".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcode_failure_falls_back_to_original() {
        let h = harness();
        let g = guild("G1");
        h.transcoder
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);

        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;

        let player = h.transport.player(&g).unwrap();
        wait_for("song to play", || async { player.play_count() >= 1 }).await;
        let source = player.current_source().unwrap();
        assert!(source.path.to_string_lossy().ends_with(".mp3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcoded_file_is_preferred() {
        let h = harness();
        let g = guild("G1");

        h.engine
            .enqueue(&g, &member_in("V1"), "a song", h.channel.clone())
            .await;

        let player = h.transport.player(&g).unwrap();
        wait_for("song to play", || async { player.play_count() >= 1 }).await;
        let source = player.current_source().unwrap();
        assert!(source.path.to_string_lossy().ends_with("_converted.opus"));
    }
}
