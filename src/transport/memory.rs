//! In-process transport implementation.
//!
//! Backs the engine in tests and offline/dry runs: connections are plain
//! state machines, the player renders nothing and finishes on demand, and
//! text channels collect what would have been posted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::common::types::{AnyResult, ChannelId, GuildId};
use crate::messaging::MessageContent;
use crate::transport::context::VoiceRoster;
use crate::transport::text::TextChannel;
use crate::transport::voice::{
    AudioPlayer, AudioSource, ConnectionState, JoinRequest, PlayerEvent, PlayerState,
    VoiceConnection, VoiceHandle, VoiceTransport,
};

pub struct MemoryConnection {
    channel_id: ChannelId,
    state_tx: watch::Sender<ConnectionState>,
}

impl MemoryConnection {
    fn new(channel_id: ChannelId, initial: ConnectionState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            channel_id,
            state_tx,
        }
    }

    /// Drive the connection from the outside, as the platform would.
    pub fn force_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

impl VoiceConnection for MemoryConnection {
    fn channel_id(&self) -> ChannelId {
        self.channel_id.clone()
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn destroy(&self) {
        self.state_tx.send_replace(ConnectionState::Destroyed);
    }
}

pub struct MemoryPlayer {
    state: Mutex<PlayerState>,
    subscribers: Mutex<Vec<flume::Sender<PlayerEvent>>>,
    current: Mutex<Option<AudioSource>>,
    plays: AtomicUsize,
}

impl MemoryPlayer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlayerState::Idle),
            subscribers: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            plays: AtomicUsize::new(0),
        }
    }

    /// How many sources have been handed to this player.
    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    fn broadcast(&self, event: PlayerEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, state: PlayerState) {
        *self.state.lock() = state;
        self.broadcast(PlayerEvent::StateChange(state));
    }

    /// Simulate natural end-of-stream for the current source.
    pub fn finish(&self) {
        if *self.state.lock() != PlayerState::Idle {
            *self.current.lock() = None;
            self.set_state(PlayerState::Idle);
        }
    }

    /// Simulate a mid-render failure.
    pub fn emit_error(&self, message: impl Into<String>) {
        self.broadcast(PlayerEvent::Error(message.into()));
        *self.current.lock() = None;
        *self.state.lock() = PlayerState::Idle;
    }

    /// The source currently "playing", if any.
    pub fn current_source(&self) -> Option<AudioSource> {
        self.current.lock().clone()
    }
}

impl Default for MemoryPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioPlayer for MemoryPlayer {
    fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    fn subscribe(&self) -> flume::Receiver<PlayerEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    async fn play(&self, source: AudioSource) -> AnyResult<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        *self.current.lock() = Some(source);
        self.set_state(PlayerState::Buffering);
        self.set_state(PlayerState::Playing);
        Ok(())
    }

    async fn stop(&self) {
        self.finish();
    }

    async fn pause(&self) {
        if *self.state.lock() == PlayerState::Playing {
            self.set_state(PlayerState::Paused);
        }
    }

    async fn resume(&self) {
        if *self.state.lock() == PlayerState::Paused {
            self.set_state(PlayerState::Playing);
        }
    }
}

pub struct MemoryTransport {
    connections: DashMap<GuildId, Arc<MemoryConnection>>,
    players: DashMap<GuildId, Arc<MemoryPlayer>>,
    /// When false, joined connections stay in `Signalling` and never become
    /// ready. Lets tests exercise the connect retry path.
    join_ready: AtomicBool,
    /// Number of upcoming `join` calls that fail outright.
    fail_joins: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            players: DashMap::new(),
            join_ready: AtomicBool::new(true),
            fail_joins: AtomicUsize::new(0),
        }
    }

    pub fn set_join_ready(&self, ready: bool) {
        self.join_ready.store(ready, Ordering::SeqCst);
    }

    pub fn fail_next_joins(&self, count: usize) {
        self.fail_joins.store(count, Ordering::SeqCst);
    }

    pub fn connection(&self, guild_id: &GuildId) -> Option<Arc<MemoryConnection>> {
        self.connections.get(guild_id).map(|c| c.value().clone())
    }

    pub fn player(&self, guild_id: &GuildId) -> Option<Arc<MemoryPlayer>> {
        self.players.get(guild_id).map(|p| p.value().clone())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoiceTransport for MemoryTransport {
    async fn join(&self, request: JoinRequest) -> AnyResult<VoiceHandle> {
        let remaining = self.fail_joins.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_joins.store(remaining - 1, Ordering::SeqCst);
            return Err("join refused".into());
        }

        let initial = if self.join_ready.load(Ordering::SeqCst) {
            ConnectionState::Ready
        } else {
            ConnectionState::Signalling
        };

        let connection = Arc::new(MemoryConnection::new(request.channel_id, initial));
        let player = Arc::new(MemoryPlayer::new());
        self.connections
            .insert(request.guild_id.clone(), connection.clone());
        self.players.insert(request.guild_id, player.clone());

        Ok(VoiceHandle { connection, player })
    }

    fn existing(&self, guild_id: &GuildId) -> Option<VoiceHandle> {
        let connection = self.connection(guild_id)?;
        if connection.state() == ConnectionState::Destroyed {
            return None;
        }
        let player = self.player(guild_id)?;
        Some(VoiceHandle { connection, player })
    }
}

/// Text channel that records everything sent to it.
pub struct MemoryTextChannel {
    sent: Mutex<Vec<MessageContent>>,
}

impl MemoryTextChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<MessageContent> {
        self.sent.lock().clone()
    }
}

impl Default for MemoryTextChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextChannel for MemoryTextChannel {
    async fn send(&self, content: MessageContent) -> AnyResult<()> {
        self.sent.lock().push(content);
        Ok(())
    }
}

/// Scriptable occupancy source.
pub struct MemoryRoster {
    humans: DashMap<ChannelId, usize>,
    bots: DashMap<GuildId, ChannelId>,
}

impl MemoryRoster {
    pub fn new() -> Self {
        Self {
            humans: DashMap::new(),
            bots: DashMap::new(),
        }
    }

    pub fn set_humans(&self, channel_id: ChannelId, count: usize) {
        self.humans.insert(channel_id, count);
    }

    pub fn set_bot_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.bots.insert(guild_id, channel_id);
    }

    pub fn clear_bot_channel(&self, guild_id: &GuildId) {
        self.bots.remove(guild_id);
    }
}

impl Default for MemoryRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceRoster for MemoryRoster {
    fn human_count(&self, channel_id: &ChannelId) -> usize {
        self.humans.get(channel_id).map(|c| *c.value()).unwrap_or(0)
    }

    fn bot_channel(&self, guild_id: &GuildId) -> Option<ChannelId> {
        self.bots.get(guild_id).map(|c| c.value().clone())
    }
}
