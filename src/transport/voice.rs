use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::common::types::{AnyResult, ChannelId, GuildId};

/// Why a connection left the `Ready` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Torn down by us (stop, empty-channel leave). Never reconnected.
    Manual,
    /// The transport websocket dropped.
    WebsocketClose,
    Unknown,
}

/// Lifecycle states of a voice connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Signalling,
    Connecting,
    Ready,
    Disconnected(DisconnectReason),
    Destroyed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// States that count as "coming back" during a reconnection window.
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Signalling | Self::Connecting)
    }
}

/// States of the audio player attached to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Buffering,
    Playing,
    Paused,
    AutoPaused,
}

impl PlayerState {
    /// True while the player is actively rendering (or about to).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Playing | Self::Buffering)
    }
}

/// Events emitted by an audio player to its current subscriber.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    StateChange(PlayerState),
    Error(String),
}

/// A file-backed audio source plus the volume to apply when it starts.
///
/// Volume is attached at acquisition time; changing the session volume has
/// no effect on a source already in flight.
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub path: std::path::PathBuf,
    pub volume: f32,
}

/// Parameters for joining a voice channel.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub self_deaf: bool,
    pub self_mute: bool,
}

/// A live connection to one guild's voice channel.
pub trait VoiceConnection: Send + Sync {
    fn channel_id(&self) -> ChannelId;

    fn state(&self) -> ConnectionState;

    /// Watch subscription over state transitions.
    fn subscribe(&self) -> watch::Receiver<ConnectionState>;

    /// Tear the connection down. Counts as a manual disconnect and never
    /// triggers reconnection.
    fn destroy(&self);
}

/// The player that renders audio into a connection.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    fn state(&self) -> PlayerState;

    /// A fresh event subscription. Each playback start takes a new receiver
    /// and drops the previous one, so a stale listener can never advance the
    /// queue twice.
    fn subscribe(&self) -> flume::Receiver<PlayerEvent>;

    async fn play(&self, source: AudioSource) -> AnyResult<()>;

    /// Force the current render to end. The subscriber observes `Idle`,
    /// exactly as on natural end-of-stream.
    async fn stop(&self);

    async fn pause(&self);

    async fn resume(&self);
}

/// Handle pair owned by a playback session and destroyed with it.
#[derive(Clone)]
pub struct VoiceHandle {
    pub connection: Arc<dyn VoiceConnection>,
    pub player: Arc<dyn AudioPlayer>,
}

impl std::fmt::Debug for VoiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceHandle").finish_non_exhaustive()
    }
}

/// The platform's voice layer: joins channels and hands out session handles.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(&self, request: JoinRequest) -> AnyResult<VoiceHandle>;

    /// The live handle for a guild, if the bot is already connected there.
    fn existing(&self, guild_id: &GuildId) -> Option<VoiceHandle>;
}

/// Wait until the connection reports a state accepted by `pred`, up to
/// `timeout`.
pub async fn enters_state(
    rx: &mut watch::Receiver<ConnectionState>,
    timeout: Duration,
    pred: impl Fn(ConnectionState) -> bool,
) -> AnyResult<ConnectionState> {
    let wait = async {
        loop {
            let current = *rx.borrow();
            if pred(current) {
                return Ok::<_, crate::common::types::AnyError>(current);
            }
            if rx.changed().await.is_err() {
                return Err("voice connection dropped".into());
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err("timed out waiting for voice connection state".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_enters_state_times_out() {
        let (_tx, mut rx) = watch::channel(ConnectionState::Signalling);
        let result = enters_state(&mut rx, Duration::from_secs(1), |s| s.is_ready()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enters_state_observes_transition() {
        let (tx, mut rx) = watch::channel(ConnectionState::Signalling);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(ConnectionState::Ready);
            // keep the sender alive long enough for the watcher to observe
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let state = enters_state(&mut rx, Duration::from_secs(15), |s| s.is_ready())
            .await
            .unwrap();
        assert_eq!(state, ConnectionState::Ready);
    }
}
