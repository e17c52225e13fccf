//! Voice-connection acquisition and supervision.

use std::pin::pin;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::common::errors::PlaybackError;
use crate::common::types::{AnyResult, GuildId};
use crate::configs::PlayerConfig;
use crate::playback::backoff::Backoff;
use crate::playback::constants::{
    CONNECTING_READY_TIMEOUT_MS, CONNECTING_WAIT_MS, MAX_CONNECT_ATTEMPTS, READY_TIMEOUT_MS,
    RECONNECT_WINDOW_MS,
};
use crate::playback::engine::PlaybackEngine;
use crate::transport::context::VoiceChannelInfo;
use crate::transport::voice::{
    ConnectionState, DisconnectReason, JoinRequest, VoiceConnection, VoiceHandle, VoiceTransport,
    enters_state,
};

/// Join the member's voice channel, reusing a live connection when the bot
/// is already there.
///
/// Up to [`MAX_CONNECT_ATTEMPTS`] tries with exponential backoff between
/// them; a partially-created connection is destroyed before the next try or
/// before the failure is reported, so no half-joined state leaks out.
pub(crate) async fn acquire(
    transport: &dyn VoiceTransport,
    guild_id: &GuildId,
    channel: &VoiceChannelInfo,
    config: &PlayerConfig,
) -> Result<VoiceHandle, PlaybackError> {
    if let Some(handle) = transport.existing(guild_id) {
        if handle.connection.channel_id() == channel.id && handle.connection.state().is_ready() {
            info!(
                "[{}] Reusing existing voice connection to {}",
                guild_id, channel.name
            );
            return Ok(handle);
        }
    }

    let mut backoff = Backoff::new();
    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        info!(
            "[{}] Connection attempt {}/{} to voice channel {}",
            guild_id, attempt, MAX_CONNECT_ATTEMPTS, channel.name
        );

        let request = JoinRequest {
            guild_id: guild_id.clone(),
            channel_id: channel.id.clone(),
            self_deaf: config.self_deaf,
            self_mute: false,
        };

        match transport.join(request).await {
            Ok(handle) => match wait_until_ready(handle.connection.as_ref()).await {
                Ok(()) => {
                    info!(
                        "[{}] Connected to voice channel {} on attempt {}",
                        guild_id, channel.name, attempt
                    );
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(
                        "[{}] Connection attempt {}/{} failed: {}",
                        guild_id, attempt, MAX_CONNECT_ATTEMPTS, e
                    );
                    handle.connection.destroy();
                }
            },
            Err(e) => {
                warn!(
                    "[{}] Join refused on attempt {}/{}: {}",
                    guild_id, attempt, MAX_CONNECT_ATTEMPTS, e
                );
            }
        }

        if attempt < MAX_CONNECT_ATTEMPTS {
            let delay = backoff.next();
            debug!("[{}] Waiting {:?} before retry", guild_id, delay);
            tokio::time::sleep(delay).await;
        }
    }

    Err(PlaybackError::ConnectFailed {
        channel: channel.name.clone(),
        attempts: MAX_CONNECT_ATTEMPTS,
    })
}

/// Wait for `Ready`, racing a direct wait against a staged
/// connecting-then-ready wait. Whichever path succeeds first wins; the
/// attempt only fails once both have given up.
async fn wait_until_ready(connection: &dyn VoiceConnection) -> AnyResult<()> {
    let mut rx_direct = connection.subscribe();
    let mut rx_staged = connection.subscribe();

    let mut direct = pin!(enters_state(
        &mut rx_direct,
        Duration::from_millis(READY_TIMEOUT_MS),
        |s| s.is_ready(),
    ));
    let mut staged = pin!(async {
        enters_state(
            &mut rx_staged,
            Duration::from_millis(CONNECTING_WAIT_MS),
            |s| matches!(s, ConnectionState::Connecting | ConnectionState::Ready),
        )
        .await?;
        enters_state(
            &mut rx_staged,
            Duration::from_millis(CONNECTING_READY_TIMEOUT_MS),
            |s| s.is_ready(),
        )
        .await
    });

    tokio::select! {
        result = &mut direct => match result {
            Ok(_) => Ok(()),
            Err(_) => staged.as_mut().await.map(|_| ()),
        },
        result = &mut staged => match result {
            Ok(_) => Ok(()),
            Err(_) => direct.as_mut().await.map(|_| ()),
        },
    }
}

/// Supervise a session's connection for its whole lifetime.
///
/// An unexpected disconnect gets one reconnection window: if the transport
/// re-enters the handshake (or comes straight back ready) within
/// [`RECONNECT_WINDOW_MS`], the session survives. Otherwise the session is
/// torn down and the text channel notified. Manual disconnects and
/// destruction end supervision quietly.
pub(crate) fn spawn_disconnect_watcher(
    engine: PlaybackEngine,
    guild_id: GuildId,
    mut rx: watch::Receiver<ConnectionState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            let state = *rx.borrow();
            match state {
                ConnectionState::Destroyed
                | ConnectionState::Disconnected(DisconnectReason::Manual) => return,
                ConnectionState::Disconnected(reason) => {
                    warn!(
                        "[{}] Voice connection lost ({:?}); waiting for recovery",
                        guild_id, reason
                    );
                    let recovered = enters_state(
                        &mut rx,
                        Duration::from_millis(RECONNECT_WINDOW_MS),
                        |s| s.is_reconnecting() || s.is_ready(),
                    )
                    .await;

                    match recovered {
                        Ok(state) => {
                            info!("[{}] Voice connection recovering ({:?})", guild_id, state);
                        }
                        Err(e) => {
                            error!(
                                "[{}] Voice connection could not be restored: {}",
                                guild_id, e
                            );
                            // Detach our own handle first so the teardown
                            // below cannot abort us mid-await.
                            if let Some(shared) = engine.session(&guild_id) {
                                shared.lock().await.watcher_task.take();
                            }
                            engine
                                .destroy_session(
                                    &guild_id,
                                    Some(
                                        "Voice connection lost and could not be restored. \
                                         Use the play command again to reconnect."
                                            .into(),
                                    ),
                                )
                                .await;
                            return;
                        }
                    }
                }
                _ => {}
            }
        }
    })
}
