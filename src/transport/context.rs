use crate::common::types::{ChannelId, GuildId};

/// Voice channel context resolved by the front-end for an enqueue call.
/// Permission flags arrive pre-resolved; the engine only checks them.
#[derive(Debug, Clone)]
pub struct VoiceChannelInfo {
    pub id: ChannelId,
    pub name: String,
    /// Platform user limit for the channel; `None` means unlimited.
    pub user_limit: Option<u32>,
    /// Members currently in the channel, bots included.
    pub occupants: u32,
    pub bot_can_connect: bool,
    pub bot_can_speak: bool,
}

impl VoiceChannelInfo {
    pub fn is_full(&self) -> bool {
        match self.user_limit {
            Some(limit) => self.occupants >= limit,
            None => false,
        }
    }
}

/// The member issuing a command.
#[derive(Debug, Clone)]
pub struct Member {
    pub display_name: String,
    pub voice_channel: Option<VoiceChannelInfo>,
}

/// A voice-state transition relayed by the front-end.
#[derive(Debug, Clone)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    pub member_name: String,
    pub is_bot: bool,
    pub old_channel: Option<ChannelId>,
    pub new_channel: Option<ChannelId>,
}

impl VoiceStateUpdate {
    /// The member left a channel without joining another.
    pub fn is_leave(&self) -> bool {
        self.old_channel.is_some() && self.new_channel.is_none()
    }

    /// The member joined a channel from nowhere.
    pub fn is_join(&self) -> bool {
        self.old_channel.is_none() && self.new_channel.is_some()
    }
}

/// Occupancy queries against the host platform's voice state cache.
pub trait VoiceRoster: Send + Sync {
    /// Number of non-bot members currently in the channel.
    fn human_count(&self, channel_id: &ChannelId) -> usize;

    /// The channel the bot currently occupies in the guild, if any.
    fn bot_channel(&self, guild_id: &GuildId) -> Option<ChannelId>;
}
