use async_trait::async_trait;

use crate::common::types::AnyResult;
use crate::messaging::MessageContent;

/// Outbound handle to the text channel a session reports into.
///
/// The engine posts now-playing, error, and departure notices through this;
/// rendering (embeds, markdown) is the front-end's business.
#[async_trait]
pub trait TextChannel: Send + Sync {
    async fn send(&self, content: MessageContent) -> AnyResult<()>;
}
