use async_trait::async_trait;

use super::update::{ChatId, Controls, MessageRef};
use crate::error::SendError;

/// Outbound primitives provided by the transport.
///
/// The engine never talks to Telegram directly; everything it sends goes
/// through this trait so tests can substitute a recording implementation.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Send a text message, optionally with inline controls
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        controls: Option<Controls>,
    ) -> Result<MessageRef, SendError>;

    /// Show the "typing..." indicator
    async fn send_typing(&self, chat_id: ChatId) -> Result<(), SendError>;

    /// Remove inline controls from a previously sent message
    async fn strip_controls(&self, message: MessageRef) -> Result<(), SendError>;

    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError>;
}
