use std::sync::Arc;

use super::sender::Sender;
use super::store::SessionStore;
use super::update::{MessageRef, UserId};
use crate::error::SendError;

/// Session key holding the last interactive message sent to a user
pub const PREV_MESSAGE_KEY: &str = "ui_prev_message_ref";

/// What to do with a stale interactive message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoMode {
    /// Keep the text, drop the buttons
    #[default]
    Strip,
    Delete,
}

/// Remembers the bot's last interactive message per user so its controls
/// can be removed before the next prompt goes out.
#[derive(Clone)]
pub struct EchoTracker {
    store: Arc<SessionStore>,
    sender: Arc<dyn Sender>,
    mode: EchoMode,
}

impl EchoTracker {
    pub fn new(store: Arc<SessionStore>, sender: Arc<dyn Sender>, mode: EchoMode) -> Self {
        Self { store, sender, mode }
    }

    pub fn remember(&self, user: UserId, message: MessageRef) {
        self.store.set(user, PREV_MESSAGE_KEY, message);
    }

    pub fn previous(&self, user: UserId) -> Option<MessageRef> {
        self.store.get::<MessageRef>(user, PREV_MESSAGE_KEY)
    }

    /// Tidy up the remembered message, if any. Returns whether the sender
    /// was asked to do something.
    ///
    /// Failures are logged and swallowed: the message may already be gone.
    pub async fn strip_previous(&self, user: UserId) -> bool {
        let Some(message) = self.previous(user) else {
            return false;
        };
        self.store.remove(user, PREV_MESSAGE_KEY);
        if message.is_zero() {
            return false;
        }
        if let Err(e) = self.tidy(message).await {
            tracing::warn!(
                user_id = user,
                chat_id = message.chat_id,
                message_id = message.message_id,
                "failed to tidy previous prompt: {e}"
            );
        }
        true
    }

    /// Tidy a message that is no longer tracked, e.g. one whose button was
    /// pressed after its conversation ended
    pub async fn strip_stale(&self, message: MessageRef) -> bool {
        if message.is_zero() {
            return false;
        }
        if let Err(e) = self.tidy(message).await {
            tracing::debug!(
                chat_id = message.chat_id,
                message_id = message.message_id,
                "failed to tidy stale message: {e}"
            );
        }
        true
    }

    async fn tidy(&self, message: MessageRef) -> Result<(), SendError> {
        match self.mode {
            EchoMode::Strip => self.sender.strip_controls(message).await,
            EchoMode::Delete => self.sender.delete_message(message).await,
        }
    }
}
