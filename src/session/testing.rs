use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::sender::Sender;
use super::update::{ChatId, Controls, MessageRef};
use crate::error::SendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        chat_id: ChatId,
        text: String,
        controls: Option<Controls>,
    },
    Typing(ChatId),
    Strip(MessageRef),
    Delete(MessageRef),
}

/// Sender that records every call and hands out increasing message ids
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI32,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn typing_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| matches!(s, Sent::Typing(_)))
            .count()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        controls: Option<Controls>,
    ) -> Result<MessageRef, SendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.sent.lock().push(Sent::Text {
            chat_id,
            text: text.to_string(),
            controls,
        });
        Ok(MessageRef::new(chat_id, id))
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<(), SendError> {
        self.sent.lock().push(Sent::Typing(chat_id));
        Ok(())
    }

    async fn strip_controls(&self, message: MessageRef) -> Result<(), SendError> {
        self.sent.lock().push(Sent::Strip(message));
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError> {
        self.sent.lock().push(Sent::Delete(message));
        Ok(())
    }
}
