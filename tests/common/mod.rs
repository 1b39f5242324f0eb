//! Shared fakes for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use clubbot::config::Settings;
use clubbot::error::{CompletionError, SendError};
use clubbot::features::{self, BotDeps};
use clubbot::services::completion::CompletionService;
use clubbot::session::{ChatId, Controls, Executor, MessageRef, Sender, UserId};

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

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI32,
    strip_delay: Duration,
}

impl RecordingSender {
    /// A sender whose `strip_controls` takes `delay` to come back
    pub fn with_strip_delay(delay: Duration) -> Self {
        Self {
            strip_delay: delay,
            ..Self::default()
        }
    }

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

    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
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
    async fn send_text(&self, chat_id: ChatId, text: &str, controls: Option<Controls>) -> Result<MessageRef, SendError> {
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
        if !self.strip_delay.is_zero() {
            tokio::time::sleep(self.strip_delay).await;
        }
        self.sent.lock().push(Sent::Strip(message));
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError> {
        self.sent.lock().push(Sent::Delete(message));
        Ok(())
    }
}

/// Completion that answers after a fixed delay unless cancelled first
pub struct ScriptedCompletion {
    delay: Duration,
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn answering(delay: Duration, answer: &str) -> Self {
        Self {
            delay,
            reply: Ok(answer.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(delay: Duration, error: &str) -> Self {
        Self {
            delay,
            reply: Err(error.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, cancel: CancellationToken, prompt: &str) -> Result<String, CompletionError> {
        self.prompts.lock().push(prompt.to_string());
        tokio::select! {
            _ = cancel.cancelled() => Err(CompletionError::Cancelled),
            _ = tokio::time::sleep(self.delay) => self.reply.clone().map_err(CompletionError::Request),
        }
    }
}

pub fn executor_with(
    sender: Arc<RecordingSender>,
    completion: Arc<ScriptedCompletion>,
    settings: &Settings,
) -> Executor<BotDeps> {
    features::build_executor(sender, settings, BotDeps { completion })
}

pub fn executor(sender: Arc<RecordingSender>, completion: Arc<ScriptedCompletion>) -> Executor<BotDeps> {
    executor_with(sender, completion, &Settings::default())
}

/// Let background flights run (virtual time) until the user is no longer busy
pub async fn settle(executor: &Executor<BotDeps>, user: UserId) {
    for _ in 0..600 {
        if !executor.guard().is_running(user) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("flight for user {user} never finished");
}
