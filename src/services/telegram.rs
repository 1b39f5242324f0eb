use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
use teloxide::dptree;
use teloxide::payloads::SendMessageSetters;
use teloxide::requests::{Requester, ResponseResult};
use teloxide::types::{
    BotCommand, CallbackQuery, ChatAction, ChatId as TgChatId, InlineKeyboardButton, InlineKeyboardMarkup,
    Message, MessageId, ParseMode, Update as TgUpdate,
};
use teloxide::{ApiError, Bot, RequestError};

use crate::config::Settings;
use crate::error::SendError;
use crate::features::{self, BotDeps};
use crate::services::completion::CompletionService;
use crate::session::{ChatId, Controls, Dispatched, Executor, MessageRef, Sender, Update, UpdateKind};
use crate::utils::format::{preview, split_message, TELEGRAM_MSG_LIMIT};

fn tg_log<T, E: std::fmt::Display>(name: &str, result: &Result<T, E>) {
    match result {
        Ok(_) => tracing::debug!(call = name, "telegram ✓"),
        Err(e) => tracing::warn!(call = name, "telegram ✗ {e}"),
    }
}

/// Wrap a Telegram API call to log its result
macro_rules! tg {
    ($name:expr, $fut:expr) => {{
        let r = $fut;
        tg_log($name, &r);
        r
    }};
}

/// Compute a short hash key from the bot token (first 16 chars of SHA-256 hex)
pub fn token_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8]) // 16 hex chars
}

fn map_err(e: RequestError) -> SendError {
    match e {
        RequestError::Api(ApiError::MessageToEditNotFound | ApiError::MessageToDeleteNotFound) => {
            SendError::NotFound
        }
        other => SendError::Transport(other.to_string()),
    }
}

fn keyboard(controls: &Controls) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(controls.rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.text.clone(), b.data.clone()))
            .collect::<Vec<_>>()
    }))
}

/// Outbound side of the engine, backed by the Bot API
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Sender for TelegramSender {
    /// Long text goes out in several messages; controls ride on the last one,
    /// whose reference is returned.
    async fn send_text(&self, chat_id: ChatId, text: &str, controls: Option<Controls>) -> Result<MessageRef, SendError> {
        let mut chunks = split_message(text, TELEGRAM_MSG_LIMIT);
        if chunks.is_empty() {
            chunks.push("(empty)".to_string());
        }
        let last = chunks.len() - 1;
        let mut sent = MessageRef::new(chat_id, 0);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut request = self.bot.send_message(TgChatId(chat_id), chunk);
            if i == last {
                if let Some(controls) = controls.as_ref().filter(|c| !c.is_empty()) {
                    request = request.reply_markup(keyboard(controls));
                }
            }
            let msg = tg!("send_message", request.await).map_err(map_err)?;
            sent = MessageRef::new(msg.chat.id.0, msg.id.0);
        }
        Ok(sent)
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<(), SendError> {
        tg!(
            "send_chat_action",
            self.bot.send_chat_action(TgChatId(chat_id), ChatAction::Typing).await
        )
        .map(|_| ())
        .map_err(map_err)
    }

    async fn strip_controls(&self, message: MessageRef) -> Result<(), SendError> {
        let result = tg!(
            "edit_message_reply_markup",
            self.bot
                .edit_message_reply_markup(TgChatId(message.chat_id), MessageId(message.message_id))
                .await
        );
        match result {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError> {
        tg!(
            "delete_message",
            self.bot
                .delete_message(TgChatId(message.chat_id), MessageId(message.message_id))
                .await
        )
        .map(|_| ())
        .map_err(map_err)
    }
}

/// Strip @botname suffix from commands (e.g. "/content@mybot rust" → "/content rust")
fn normalize_command(raw_text: &str) -> String {
    if !raw_text.starts_with('/') {
        return raw_text.to_string();
    }
    let (cmd_part, args_part) = match raw_text.find(char::is_whitespace) {
        Some(pos) => raw_text.split_at(pos),
        None => (raw_text, ""),
    };
    match cmd_part.find('@') {
        Some(at_pos) => format!("{}{}", &cmd_part[..at_pos], args_part),
        None => raw_text.to_string(),
    }
}

fn update_from_message(msg: &Message) -> Option<Update> {
    let user_id = msg.from.as_ref()?.id.0;
    let chat_id = msg.chat.id.0;
    let text = msg.text()?;
    Some(if text.starts_with('/') {
        Update::command(user_id, chat_id, normalize_command(text))
    } else {
        Update::text(user_id, chat_id, text)
    })
}

fn update_from_callback(q: &CallbackQuery) -> Option<Update> {
    let data = q.data.as_deref()?;
    let origin = q.message.as_ref()?;
    let chat_id = origin.chat().id.0;
    Some(
        Update::callback(q.from.id.0, chat_id, data)
            .with_origin(MessageRef::new(chat_id, origin.id().0)),
    )
}

const HELP: &str = "\
<b>Club Bot</b>
Ask the club's AI assistant, one step at a time.

<code>/content [query]</code> — Search club content
<code>/tools</code> — Find a tool by category
<code>/intro</code> — Write your member intro

<code>/cancel</code> — Cancel the current operation
<code>/help</code> — Show this help";

/// Events no conversation claimed from an idle user
async fn handle_idle(bot: &Bot, executor: &Executor<BotDeps>, update: &Update) -> ResponseResult<()> {
    let chat_id = TgChatId(update.chat_id);
    match update.kind {
        UpdateKind::Command => match update.command_name() {
            Some("help") | Some("start") => {
                tg!(
                    "send_message",
                    bot.send_message(chat_id, HELP).parse_mode(ParseMode::Html).await
                )?;
            }
            Some("cancel") => {
                tg!("send_message", bot.send_message(chat_id, "Nothing to cancel.").await)?;
            }
            _ => {}
        },
        // A button from a conversation that is already over
        UpdateKind::Callback => {
            if let Some(origin) = update.origin {
                let _ = executor.echo().strip_stale(origin).await;
            }
        }
        UpdateKind::Text => {}
    }
    Ok(())
}

async fn handle_update(bot: &Bot, executor: &Executor<BotDeps>, update: Update) -> ResponseResult<()> {
    tracing::debug!(
        user_id = update.user_id,
        chat_id = update.chat_id,
        kind = ?update.kind,
        payload = %preview(&update.payload, 60),
        "update received"
    );
    let outcome = executor.dispatch(update.clone()).await;
    if outcome == Dispatched::Ignored {
        handle_idle(bot, executor, &update).await?;
    }
    Ok(())
}

async fn on_message(bot: Bot, msg: Message, executor: Arc<Executor<BotDeps>>) -> ResponseResult<()> {
    let Some(update) = update_from_message(&msg) else {
        return Ok(());
    };
    handle_update(&bot, &executor, update).await
}

async fn on_callback(bot: Bot, q: CallbackQuery, executor: Arc<Executor<BotDeps>>) -> ResponseResult<()> {
    // Always answer, or the client keeps the button spinning
    let _ = tg!("answer_callback_query", bot.answer_callback_query(q.id.clone()).await);
    let Some(update) = update_from_callback(&q) else {
        return Ok(());
    };
    handle_update(&bot, &executor, update).await
}

/// Connect to Telegram and serve updates until ctrl-c
/// Sessions are per user, so one user's updates are processed in order
/// across every chat they write from
fn user_key(update: &TgUpdate) -> Option<teloxide::types::UserId> {
    update.from().map(|user| user.id)
}

pub async fn run_bot(token: &str, settings: &Settings, completion: Arc<dyn CompletionService>) {
    let bot = Bot::new(token);

    // Register bot commands for autocomplete
    let commands: Vec<BotCommand> = features::commands()
        .into_iter()
        .map(|(name, description)| BotCommand::new(name, description))
        .collect();
    let _ = tg!("set_my_commands", bot.set_my_commands(commands).await);

    let sender: Arc<dyn Sender> = Arc::new(TelegramSender::new(bot.clone()));
    let executor = Arc::new(features::build_executor(sender, settings, BotDeps { completion }));

    tracing::info!(bot = %token_hash(token), "bot connected, listening for messages");

    let handler = dptree::entry()
        .branch(TgUpdate::filter_message().endpoint(on_message))
        .branch(TgUpdate::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![executor])
        .distribution_function(user_key)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("bot stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Button;

    #[test]
    fn test_token_hash_is_stable_and_short() {
        let h = token_hash("123:abc");
        assert_eq!(h.len(), 16);
        assert_eq!(h, token_hash("123:abc"));
        assert_ne!(h, token_hash("123:abd"));
    }

    #[test]
    fn test_normalize_command_strips_bot_name() {
        assert_eq!(normalize_command("/content@clubbot rust"), "/content rust");
        assert_eq!(normalize_command("/cancel@clubbot"), "/cancel");
        assert_eq!(normalize_command("/tools"), "/tools");
        assert_eq!(normalize_command("/intro email me@example.com"), "/intro email me@example.com");
        assert_eq!(normalize_command("hello @clubbot"), "hello @clubbot");
    }

    #[test]
    fn test_keyboard_mirrors_controls() {
        let controls = Controls::new()
            .row(vec![Button::new("A", "a"), Button::new("B", "b")])
            .row(vec![Button::new("Cancel", "cancel")]);
        let markup = keyboard(&controls);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[1][0].text, "Cancel");
    }

    fn message_update(update_id: i32, chat: serde_json::Value, text: &str) -> TgUpdate {
        serde_json::from_str(&serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id,
                "date": 1_700_000_000,
                "chat": chat,
                "from": {"id": 42, "is_bot": false, "first_name": "Ada"},
                "text": text
            }
        }).to_string())
        .unwrap()
    }

    #[test]
    fn test_updates_are_keyed_by_user_not_chat() {
        let group = message_update(1, serde_json::json!({"id": -100, "type": "group", "title": "Club"}), "/content");
        let private = message_update(
            2,
            serde_json::json!({"id": 42, "type": "private", "first_name": "Ada"}),
            "/cancel",
        );
        let callback: TgUpdate = serde_json::from_str(&serde_json::json!({
            "update_id": 3,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 42, "is_bot": false, "first_name": "Ada"},
                "chat_instance": "ci",
                "data": "cancel"
            }
        }).to_string())
        .unwrap();

        assert_ne!(group.chat().map(|c| c.id), private.chat().map(|c| c.id));
        assert_eq!(user_key(&group), Some(teloxide::types::UserId(42)));
        assert_eq!(user_key(&group), user_key(&private));
        assert_eq!(user_key(&callback), user_key(&private));
    }

    #[test]
    fn test_missing_message_maps_to_not_found() {
        assert!(matches!(
            map_err(RequestError::Api(ApiError::MessageToDeleteNotFound)),
            SendError::NotFound
        ));
        assert!(matches!(
            map_err(RequestError::Api(ApiError::BotBlocked)),
            SendError::Transport(_)
        ));
    }
}
