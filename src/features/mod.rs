//! Multi-step commands built on the session engine.
//!
//! Every conversation shares the same exits (`/cancel` and the Cancel
//! button) and the same guarded AI step in [`ask_ai`].

pub mod content;
pub mod intro;
pub mod tools;

use std::sync::Arc;

use crate::config::Settings;
use crate::error::CompletionError;
use crate::services::completion::CompletionService;
use crate::session::{
    Controls, Conversation, Cx, Executor, FlightOutcome, HandlerResult, Matcher, Sender, Transition, Unmatched,
    Update,
};
use crate::utils::format::{normalize_empty_lines, split_message, TELEGRAM_MSG_LIMIT};

/// Collaborators available to feature handlers
pub struct BotDeps {
    pub completion: Arc<dyn CompletionService>,
}

pub type BotCx = Cx<BotDeps>;

pub const CANCEL_DATA: &str = "cancel";

const TIMED_OUT_TEXT: &str = "Sorry, that took too long. Please try again.";

/// All conversations the bot offers
pub fn conversations() -> Vec<Conversation<BotDeps>> {
    vec![content::conversation(), tools::conversation(), intro::conversation()]
}

/// Wire every conversation into an executor configured from settings
pub fn build_executor(sender: Arc<dyn Sender>, settings: &Settings, deps: BotDeps) -> Executor<BotDeps> {
    let unmatched = if settings.reply_on_unmatched {
        Unmatched::Reply
    } else {
        Unmatched::Ignore
    };
    let builder = Executor::builder(sender, deps)
        .heartbeat(settings.heartbeat())
        .deadline(settings.task_deadline())
        .echo_mode(settings.stale_messages.into())
        .unmatched(unmatched);
    conversations()
        .into_iter()
        .fold(builder, |b, flow| b.conversation(flow))
        .build()
}

/// (command, description) pairs for the bot menu
pub fn commands() -> Vec<(&'static str, &'static str)> {
    vec![
        (content::COMMAND, "Search club content"),
        (tools::COMMAND, "Find a tool by category"),
        (intro::COMMAND, "Write your member intro"),
        ("cancel", "Cancel the current operation"),
        ("help", "Show help"),
    ]
}

pub(crate) fn with_cancel_exits(flow: Conversation<BotDeps>) -> Conversation<BotDeps> {
    flow.exit(Matcher::Command("cancel"), cancel)
        .exit(Matcher::Callback(CANCEL_DATA), cancel)
}

pub(crate) fn cancel_controls() -> Controls {
    Controls::single("✖ Cancel", CANCEL_DATA)
}

/// Shared exit: the executor has already signalled any flight and will
/// clear the session once this returns
async fn cancel(cx: BotCx, _update: Update) -> HandlerResult {
    cx.send(&cx.texts().cancelled).await?;
    Ok(Transition::End)
}

/// Run `prompt` through the completion service as the user's single flight.
///
/// Returns immediately; the answer is delivered from a background task so
/// the user can still cancel. If a call is already running, the user is told
/// to wait and nothing starts.
pub(crate) async fn ask_ai(cx: &BotCx, prompt: String) -> HandlerResult {
    let Some(flight) = cx.try_start() else {
        cx.send(&cx.texts().busy).await?;
        return Ok(Transition::Stay);
    };
    cx.typing().await?;

    let completion = cx.deps().completion.clone();
    let token = flight.token();
    let call = async move { completion.complete(token, &prompt).await };

    let beat_cx = cx.clone();
    let heartbeat = move || {
        let cx = beat_cx.clone();
        async move {
            let _ = cx.typing().await;
        }
    };

    let done_cx = cx.clone();
    flight.spawn(call, heartbeat, move |outcome| deliver(done_cx, outcome));
    Ok(Transition::Stay)
}

async fn deliver(cx: BotCx, outcome: FlightOutcome<Result<String, CompletionError>>) {
    let reply = match outcome {
        FlightOutcome::Completed(Ok(answer)) => {
            let answer = normalize_empty_lines(&answer);
            if answer.is_empty() {
                "(No response)".to_string()
            } else {
                answer
            }
        }
        // Whoever cancelled has already spoken to the user
        FlightOutcome::Cancelled | FlightOutcome::Completed(Err(CompletionError::Cancelled)) => return,
        FlightOutcome::TimedOut => TIMED_OUT_TEXT.to_string(),
        FlightOutcome::Completed(Err(e)) => {
            tracing::warn!(user_id = cx.user(), flow = cx.flow(), "completion failed: {e}");
            cx.texts().apology.clone()
        }
    };

    // End the conversation before the first await so a racing exit finds
    // the user idle.
    let prompt = cx.echo().previous(cx.user());
    if !cx.end() {
        tracing::debug!(user_id = cx.user(), flow = cx.flow(), "conversation moved on, dropping answer");
        return;
    }

    if let Some(prompt) = prompt {
        cx.echo().strip_stale(prompt).await;
    }
    for chunk in split_message(&reply, TELEGRAM_MSG_LIMIT) {
        if let Err(e) = cx.sender().send_text(cx.chat(), &chunk, None).await {
            tracing::warn!(user_id = cx.user(), "failed to deliver answer: {e}");
            break;
        }
    }
}
