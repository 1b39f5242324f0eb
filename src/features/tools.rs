//! `/tools`: pick a category, describe the need, get tool suggestions.

use super::{ask_ai, cancel_controls, with_cancel_exits, BotCx, BotDeps, CANCEL_DATA};
use crate::error::HandlerError;
use crate::session::{Button, Controls, Conversation, HandlerResult, Matcher, Transition, Update};

pub const FLOW: &str = "tools";
pub const COMMAND: &str = "tools";

const PICK_CATEGORY: &str = "pick_category";
const AWAIT_QUERY: &str = "await_query";

pub const CATEGORY_PREFIX: &str = "tools:cat:";

/// (callback id, label)
pub const CATEGORIES: &[(&str, &str)] = &[
    ("dev", "💻 Development"),
    ("design", "🎨 Design"),
    ("marketing", "📣 Marketing"),
    ("productivity", "⏱ Productivity"),
];

pub fn conversation() -> Conversation<BotDeps> {
    with_cancel_exits(
        Conversation::new(FLOW)
            .entry(Matcher::Command(COMMAND), start)
            .on(PICK_CATEGORY, Matcher::CallbackPrefix(CATEGORY_PREFIX), pick)
            .on(AWAIT_QUERY, Matcher::AnyText, query),
    )
}

fn category_controls() -> Controls {
    let mut controls = Controls::new();
    for pair in CATEGORIES.chunks(2) {
        let row = pair
            .iter()
            .map(|(id, label)| Button::new(*label, format!("{CATEGORY_PREFIX}{id}")))
            .collect();
        controls = controls.row(row);
    }
    controls.row(vec![Button::new("✖ Cancel", CANCEL_DATA)])
}

fn category_label(id: &str) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|(cat, _)| *cat == id)
        .map(|(_, label)| *label)
}

async fn start(cx: BotCx, _update: Update) -> HandlerResult {
    cx.prompt("🧰 Which kind of tool do you need?", Some(category_controls()))
        .await?;
    Ok(Transition::Advance(PICK_CATEGORY))
}

async fn pick(cx: BotCx, update: Update) -> HandlerResult {
    let id = update
        .payload
        .strip_prefix(CATEGORY_PREFIX)
        .unwrap_or_default();
    let Some(label) = category_label(id) else {
        return Err(HandlerError::validation("Unknown category, please pick one of the buttons."));
    };
    cx.set("category", id.to_string());
    cx.prompt(
        &format!("{label}: describe what you want to get done."),
        Some(cancel_controls()),
    )
    .await?;
    Ok(Transition::Advance(AWAIT_QUERY))
}

async fn query(cx: BotCx, update: Update) -> HandlerResult {
    let need = update.payload.trim();
    if need.is_empty() {
        return Err(HandlerError::validation("Please describe what you need."));
    }
    let category: String = cx.require("category")?;
    ask_ai(&cx, build_prompt(&category, need)).await
}

fn build_prompt(category: &str, need: &str) -> String {
    format!(
        "Recommend up to five tools in the \"{category}\" category for this need. \
         For each, give the name, a one-line description and whether it has a free tier.\n\n\
         Need: {need}"
    )
}
