//! `/content`: ask for a query, answer it from the club's knowledge.

use super::{ask_ai, cancel_controls, with_cancel_exits, BotCx, BotDeps};
use crate::error::HandlerError;
use crate::session::{Conversation, HandlerResult, Matcher, Transition, Update};

pub const FLOW: &str = "content";
pub const COMMAND: &str = "content";

const AWAIT_QUERY: &str = "await_query";

const MAX_QUERY_CHARS: usize = 500;

pub fn conversation() -> Conversation<BotDeps> {
    with_cancel_exits(
        Conversation::new(FLOW)
            .entry(Matcher::Command(COMMAND), start)
            .on(AWAIT_QUERY, Matcher::AnyText, query),
    )
}

/// `/content <query>` searches straight away; a bare `/content` asks first
async fn start(cx: BotCx, update: Update) -> HandlerResult {
    let args = update.command_args();
    if !args.is_empty() {
        let query = validate_query(args)?;
        ask_ai(&cx, build_prompt(&query)).await?;
        return Ok(Transition::Advance(AWAIT_QUERY));
    }
    cx.prompt(
        "🔎 What are you looking for? Send a topic or question.",
        Some(cancel_controls()),
    )
    .await?;
    Ok(Transition::Advance(AWAIT_QUERY))
}

async fn query(cx: BotCx, update: Update) -> HandlerResult {
    let query = validate_query(&update.payload)?;
    ask_ai(&cx, build_prompt(&query)).await
}

fn validate_query(text: &str) -> Result<String, HandlerError> {
    let query = text.trim();
    if query.is_empty() {
        return Err(HandlerError::validation("Please send a non-empty query."));
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(HandlerError::validation(format!(
            "That query is too long. Please keep it under {MAX_QUERY_CHARS} characters."
        )));
    }
    Ok(query.to_string())
}

fn build_prompt(query: &str) -> String {
    format!(
        "A club member is searching the community's content library.\n\
         Suggest the most relevant posts, guides or discussions for this query, \
         with one line on why each is useful.\n\nQuery: {query}"
    )
}
