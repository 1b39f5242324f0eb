//! `/intro`: collect a name and a short bio, confirm, then draft the
//! member's introduction post.

use super::{ask_ai, cancel_controls, with_cancel_exits, BotCx, BotDeps, CANCEL_DATA};
use crate::error::HandlerError;
use crate::session::{Button, Controls, Conversation, HandlerResult, Matcher, Transition, Update};

pub const FLOW: &str = "intro";
pub const COMMAND: &str = "intro";

const ASK_NAME: &str = "ask_name";
const ASK_ABOUT: &str = "ask_about";
const CONFIRM: &str = "confirm";

const CONFIRM_YES: &str = "intro:yes";
const CONFIRM_NO: &str = "intro:no";

pub const MIN_ABOUT_CHARS: usize = 10;
const MAX_NAME_CHARS: usize = 64;

const NAME_PROMPT: &str = "👋 Let's write your intro. What's your name?";

pub fn conversation() -> Conversation<BotDeps> {
    with_cancel_exits(
        Conversation::new(FLOW)
            .entry(Matcher::Command(COMMAND), start)
            .on(ASK_NAME, Matcher::AnyText, name)
            .on(ASK_ABOUT, Matcher::AnyText, about)
            .on(CONFIRM, Matcher::Callback(CONFIRM_YES), confirm)
            .on(CONFIRM, Matcher::Callback(CONFIRM_NO), start_over),
    )
}

async fn start(cx: BotCx, _update: Update) -> HandlerResult {
    cx.prompt(NAME_PROMPT, Some(cancel_controls())).await?;
    Ok(Transition::Advance(ASK_NAME))
}

async fn name(cx: BotCx, update: Update) -> HandlerResult {
    let name = validate_name(&update.payload)?;
    cx.prompt(
        &format!("Nice to meet you, {name}! Tell us a bit about yourself (at least {MIN_ABOUT_CHARS} characters)."),
        Some(cancel_controls()),
    )
    .await?;
    cx.set("name", name);
    Ok(Transition::Advance(ASK_ABOUT))
}

async fn about(cx: BotCx, update: Update) -> HandlerResult {
    let about = validate_about(&update.payload)?;
    let name: String = cx.require("name")?;
    let controls = Controls::new().row(vec![
        Button::new("✅ Generate", CONFIRM_YES),
        Button::new("↩ Start over", CONFIRM_NO),
        Button::new("✖ Cancel", CANCEL_DATA),
    ]);
    cx.prompt(
        &format!("Ready to draft an intro for {name}?\n\n{about}"),
        Some(controls),
    )
    .await?;
    cx.set("about", about);
    Ok(Transition::Advance(CONFIRM))
}

async fn confirm(cx: BotCx, _update: Update) -> HandlerResult {
    let name: String = cx.require("name")?;
    let about: String = cx.require("about")?;
    ask_ai(&cx, build_prompt(&name, &about)).await
}

async fn start_over(cx: BotCx, _update: Update) -> HandlerResult {
    if cx.guard().is_running(cx.user()) {
        cx.send(&cx.texts().busy).await?;
        return Ok(Transition::Stay);
    }
    cx.store().remove(cx.user(), &cx.key("name"));
    cx.store().remove(cx.user(), &cx.key("about"));
    cx.prompt(NAME_PROMPT, Some(cancel_controls())).await?;
    Ok(Transition::Advance(ASK_NAME))
}

fn validate_name(text: &str) -> Result<String, HandlerError> {
    let name = text.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_CHARS {
        return Err(HandlerError::validation(format!(
            "Please send a name between 1 and {MAX_NAME_CHARS} characters."
        )));
    }
    Ok(name.to_string())
}

fn validate_about(text: &str) -> Result<String, HandlerError> {
    let about = text.trim();
    if about.chars().count() < MIN_ABOUT_CHARS {
        return Err(HandlerError::validation(format!(
            "That's a bit short. Please write at least {MIN_ABOUT_CHARS} characters about yourself."
        )));
    }
    Ok(about.to_string())
}

fn build_prompt(name: &str, about: &str) -> String {
    format!(
        "Write a warm, first-person introduction post for a new community member.\n\
         Keep it under 120 words and end with a question that invites replies.\n\n\
         Name: {name}\nAbout: {about}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Ada ").unwrap(), "Ada");
        assert!(validate_name("").is_err());
        assert!(validate_name(&"n".repeat(MAX_NAME_CHARS + 1)).is_err());
    }

    #[test]
    fn test_validate_about_minimum() {
        assert!(matches!(validate_about("too short"), Err(HandlerError::Validation(_))));
        assert!(validate_about("I build compilers").is_ok());
        // Counted in characters, not bytes
        assert!(validate_about("한국어 소개").is_err());
        assert!(validate_about("한국어로 저를 소개합니다").is_ok());
    }

    #[test]
    fn test_prompt_contains_fields() {
        let prompt = build_prompt("Ada", "I like engines");
        assert!(prompt.contains("Name: Ada"));
        assert!(prompt.contains("About: I like engines"));
    }
}
