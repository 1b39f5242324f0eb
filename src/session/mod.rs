//! Per-user conversational session engine.
//!
//! - [`store`]: the per-user state label and key/value bag (the only shared mutable state)
//! - [`echo`]: last-interactive-message tracking, so stale buttons get stripped
//! - [`guard`]: single-flight, cancellable, heartbeating wrapper around slow calls
//! - [`fsm`]: declarative conversations and the executor that drives them

pub mod echo;
pub mod fsm;
pub mod guard;
pub mod sender;
pub mod store;
pub mod update;

#[cfg(test)]
pub(crate) mod testing;

pub use echo::{EchoMode, EchoTracker};
pub use fsm::{
    Conversation, Cx, Dispatched, Executor, ExecutorBuilder, Handler, HandlerResult, Matcher, Reentry, Texts,
    Transition, Unmatched,
};
pub use guard::{Flight, FlightOutcome, TaskGuard, DEFAULT_HEARTBEAT};
pub use sender::Sender;
pub use store::{SessionStore, StateLabel};
pub use update::{Button, ChatId, Controls, MessageRef, Update, UpdateKind, UserId};
