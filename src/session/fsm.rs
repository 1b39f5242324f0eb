use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::echo::{EchoMode, EchoTracker};
use super::guard::{Flight, TaskGuard, DEFAULT_HEARTBEAT};
use super::sender::Sender;
use super::store::{SessionStore, StateLabel};
use super::update::{ChatId, Controls, MessageRef, Update, UpdateKind, UserId};
use crate::error::HandlerError;

/// Node a conversation sits in while its entry handler runs
pub const ENTRY_NODE: &str = "entry";

/// What a handler asks the executor to do with the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Advance(&'static str),
    End,
}

pub type HandlerResult = Result<Transition, HandlerError>;

/// Event predicate
#[derive(Clone, Copy)]
pub enum Matcher {
    /// `/name`, with or without arguments
    Command(&'static str),
    /// Plain text starting with the prefix
    TextPrefix(&'static str),
    /// Callback data equal to the value
    Callback(&'static str),
    CallbackPrefix(&'static str),
    /// Any plain text message
    AnyText,
    Custom(fn(&Update) -> bool),
}

impl Matcher {
    pub fn matches(&self, update: &Update) -> bool {
        match *self {
            Matcher::Command(name) => update.command_name() == Some(name),
            Matcher::TextPrefix(prefix) => {
                update.kind == UpdateKind::Text && update.payload.starts_with(prefix)
            }
            Matcher::Callback(data) => update.kind == UpdateKind::Callback && update.payload == data,
            Matcher::CallbackPrefix(prefix) => {
                update.kind == UpdateKind::Callback && update.payload.starts_with(prefix)
            }
            Matcher::AnyText => update.kind == UpdateKind::Text,
            Matcher::Custom(f) => f(update),
        }
    }
}

/// A conversation step
#[async_trait]
pub trait Handler<D>: Send + Sync {
    async fn handle(&self, cx: Cx<D>, update: Update) -> HandlerResult;
}

#[async_trait]
impl<D, F, Fut> Handler<D> for F
where
    D: Send + Sync + 'static,
    F: Fn(Cx<D>, Update) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, cx: Cx<D>, update: Update) -> HandlerResult {
        (self)(cx, update).await
    }
}

struct Route<D> {
    matcher: Matcher,
    handler: Arc<dyn Handler<D>>,
}

impl<D> Route<D> {
    fn new(matcher: Matcher, handler: impl Handler<D> + 'static) -> Self {
        Self {
            matcher,
            handler: Arc::new(handler),
        }
    }
}

/// What happens when a conversation's own entry event arrives while it is open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reentry {
    /// Cancel any flight, wipe the session and start over
    Restart,
    /// Keep the conversation and reply with the message
    Reject(&'static str),
}

/// Declarative state table for one multi-step command
pub struct Conversation<D> {
    name: &'static str,
    entries: Vec<Route<D>>,
    exits: Vec<Route<D>>,
    states: HashMap<&'static str, Vec<Route<D>>>,
    reentry: Reentry,
}

impl<D: Send + Sync + 'static> Conversation<D> {
    /// `name` doubles as the namespace for the conversation's session keys
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
            exits: Vec::new(),
            states: HashMap::new(),
            reentry: Reentry::Restart,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn entry(mut self, matcher: Matcher, handler: impl Handler<D> + 'static) -> Self {
        self.entries.push(Route::new(matcher, handler));
        self
    }

    /// Register a handler for `node`; matchers are tried in registration order
    pub fn on(mut self, node: &'static str, matcher: Matcher, handler: impl Handler<D> + 'static) -> Self {
        self.states
            .entry(node)
            .or_default()
            .push(Route::new(matcher, handler));
        self
    }

    /// Global exit, honored in every node before node-specific matchers
    pub fn exit(mut self, matcher: Matcher, handler: impl Handler<D> + 'static) -> Self {
        self.exits.push(Route::new(matcher, handler));
        self
    }

    pub fn reentry(mut self, reentry: Reentry) -> Self {
        self.reentry = reentry;
        self
    }

    fn entry_for(&self, update: &Update) -> Option<&Route<D>> {
        self.entries.iter().find(|r| r.matcher.matches(update))
    }

    fn exit_for(&self, update: &Update) -> Option<&Route<D>> {
        self.exits.iter().find(|r| r.matcher.matches(update))
    }

    fn route_for(&self, node: &str, update: &Update) -> Option<&Route<D>> {
        self.states
            .get(node)?
            .iter()
            .find(|r| r.matcher.matches(update))
    }
}

/// User-facing strings the engine itself sends
#[derive(Debug, Clone)]
pub struct Texts {
    pub apology: String,
    pub cancelled: String,
    pub busy: String,
    pub unmatched: String,
}

impl Default for Texts {
    fn default() -> Self {
        Self {
            apology: "Sorry, something went wrong. Please start again.".to_string(),
            cancelled: "Operation cancelled.".to_string(),
            busy: "Still working on your previous request. Please wait or /cancel.".to_string(),
            unmatched: "I didn't understand that. Please finish this step or /cancel.".to_string(),
        }
    }
}

/// Policy for events that match nothing in the current node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unmatched {
    #[default]
    Ignore,
    Reply,
}

/// What `dispatch` did with an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Idle user, no entry matched; nothing was created
    Ignored,
    Opened(StateLabel),
    Advanced(StateLabel),
    Stayed,
    Ended,
    /// A global exit fired
    Exited,
    /// Open conversation, nothing matched
    Dropped,
    /// Handler failed; conversation ended with an apology
    Failed,
}

struct Shared<D> {
    store: Arc<SessionStore>,
    guard: TaskGuard,
    echo: EchoTracker,
    sender: Arc<dyn Sender>,
    texts: Texts,
    deps: D,
}

/// Handler context: one user, one conversation epoch
pub struct Cx<D> {
    shared: Arc<Shared<D>>,
    user: UserId,
    chat: ChatId,
    flow: &'static str,
    epoch: u64,
}

impl<D> Clone for Cx<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            user: self.user,
            chat: self.chat,
            flow: self.flow,
            epoch: self.epoch,
        }
    }
}

impl<D> Cx<D> {
    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn chat(&self) -> ChatId {
        self.chat
    }

    pub fn flow(&self) -> &'static str {
        self.flow
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn deps(&self) -> &D {
        &self.shared.deps
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.shared.store
    }

    pub fn guard(&self) -> &TaskGuard {
        &self.shared.guard
    }

    pub fn echo(&self) -> &EchoTracker {
        &self.shared.echo
    }

    pub fn sender(&self) -> &Arc<dyn Sender> {
        &self.shared.sender
    }

    pub fn texts(&self) -> &Texts {
        &self.shared.texts
    }

    /// Session key namespaced by this conversation
    pub fn key(&self, name: &str) -> String {
        format!("{}_{}", self.flow, name)
    }

    pub fn get<T>(&self, name: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.shared.store.get(self.user, &self.key(name))
    }

    /// Like `get`, but a missing key is state corruption
    pub fn require<T>(&self, name: &str) -> Result<T, HandlerError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let key = self.key(name);
        self.shared
            .store
            .get(self.user, &key)
            .ok_or_else(|| HandlerError::missing(key))
    }

    pub fn set<T>(&self, name: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.shared.store.set(self.user, self.key(name), value);
    }

    /// End this conversation from outside the executor (background tasks).
    /// A newer conversation is left alone.
    pub fn end(&self) -> bool {
        let ended = self.shared.store.clear_if_epoch(self.user, self.epoch);
        if ended {
            tracing::debug!(user_id = self.user, flow = self.flow, "conversation ended by background task");
        }
        ended
    }

    /// Claim the user's flight slot
    pub fn try_start(&self) -> Option<Flight> {
        self.shared.guard.try_start(self.user)
    }

    pub async fn send(&self, text: &str) -> Result<MessageRef, HandlerError> {
        Ok(self.shared.sender.send_text(self.chat, text, None).await?)
    }

    /// Send an interactive message, tidying the previous one first
    pub async fn prompt(&self, text: &str, controls: Option<Controls>) -> Result<MessageRef, HandlerError> {
        self.shared.echo.strip_previous(self.user).await;
        let sent = self.shared.sender.send_text(self.chat, text, controls).await?;
        self.shared.echo.remember(self.user, sent);
        Ok(sent)
    }

    pub async fn typing(&self) -> Result<(), HandlerError> {
        Ok(self.shared.sender.send_typing(self.chat).await?)
    }
}

/// Builder wiring the engine's components together
pub struct ExecutorBuilder<D> {
    sender: Arc<dyn Sender>,
    deps: D,
    store: Option<Arc<SessionStore>>,
    heartbeat: Duration,
    deadline: Option<Duration>,
    echo_mode: EchoMode,
    texts: Texts,
    unmatched: Unmatched,
    flows: Vec<Conversation<D>>,
}

impl<D: Send + Sync + 'static> ExecutorBuilder<D> {
    pub fn store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }

    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn echo_mode(mut self, mode: EchoMode) -> Self {
        self.echo_mode = mode;
        self
    }

    pub fn texts(mut self, texts: Texts) -> Self {
        self.texts = texts;
        self
    }

    pub fn unmatched(mut self, policy: Unmatched) -> Self {
        self.unmatched = policy;
        self
    }

    pub fn conversation(mut self, flow: Conversation<D>) -> Self {
        self.flows.push(flow);
        self
    }

    pub fn build(self) -> Executor<D> {
        let store = self.store.unwrap_or_default();
        let guard = TaskGuard::new(store.clone(), self.heartbeat).with_deadline(self.deadline);
        let echo = EchoTracker::new(store.clone(), self.sender.clone(), self.echo_mode);
        Executor {
            shared: Arc::new(Shared {
                store,
                guard,
                echo,
                sender: self.sender,
                texts: self.texts,
                deps: self.deps,
            }),
            flows: self.flows,
            unmatched: self.unmatched,
        }
    }
}

/// Maps (current state, incoming update) to a handler and applies the
/// transition it returns.
pub struct Executor<D> {
    shared: Arc<Shared<D>>,
    flows: Vec<Conversation<D>>,
    unmatched: Unmatched,
}

impl<D: Send + Sync + 'static> Executor<D> {
    pub fn builder(sender: Arc<dyn Sender>, deps: D) -> ExecutorBuilder<D> {
        ExecutorBuilder {
            sender,
            deps,
            store: None,
            heartbeat: DEFAULT_HEARTBEAT,
            deadline: None,
            echo_mode: EchoMode::default(),
            texts: Texts::default(),
            unmatched: Unmatched::default(),
            flows: Vec::new(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.shared.store
    }

    pub fn guard(&self) -> &TaskGuard {
        &self.shared.guard
    }

    pub fn echo(&self) -> &EchoTracker {
        &self.shared.echo
    }

    /// Current node of a user, `None` when idle
    pub fn state(&self, user: UserId) -> Option<StateLabel> {
        self.shared.store.state(user)
    }

    pub async fn dispatch(&self, update: Update) -> Dispatched {
        match self.shared.store.current(update.user_id) {
            None => self.enter(update).await,
            Some((label, epoch)) => self.step(label, epoch, update).await,
        }
    }

    fn cx(&self, flow: &'static str, update: &Update, epoch: u64) -> Cx<D> {
        Cx {
            shared: self.shared.clone(),
            user: update.user_id,
            chat: update.chat_id,
            flow,
            epoch,
        }
    }

    fn flow(&self, name: &str) -> Option<&Conversation<D>> {
        self.flows.iter().find(|f| f.name == name)
    }

    async fn enter(&self, update: Update) -> Dispatched {
        let found = self
            .flows
            .iter()
            .find_map(|f| f.entry_for(&update).map(|r| (f, r)));
        let Some((flow, route)) = found else {
            return Dispatched::Ignored;
        };
        self.run_entry(flow, route, update).await
    }

    async fn run_entry(&self, flow: &Conversation<D>, route: &Route<D>, update: Update) -> Dispatched {
        let user = update.user_id;
        let epoch = self
            .shared
            .store
            .open(user, StateLabel::new(flow.name, ENTRY_NODE));
        tracing::debug!(user_id = user, flow = flow.name, epoch, "conversation opened");
        let cx = self.cx(flow.name, &update, epoch);
        let result = route.handler.handle(cx.clone(), update).await;
        match self.apply(&cx, result, true).await {
            Dispatched::Advanced(label) => Dispatched::Opened(label),
            other => other,
        }
    }

    async fn step(&self, label: StateLabel, epoch: u64, update: Update) -> Dispatched {
        let user = update.user_id;
        let Some(flow) = self.flow(label.flow) else {
            tracing::warn!(user_id = user, state = %label, "session points at an unknown conversation");
            self.shared.store.clear_if_epoch(user, epoch);
            return Dispatched::Failed;
        };

        if let Some(route) = flow.exit_for(&update) {
            return self.run_exit(flow, route, update, epoch).await;
        }

        if let Some(route) = flow.entry_for(&update) {
            match flow.reentry {
                Reentry::Restart => {
                    tracing::debug!(user_id = user, state = %label, "conversation restarted");
                    self.shared.guard.cancel_if_running(user);
                    self.shared.echo.strip_previous(user).await;
                    return self.run_entry(flow, route, update).await;
                }
                Reentry::Reject(message) => {
                    self.notify(update.chat_id, message).await;
                    return Dispatched::Stayed;
                }
            }
        }

        let Some(route) = flow.route_for(label.node, &update) else {
            tracing::debug!(user_id = user, state = %label, kind = ?update.kind, "no handler matched, dropping event");
            if self.unmatched == Unmatched::Reply {
                self.notify(update.chat_id, &self.shared.texts.unmatched).await;
            }
            return Dispatched::Dropped;
        };

        let cx = self.cx(flow.name, &update, epoch);
        let result = route.handler.handle(cx.clone(), update).await;
        self.apply(&cx, result, false).await
    }

    async fn run_exit(&self, flow: &Conversation<D>, route: &Route<D>, update: Update, epoch: u64) -> Dispatched {
        let user = update.user_id;
        self.shared.guard.cancel_if_running(user);
        let cx = self.cx(flow.name, &update, epoch);
        if let Err(e) = route.handler.handle(cx, update).await {
            tracing::warn!(user_id = user, flow = flow.name, "exit handler failed: {e}");
        }
        self.shared.echo.strip_previous(user).await;
        self.shared.store.clear_if_epoch(user, epoch);
        tracing::debug!(user_id = user, flow = flow.name, "conversation exited");
        Dispatched::Exited
    }

    async fn apply(&self, cx: &Cx<D>, result: HandlerResult, at_entry: bool) -> Dispatched {
        let store = &self.shared.store;
        match result {
            Ok(Transition::Advance(node)) => {
                let label = StateLabel::new(cx.flow, node);
                if store.set_state_if(cx.user, cx.epoch, label) {
                    tracing::debug!(user_id = cx.user, state = %label, "transition applied");
                    Dispatched::Advanced(label)
                } else {
                    tracing::debug!(user_id = cx.user, state = %label, "conversation gone before transition");
                    Dispatched::Ended
                }
            }
            // Staying in the entry node means the entry refused to open
            Ok(Transition::Stay) if !at_entry => Dispatched::Stayed,
            Ok(Transition::Stay) | Ok(Transition::End) => {
                store.clear_if_epoch(cx.user, cx.epoch);
                Dispatched::Ended
            }
            Err(HandlerError::Validation(message)) => {
                self.notify(cx.chat, &message).await;
                if at_entry {
                    store.clear_if_epoch(cx.user, cx.epoch);
                    Dispatched::Ended
                } else {
                    Dispatched::Stayed
                }
            }
            Err(e) => {
                if e.is_internal() {
                    tracing::error!(user_id = cx.user, flow = cx.flow, "handler failed: {e}");
                } else {
                    tracing::warn!(user_id = cx.user, flow = cx.flow, "handler failed: {e}");
                }
                self.shared.guard.cancel_if_running(cx.user);
                self.shared.echo.strip_previous(cx.user).await;
                store.clear_if_epoch(cx.user, cx.epoch);
                self.notify(cx.chat, &self.shared.texts.apology).await;
                Dispatched::Failed
            }
        }
    }

    /// Best-effort plain message; a failure here has nowhere left to go
    async fn notify(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.shared.sender.send_text(chat, text, None).await {
            tracing::warn!(chat_id = chat, "failed to notify user: {e}");
        }
    }
}
