/// Opaque user identity from the transport
pub type UserId = u64;

/// Chat identity from the transport
pub type ChatId = i64;

/// Reference to a message the bot has sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i32,
}

impl MessageRef {
    pub fn new(chat_id: ChatId, message_id: i32) -> Self {
        Self { chat_id, message_id }
    }

    /// Zero IDs mean "nothing was actually sent"
    pub fn is_zero(&self) -> bool {
        self.chat_id == 0 || self.message_id == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Command,
    Text,
    Callback,
}

/// Transport-neutral inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub kind: UpdateKind,
    /// Command text ("/content foo"), message text, or callback data
    pub payload: String,
    /// Message carrying the pressed button, for callbacks
    pub origin: Option<MessageRef>,
}

impl Update {
    pub fn command(user_id: UserId, chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id,
            kind: UpdateKind::Command,
            payload: text.into(),
            origin: None,
        }
    }

    pub fn text(user_id: UserId, chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id,
            kind: UpdateKind::Text,
            payload: text.into(),
            origin: None,
        }
    }

    pub fn callback(user_id: UserId, chat_id: ChatId, data: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id,
            kind: UpdateKind::Callback,
            payload: data.into(),
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: MessageRef) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Command name without the leading '/', e.g. "content" for "/content foo"
    pub fn command_name(&self) -> Option<&str> {
        if self.kind != UpdateKind::Command {
            return None;
        }
        let head = self.payload.split_whitespace().next()?;
        head.strip_prefix('/')
    }

    /// Everything after the command name, trimmed
    pub fn command_args(&self) -> &str {
        if self.kind != UpdateKind::Command {
            return "";
        }
        let trimmed = self.payload.trim_start();
        match trimmed.find(char::is_whitespace) {
            Some(pos) => trimmed[pos..].trim(),
            None => "",
        }
    }
}

/// One inline button: visible label and the callback data it sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Rows of inline buttons attached to a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Controls {
    pub rows: Vec<Vec<Button>>,
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }

    pub fn single(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self::new().row(vec![Button::new(text, data)])
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.is_empty())
    }
}
