//! Inbound events and outbound messages

use super::Inbound;
use serde::{Deserialize, Serialize};

/// Sender of an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

impl ChatUser {
    pub fn new(id: i64, username: Option<&str>) -> Self {
        Self {
            id,
            username: username.map(str::to_string),
        }
    }

    /// Name shown in logs
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// One inbound chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub chat_id: i64,
    #[serde(default)]
    pub from: Option<ChatUser>,
    #[serde(default)]
    pub text: Option<String>,
}

impl ChatEvent {
    pub fn text(chat_id: i64, from: ChatUser, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            from: Some(from),
            text: Some(text.into()),
        }
    }
}

impl Inbound for ChatEvent {
    fn body(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// Session metadata captured from the first event of a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMeta {
    pub chat_id: i64,
    pub user: Option<ChatUser>,
}

impl ChatMeta {
    pub fn from_event(event: &ChatEvent) -> Self {
        Self {
            chat_id: event.chat_id,
            user: event.from.clone(),
        }
    }
}

/// Reply keyboard offered with a prompt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resize: bool,
}

impl Keyboard {
    pub fn new<R, B>(rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = B>,
        B: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
            resize: false,
        }
    }

    #[must_use]
    pub fn resized(mut self) -> Self {
        self.resize = true;
        self
    }

    /// Every button label, row by row
    pub fn buttons(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(String::as_str)
    }
}

/// Message sent to a chat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub markdown: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remove_keyboard: bool,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self.remove_keyboard = false;
        self
    }

    #[must_use]
    pub fn markdown(mut self) -> Self {
        self.markdown = true;
        self
    }

    #[must_use]
    pub fn remove_keyboard(mut self) -> Self {
        self.keyboard = None;
        self.remove_keyboard = true;
        self
    }

    /// Replies that the attached keyboard offers
    pub fn options(&self) -> Vec<&str> {
        self.keyboard
            .as_ref()
            .map(|k| k.buttons().collect())
            .unwrap_or_default()
    }
}

impl From<&str> for OutgoingMessage {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for OutgoingMessage {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}
