//! Mock transport implementations for testing
//!
//! These mocks let sessions and dialogs run without stdio.

use super::traits::*;
use super::{ChatEvent, ChatUser, OutgoingMessage};
use crate::pipe::PipeSender;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::Notify;

// ============================================================================
// Recording Sink
// ============================================================================

/// Sink that records every delivered message
pub struct RecordingSink<M> {
    messages: Mutex<Vec<(M, OutgoingMessage)>>,
    /// Notified after each delivery (for test synchronization)
    pub delivered: Notify,
}

impl<M: Clone> Default for RecordingSink<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Clone> RecordingSink<M> {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            delivered: Notify::new(),
        }
    }

    pub fn messages(&self) -> Vec<(M, OutgoingMessage)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.text.clone())
            .collect()
    }

    pub fn last(&self) -> Option<OutgoingMessage> {
        self.messages.lock().unwrap().last().map(|(_, m)| m.clone())
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    /// Wait until at least `count` messages have been delivered
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.delivered.notified();
            if self.len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl<M: Clone + Send + Sync> OutboundSink<M> for RecordingSink<M> {
    async fn deliver(&self, meta: &M, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        self.messages
            .lock()
            .unwrap()
            .push((meta.clone(), message.clone()));
        self.delivered.notify_waiters();
        Ok(())
    }
}

// ============================================================================
// Failing Sink
// ============================================================================

/// Sink that rejects every message
pub struct FailingSink;

#[async_trait]
impl<M: Send + Sync> OutboundSink<M> for FailingSink {
    async fn deliver(&self, _meta: &M, _message: &OutgoingMessage) -> Result<(), DeliveryError> {
        Err(DeliveryError::Rejected("mock sink is down".to_string()))
    }
}

// ============================================================================
// Chat helpers
// ============================================================================

pub fn user(id: i64) -> ChatUser {
    ChatUser::new(id, Some(&format!("user{id}")))
}

/// Text message from `user(chat_id)` in chat `chat_id`
pub fn said(chat_id: i64, text: &str) -> ChatEvent {
    ChatEvent::text(chat_id, user(chat_id), text)
}

/// Push a series of replies into a session's queue
pub fn reply_all(tx: &PipeSender<ChatEvent>, chat_id: i64, replies: &[&str]) {
    for reply in replies {
        tx.push(said(chat_id, reply)).unwrap();
    }
}
