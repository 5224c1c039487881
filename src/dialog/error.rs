//! Dialog error types

use crate::session::DeliveryError;
use std::time::Duration;
use thiserror::Error;

/// Errors that end a single session.
///
/// None of these affect other sessions or the demultiplexer.
#[derive(Debug, Error)]
pub enum DialogError {
    #[error("state {from} returned {to}, which is not part of the dialog")]
    UnknownState { from: String, to: String },
    #[error("state {from} is not allowed to transition to {to}")]
    IllegalTransition { from: String, to: String },
    #[error("failed to deliver message: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("backend call failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("session input closed")]
    Closed,
    #[error("no input received for {0:?}")]
    IdleTimeout(Duration),
    #[error("session cancelled")]
    Cancelled,
    #[error("{0}")]
    Handler(String),
}

impl DialogError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Whether the session ended because its input went away rather than
    /// because something broke
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Closed | Self::IdleTimeout(_) | Self::Cancelled)
    }
}

/// Problems found while validating a state graph
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("start state {0} is not defined")]
    MissingStart(String),
    #[error("state {0} is defined more than once")]
    DuplicateState(String),
    #[error("state {from} declares a transition to undefined state {to}")]
    UndeclaredTarget { from: String, to: String },
}
