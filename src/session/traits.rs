//! Trait abstractions for the transport around the engine
//!
//! These traits let the demultiplexer and dialogs run against the stdio
//! transport in production and scripted mocks in tests.

use super::OutgoingMessage;
use async_trait::async_trait;
use futures::Stream;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::StreamExt;

/// Anything that carries a textual body
pub trait Inbound {
    fn body(&self) -> Option<&str>;
}

impl Inbound for String {
    fn body(&self) -> Option<&str> {
        Some(self)
    }
}

impl Inbound for &'static str {
    fn body(&self) -> Option<&str> {
        Some(self)
    }
}

/// Failure reading from the inbound transport
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read inbound events: {0}")]
    Io(#[from] std::io::Error),
    #[error("inbound transport failed: {0}")]
    Transport(String),
}

/// Failure delivering an outbound message
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Totally ordered source of inbound events
#[async_trait]
pub trait EventSource: Send {
    type Event: Send + 'static;

    /// Next event, or `None` when the source is exhausted.
    ///
    /// Must be cancel-safe: the demultiplexer polls it inside `select!`.
    async fn next_event(&mut self) -> Result<Option<Self::Event>, SourceError>;
}

/// Outbound half of the transport
#[async_trait]
pub trait OutboundSink<M: Send + Sync>: Send + Sync {
    /// Deliver a message to the chat described by `meta`
    async fn deliver(&self, meta: &M, message: &OutgoingMessage) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<M: Send + Sync, T: OutboundSink<M> + ?Sized> OutboundSink<M> for Arc<T> {
    async fn deliver(&self, meta: &M, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        (**self).deliver(meta, message).await
    }
}

/// Adapter turning any stream of results into an [`EventSource`]
pub struct StreamSource<S> {
    inner: S,
}

impl<S> StreamSource<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S, E> EventSource for StreamSource<S>
where
    S: Stream<Item = Result<E, SourceError>> + Unpin + Send,
    E: Send + 'static,
{
    type Event = E;

    async fn next_event(&mut self) -> Result<Option<E>, SourceError> {
        self.inner.next().await.transpose()
    }
}
