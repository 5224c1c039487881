//! JSON-lines transport
//!
//! Inbound: one [`ChatEvent`] object per line. Outbound: one object per line
//! holding `chat_id` plus the fields of the [`OutgoingMessage`]. A chat
//! platform adapter sits on the other side of the pipe.

use crate::session::{
    ChatEvent, ChatMeta, DeliveryError, EventSource, OutboundSink, OutgoingMessage, SourceError,
};
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use std::io::{self, BufRead};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::{LinesStream, UnboundedReceiverStream};
use tokio_stream::StreamExt;

/// Reads chat events from a stream of text lines
pub struct JsonLinesSource<L> {
    lines: L,
    skipped: u64,
}

impl<R: AsyncBufRead> JsonLinesSource<LinesStream<R>> {
    pub fn new(reader: R) -> Self {
        Self::from_lines(LinesStream::new(reader.lines()))
    }
}

impl JsonLinesSource<UnboundedReceiverStream<io::Result<String>>> {
    /// Read `reader` on a dedicated OS thread.
    ///
    /// For process stdin. A read parked on tokio's blocking pool keeps
    /// runtime shutdown waiting until the next line arrives; a detached
    /// thread does not. The thread exits at end of input, on a read error,
    /// or once the source is dropped and the next line is read.
    pub fn blocking<R>(reader: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("keydesk-input".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
            })?;
        Ok(Self::from_lines(UnboundedReceiverStream::new(rx)))
    }
}

impl<L> JsonLinesSource<L> {
    pub fn from_lines(lines: L) -> Self {
        Self { lines, skipped: 0 }
    }

    /// Lines dropped because they did not decode
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[async_trait]
impl<L> EventSource for JsonLinesSource<L>
where
    L: Stream<Item = io::Result<String>> + Unpin + Send,
{
    type Event = ChatEvent;

    async fn next_event(&mut self) -> Result<Option<ChatEvent>, SourceError> {
        while let Some(line) = self.lines.next().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => {
                    self.skipped += 1;
                    tracing::warn!(error = %err, "skipping malformed event line");
                }
            }
        }
        Ok(None)
    }
}

#[derive(Serialize)]
struct OutboundLine<'a> {
    chat_id: i64,
    #[serde(flatten)]
    message: &'a OutgoingMessage,
}

/// Writes outgoing messages as JSON lines
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> OutboundSink<ChatMeta> for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&self, meta: &ChatMeta, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        let mut line = serde_json::to_vec(&OutboundLine {
            chat_id: meta.chat_id,
            message,
        })?;
        line.push(b'\n');

        // Whole lines only; concurrent sessions must not interleave bytes
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
