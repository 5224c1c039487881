//! Session context handed to dialog handlers

use super::{Inbound, OutboundSink, OutgoingMessage};
use crate::dialog::DialogError;
use crate::pipe::PipeReceiver;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-session capability object: send replies, wait for input, prompt
/// until the reply is acceptable.
///
/// Owns the consumer half of the session's queue, so only the session's own
/// worker can read its input.
pub struct SessionContext<E, M> {
    meta: M,
    queue: PipeReceiver<E>,
    outbound: Arc<dyn OutboundSink<M>>,
    idle_timeout: Option<Duration>,
    cancel: CancellationToken,
    /// Who is on the other end, for message logs
    user: Option<String>,
}

impl<E, M> SessionContext<E, M>
where
    E: Inbound + Send,
    M: Send + Sync,
{
    pub fn new(meta: M, queue: PipeReceiver<E>, outbound: Arc<dyn OutboundSink<M>>) -> Self {
        Self {
            meta,
            queue,
            outbound,
            idle_timeout: None,
            cancel: CancellationToken::new(),
            user: None,
        }
    }

    /// End the session if no input arrives within `limit`
    #[must_use]
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    /// End the session when `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Tag every logged message line with `user`
    #[must_use]
    pub fn with_user_label(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn user_label(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn meta(&self) -> &M {
        &self.meta
    }

    /// Deliver a message to this session's chat.
    pub async fn send(&self, message: impl Into<OutgoingMessage>) -> Result<(), DialogError> {
        let message = message.into();
        log_lines("out", self.user_label(), &message.text);
        self.outbound.deliver(&self.meta, &message).await?;
        Ok(())
    }

    /// Wait for the next inbound event and return its body.
    ///
    /// Events without a body yield an empty string.
    pub async fn receive(&mut self) -> Result<String, DialogError> {
        let Self {
            queue,
            idle_timeout,
            cancel,
            user,
            ..
        } = self;
        let limit = *idle_timeout;

        let wait = async {
            match limit {
                Some(limit) => tokio::time::timeout(limit, queue.next())
                    .await
                    .map_err(|_| DialogError::IdleTimeout(limit)),
                None => Ok(queue.next().await),
            }
        };

        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DialogError::Cancelled),
            event = wait => event?,
        };
        let event = event.ok_or(DialogError::Closed)?;

        let body = event.body().unwrap_or_default().to_string();
        let shown = if body.is_empty() { "<no text>" } else { body.as_str() };
        log_lines("in", user.as_deref(), shown);
        Ok(body)
    }

    /// Send `message` and wait for a reply, repeating until the reply is one
    /// of `allowed`.
    ///
    /// There is no retry limit; the session stays here until the user
    /// answers with something acceptable.
    pub async fn prompt_and_validate<A: AsRef<str> + Sync>(
        &mut self,
        message: impl Into<OutgoingMessage>,
        allowed: &[A],
    ) -> Result<String, DialogError> {
        let message = message.into();
        loop {
            self.send(message.clone()).await?;
            let reply = self.receive().await?;
            if allowed.iter().any(|a| a.as_ref() == reply) {
                return Ok(reply);
            }
            tracing::debug!(reply = %reply, "reply not among offered options, prompting again");
        }
    }

    /// Prompt with the options of the message's own keyboard
    pub async fn input(&mut self, message: OutgoingMessage) -> Result<String, DialogError> {
        let allowed: Vec<String> = message.options().into_iter().map(str::to_string).collect();
        if allowed.is_empty() {
            return Err(DialogError::handler(
                "prompt offers no reply options and could never be answered",
            ));
        }
        self.prompt_and_validate(message, &allowed).await
    }
}

fn log_lines(direction: &'static str, user: Option<&str>, contents: &str) {
    let user = user.unwrap_or("unknown");
    for line in contents.lines() {
        tracing::info!(direction, user, line, "message");
    }
}
