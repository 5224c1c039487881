//! Session worker that runs a dialog over a session's queue

use super::{Inbound, OutboundSink, SessionContext};
use crate::demux::SessionWorker;
use crate::dialog::{DialogError, StateId, StateMachine};
use crate::pipe::PipeReceiver;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds the handler-facing context from a fresh session context
type ContextFactory<E, M, C> =
    Box<dyn Fn(SessionContext<E, M>) -> Result<C, DialogError> + Send + Sync>;

/// Runs one shared dialog graph for every session it is handed.
///
/// Each session gets its own [`SessionContext`] (wrapped into the dialog's
/// context type `C` by the factory) and its own execution of the graph from
/// the start state.
pub struct DialogWorker<S, C, E, M> {
    machine: Arc<StateMachine<S, C>>,
    outbound: Arc<dyn OutboundSink<M>>,
    factory: ContextFactory<E, M, C>,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl<S, C, E, M> DialogWorker<S, C, E, M>
where
    S: StateId,
    M: Send + Sync,
{
    pub fn new<F>(
        machine: Arc<StateMachine<S, C>>,
        outbound: Arc<dyn OutboundSink<M>>,
        factory: F,
    ) -> Self
    where
        F: Fn(SessionContext<E, M>) -> Result<C, DialogError> + Send + Sync + 'static,
    {
        Self {
            machine,
            outbound,
            factory: Box::new(factory),
            idle_timeout: None,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    /// Sessions end once `token` is cancelled
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

impl<S: StateId, C, E, M> fmt::Debug for DialogWorker<S, C, E, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogWorker")
            .field("machine", &self.machine)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S, C, E, K, M> SessionWorker<E, K, M> for DialogWorker<S, C, E, M>
where
    S: StateId,
    C: Send + 'static,
    E: Inbound + Send + 'static,
    K: Send + 'static,
    M: Send + Sync + 'static,
{
    async fn run(&self, _key: K, meta: M, queue: PipeReceiver<E>) -> Result<(), DialogError> {
        let session = SessionContext::new(meta, queue, Arc::clone(&self.outbound))
            .with_idle_timeout(self.idle_timeout)
            .with_cancellation(self.shutdown.child_token());
        let mut ctx = (self.factory)(session)?;

        tracing::info!(start = ?self.machine.start(), "dialog started");
        Err(self.machine.run(&mut ctx).await)
    }
}
