//! Demultiplexer: one ordered event stream in, one queue per session out
//!
//! The demultiplexer task is the only owner of the key→queue map. For every
//! inbound event it looks up (or lazily creates) the session for the event's
//! key and pushes the event onto that session's queue. Pushing never blocks,
//! so a slow session cannot hold up routing for anyone else.
//!
//! Workers run on a [`JoinSet`] owned by the same task. Finished workers are
//! reaped from the loop; the next event for their key starts a new session.
//!
//! A session can end while events are still queued for it, for instance when
//! its idle timeout fires just as a message arrives. Those events stay in the
//! dead pipe's leftovers and are handed, oldest first, to a new session for
//! the same key ahead of anything routed later. Leftovers are only dropped
//! (and counted) when the session never read a single event, since a fresh
//! session would fail on them the same way, or when shutdown was requested.

use crate::dialog::DialogError;
use crate::pipe::{pipe, Leftovers, LeftoversHandle, PipeClosed, PipeReceiver, PipeSender};
use crate::session::{EventSource, SourceError};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Long-lived consumer of one session's events
#[async_trait]
pub trait SessionWorker<E, K, M>: Send + Sync + 'static
where
    E: Send + 'static,
    K: Send + 'static,
    M: Send + 'static,
{
    /// Consume the session's queue until the session ends
    async fn run(&self, key: K, meta: M, queue: PipeReceiver<E>) -> Result<(), DialogError>;
}

/// Fatal routing failure
#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("event source failed: {0}")]
    Source(#[from] SourceError),
}

/// How a session worker ended
#[derive(Debug)]
pub enum SessionOutcome {
    Finished,
    Failed(DialogError),
    Panicked,
}

/// Counters collected over one [`Demultiplexer::run`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemuxReport {
    pub events_routed: u64,
    pub sessions_started: u64,
    pub sessions_failed: u64,
    /// Queued events discarded with a session that could not use them
    pub events_dropped: u64,
}

type KeyFn<E, K> = Box<dyn Fn(&E) -> K + Send + Sync>;
type MetaFn<E, M> = Box<dyn Fn(&E) -> M + Send + Sync>;

/// Splits one event stream into per-key sessions
pub struct Demultiplexer<E, K, M, W> {
    key_of: KeyFn<E, K>,
    meta_of: MetaFn<E, M>,
    worker: Arc<W>,
    shutdown: CancellationToken,
    queues: HashMap<K, PipeSender<E>>,
    /// Leftovers of queues closed because the source ended
    closing: HashMap<K, LeftoversHandle<E>>,
    draining: bool,
    tasks: JoinSet<(K, SessionOutcome)>,
    report: DemuxReport,
}

impl<E, K, M, W> Demultiplexer<E, K, M, W>
where
    E: Send + 'static,
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    M: Send + 'static,
    W: SessionWorker<E, K, M>,
{
    pub fn new(
        key_of: impl Fn(&E) -> K + Send + Sync + 'static,
        meta_of: impl Fn(&E) -> M + Send + Sync + 'static,
        worker: W,
    ) -> Self {
        Self {
            key_of: Box::new(key_of),
            meta_of: Box::new(meta_of),
            worker: Arc::new(worker),
            shutdown: CancellationToken::new(),
            queues: HashMap::new(),
            closing: HashMap::new(),
            draining: false,
            tasks: JoinSet::new(),
            report: DemuxReport::default(),
        }
    }

    /// Stop reading the source once `token` is cancelled
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Route every event of `source` until it is exhausted.
    ///
    /// When the source ends every session queue is closed and the workers
    /// are awaited; a worker waiting for input sees its queue close and
    /// finishes. A source error aborts all workers and is returned.
    pub async fn run<Src>(mut self, mut source: Src) -> Result<DemuxReport, DemuxError>
    where
        Src: EventSource<Event = E>,
    {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("shutdown requested, no longer reading events");
                    break;
                }
                event = source.next_event() => match event {
                    Ok(Some(event)) => self.route(event),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, sessions = self.queues.len(), "event source failed");
                        self.tasks.abort_all();
                        return Err(e.into());
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.reap(joined);
                }
            }
        }

        tracing::info!(sessions = self.queues.len(), "event source finished, closing sessions");
        self.draining = true;
        self.closing = self
            .queues
            .drain()
            .map(|(key, queue)| (key, queue.leftovers()))
            .collect();
        while let Some(joined) = self.tasks.join_next().await {
            self.reap(joined);
        }

        tracing::info!(
            events = self.report.events_routed,
            sessions = self.report.sessions_started,
            failed = self.report.sessions_failed,
            dropped = self.report.events_dropped,
            "demultiplexer stopped"
        );
        Ok(self.report)
    }

    fn route(&mut self, event: E) {
        self.report.events_routed += 1;
        let key = (self.key_of)(&event);

        let (leftovers, event) = match self.queues.get(&key) {
            Some(queue) => match queue.push(event) {
                Ok(()) => return,
                // Worker ended but has not been reaped yet
                Err(PipeClosed(event)) => (queue.leftovers().take(), event),
            },
            None => (None, event),
        };

        let mut events = leftovers
            .map(|left| self.salvage(&key, left))
            .unwrap_or_default();
        events.push(event);
        self.start(key, events);
    }

    /// Start a session for `key` with `events` already queued, oldest first
    fn start(&mut self, key: K, events: Vec<E>) {
        let Some(first) = events.first() else {
            return;
        };
        let meta = (self.meta_of)(first);
        let (queue, inbox) = pipe();
        for event in events {
            if queue.push(event).is_err() {
                // The receiver is still in hand; a fresh pipe cannot be closed
                return;
            }
        }
        self.spawn(key.clone(), meta, inbox);

        if self.draining {
            // No further input: the session reads what it was given, then
            // sees its queue close
            self.closing.insert(key, queue.leftovers());
        } else {
            self.queues.insert(key, queue);
        }
    }

    /// Decide whether events a finished session left unread get a new session
    fn salvage(&mut self, key: &K, leftovers: Leftovers<E>) -> Vec<E> {
        let Leftovers { unread, received } = leftovers;
        if unread.is_empty() {
            return unread;
        }
        if received == 0 || self.shutdown.is_cancelled() {
            self.report.events_dropped += u64::try_from(unread.len()).unwrap_or(u64::MAX);
            tracing::warn!(
                key = ?key,
                events = unread.len(),
                received,
                "dropping events queued for an ended session"
            );
            return Vec::new();
        }
        tracing::info!(key = ?key, events = unread.len(), "handing unread events to a new session");
        unread
    }

    fn spawn(&mut self, key: K, meta: M, inbox: PipeReceiver<E>) {
        self.report.sessions_started += 1;
        tracing::info!(key = ?key, live = self.queues.len() + 1, "starting session");

        let worker = Arc::clone(&self.worker);
        let span = tracing::info_span!("session", key = ?key);
        self.tasks.spawn(
            async move {
                let run = AssertUnwindSafe(worker.run(key.clone(), meta, inbox));
                let outcome = match run.catch_unwind().await {
                    Ok(Ok(())) => SessionOutcome::Finished,
                    Ok(Err(e)) => SessionOutcome::Failed(e),
                    Err(_) => SessionOutcome::Panicked,
                };
                (key, outcome)
            }
            .instrument(span),
        );
    }

    fn reap(&mut self, joined: Result<(K, SessionOutcome), tokio::task::JoinError>) {
        let (key, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                // Only reachable through abort_all(), which is followed by return
                tracing::warn!(error = %e, "session task did not complete");
                return;
            }
        };

        match &outcome {
            SessionOutcome::Finished => tracing::info!(key = ?key, "session finished"),
            SessionOutcome::Failed(e) if e.is_shutdown() => {
                tracing::info!(key = ?key, reason = %e, "session closed");
            }
            SessionOutcome::Failed(e) => {
                self.report.sessions_failed += 1;
                tracing::warn!(key = ?key, error = %e, "session failed");
            }
            SessionOutcome::Panicked => {
                self.report.sessions_failed += 1;
                tracing::error!(key = ?key, "session worker panicked");
            }
        }

        let leftovers = match self.queues.get(&key) {
            // A newer session already owns the key
            Some(queue) if !queue.is_closed() => None,
            Some(_) => self
                .queues
                .remove(&key)
                .and_then(|queue| queue.leftovers().take()),
            None => self.closing.get(&key).and_then(LeftoversHandle::take),
        };
        if let Some(left) = leftovers {
            let events = self.salvage(&key, left);
            self.start(key, events);
        }
    }
}
