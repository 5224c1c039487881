//! State graph definition and the runner that drives it

use super::{DefinitionError, DialogError};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Identifier of a dialog state.
///
/// Usually a fieldless enum; any small copyable key works.
pub trait StateId: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> StateId for T where T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Async state handler: borrows the session context for the duration of the
/// state and yields the next state id
pub type Handler<S, C> =
    Box<dyn for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<S, DialogError>> + Send + Sync>;

struct StateDef<S, C> {
    handler: Handler<S, C>,
    transitions: HashSet<S>,
}

/// Validated dialog graph.
///
/// Holds no per-session data, so one instance serves every session.
pub struct StateMachine<S, C> {
    states: HashMap<S, StateDef<S, C>>,
    start: S,
}

impl<S: StateId, C> StateMachine<S, C> {
    pub fn builder(start: S) -> StateMachineBuilder<S, C> {
        StateMachineBuilder {
            start,
            states: HashMap::new(),
            duplicates: Vec::new(),
        }
    }

    pub fn start(&self) -> S {
        self.start
    }

    pub fn contains(&self, id: S) -> bool {
        self.states.contains_key(&id)
    }

    /// Declared targets of a state, or `None` if the state is not defined
    pub fn transitions(&self, id: S) -> Option<&HashSet<S>> {
        self.states.get(&id).map(|def| &def.transitions)
    }

    /// Run the handler of `current` once and validate the id it returns.
    pub async fn step(&self, current: S, ctx: &mut C) -> Result<S, DialogError> {
        let def = self.states.get(&current).ok_or_else(|| DialogError::UnknownState {
            from: format!("{current:?}"),
            to: format!("{current:?}"),
        })?;

        let next = (def.handler)(ctx).await?;

        if !self.states.contains_key(&next) {
            return Err(DialogError::UnknownState {
                from: format!("{current:?}"),
                to: format!("{next:?}"),
            });
        }
        if !def.transitions.contains(&next) {
            return Err(DialogError::IllegalTransition {
                from: format!("{current:?}"),
                to: format!("{next:?}"),
            });
        }

        tracing::debug!(from = ?current, to = ?next, "dialog transition");
        Ok(next)
    }

    /// Drive the dialog from the start state.
    ///
    /// There is no terminal state: this only returns when a handler fails or
    /// a transition is rejected, and the returned error is what ended the
    /// session.
    pub async fn run(&self, ctx: &mut C) -> DialogError {
        let mut current = self.start;
        loop {
            match self.step(current, ctx).await {
                Ok(next) => current = next,
                Err(e) => return e,
            }
        }
    }
}

impl<S: StateId, C> fmt::Debug for StateMachine<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut states: Vec<String> = self.states.keys().map(|id| format!("{id:?}")).collect();
        states.sort();
        f.debug_struct("StateMachine")
            .field("start", &self.start)
            .field("states", &states)
            .finish()
    }
}

/// Collects states and checks the graph on [`build`](Self::build)
pub struct StateMachineBuilder<S, C> {
    start: S,
    states: HashMap<S, StateDef<S, C>>,
    duplicates: Vec<S>,
}

impl<S: StateId, C> StateMachineBuilder<S, C> {
    /// Add a state with the set of states it may hand control to
    #[must_use]
    pub fn state<F>(mut self, id: S, transitions: impl IntoIterator<Item = S>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, Result<S, DialogError>> + Send + Sync + 'static,
    {
        let def = StateDef {
            handler: Box::new(handler),
            transitions: transitions.into_iter().collect(),
        };
        if self.states.insert(id, def).is_some() {
            self.duplicates.push(id);
        }
        self
    }

    pub fn build(self) -> Result<StateMachine<S, C>, DefinitionError> {
        if let Some(id) = self.duplicates.first() {
            return Err(DefinitionError::DuplicateState(format!("{id:?}")));
        }
        if !self.states.contains_key(&self.start) {
            return Err(DefinitionError::MissingStart(format!("{:?}", self.start)));
        }
        for (from, def) in &self.states {
            if let Some(to) = def.transitions.iter().find(|to| !self.states.contains_key(*to)) {
                return Err(DefinitionError::UndeclaredTarget {
                    from: format!("{from:?}"),
                    to: format!("{to:?}"),
                });
            }
        }

        Ok(StateMachine {
            states: self.states,
            start: self.start,
        })
    }
}
