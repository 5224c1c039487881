//! Declarative dialog state machine
//!
//! A dialog is a static graph of named states. Each state owns an async
//! handler that receives the session's context, may suspend on it, and
//! returns the id of the next state. The graph is validated once when it is
//! built and shared by every session.

mod error;
mod machine;

pub use error::{DefinitionError, DialogError};
pub use machine::{Handler, StateId, StateMachine, StateMachineBuilder};
