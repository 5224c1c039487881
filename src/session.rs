//! Per-session plumbing between the demultiplexer and dialog handlers
//!
//! A session is one conversation: its inbound queue, the capability to send
//! replies, and the worker that runs the dialog over them.

mod context;
mod message;
pub mod traits;
mod worker;

#[cfg(test)]
pub mod testing;

pub use context::SessionContext;
pub use message::{ChatEvent, ChatMeta, ChatUser, Keyboard, OutgoingMessage};
pub use traits::*;
pub use worker::DialogWorker;
