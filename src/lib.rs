//! keydesk: a chat bot engine that hands out VPN access keys
//!
//! One inbound event stream is split into per-chat sessions, and each
//! session runs its own copy of a declarative dialog graph.

pub mod bot;
pub mod config;
pub mod demux;
pub mod dialog;
pub mod inventory;
pub mod keys;
pub mod outline;
pub mod pipe;
pub mod session;
pub mod transport;
