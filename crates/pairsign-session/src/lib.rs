//! Per-session pairing workers
//!
//! Every authorization session that opens a WebSocket gets one worker task.
//! The worker owns the session's state (which devices are connected, whether
//! a code exists yet) and is the only writer of it; WebSocket handlers talk
//! to it through an unbounded command channel, so no locks guard session
//! state and events to a given device arrive in the order they were caused.
//!
//! Workers are cheap and ephemeral: one spawns on the first attach for a
//! session id, and it shuts down after the session has been empty for the
//! idle timeout. A later attach under the same id simply spawns a fresh one.

mod registry;
mod worker;

pub use registry::SessionRegistry;
pub use worker::{Connection, SessionCommand};
