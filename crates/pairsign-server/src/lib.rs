//! HTTP and WebSocket server for pairsign
//!
//! The authorization-code flow surface (authorize, login, token, userinfo,
//! discovery), the device WebSocket endpoints feeding the session registry,
//! TLS setup, and the periodic maintenance sweep.

pub mod http;
pub mod state;
pub mod sweep;
pub mod tls;
pub mod websocket;

pub use http::create_router;
pub use state::AppState;
