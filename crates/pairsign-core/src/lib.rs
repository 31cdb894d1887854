//! Pairsign Core - shared configuration, errors, and protocol types
//!
//! This crate defines the types shared across the pairsign workspace:
//! - Server configuration
//! - The common error type
//! - The pairing-session wire protocol (device messages and session events)

pub mod config;
pub mod error;
pub mod protocol;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{ConnectionType, DeviceMessage, OidcParams, SessionEvent};
