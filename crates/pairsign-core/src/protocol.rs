//! Pairing-session wire protocol
//!
//! Both pages of an authorization session hold a WebSocket to the server.
//! Devices send [`DeviceMessage`]s; the session worker answers and notifies
//! with [`SessionEvent`]s. Everything on the wire is JSON with a `type` tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of a pairing session a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// The device that initiated authorization and displays the QR code
    Primary,
    /// The device that scanned the QR code and performs the login
    External,
}

impl ConnectionType {
    /// The other side of the session
    pub fn opposite(&self) -> ConnectionType {
        match self {
            ConnectionType::Primary => ConnectionType::External,
            ConnectionType::External => ConnectionType::Primary,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Primary => write!(f, "primary"),
            ConnectionType::External => write!(f, "external"),
        }
    }
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(ConnectionType::Primary),
            "external" => Ok(ConnectionType::External),
            other => Err(format!("unknown connection type: {}", other)),
        }
    }
}

/// OAuth parameters the primary page holds for its session.
///
/// The external page never sees these in its URL; they travel only through
/// the session worker in a [`SessionEvent::ParamsResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcParams {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Messages a device sends to its session worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// External device asks the primary for the session's OAuth parameters
    RequestParams,

    /// Primary device answers a params request
    ParamsResponse { params: OidcParams },

    /// External device reports the authorization code it obtained
    CodeGenerated {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        redirect_uri: Option<String>,
    },

    /// Anything with an unrecognized `type` tag; logged and dropped
    #[serde(other)]
    Unknown,
}

/// Messages the session worker sends to connected devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Snapshot of session state, sent to a device right after it connects
    #[serde(rename_all = "camelCase")]
    Status {
        primary_connected: bool,
        external_connected: bool,
        has_code: bool,
    },

    /// A primary device joined the session
    PrimaryConnected,

    /// The last primary device left the session
    PrimaryDisconnected,

    /// An external device joined the session
    ExternalConnected,

    /// The last external device left the session
    ExternalDisconnected,

    /// Relayed params request, delivered to primary devices
    RequestParams,

    /// Relayed params response, delivered to external devices
    ParamsResponse { params: OidcParams },

    /// Authorization code handed to primary devices to finish the flow
    CodeReceived {
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        redirect_uri: Option<String>,
    },
}
