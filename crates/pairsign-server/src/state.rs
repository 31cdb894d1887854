//! Shared application state

use axum::http::{header, HeaderMap};
use std::sync::Arc;
use std::time::Duration;

use pairsign_core::Config;
use pairsign_oidc::{Credentials, KeyService};
use pairsign_session::SessionRegistry;
use pairsign_store::CredentialStore;

/// State shared by every HTTP and WebSocket handler
pub struct AppState {
    pub config: Config,
    pub credentials: Credentials,
    pub keys: KeyService,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn CredentialStore>) -> Self {
        let sessions = SessionRegistry::new(Duration::from_secs(config.session_idle_secs));
        Self {
            credentials: Credentials::new(store.clone()),
            keys: KeyService::new(store),
            sessions,
            config,
        }
    }

    /// Issuer origin for a request: the configured value when set, otherwise
    /// derived from `X-Forwarded-Proto` (default `https`) and the Host
    /// header, so tokens and discovery agree with whatever name the server
    /// is reached under.
    pub fn issuer(&self, headers: &HeaderMap) -> String {
        if let Some(issuer) = &self.config.issuer {
            return issuer.trim_end_matches('/').to_string();
        }
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("https");
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        format!("{}://{}", proto, host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsign_store::MemoryStore;

    fn state_with(config: Config) -> AppState {
        AppState::new(config, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_issuer_prefers_config() {
        let state = state_with(Config::new().with_issuer("https://id.example.com/".to_string()));
        let headers = HeaderMap::new();
        assert_eq!(state.issuer(&headers), "https://id.example.com");
    }

    #[test]
    fn test_issuer_from_headers() {
        let state = state_with(Config::default());

        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "login.example.com".parse().unwrap());
        assert_eq!(state.issuer(&headers), "https://login.example.com");

        headers.insert("x-forwarded-proto", "http".parse().unwrap());
        assert_eq!(state.issuer(&headers), "http://login.example.com");
    }
}
