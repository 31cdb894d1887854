//! Periodic maintenance: prune expired codes and access tokens
//!
//! Store-level TTLs already hide expired entries within one process
//! lifetime; the sweep removes records whose embedded `expires` has passed
//! regardless of how the process got here, so a restarted server does not
//! accumulate stale files.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use pairsign_core::Result;
use pairsign_oidc::records::{ACCESS_TOKENS_PREFIX, CODES_PREFIX};
use pairsign_oidc::{AccessTokenRecord, CodeRecord};
use pairsign_store::CredentialStore;

use crate::state::AppState;

/// Counts from one maintenance pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub expired_codes: usize,
    pub expired_tokens: usize,
}

/// Spawn the periodic maintenance task
pub fn spawn_maintenance(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            match sweep_expired(&state).await {
                Ok(stats) => {
                    if stats.expired_codes > 0 || stats.expired_tokens > 0 {
                        info!(
                            "Swept {} expired codes and {} expired access tokens",
                            stats.expired_codes, stats.expired_tokens
                        );
                    }
                    debug!(
                        "Active pairing sessions: {}",
                        state.sessions.session_count().await
                    );
                }
                Err(err) => error!("Maintenance sweep failed: {}", err),
            }
        }
    });
}

/// Remove expired code and access-token records; returns what was removed
pub async fn sweep_expired(state: &AppState) -> Result<SweepStats> {
    let store = state.credentials.store();
    Ok(SweepStats {
        expired_codes: sweep_prefix::<CodeRecord>(&store, CODES_PREFIX, |r| r.is_expired()).await?,
        expired_tokens: sweep_prefix::<AccessTokenRecord>(&store, ACCESS_TOKENS_PREFIX, |r| {
            r.is_expired()
        })
        .await?,
    })
}

async fn sweep_prefix<T: DeserializeOwned>(
    store: &Arc<dyn CredentialStore>,
    prefix: &str,
    expired: impl Fn(&T) -> bool,
) -> Result<usize> {
    let mut removed = 0;
    for object in store.list(prefix).await? {
        let Some(raw) = store.get(&object.key).await? else {
            continue;
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(record) if expired(&record) => {
                if store.delete(&object.key).await? {
                    removed += 1;
                }
            }
            Ok(_) => {}
            Err(err) => debug!("Skipping unparseable record {}: {}", object.key, err),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsign_core::Config;
    use pairsign_oidc::records::{access_token_key, code_key};
    use pairsign_oidc::UserRecord;
    use pairsign_store::MemoryStore;

    fn expired_code_json() -> String {
        serde_json::to_string(&CodeRecord {
            client_id: "web".to_string(),
            redirect_uri: "https://app/cb".to_string(),
            sub: "u1".to_string(),
            email: "a@b.c".to_string(),
            expires: 0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_and_keeps_live() {
        let state = AppState::new(Config::default(), Arc::new(MemoryStore::new()));
        let store = state.credentials.store();

        store
            .put(&code_key("stale"), &expired_code_json(), None)
            .await
            .unwrap();
        store
            .put(
                &access_token_key("stale"),
                &serde_json::to_string(&AccessTokenRecord {
                    sub: "u1".to_string(),
                    email: "a@b.c".to_string(),
                    expires: 0,
                })
                .unwrap(),
                None,
            )
            .await
            .unwrap();

        let user = UserRecord::new("a@b.c", "pw", None);
        let live_code = state
            .credentials
            .issue_code("web", "https://app/cb", &user)
            .await
            .unwrap();
        let live_token = state.credentials.issue_access_token("u1", "a@b.c").await.unwrap();

        let stats = sweep_expired(&state).await.unwrap();
        assert_eq!(
            stats,
            SweepStats {
                expired_codes: 1,
                expired_tokens: 1,
            }
        );

        assert!(state.credentials.code(&live_code).await.unwrap().is_some());
        assert!(state
            .credentials
            .access_token(&live_token)
            .await
            .unwrap()
            .is_some());
        assert!(state.credentials.code("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_ignores_unparseable_records() {
        let state = AppState::new(Config::default(), Arc::new(MemoryStore::new()));
        let store = state.credentials.store();
        store.put(&code_key("junk"), "not json", None).await.unwrap();

        let stats = sweep_expired(&state).await.unwrap();
        assert_eq!(stats, SweepStats::default());
        assert!(store.get(&code_key("junk")).await.unwrap().is_some());
    }
}
