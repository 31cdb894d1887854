//! Typed credential access on top of a [`CredentialStore`]

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use pairsign_core::Result;
use pairsign_store::CredentialStore;

use crate::records::{
    access_token_key, client_key, code_key, user_key, AccessTokenRecord, ClientRecord, CodeRecord,
    UserRecord, ACCESS_TOKEN_TTL_MS, CLIENTS_PREFIX, CODE_TTL_MS, USERS_PREFIX,
};

/// Reads and writes the stored records as their Rust types
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn CredentialStore>,
}

impl Credentials {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> Arc<dyn CredentialStore> {
        self.store.clone()
    }

    pub async fn user(&self, email: &str) -> Result<Option<UserRecord>> {
        self.load(&user_key(email)).await
    }

    pub async fn save_user(&self, user: &UserRecord) -> Result<()> {
        self.save(&user_key(&user.email), user, None).await
    }

    pub async fn client(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        self.load(&client_key(client_id)).await
    }

    pub async fn save_client(&self, client: &ClientRecord) -> Result<()> {
        self.save(&client_key(&client.client_id), client, None).await
    }

    /// Mint a single-use authorization code bound to this request and user
    pub async fn issue_code(
        &self,
        client_id: &str,
        redirect_uri: &str,
        user: &UserRecord,
    ) -> Result<String> {
        let code = Uuid::new_v4().to_string();
        let record = CodeRecord::new(client_id, redirect_uri, &user.sub, &user.email);
        self.save(&code_key(&code), &record, Some(CODE_TTL_MS as u64 / 1000))
            .await?;
        Ok(code)
    }

    pub async fn code(&self, code: &str) -> Result<Option<CodeRecord>> {
        self.load(&code_key(code)).await
    }

    /// Burn an authorization code. Returns whether this call removed it,
    /// so concurrent redemptions of the same code mint exactly one token.
    pub async fn consume_code(&self, code: &str) -> Result<bool> {
        Ok(self.store.delete(&code_key(code)).await?)
    }

    pub async fn issue_access_token(&self, sub: &str, email: &str) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let record = AccessTokenRecord::new(sub, email);
        self.save(
            &access_token_key(&token),
            &record,
            Some(ACCESS_TOKEN_TTL_MS as u64 / 1000),
        )
        .await?;
        Ok(token)
    }

    pub async fn access_token(&self, token: &str) -> Result<Option<AccessTokenRecord>> {
        self.load(&access_token_key(token)).await
    }

    pub async fn list_users(&self) -> Result<Vec<(UserRecord, DateTime<Utc>)>> {
        self.list_records(USERS_PREFIX).await
    }

    pub async fn list_clients(&self) -> Result<Vec<(ClientRecord, DateTime<Utc>)>> {
        self.list_records(CLIENTS_PREFIX).await
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save<T: Serialize>(&self, key: &str, record: &T, ttl_secs: Option<u64>) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.store.put(key, &raw, ttl_secs).await?;
        Ok(())
    }

    async fn list_records<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(T, DateTime<Utc>)>> {
        let mut records = Vec::new();
        for object in self.store.list(prefix).await? {
            let Some(raw) = self.store.get(&object.key).await? else {
                continue;
            };
            match serde_json::from_str(&raw) {
                Ok(record) => records.push((record, object.uploaded_at)),
                Err(err) => warn!("Skipping unparseable record {}: {}", object.key, err),
            }
        }
        Ok(records)
    }
}
