//! RS256 signing-key lifecycle and ID-token minting
//!
//! A single RSA-2048 key signs every ID token. It is generated on first use,
//! persisted in the credential store, and loaded from there on later starts
//! so tokens stay verifiable across restarts. `put_if_absent` arbitrates
//! concurrent first starts: exactly one instance persists its key and the
//! others adopt the winner's.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use pairsign_core::{Error, Result};
use pairsign_store::CredentialStore;

use crate::records::SIGNING_KEY_KEY;

const RSA_BITS: usize = 2048;

/// Public half of the signing key, as served from the JWKS endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    pub n: String,
    pub e: String,
    pub alg: String,
    pub r#use: String,
}

/// JWKS document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Claims carried by an ID token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub email: String,
}

/// Persisted form of the signing key
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigningKeyRecord {
    private_pem: String,
    public_jwk: Jwk,
}

/// A loaded signing key, ready to mint RS256 tokens
pub struct SigningKey {
    pub kid: String,
    pub public_jwk: Jwk,
    encoding_key: EncodingKey,
}

/// Lazily creates and caches the signing key
pub struct KeyService {
    store: Arc<dyn CredentialStore>,
    key: OnceCell<Arc<SigningKey>>,
}

impl KeyService {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            key: OnceCell::new(),
        }
    }

    /// Get the signing key, generating and persisting one on first use
    pub async fn signing_key(&self) -> Result<Arc<SigningKey>> {
        let key = self
            .key
            .get_or_try_init(|| async { self.load_or_generate().await.map(Arc::new) })
            .await?;
        Ok(key.clone())
    }

    /// The JWKS document for the current key
    pub async fn jwks(&self) -> Result<Jwks> {
        let key = self.signing_key().await?;
        Ok(Jwks {
            keys: vec![key.public_jwk.clone()],
        })
    }

    /// Sign an ID token with the current key
    pub async fn sign_id_token(&self, claims: &IdTokenClaims) -> Result<String> {
        let key = self.signing_key().await?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        jsonwebtoken::encode(&header, claims, &key.encoding_key)
            .map_err(|err| Error::Signing(err.to_string()))
    }

    async fn load_or_generate(&self) -> Result<SigningKey> {
        if let Some(raw) = self.store.get(SIGNING_KEY_KEY).await? {
            return parse_record(&raw);
        }

        let record = generate_record().await?;
        let raw = serde_json::to_string(&record)?;
        if self.store.put_if_absent(SIGNING_KEY_KEY, &raw).await? {
            info!("Generated new RS256 signing key: {}", record.public_jwk.kid);
            return signing_key_from_record(record);
        }

        // Another instance persisted its key first; adopt that one.
        let raw = self
            .store
            .get(SIGNING_KEY_KEY)
            .await?
            .ok_or_else(|| Error::Key("signing key disappeared during initialization".to_string()))?;
        parse_record(&raw)
    }
}

fn parse_record(raw: &str) -> Result<SigningKey> {
    let record: SigningKeyRecord = serde_json::from_str(raw)?;
    signing_key_from_record(record)
}

fn signing_key_from_record(record: SigningKeyRecord) -> Result<SigningKey> {
    let encoding_key = EncodingKey::from_rsa_pem(record.private_pem.as_bytes())
        .map_err(|err| Error::Key(err.to_string()))?;
    Ok(SigningKey {
        kid: record.public_jwk.kid.clone(),
        public_jwk: record.public_jwk,
        encoding_key,
    })
}

async fn generate_record() -> Result<SigningKeyRecord> {
    // Keygen takes a noticeable amount of CPU; keep it off the async workers.
    let private_key =
        tokio::task::spawn_blocking(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_BITS))
            .await
            .map_err(|err| Error::Key(err.to_string()))?
            .map_err(|err| Error::Key(err.to_string()))?;

    let private_pem = private_key
        .to_pkcs8_pem(Default::default())
        .map_err(|err| Error::Key(err.to_string()))?
        .to_string();

    let public_key = private_key.to_public_key();
    let kid = uuid::Uuid::new_v4().to_string();
    let public_jwk = Jwk {
        kty: "RSA".to_string(),
        kid,
        n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        alg: "RS256".to_string(),
        r#use: "sig".to_string(),
    };

    Ok(SigningKeyRecord {
        private_pem,
        public_jwk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
    use pairsign_store::MemoryStore;

    #[tokio::test]
    async fn test_key_persists_and_tokens_verify_against_jwks() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        let service = KeyService::new(store.clone());

        let key = service.signing_key().await.unwrap();
        assert_eq!(key.public_jwk.kty, "RSA");
        assert_eq!(key.public_jwk.alg, "RS256");
        assert_eq!(key.public_jwk.r#use, "sig");

        let claims = IdTokenClaims {
            iss: "https://id.example.com".to_string(),
            sub: "u1".to_string(),
            aud: "client-1".to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
            email: "a@b.c".to_string(),
        };
        let token = service.sign_id_token(&claims).await.unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(key.kid.as_str()));

        let jwks = service.jwks().await.unwrap();
        assert_eq!(jwks.keys.len(), 1);
        let jwk = &jwks.keys[0];

        let decoding = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["client-1"]);
        validation.set_issuer(&["https://id.example.com"]);
        let data = decode::<IdTokenClaims>(&token, &decoding, &validation).unwrap();
        assert_eq!(data.claims.sub, "u1");
        assert_eq!(data.claims.email, "a@b.c");

        // A second service over the same store loads the same key.
        let service2 = KeyService::new(store);
        let key2 = service2.signing_key().await.unwrap();
        assert_eq!(key2.kid, key.kid);
    }

    #[tokio::test]
    async fn test_jwk_components_are_base64url() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        let service = KeyService::new(store);
        let key = service.signing_key().await.unwrap();

        let n = URL_SAFE_NO_PAD.decode(&key.public_jwk.n).unwrap();
        let e = URL_SAFE_NO_PAD.decode(&key.public_jwk.e).unwrap();
        assert_eq!(n.len(), RSA_BITS / 8);
        assert_eq!(e, vec![1, 0, 1]);
    }
}
