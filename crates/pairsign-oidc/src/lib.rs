//! OIDC domain logic for pairsign
//!
//! Password hashing, the stored record types (users, clients, authorization
//! codes, access tokens), typed credential access on top of a
//! [`pairsign_store::CredentialStore`], and the RS256 signing-key service.

pub mod credentials;
pub mod keys;
pub mod password;
pub mod records;

pub use credentials::Credentials;
pub use keys::{IdTokenClaims, Jwk, Jwks, KeyService, SigningKey};
pub use records::{AccessTokenRecord, ClientRecord, CodeRecord, UserRecord};
