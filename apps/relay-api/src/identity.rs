//! Identity provider boundary.
//!
//! The gateway never sees secrets beyond IDENTIFY: it hands them to an
//! `IdentityProvider` and keeps only the resolved `Identity`.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use relay_common::id::{prefix, prefixed_ulid};

/// An authenticated user reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("account already exists")]
    AlreadyExists,

    #[error("identity provider error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_credentials(&self, name: &str, secret: &str) -> Result<Identity, IdentityError>;
    async fn create_account(&self, name: &str, secret: &str) -> Result<Identity, IdentityError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Account {
    user_id: String,
    password_hash: String,
}

/// Accounts held in memory with Argon2id password hashes.
pub struct MemoryIdentityProvider {
    accounts: DashMap<String, Account>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Create every `name:secret` pair in `seed`, skipping ones that exist.
    pub async fn seed(&self, seed: &[(String, String)]) -> Result<usize, IdentityError> {
        let mut created = 0;
        for (name, secret) in seed {
            match self.create_account(name, secret).await {
                Ok(identity) => {
                    tracing::info!(user_id = %identity.user_id, name = %identity.name, "seeded account");
                    created += 1;
                }
                Err(IdentityError::AlreadyExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn verify_credentials(&self, name: &str, secret: &str) -> Result<Identity, IdentityError> {
        let (user_id, hash) = {
            let account = self.accounts.get(name).ok_or(IdentityError::Unauthorized)?;
            (account.user_id.clone(), account.password_hash.clone())
        };
        verify_password(secret, &hash)?;
        Ok(Identity {
            user_id,
            name: name.to_string(),
        })
    }

    async fn create_account(&self, name: &str, secret: &str) -> Result<Identity, IdentityError> {
        if name.trim().is_empty() || secret.is_empty() {
            return Err(IdentityError::Unauthorized);
        }
        let password_hash = hash_password(secret)?;

        match self.accounts.entry(name.to_string()) {
            Entry::Occupied(_) => Err(IdentityError::AlreadyExists),
            Entry::Vacant(slot) => {
                let user_id = prefixed_ulid(prefix::USER);
                slot.insert(Account {
                    user_id: user_id.clone(),
                    password_hash,
                });
                Ok(Identity {
                    user_id,
                    name: name.to_string(),
                })
            }
        }
    }
}

/// Hash a password using Argon2id with a random salt.
fn hash_password(password: &str) -> Result<String, IdentityError> {
    use argon2::Argon2;
    use password_hash::rand_core::OsRng;
    use password_hash::{PasswordHasher, SaltString};

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            tracing::error!(?e, "password hashing failed");
            IdentityError::Internal("failed to process password".to_string())
        })
}

/// Verify a password against an Argon2id hash.
fn verify_password(password: &str, hash: &str) -> Result<(), IdentityError> {
    use argon2::Argon2;
    use password_hash::{PasswordHash, PasswordVerifier};

    let parsed =
        PasswordHash::new(hash).map_err(|_| IdentityError::Internal("invalid hash format".into()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| IdentityError::Unauthorized)
}

/// Parse `name:secret,name:secret` into pairs. Malformed entries are skipped.
pub fn parse_seed_accounts(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, secret) = pair.trim().split_once(':')?;
            let name = name.trim();
            if name.is_empty() || secret.is_empty() {
                return None;
            }
            Some((name.to_string(), secret.to_string()))
        })
        .collect()
}
