// Handshake authentication
//
// Two credential families are accepted: key credentials for programmatic
// agents (agent keys and personal access tokens, both random hex behind
// a prefix, stored as SHA-256 hashes) and bearer JWTs for user sessions.
// Rejections carry a well-defined reason code.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Agent key prefix for identification
pub const AGENT_KEY_PREFIX: &str = "mcy_";
/// Personal access token prefix
pub const ACCESS_TOKEN_PREFIX: &str = "mcyp_";
const KEY_LENGTH: usize = 32; // 32 random bytes = 64 hex chars

/// Why a handshake was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MalformedCredential,
    UnknownKey,
    ExpiredCredential,
    InvalidToken,
    ChannelMismatch,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::MalformedCredential => "malformed_credential",
            RejectReason::UnknownKey => "unknown_key",
            RejectReason::ExpiredCredential => "expired_credential",
            RejectReason::InvalidToken => "invalid_token",
            RejectReason::ChannelMismatch => "channel_mismatch",
        };
        f.write_str(s)
    }
}

/// Credential presented at handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credential {
    /// Programmatic agent key (mcy_...)
    AgentKey { key: String },
    /// Personal access token (mcyp_...)
    AccessToken { token: String },
    /// Bearer JWT for user sessions
    Bearer { token: String },
}

/// Who authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Agent { agent_id: Uuid },
    User { user_id: Uuid },
}

/// A generated key pair (full key shown only once)
#[derive(Debug)]
pub struct GeneratedKey {
    /// Full key (prefix + random hex)
    pub key: String,
    /// SHA-256 hash for storage
    pub key_hash: String,
    /// Display prefix (e.g. "mcy_ab12cd34...")
    pub key_prefix: String,
}

/// Generate a new agent key
pub fn generate_agent_key() -> GeneratedKey {
    generate_key(AGENT_KEY_PREFIX)
}

/// Generate a new personal access token
pub fn generate_access_token() -> GeneratedKey {
    generate_key(ACCESS_TOKEN_PREFIX)
}

fn generate_key(prefix: &str) -> GeneratedKey {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..KEY_LENGTH).map(|_| rng.gen()).collect();
    let random_hex = hex::encode(&random_bytes);

    let key = format!("{prefix}{random_hex}");
    let key_hash = hash_key(&key);
    let key_prefix = format!("{prefix}{}...", &random_hex[..8]);

    GeneratedKey {
        key,
        key_hash,
        key_prefix,
    }
}

/// Hash a key for storage/lookup
pub fn hash_key(key: &str) -> String {
    let hash = Sha256::digest(key.as_bytes());
    hex::encode(hash)
}

/// Validate key format (prefix + 64 hex chars)
pub fn is_valid_key_format(key: &str, prefix: &str) -> bool {
    let Some(key_part) = key.strip_prefix(prefix) else {
        return false;
    };
    key_part.len() == KEY_LENGTH * 2 && key_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Claims carried by a bearer token
#[derive(Debug, Serialize, Deserialize)]
struct BearerClaims {
    sub: Uuid,
    exp: i64,
}

struct KeyRecord {
    principal: Principal,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory credential directory
///
/// Production deployments load hashes from the persistence collaborator;
/// the store itself only ever sees hashes.
pub struct AuthStore {
    keys: DashMap<String, KeyRecord>,
    jwt_secret: String,
}

impl AuthStore {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            keys: DashMap::new(),
            jwt_secret: jwt_secret.into(),
        }
    }

    /// Register an agent key hash for an agent
    pub fn register_agent_key(&self, key_hash: impl Into<String>, agent_id: Uuid) {
        self.keys.insert(
            key_hash.into(),
            KeyRecord {
                principal: Principal::Agent { agent_id },
                expires_at: None,
            },
        );
    }

    /// Register a personal access token hash with an optional expiry
    pub fn register_access_token(
        &self,
        token_hash: impl Into<String>,
        agent_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.keys.insert(
            token_hash.into(),
            KeyRecord {
                principal: Principal::Agent { agent_id },
                expires_at,
            },
        );
    }

    /// Revoke a credential by hash
    pub fn revoke(&self, key_hash: &str) {
        self.keys.remove(key_hash);
    }

    /// Authenticate a handshake credential
    pub fn authenticate(&self, credential: &Credential) -> Result<Principal, RejectReason> {
        match credential {
            Credential::AgentKey { key } => {
                if !is_valid_key_format(key, AGENT_KEY_PREFIX) {
                    return Err(RejectReason::MalformedCredential);
                }
                self.lookup_hashed(key)
            }
            Credential::AccessToken { token } => {
                if !is_valid_key_format(token, ACCESS_TOKEN_PREFIX) {
                    return Err(RejectReason::MalformedCredential);
                }
                self.lookup_hashed(token)
            }
            Credential::Bearer { token } => {
                let decoded = decode::<BearerClaims>(
                    token,
                    &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
                    &Validation::default(),
                )
                .map_err(|_| RejectReason::InvalidToken)?;
                Ok(Principal::User {
                    user_id: decoded.claims.sub,
                })
            }
        }
    }

    fn lookup_hashed(&self, key: &str) -> Result<Principal, RejectReason> {
        let hash = hash_key(key);
        let record = self.keys.get(&hash).ok_or(RejectReason::UnknownKey)?;
        if let Some(expires_at) = record.expires_at {
            if expires_at < Utc::now() {
                return Err(RejectReason::ExpiredCredential);
            }
        }
        Ok(record.principal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn test_generate_agent_key() {
        let generated = generate_agent_key();
        assert!(generated.key.starts_with(AGENT_KEY_PREFIX));
        assert!(is_valid_key_format(&generated.key, AGENT_KEY_PREFIX));
        assert_eq!(generated.key_hash, hash_key(&generated.key));
        assert!(generated.key_prefix.ends_with("..."));
    }

    #[test]
    fn test_key_format_validation() {
        let generated = generate_agent_key();
        assert!(is_valid_key_format(&generated.key, AGENT_KEY_PREFIX));

        // Wrong prefix
        assert!(!is_valid_key_format(&generated.key, ACCESS_TOKEN_PREFIX));
        // Too short
        assert!(!is_valid_key_format("mcy_1234", AGENT_KEY_PREFIX));
        // Non-hex
        assert!(!is_valid_key_format(
            &format!("mcy_{}", "g".repeat(64)),
            AGENT_KEY_PREFIX
        ));
    }

    #[test]
    fn test_agent_key_authentication() {
        let store = AuthStore::new("secret");
        let agent_id = Uuid::now_v7();
        let generated = generate_agent_key();
        store.register_agent_key(generated.key_hash.clone(), agent_id);

        let principal = store
            .authenticate(&Credential::AgentKey {
                key: generated.key.clone(),
            })
            .unwrap();
        assert_eq!(principal, Principal::Agent { agent_id });

        // Unknown key of valid shape
        let stranger = generate_agent_key();
        let err = store
            .authenticate(&Credential::AgentKey { key: stranger.key })
            .unwrap_err();
        assert_eq!(err, RejectReason::UnknownKey);

        // Revocation takes effect immediately
        store.revoke(&generated.key_hash);
        let err = store
            .authenticate(&Credential::AgentKey { key: generated.key })
            .unwrap_err();
        assert_eq!(err, RejectReason::UnknownKey);
    }

    #[test]
    fn test_expired_access_token() {
        let store = AuthStore::new("secret");
        let generated = generate_access_token();
        store.register_access_token(
            generated.key_hash,
            Uuid::now_v7(),
            Some(Utc::now() - chrono::Duration::hours(1)),
        );

        let err = store
            .authenticate(&Credential::AccessToken {
                token: generated.key,
            })
            .unwrap_err();
        assert_eq!(err, RejectReason::ExpiredCredential);
    }

    #[test]
    fn test_bearer_token() {
        let store = AuthStore::new("shared-secret");
        let user_id = Uuid::now_v7();
        let claims = BearerClaims {
            sub: user_id,
            exp: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"shared-secret"),
        )
        .unwrap();

        let principal = store.authenticate(&Credential::Bearer { token }).unwrap();
        assert_eq!(principal, Principal::User { user_id });

        // Wrong signature rejects
        let forged = encode(
            &Header::default(),
            &BearerClaims {
                sub: user_id,
                exp: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
            },
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();
        let err = store
            .authenticate(&Credential::Bearer { token: forged })
            .unwrap_err();
        assert_eq!(err, RejectReason::InvalidToken);
    }

    #[test]
    fn test_malformed_credential() {
        let store = AuthStore::new("secret");
        let err = store
            .authenticate(&Credential::AgentKey {
                key: "not-a-key".into(),
            })
            .unwrap_err();
        assert_eq!(err, RejectReason::MalformedCredential);
    }
}
