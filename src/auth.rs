use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::ConfigError;

/// Resolved caller identity, as reported by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub is_admin: bool,
}

/// The identity collaborator: resolves a bearer token to an identity, or
/// None when the token is unknown/expired. Token issuance lives outside
/// this service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Identity>;
}

/// Static token table sourced from `PERCH_TOKENS`:
/// `token:user[:admin]` entries, comma-separated.
pub struct StaticTokenProvider {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenProvider {
    pub fn from_spec(spec: &str) -> Result<Self, ConfigError> {
        let mut tokens = HashMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.split(':');
            let token = parts.next().unwrap_or("");
            let user = parts
                .next()
                .ok_or_else(|| ConfigError(format!("token entry missing user: {entry}")))?;
            let is_admin = match parts.next() {
                None => false,
                Some("admin") => true,
                Some(other) => {
                    return Err(ConfigError(format!("unknown token flag: {other}")));
                }
            };
            if token.is_empty() || user.is_empty() {
                return Err(ConfigError(format!("malformed token entry: {entry}")));
            }
            tokens.insert(
                token.to_string(),
                Identity {
                    user: user.to_string(),
                    is_admin,
                },
            );
        }
        Ok(Self { tokens })
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}
