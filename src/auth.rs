use axum::http::{HeaderMap, header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Bearer-token check in front of the user route. Only the digest of the
/// configured token is kept in memory.
#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    token_digest: Option<[u8; 32]>,
    user: UserProfile,
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

impl SessionGate {
    pub fn new(token: Option<&str>, user: UserProfile) -> Self {
        let token_digest = token.map(str::trim).filter(|t| !t.is_empty()).map(digest);
        Self { token_digest, user }
    }

    pub fn is_enabled(&self) -> bool {
        self.token_digest.is_some()
    }

    /// Short hex prefix of the token digest, safe to log.
    pub fn fingerprint(&self) -> Option<String> {
        self.token_digest.map(|d| hex::encode(&d[..4]))
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Option<&UserProfile> {
        let expected = self.token_digest?;
        let presented = headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?
            .trim();

        (digest(presented) == expected).then_some(&self.user)
    }
}
