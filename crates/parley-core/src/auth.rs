//! Credential verification collaborator.
//!
//! Token issuance lives in the surrounding auth service; this core only
//! verifies what clients present at `auth` time.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::errors::HubError;
use crate::ids::UserId;

/// Verifies a presented credential and resolves the user it belongs to.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserId, HubError>;
}

/// Verifier for tokens of the form `<user_id>.<hex(sha256(secret "." user_id))>`.
///
/// The shared secret is held behind `secrecy` so it is redacted in Debug
/// output and zeroized on drop.
pub struct SignedTokenVerifier {
    secret: SecretString,
}

impl SignedTokenVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
        }
    }

    fn expected_signature(&self, user_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.expose_secret().as_bytes());
        hasher.update(b".");
        hasher.update(user_id.as_bytes());
        hex_encode(&hasher.finalize())
    }
}

impl std::fmt::Debug for SignedTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignedTokenVerifier([REDACTED])")
    }
}

impl TokenVerifier for SignedTokenVerifier {
    fn verify(&self, token: &str) -> Result<UserId, HubError> {
        let (user_id, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| HubError::Auth("malformed token".into()))?;

        if user_id.is_empty() || user_id == crate::ids::ASSISTANT_USER_ID {
            return Err(HubError::Auth("invalid subject".into()));
        }

        if !constant_time_eq(signature, &self.expected_signature(user_id)) {
            return Err(HubError::Auth("invalid token signature".into()));
        }

        Ok(UserId::from_raw(user_id))
    }
}

/// Verifier with a fixed token -> user table, for tests and local runs.
#[derive(Debug, Default)]
pub struct StaticVerifier {
    entries: Vec<(String, UserId)>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.entries.push((token.into(), UserId::from_raw(user_id)));
        self
    }
}

impl TokenVerifier for StaticVerifier {
    fn verify(&self, token: &str) -> Result<UserId, HubError> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, u)| u.clone())
            .ok_or_else(|| HubError::Auth("invalid token".into()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Mint a token the `SignedTokenVerifier` will accept. Test/dev helper; the
/// production issuer lives outside this process.
pub fn sign_token(secret: &str, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(user_id.as_bytes());
    format!("{user_id}.{}", hex_encode(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_token_roundtrip() {
        let verifier = SignedTokenVerifier::new("topsecret");
        let token = sign_token("topsecret", "u1");
        let user = verifier.verify(&token).unwrap();
        assert_eq!(user.as_str(), "u1");
    }

    #[test]
    fn wrong_secret_rejected() {
        let verifier = SignedTokenVerifier::new("topsecret");
        let token = sign_token("othersecret", "u1");
        assert!(matches!(verifier.verify(&token), Err(HubError::Auth(_))));
    }

    #[test]
    fn tampered_subject_rejected() {
        let verifier = SignedTokenVerifier::new("topsecret");
        let token = sign_token("topsecret", "u1");
        let tampered = token.replacen("u1", "u2", 1);
        assert!(verifier.verify(&tampered).is_err());
    }

    #[test]
    fn malformed_token_rejected() {
        let verifier = SignedTokenVerifier::new("topsecret");
        assert!(verifier.verify("no-separator").is_err());
        assert!(verifier.verify("").is_err());
    }

    #[test]
    fn assistant_subject_rejected() {
        // Nobody may authenticate as the AI sentinel.
        let verifier = SignedTokenVerifier::new("topsecret");
        let token = sign_token("topsecret", "assistant");
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn static_verifier_lookup() {
        let verifier = StaticVerifier::new()
            .with_token("valid-1", "u1")
            .with_token("valid-2", "u2");
        assert_eq!(verifier.verify("valid-2").unwrap().as_str(), "u2");
        assert!(verifier.verify("valid-3").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let verifier = SignedTokenVerifier::new("topsecret");
        let dbg = format!("{verifier:?}");
        assert!(!dbg.contains("topsecret"));
    }
}
