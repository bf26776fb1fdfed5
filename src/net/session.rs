use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Validated, server-side identity of an authenticated connection.
/// Established once per connection and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub user: String,
}

/// Exchanges an opaque token for a session handle. External collaborator
/// seam: token issuance lives outside this subsystem.
pub trait TokenValidator: Send + Sync {
    fn resolve(&self, token: &str) -> Result<SessionHandle, String>;
}

/// Validates self-describing signed tokens of the form
/// `base64(session_id:user).sha1hex(payload + secret)`.
pub struct SignedTokenValidator {
    secret: String,
}

impl SignedTokenValidator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Builds a token this validator accepts. Token issuance belongs to
    /// the account service; this exists for tooling and tests.
    pub fn issue(&self, session_id: SessionId, user: &str) -> String {
        let payload = BASE64_ENGINE.encode(format!("{}:{}", session_id.0, user));
        let digest = self.digest(&payload);
        format!("{payload}.{digest}")
    }

    fn digest(&self, payload: &str) -> String {
        let mut sha1 = Sha1::new();
        sha1.update(payload.as_bytes());
        sha1.update(self.secret.as_bytes());
        let digest = sha1.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }
}

impl TokenValidator for SignedTokenValidator {
    fn resolve(&self, token: &str) -> Result<SessionHandle, String> {
        let (payload, digest) = token
            .split_once('.')
            .ok_or_else(|| "token missing signature".to_string())?;
        if self.digest(payload) != digest {
            return Err("token signature mismatch".to_string());
        }
        let decoded = BASE64_ENGINE
            .decode(payload)
            .map_err(|err| format!("token payload decode failed: {err}"))?;
        let decoded =
            String::from_utf8(decoded).map_err(|_| "token payload is not utf-8".to_string())?;
        let (session, user) = decoded
            .split_once(':')
            .ok_or_else(|| "token payload missing session id".to_string())?;
        let session_id = session
            .parse::<u64>()
            .map_err(|_| "token session id is not numeric".to_string())?;
        if user.is_empty() {
            return Err("token user is empty".to_string());
        }
        Ok(SessionHandle {
            session_id: SessionId(session_id),
            user: user.to_string(),
        })
    }
}

/// Fixed token table for tests and embedded setups.
#[derive(Default)]
pub struct TableTokenValidator {
    tokens: Mutex<HashMap<String, SessionHandle>>,
}

impl TableTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, handle: SessionHandle) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(token.into(), handle);
        }
    }
}

impl TokenValidator for TableTokenValidator {
    fn resolve(&self, token: &str) -> Result<SessionHandle, String> {
        let tokens = self
            .tokens
            .lock()
            .map_err(|_| "token table lock poisoned".to_string())?;
        tokens
            .get(token)
            .cloned()
            .ok_or_else(|| "unknown token".to_string())
    }
}

/// Live connection -> bound session map. Written once on bind, removed
/// on disconnect, read on every frame dispatch.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    bindings: Mutex<HashMap<ConnectionId, SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn bind(&self, connection: ConnectionId, handle: SessionHandle) {
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.insert(connection, handle);
        }
    }

    pub fn lookup(&self, connection: ConnectionId) -> Option<SessionHandle> {
        self.bindings
            .lock()
            .ok()
            .and_then(|bindings| bindings.get(&connection).cloned())
    }

    pub fn remove(&self, connection: ConnectionId) -> Option<SessionHandle> {
        self.bindings
            .lock()
            .ok()
            .and_then(|mut bindings| bindings.remove(&connection))
    }

    pub fn bound_count(&self) -> usize {
        self.bindings.lock().map(|bindings| bindings.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_token_roundtrip() {
        let validator = SignedTokenValidator::new("super secret");
        let token = validator.issue(SessionId(42), "streamer");
        let handle = validator.resolve(&token).expect("resolve");
        assert_eq!(handle.session_id, SessionId(42));
        assert_eq!(handle.user, "streamer");
    }

    #[test]
    fn signed_token_rejects_tampering() {
        let validator = SignedTokenValidator::new("super secret");
        let token = validator.issue(SessionId(42), "streamer");
        let mut tampered = token.clone();
        tampered.replace_range(0..1, "x");
        assert!(validator.resolve(&tampered).is_err());

        let other_secret = SignedTokenValidator::new("different");
        assert!(other_secret.resolve(&token).is_err());
        assert!(validator.resolve("no-signature").is_err());
    }

    #[test]
    fn table_validator_resolves_known_tokens_only() {
        let validator = TableTokenValidator::new();
        validator.register(
            "abc",
            SessionHandle {
                session_id: SessionId(7),
                user: "alice".to_string(),
            },
        );
        assert_eq!(
            validator.resolve("abc").expect("resolve").session_id,
            SessionId(7)
        );
        assert!(validator.resolve("def").is_err());
    }

    #[test]
    fn registry_bind_lookup_remove() {
        let registry = ConnectionRegistry::new();
        let connection = registry.allocate();
        assert!(registry.lookup(connection).is_none());

        let handle = SessionHandle {
            session_id: SessionId(3),
            user: "bob".to_string(),
        };
        registry.bind(connection, handle.clone());
        assert_eq!(registry.lookup(connection), Some(handle.clone()));
        assert_eq!(registry.remove(connection), Some(handle));
        assert!(registry.lookup(connection).is_none());
        assert_eq!(registry.bound_count(), 0);
    }
}
