//! Authentication support for the sync server.
//!
//! Two steps guard every sync:
//!
//! 1. `hostKey` checks a user name and password against [`Credentials`]
//!    and issues a host key through the [`HostKeyAuthority`].
//! 2. Every later request presents that key; the authority resolves it
//!    back to the user whose collection the request may touch.
//!
//! ## Host key format
//!
//! A host key is the hex encoded HMAC-SHA256, under the server secret, of
//! `user:unix_secs:salt` where `salt` is eight random alphanumerics. The key
//! carries no information itself; the authority keeps the mapping.

use crate::error::{ServerError, ServerResult};
use ankisync_collection::validate_user_name;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Length of the random salt mixed into each host key.
const SALT_LEN: usize = 8;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for host key derivation.
    pub secret: Vec<u8>,
    /// Host key lifetime.
    pub key_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            key_expiry: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Creates a configuration with a fresh random 32 byte secret.
    pub fn random() -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret)
    }

    /// Sets the host key lifetime.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.key_expiry = expiry;
        self
    }
}

/// Known users and their password digests.
///
/// Passwords are never stored: each entry holds the HMAC-SHA256 of the
/// password keyed by the user name.
#[derive(Clone, Default)]
pub struct Credentials {
    users: HashMap<String, Vec<u8>>,
}

impl Credentials {
    /// Creates an empty credential set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the user name cannot name a collection.
    pub fn add_user(&mut self, user: &str, password: &str) -> ServerResult<()> {
        validate_user_name(user)?;
        let digest = password_mac(user, password)?.finalize().into_bytes().to_vec();
        self.users.insert(user.to_string(), digest);
        Ok(())
    }

    /// Parses a `name:password` pair and adds the user.
    ///
    /// Everything after the first `:` is the password.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] if there is no `:` separator.
    pub fn add_pair(&mut self, pair: &str) -> ServerResult<()> {
        let (user, password) = pair.split_once(':').ok_or_else(|| {
            ServerError::InvalidRequest("expected a user as name:password".into())
        })?;
        self.add_user(user, password)
    }

    /// Checks a user name and password in constant time.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        let Some(expected) = self.users.get(user) else {
            return false;
        };
        match password_mac(user, password) {
            Ok(mac) => mac.verify_slice(expected).is_ok(),
            Err(_) => false,
        }
    }

    /// Returns true if the user is known.
    pub fn contains(&self, user: &str) -> bool {
        self.users.contains_key(user)
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns true if no user is known.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut users: Vec<_> = self.users.keys().collect();
        users.sort();
        f.debug_struct("Credentials").field("users", &users).finish()
    }
}

fn password_mac(user: &str, password: &str) -> ServerResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(user.as_bytes())
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    mac.update(password.as_bytes());
    Ok(mac)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[derive(Debug, Clone)]
struct IssuedKey {
    user: String,
    issued_at: SystemTime,
}

/// Issues host keys and resolves them back to users.
pub struct HostKeyAuthority {
    config: AuthConfig,
    keys: RwLock<HashMap<String, IssuedKey>>,
}

impl HostKeyAuthority {
    /// Creates an authority with no issued keys.
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Issues a new host key for `user`.
    ///
    /// Earlier keys of the same user stay valid until they expire. Keys
    /// that have already expired are dropped here.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be derived.
    pub fn issue(&self, user: &str) -> ServerResult<String> {
        let issued_at = SystemTime::now();
        let secs = issued_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();

        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        mac.update(format!("{}:{}:{}", user, secs, salt).as_bytes());
        let key = to_hex(&mac.finalize().into_bytes());

        let mut keys = self.keys.write();
        let expiry = self.config.key_expiry;
        let before = keys.len();
        keys.retain(|_, issued| !is_expired(issued, issued_at, expiry));
        let pruned = before - keys.len();
        if pruned > 0 {
            debug!("dropped {} expired host keys", pruned);
        }
        keys.insert(
            key.clone(),
            IssuedKey {
                user: user.to_string(),
                issued_at,
            },
        );
        drop(keys);
        info!("issued host key for {}", user);
        Ok(key)
    }

    /// Resolves a presented host key to its user.
    ///
    /// Expired keys are forgotten on lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the key is missing,
    /// unknown or expired.
    pub fn resolve(&self, key: Option<&str>) -> ServerResult<String> {
        let key = key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServerError::NotAuthorized("missing host key".into()))?;

        let issued = self
            .keys
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| {
                warn!("rejected unknown host key");
                ServerError::NotAuthorized("unknown host key".into())
            })?;

        if is_expired(&issued, SystemTime::now(), self.config.key_expiry) {
            self.keys.write().remove(key);
            debug!("host key for {} expired", issued.user);
            return Err(ServerError::NotAuthorized("host key expired".into()));
        }

        Ok(issued.user)
    }

    /// Number of stored keys, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Returns true if no key has been issued.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

fn is_expired(issued: &IssuedKey, now: SystemTime, expiry: Duration) -> bool {
    now.duration_since(issued.issued_at).unwrap_or_default() > expiry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> HostKeyAuthority {
        HostKeyAuthority::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn verify_credentials() {
        let mut creds = Credentials::new();
        creds.add_user("alice", "hunter2").unwrap();

        assert!(creds.verify("alice", "hunter2"));
        assert!(!creds.verify("alice", "hunter3"));
        assert!(!creds.verify("bob", "hunter2"));
        assert!(!creds.verify("", ""));
    }

    #[test]
    fn same_password_different_users() {
        let mut creds = Credentials::new();
        creds.add_user("alice", "pw").unwrap();
        creds.add_user("bob", "pw").unwrap();

        assert_ne!(creds.users["alice"], creds.users["bob"]);
        assert!(creds.verify("bob", "pw"));
    }

    #[test]
    fn parse_pairs() {
        let mut creds = Credentials::new();
        creds.add_pair("alice:a:b").unwrap();
        assert!(creds.verify("alice", "a:b"));

        assert!(creds.add_pair("nopassword").is_err());
        assert!(creds.add_pair("../x:pw").is_err());
        assert_eq!(creds.len(), 1);
    }

    #[test]
    fn debug_hides_digests() {
        let mut creds = Credentials::new();
        creds.add_user("alice", "hunter2").unwrap();
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn issue_and_resolve() {
        let auth = authority();
        let key = auth.issue("alice").unwrap();

        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(auth.resolve(Some(&key)).unwrap(), "alice");
    }

    #[test]
    fn keys_are_unique() {
        let auth = authority();
        let first = auth.issue("alice").unwrap();
        let second = auth.issue("alice").unwrap();

        assert_ne!(first, second);
        assert_eq!(auth.resolve(Some(&first)).unwrap(), "alice");
        assert_eq!(auth.resolve(Some(&second)).unwrap(), "alice");
    }

    #[test]
    fn reject_missing_and_unknown_keys() {
        let auth = authority();
        auth.issue("alice").unwrap();

        assert!(matches!(auth.resolve(None), Err(ServerError::NotAuthorized(_))));
        assert!(matches!(auth.resolve(Some("")), Err(ServerError::NotAuthorized(_))));
        assert!(matches!(
            auth.resolve(Some("deadbeef")),
            Err(ServerError::NotAuthorized(_))
        ));
    }

    #[test]
    fn reject_expired_key() {
        let auth = HostKeyAuthority::new(
            AuthConfig::new(b"secret".to_vec()).with_expiry(Duration::from_secs(0)),
        );
        let key = auth.issue("alice").unwrap();

        std::thread::sleep(Duration::from_millis(10));

        assert!(auth.resolve(Some(&key)).is_err());
        assert!(auth.is_empty());
    }

    #[test]
    fn issuing_drops_expired_keys() {
        let auth = HostKeyAuthority::new(
            AuthConfig::new(b"secret".to_vec()).with_expiry(Duration::ZERO),
        );
        for _ in 0..100 {
            auth.issue("alice").unwrap();
        }

        std::thread::sleep(Duration::from_millis(5));

        let key = auth.issue("bob").unwrap();
        assert_eq!(auth.len(), 1);
        assert!(auth.keys.read().contains_key(&key));
    }

    #[test]
    fn issuing_keeps_live_keys() {
        let auth = authority();
        let alice = auth.issue("alice").unwrap();
        auth.issue("bob").unwrap();

        assert_eq!(auth.len(), 2);
        assert_eq!(auth.resolve(Some(&alice)).unwrap(), "alice");
    }
}
