//! Server configuration.

use ankisync_collection::MergePolicy;
use ankisync_protocol::SYNC_VERSION;
use std::net::SocketAddr;
use std::time::Duration;

/// Default port of the sync endpoint.
pub const DEFAULT_PORT: u16 = 27701;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Highest sync protocol version the server speaks.
    pub sync_version: u32,
    /// How long an unfinished session may sit idle before a new `start`
    /// for the same user releases it.
    pub session_idle_timeout: Duration,
    /// Size limit for request payloads, before and after decompression.
    pub max_payload_bytes: usize,
    /// How conflicting remote records are merged.
    pub merge_policy: MergePolicy,
    /// Lifetime of an issued host key.
    pub host_key_expiry: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            sync_version: SYNC_VERSION,
            session_idle_timeout: Duration::from_secs(120),
            max_payload_bytes: 100 * 1024 * 1024,
            merge_policy: MergePolicy::default(),
            host_key_expiry: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Sets the supported protocol version.
    pub fn with_sync_version(mut self, version: u32) -> Self {
        self.sync_version = version;
        self
    }

    /// Sets the idle timeout after which an abandoned session is released.
    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Sets the payload size limit.
    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    /// Sets the merge policy.
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Sets the host key lifetime.
    pub fn with_host_key_expiry(mut self, expiry: Duration) -> Self {
        self.host_key_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.sync_version, 10);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(120));
        assert_eq!(config.merge_policy, MergePolicy::LastWriteWins);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_sync_version(9)
            .with_max_payload_bytes(1024)
            .with_merge_policy(MergePolicy::ServerWins)
            .with_session_idle_timeout(Duration::from_secs(5));

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.sync_version, 9);
        assert_eq!(config.max_payload_bytes, 1024);
        assert_eq!(config.merge_policy, MergePolicy::ServerWins);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(5));
    }
}
