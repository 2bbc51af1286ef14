//! Tuning knobs for the server session and the client proxy.
//!
//! The protocol constants (30s heartbeat, 60s expiry) live here as defaults
//! rather than hard-coded values so liveness tests can run on short timers.

use std::time::Duration;

/// Default interval between heartbeat broadcasts.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default window a connection stays alive without a heartbeat pong.
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(60);

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default maximum frame body size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Default capacity of a connection's push channel.
pub const DEFAULT_PUSH_CAPACITY: usize = 256;

/// Default read buffer size for the reverse-channel reader.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Configuration for [`RpcSession`](crate::server::RpcSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between `heartbeat` pushes to every open connection.
    pub heartbeat_interval: Duration,
    /// How far into the future a heartbeat pong moves a connection's expiry.
    pub expiry_window: Duration,
    /// Interval between sweeps that tear down expired connections.
    pub sweep_interval: Duration,
    /// Maximum frame body size a connection's writer will emit; larger
    /// frames are dropped.
    pub max_frame_size: u32,
    /// Capacity of each connection's outbound message channel.
    pub push_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            expiry_window: DEFAULT_EXPIRY_WINDOW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            push_capacity: DEFAULT_PUSH_CAPACITY,
        }
    }
}

/// Configuration for [`RpcClient`](crate::client::RpcClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum accepted frame body size on the reverse channel.
    pub max_frame_size: u32,
    /// Size of the chunk buffer used by the reverse-channel reader.
    pub read_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.expiry_window, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
    }
}
