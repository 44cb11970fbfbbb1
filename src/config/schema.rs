//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Background runtime (transport threads).
    pub runtime: RuntimeConfig,

    /// Host drain loop cadence.
    pub drain: DrainConfig,

    /// Defaults applied to every new HTTP request session.
    pub http: HttpConfig,

    /// WebSocket client and server settings.
    pub websocket: WebSocketConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Background runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of transport worker threads.
    pub worker_threads: usize,

    /// Name given to worker threads.
    pub thread_name: String,

    /// Time allowed for in-flight transport work at shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "netbridge-io".to_string(),
            shutdown_timeout_ms: 2000,
        }
    }
}

/// Drain loop configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Interval between drains, in milliseconds.
    pub tick_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self { tick_ms: 15 }
    }
}

/// Per-request HTTP defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Follow 3xx redirects.
    pub follow_redirects: bool,

    /// Maximum redirects followed when enabled.
    pub max_redirects: u32,

    /// Accept gzip-compressed responses.
    pub compression: bool,

    /// Log request and response details at debug level.
    pub verbose: bool,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            follow_redirects: true,
            max_redirects: 5,
            compression: true,
            verbose: false,
            user_agent: "netbridge/0.1".to_string(),
        }
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WebSocketConfig {
    pub client: WsClientConfig,
    pub server: WsServerConfig,
}

/// Outbound WebSocket client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WsClientConfig {
    /// Time allowed for connect plus handshake, in seconds.
    pub handshake_timeout_secs: u64,

    /// Time `close` waits for the server's close reply, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 10,
            close_timeout_ms: 2000,
        }
    }
}

/// WebSocket server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WsServerConfig {
    /// Maximum concurrent connections (backpressure on accept).
    pub max_connections: usize,

    /// Time allowed for the upgrade handshake, in seconds.
    pub handshake_timeout_secs: u64,

    /// Ping interval in seconds (0 disables pings).
    pub ping_interval_secs: u64,

    /// Time `stop` waits for connections to wind down, in milliseconds.
    pub stop_timeout_ms: u64,

    /// Time `disconnect` waits for the client's close reply before the
    /// socket is dropped, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
            handshake_timeout_secs: 5,
            ping_interval_secs: 0,
            stop_timeout_ms: 2000,
            close_timeout_ms: 2000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.runtime.worker_threads, 2);
        assert_eq!(config.http.max_redirects, 5);
        assert!(config.http.follow_redirects);
        assert_eq!(config.websocket.server.ping_interval_secs, 0);
        assert_eq!(config.websocket.server.close_timeout_ms, 2000);
        assert_eq!(config.websocket.client.close_timeout_ms, 2000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [websocket.server]
            max_connections = 4

            [http]
            verbose = true
            "#,
        )
        .unwrap();
        assert_eq!(config.websocket.server.max_connections, 4);
        assert_eq!(config.websocket.server.handshake_timeout_secs, 5);
        assert!(config.http.verbose);
        assert_eq!(config.drain.tick_ms, 15);
    }
}
