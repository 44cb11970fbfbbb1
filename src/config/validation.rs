//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thread counts, timeouts, limits)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::BridgeConfig;

/// Upper bound on followed redirects.
pub const MAX_REDIRECTS_LIMIT: u32 = 64;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every rule and collect the failures.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.runtime.worker_threads == 0 {
        errors.push(ValidationError::new("runtime.worker_threads", "must be at least 1"));
    }
    if config.drain.tick_ms == 0 {
        errors.push(ValidationError::new("drain.tick_ms", "must be at least 1"));
    }
    if config.http.max_redirects > MAX_REDIRECTS_LIMIT {
        errors.push(ValidationError::new(
            "http.max_redirects",
            format!("must not exceed {}", MAX_REDIRECTS_LIMIT),
        ));
    }
    if config.websocket.client.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "websocket.client.handshake_timeout_secs",
            "must be at least 1",
        ));
    }
    if config.websocket.client.close_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "websocket.client.close_timeout_ms",
            "must be at least 1",
        ));
    }
    if config.websocket.server.close_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "websocket.server.close_timeout_ms",
            "must be at least 1",
        ));
    }
    if config.websocket.server.max_connections == 0 {
        errors.push(ValidationError::new(
            "websocket.server.max_connections",
            "must be at least 1",
        ));
    }
    if config.websocket.server.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "websocket.server.handshake_timeout_secs",
            "must be at least 1",
        ));
    }
    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}'", config.observability.log_format),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&BridgeConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = BridgeConfig::default();
        config.runtime.worker_threads = 0;
        config.websocket.server.max_connections = 0;
        config.observability.log_format = "xml".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].field, "runtime.worker_threads");
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = BridgeConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }
}
