//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → handed to Bridge::new, sections cloned into sessions
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the bridge is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - HTTP defaults seed each request; the request may override them

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BridgeConfig, DrainConfig, HttpConfig, ObservabilityConfig, RuntimeConfig, WebSocketConfig,
    WsClientConfig, WsServerConfig,
};
pub use validation::{validate_config, ValidationError};
