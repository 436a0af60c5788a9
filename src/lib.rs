//! dnslisten - the listener core of a DNS forwarder
//!
//! This crate accepts DNS queries over UDP and TCP, wraps every query in a
//! per-request context, hands it to a pluggable [`server::RequestHandler`]
//! and writes the handler's answer back on the transport the query arrived
//! on.
//!
//! # Architecture
//!
//! - `dns`: wire format helpers (decode, encode, UDP truncation)
//! - `server`: transport loops, response writers and the server lifecycle
//! - `logging`: `tracing` subscriber initialization
//! - `error`: error types and handling
//!
//! # Example
//!
//! ```rust,no_run
//! use dnslisten::server::{EchoHandler, Server, ServerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> dnslisten::Result<()> {
//! let server = Server::new(ServerConfig::default(), Arc::new(EchoHandler));
//! server.listen().await?;
//!
//! tokio::signal::ctrl_c().await?;
//! server.shutdown_and_wait().await;
//! # Ok(())
//! # }
//! ```

/// DNS wire format helpers
pub mod dns;

/// UDP and TCP listeners, request dispatch and lifecycle management
pub mod server;

/// Logging initialization
pub mod logging;

/// Error types and handling
///
/// Provides unified error types for the entire crate.
pub mod error {

    use thiserror::Error;

    /// Main error type for dnslisten
    #[derive(Error, Debug)]
    pub enum Error {
        // ============ DNS Protocol Errors ============
        /// DNS protocol error (decode, encode or framing)
        #[error("DNS protocol error: {0}")]
        DnsProtocol(String),

        /// Response cannot be sent within the transport's size limit
        #[error("Response too large: {size} bytes exceeds limit of {limit}")]
        ResponseTooLarge {
            /// Encoded size of the response
            size: usize,
            /// Size limit of the transport
            limit: usize,
        },

        /// A response has already been written for this request
        #[error("Response already written for this request")]
        ResponseAlreadyWritten,

        // ============ Lifecycle Errors ============
        /// The server has been shut down and accepts no new listeners
        #[error("Server is shut down")]
        ServerClosed,

        // ============ Configuration Errors ============
        /// Configuration error
        #[error("Configuration error: {0}")]
        Config(String),

        /// Invalid configuration value
        #[error("Invalid config value for {field}: {value} - {reason}")]
        InvalidConfigValue {
            /// The field name
            field: String,
            /// The invalid value
            value: String,
            /// Reason why it's invalid
            reason: String,
        },

        // ============ IO Errors ============
        /// IO error
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),

        /// Wrapped anyhow error for compatibility
        #[error(transparent)]
        Anyhow(#[from] anyhow::Error),
    }

    impl Error {
        /// Create an InvalidConfigValue error
        pub fn invalid_config_value(
            field: impl Into<String>,
            value: impl ToString,
            reason: impl Into<String>,
        ) -> Self {
            Self::InvalidConfigValue {
                field: field.into(),
                value: value.to_string(),
                reason: reason.into(),
            }
        }

        /// Check if this error is a configuration error
        pub fn is_config_error(&self) -> bool {
            matches!(self, Error::Config(_) | Error::InvalidConfigValue { .. })
        }

        /// Check if this error was caused by the server shutting down
        pub fn is_shutdown(&self) -> bool {
            matches!(self, Error::ServerClosed)
        }
    }

    /// Result type for dnslisten operations
    pub type Result<T> = std::result::Result<T, Error>;
}

// Re-export commonly used types
pub use error::{Error, Result};
