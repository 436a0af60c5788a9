//! DNS server module
//!
//! This module groups the transport loops and the types handed to query
//! handlers:
//!
//! - **UDP**: one receive loop per socket, one task per datagram
//! - **TCP**: one accept loop per listener, one task per connection and one
//!   task per framed message
//! - **Writers**: per-query reply capability, with UDP truncation and
//!   serialized TCP frame writes
//! - **Lifecycle**: [`Server`] starts the loops and coordinates shutdown
//!
//! Binding addresses is left to the caller: [`Server::serve_udp`] and
//! [`Server::serve_tcp`] take sockets that are already bound, with
//! [`Server::bind_udp`], [`Server::bind_tcp`] and [`Server::listen`] as
//! conveniences on top.
//!
//! # Example
//!
//! ```rust,no_run
//! use dnslisten::server::{EchoHandler, Server, ServerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::default()
//!     .with_udp_addr("127.0.0.1:5353".parse()?)
//!     .with_tcp_addr("127.0.0.1:5353".parse()?);
//! let server = Server::new(config, Arc::new(EchoHandler));
//! server.listen().await?;
//! // ...
//! server.shutdown_and_wait().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod dispatch;
pub mod handler;
pub mod lifecycle;
pub mod shutdown;
pub mod tcp;
pub mod udp;
pub mod writer;

// Re-export commonly used types
pub use config::ServerConfig;
pub use handler::{ClientInfo, EchoHandler, Protocol, RequestContext, RequestHandler, ServeContext};
pub use lifecycle::{Server, ServerState};
pub use shutdown::{Shutdown, ShutdownListener};
pub use tcp::TcpServer;
pub use udp::UdpServer;
pub use writer::{ResponseWriter, TcpResponseWriter, UdpResponseWriter};
