//! # apdhcpd
//!
//! A small DHCP server (RFC 2131 / RFC 2132) for devices that act as a
//! Wi-Fi access point and hand out addresses to the stations joining it.
//!
//! ## Features
//!
//! - DISCOVER/OFFER, REQUEST/ACK/NAK and RELEASE handling
//! - Released addresses kept per station so a reconnecting station gets its old address
//! - Oldest released binding reclaimed when the pool runs dry
//! - Leases released when the link layer reports a station disconnect
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use apdhcpd::{Config, DhcpServer, LoggingLink};
//!
//! #[tokio::main]
//! async fn main() -> apdhcpd::Result<()> {
//!     let config = Config::load_or_create("apdhcpd.json")?;
//!     let server = DhcpServer::new(Arc::new(LoggingLink::new()));
//!     server.start(config).await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Textual configuration, resolved into a [`ServerConfig`] at start
//! - [`DhcpServer`] - Lifecycle, UDP receive worker and disconnect hook
//! - [`RequestHandler`] - Per-datagram DHCP state machine
//! - [`LeaseTable`] - MAC-to-IP bindings with a reuse list
//! - [`DhcpMessage`] - Fixed-size DHCP message decoding and encoding
//! - [`DhcpOption`] - DHCP option types per RFC 2132
//! - [`LinkLayer`] - Notifications toward the access-point link layer

pub mod config;
pub mod error;
pub mod handler;
pub mod lease;
pub mod link;
pub mod options;
pub mod packet;
pub mod server;

pub use config::{Config, ServerConfig};
pub use error::{Error, Result};
pub use handler::{Reply, RequestHandler};
pub use lease::{LeaseEntry, LeaseSource, LeaseState, LeaseTable, Leased};
pub use link::{DisconnectHook, LinkLayer, LoggingLink};
pub use options::{DhcpOption, MessageType, OptionWriter};
pub use packet::{DhcpMessage, MacAddr};
pub use server::{DhcpServer, ServerState};
