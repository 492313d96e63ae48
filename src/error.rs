//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. Start-time errors are returned to
//! the caller of [`DhcpServer::start`](crate::DhcpServer::start); per-datagram
//! errors never leave the receive loop and are only logged.

/// Errors that can occur during DHCP server operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed DHCP datagram received.
    ///
    /// Covers datagrams too short to hold the fixed header and option
    /// streams whose declared lengths run past the option area.
    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    /// The IP address pool is exhausted.
    ///
    /// Every eligible address is bound and the reuse list had nothing to
    /// give up. The request is dropped without a response.
    #[error("No available IP addresses in pool")]
    PoolExhausted,

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::resolve`](crate::Config::resolve) when an
    /// address fails to parse or the netmask/pool/gateway do not agree.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding to port 67 without administrator privileges.
    #[error("Socket error: {0}")]
    Socket(String),

    /// An option did not fit in the fixed option area of the message, or
    /// its value is longer than one option can carry.
    #[error("Option {code} does not fit: {needed} bytes needed, {remaining} remaining")]
    OptionOverflow {
        code: u8,
        needed: usize,
        remaining: usize,
    },

    /// `start` was called while the server was already starting or running.
    #[error("DHCP server is already running")]
    AlreadyRunning,
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
