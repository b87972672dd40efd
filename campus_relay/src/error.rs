// Error taxonomy for the relay and its client.
//
// Authentication errors are terminal for the connection that produced them;
// their `Display` text is the reason sent back in `AUTH_FAIL:<reason>`.
// Routing errors (`UnknownTarget`, `DeliveryFailed`) are only ever logged by
// the session that triggered them. `EmptyBroadcast` is returned to the
// operator. `Bind` and `Config` abort startup.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// `Campus` or `Pass` was empty after parsing the auth frame.
    #[error("Missing credentials")]
    MissingCredential,
    /// Unknown campus or wrong secret.
    #[error("Invalid credentials")]
    InvalidCredential,
    /// The routing target has no registered session.
    #[error("campus '{0}' is not connected")]
    UnknownTarget(String),
    /// Writing to the target's stream failed.
    #[error("failed to deliver to {target}: {source}")]
    DeliveryFailed {
        target: String,
        #[source]
        source: io::Error,
    },
    /// The routed `FROM:` frame would not fit in one frame.
    #[error("message for {target} is too large ({len} bytes framed)")]
    MessageTooLarge { target: String, len: usize },
    #[error("broadcast message cannot be empty")]
    EmptyBroadcast,
    #[error("could not bind {what} socket on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("could not load config {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
    /// The relay answered the handshake with `AUTH_FAIL`.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
