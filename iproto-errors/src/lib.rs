//! Error taxonomy shared by every crate in the workspace.
//!
//! One flat enum per the kinds the core can raise (connect/auth failures,
//! metadata lookup misses, server errors, timeouts, codec failures,
//! protocol violations). Uses a `snafu` enum with `context(suffix(false))`
//! so call sites read as `ConnectFailure { source: e }.fail()` rather than
//! `ConnectFailureSnafu`.

use snafu::Snafu;
use std::io;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub), context(suffix(false)))]
#[non_exhaustive]
pub enum Error {
    /// The transport could not reach the server.
    #[snafu(display("could not connect to server: {source}"))]
    ConnectFailure { source: io::Error },

    /// The server rejected the supplied credentials.
    #[snafu(display("authentication failed: {message}"))]
    AuthFailure { message: String },

    /// Invalid client configuration (missing credential, bad timeout, ...).
    #[snafu(display("invalid configuration: {message}"))]
    ConfigurationError { message: String },

    /// A request was attempted before the connection reached `Ready`, or
    /// after it was closed.
    #[snafu(display("not connected"))]
    NotConnected,

    /// A space name or id has no matching metadata entry.
    #[snafu(display("space not found: {name}"))]
    SpaceNotFound { name: String },

    /// An index name or id has no matching metadata entry for its space.
    #[snafu(display("index not found: {space}.{index}"))]
    IndexNotFound { space: String, index: String },

    /// The server responded with an error frame.
    #[snafu(display("server error {code}: {message}"))]
    ServerError { code: u32, message: String },

    /// The request deadline elapsed before a response arrived.
    #[snafu(display("request timed out"))]
    Timeout,

    /// The pending completion was cancelled by the caller.
    #[snafu(display("request cancelled"))]
    Cancelled,

    /// The codec has no converter registered for this (source, target) pair.
    #[snafu(display("no converter from {from_ty} to {to_ty}"))]
    ConverterNotFound { from_ty: String, to_ty: String },

    /// A malformed frame, unexpected header, or size mismatch.
    #[snafu(display("protocol error: {message}"))]
    ProtocolError { message: String },

    /// The connection closed (locally or by the peer) while a request was
    /// in flight.
    #[snafu(display("connection closed"))]
    ConnectionClosed,
}

impl Error {
    /// A stable, lowercase discriminant name for log correlation. Never
    /// includes the error's data (no passwords, no tuple contents).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConnectFailure { .. } => "connect_failure",
            Error::AuthFailure { .. } => "auth_failure",
            Error::ConfigurationError { .. } => "configuration_error",
            Error::NotConnected => "not_connected",
            Error::SpaceNotFound { .. } => "space_not_found",
            Error::IndexNotFound { .. } => "index_not_found",
            Error::ServerError { .. } => "server_error",
            Error::Timeout => "timeout",
            Error::Cancelled => "cancelled",
            Error::ConverterNotFound { .. } => "converter_not_found",
            Error::ProtocolError { .. } => "protocol_error",
            Error::ConnectionClosed => "connection_closed",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(Error::NotConnected.kind(), "not_connected");
        assert_eq!(
            ServerError {
                code: 42u32,
                message: "nope".to_string()
            }
            .build()
            .kind(),
            "server_error"
        );
    }

    #[test]
    fn display_never_panics_on_any_variant() {
        let errs: Vec<Error> = vec![
            NotConnected.build(),
            Timeout.build(),
            Cancelled.build(),
            ConnectionClosed.build(),
            SpaceNotFound {
                name: "s".to_string(),
            }
            .build(),
        ];
        for e in errs {
            let _ = format!("{e}");
        }
    }
}
