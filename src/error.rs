//! Client Error Types
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! side identifies where the failure happened: URI parsing, the HTTP or gRPC
//! transport, or the daemon itself.

use crate::client::TransportKind;
use crate::retry::should_retry_status;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for yavirtd client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The daemon URI could not be parsed
    #[error("invalid yavirtd URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The daemon URI uses a scheme other than `http` or `grpc`
    #[error("invalid yavirtd URI {uri}: unsupported scheme {scheme:?}")]
    UnsupportedScheme { uri: String, scheme: String },

    /// HTTP request could not be completed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with a non-success HTTP status
    #[error("yavirtd returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The daemon answered with a non-OK gRPC status
    #[error("yavirtd RPC failed ({code:?}): {message}")]
    Rpc { code: tonic::Code, message: String },

    /// Channel or connection setup failed
    #[error("transport error: {0}")]
    Transport(String),

    /// A response body could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Local I/O failed (e.g. reading content to copy into a guest)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The selected transport does not implement the operation
    #[error("{operation} is not supported over {transport}")]
    Unsupported {
        operation: &'static str,
        transport: TransportKind,
    },
}

impl Error {
    pub(crate) fn invalid_uri(uri: &str, reason: impl ToString) -> Self {
        Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether a later attempt of the same request may succeed
    ///
    /// Connection failures, timeouts, throttling and server-side
    /// unavailability are transient. Client errors, decode failures and
    /// unsupported operations are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            Error::Api { status, .. } => should_retry_status(*status),
            Error::Rpc { code, .. } => matches!(
                code,
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Aborted
            ),
            Error::Transport(_) => true,
            Error::InvalidUri { .. }
            | Error::UnsupportedScheme { .. }
            | Error::Decode(_)
            | Error::Io(_)
            | Error::Unsupported { .. } => false,
        }
    }

    /// Whether the daemon reported that the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Api { status, .. } => *status == 404,
            Error::Rpc { code, .. } => *code == tonic::Code::NotFound,
            _ => false,
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Rpc {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_transience_follows_status() {
        let unavailable = Error::Api {
            status: 503,
            message: "busy".to_string(),
        };
        assert!(unavailable.is_transient());

        let bad_request = Error::Api {
            status: 400,
            message: "bad".to_string(),
        };
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn test_rpc_status_conversion() {
        let err: Error = tonic::Status::not_found("guest 42").into();
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("guest 42"));

        let err: Error = tonic::Status::unavailable("down").into();
        assert!(err.is_transient());
    }

    #[test]
    fn test_unsupported_message_names_transport() {
        let err = Error::Unsupported {
            operation: "attach_guest",
            transport: TransportKind::Http,
        };
        assert_eq!(err.to_string(), "attach_guest is not supported over http");
    }

    #[test]
    fn test_scheme_error_is_identifiable() {
        let err = Error::UnsupportedScheme {
            uri: "ftp://host".to_string(),
            scheme: "ftp".to_string(),
        };
        assert!(matches!(err, Error::UnsupportedScheme { .. }));
        assert!(err.to_string().contains("ftp"));
        assert!(!err.is_transient());
    }
}
