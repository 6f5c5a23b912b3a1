//! yavirtd URI Parsing
//!
//! A daemon address is a URI whose scheme picks the transport:
//!
//! - `http://host:port/v1` talks JSON over HTTP to `host:port`, prefixing
//!   every route with the API version taken from the path (`v1` if empty).
//! - `grpc://host:port` talks to the `yavpb.YavirtdRPC` service.
//!
//! Any other scheme is rejected.

use crate::client::TransportKind;
use crate::error::{Error, Result};
use reqwest::Url;
use std::fmt;

/// API version used when an HTTP URI carries no path
pub const DEFAULT_API_VERSION: &str = "v1";

/// A parsed daemon address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// JSON over HTTP, routes prefixed with `/{version}`
    Http { host: String, version: String },

    /// gRPC (HTTP/2) to the given authority
    Grpc { host: String },
}

impl Endpoint {
    /// Parse a daemon URI
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUri`] if the URI cannot be parsed or has no host
    /// - [`Error::UnsupportedScheme`] if the scheme is neither `http` nor `grpc`
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri.trim()).map_err(|e| Error::invalid_uri(uri, e))?;

        let scheme = url.scheme();
        if scheme != "http" && scheme != "grpc" {
            return Err(Error::UnsupportedScheme {
                uri: uri.to_string(),
                scheme: scheme.to_string(),
            });
        }

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => match url.port_or_known_default() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            },
            _ => return Err(Error::invalid_uri(uri, "missing host")),
        };

        if scheme == "grpc" {
            return Ok(Endpoint::Grpc { host });
        }

        let version = url.path().trim_start_matches('/').trim_end_matches('/');
        let version = if version.is_empty() {
            DEFAULT_API_VERSION.to_string()
        } else {
            version.to_string()
        };

        Ok(Endpoint::Http { host, version })
    }

    /// The transport this endpoint selects
    pub fn transport(&self) -> TransportKind {
        match self {
            Endpoint::Http { .. } => TransportKind::Http,
            Endpoint::Grpc { .. } => TransportKind::Grpc,
        }
    }

    /// `host[:port]` of the daemon
    pub fn host(&self) -> &str {
        match self {
            Endpoint::Http { host, .. } | Endpoint::Grpc { host } => host,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Http { host, version } => write!(f, "http://{host}/{version}"),
            Endpoint::Grpc { host } => write!(f, "grpc://{host}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_http_with_version() {
        let endpoint = Endpoint::parse("http://127.0.0.1:9696/v2").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Http {
                host: "127.0.0.1:9696".to_string(),
                version: "v2".to_string(),
            }
        );
        assert_eq!(endpoint.transport(), TransportKind::Http);
        assert_eq!(endpoint.to_string(), "http://127.0.0.1:9696/v2");
    }

    #[test]
    fn test_parse_http_without_path_defaults_version() {
        let endpoint = Endpoint::parse("http://yavirtd.local:9696").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Http {
                host: "yavirtd.local:9696".to_string(),
                version: DEFAULT_API_VERSION.to_string(),
            }
        );
    }

    #[test]
    fn test_parse_grpc_ignores_path() {
        let endpoint = Endpoint::parse("grpc://10.0.0.1:9697/ignored").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Grpc {
                host: "10.0.0.1:9697".to_string()
            }
        );
        assert_eq!(endpoint.host(), "10.0.0.1:9697");
    }

    #[test]
    fn test_parse_grpc_ipv6() {
        let endpoint = Endpoint::parse("grpc://[::1]:9697").unwrap();
        assert_eq!(endpoint.host(), "[::1]:9697");
    }

    #[test]
    fn test_parse_scheme_is_case_insensitive() {
        let endpoint = Endpoint::parse("GRPC://localhost:9697").unwrap();
        assert_eq!(endpoint.transport(), TransportKind::Grpc);
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        for uri in ["https://host/v1", "unix:///run/yavirtd.sock", "tcp://host:1"] {
            let err = Endpoint::parse(uri).unwrap_err();
            assert!(
                matches!(err, Error::UnsupportedScheme { .. }),
                "{uri} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for uri in ["", "not a uri", "://missing-scheme", "http://"] {
            let err = Endpoint::parse(uri).unwrap_err();
            assert!(matches!(err, Error::InvalidUri { .. }), "{uri} gave {err:?}");
        }
    }

    #[test]
    fn test_parse_rejects_grpc_without_host() {
        let err = Endpoint::parse("grpc:///only-path").unwrap_err();
        assert!(matches!(err, Error::InvalidUri { .. }));
    }

    fn arb_host() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z][a-z0-9]{0,10}(\\.[a-z][a-z0-9]{0,5}){0,2}",
            (1u8..=254, 0u8..=255, 0u8..=255, 1u8..=254)
                .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}")),
        ]
    }

    proptest! {
        #[test]
        fn prop_http_scheme_selects_http(host in arb_host(), port in 1u16..=65535, version in "v[0-9]{1,2}") {
            let uri = format!("http://{host}:{port}/{version}");
            let endpoint = Endpoint::parse(&uri).unwrap();
            prop_assert_eq!(endpoint.transport(), TransportKind::Http);
            prop_assert_eq!(endpoint, Endpoint::Http { host: format!("{host}:{port}"), version });
        }

        #[test]
        fn prop_grpc_scheme_selects_grpc(host in arb_host(), port in 1u16..=65535) {
            let uri = format!("grpc://{host}:{port}");
            let endpoint = Endpoint::parse(&uri).unwrap();
            prop_assert_eq!(endpoint.transport(), TransportKind::Grpc);
            prop_assert_eq!(endpoint.host(), format!("{host}:{port}"));
        }

        #[test]
        fn prop_other_schemes_fail(scheme in "[a-z][a-z0-9+.-]{0,8}", host in arb_host()) {
            prop_assume!(scheme != "http" && scheme != "grpc");
            let uri = format!("{scheme}://{host}/v1");
            let err = Endpoint::parse(&uri).unwrap_err();
            let is_scheme_error = matches!(err, Error::UnsupportedScheme { .. });
            prop_assert!(is_scheme_error);
        }
    }
}
