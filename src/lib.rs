//! yavirt Client Library
//!
//! This library provides a client for the yavirtd virtual machine daemon,
//! reachable over HTTP (`http://host:port/v1`) or gRPC (`grpc://host:port`).
//! [`new`] parses the daemon URI and returns a [`Client`] backed by the
//! matching transport.

pub mod client;
pub mod config;
pub mod error;
pub mod grpc;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod stream;
pub mod types;
pub mod uri;

pub use client::{from_config, new, new_with_options, Client, ClientOptions, TransportKind};
pub use error::{Error, Result};
pub use stream::{ByteStream, Content, EventStream, GuestStream};
pub use uri::Endpoint;
