//! yavirtd Client Facade
//!
//! [`Client`] lists every remote operation yavirtd offers. Two
//! implementations exist, [`HttpClient`] and [`GrpcClient`]; [`new`] picks
//! one from the scheme of the daemon URI.
//!
//! # Usage
//!
//! ```ignore
//! use yavirt_client::client;
//!
//! let cli = client::new("grpc://127.0.0.1:9697")?;
//! let guest = cli.get_guest("00033017009174384208170000000001").await?;
//! println!("{} is {}", guest.id, guest.status);
//! ```

use crate::config::ClientConfig;
use crate::error::Result;
use crate::grpc::GrpcClient;
use crate::http::HttpClient;
use crate::metrics;
use crate::retry::{maybe_retry, RetryConfig};
use crate::stream::{ByteStream, Content, EventStream, GuestStream};
use crate::types::{
    AttachGuestFlags, CaptureGuestReq, ConnectNetworkReq, CreateGuestReq, DisconnectNetworkReq,
    ExecuteGuestMessage, GetGuestIdListReq, Guest, HostInfo, Msg, Network, ResizeGuestReq,
    Snapshot, SysImage, UserImage, WaitResult,
};
use crate::uri::Endpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Transport used to reach yavirtd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Http,
    Grpc,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Http => "http",
            TransportKind::Grpc => "grpc",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote operations offered by yavirtd
///
/// All methods take `&self`; implementations are cheap to share behind an
/// `Arc` and safe to call concurrently.
#[async_trait]
pub trait Client: Send + Sync {
    /// Which transport this client speaks
    fn transport(&self) -> TransportKind;

    /// Host resources
    async fn info(&self) -> Result<HostInfo>;

    async fn get_guest(&self, id: &str) -> Result<Guest>;

    async fn get_guest_uuid(&self, id: &str) -> Result<String>;

    async fn get_guest_id_list(&self, req: GetGuestIdListReq) -> Result<Vec<String>>;

    async fn create_guest(&self, req: CreateGuestReq) -> Result<Guest>;

    async fn start_guest(&self, id: &str) -> Result<Msg>;

    async fn stop_guest(&self, id: &str, force: bool) -> Result<Msg>;

    async fn destroy_guest(&self, id: &str, force: bool) -> Result<Msg>;

    /// Open an interactive console running `cmd` (the guest's default
    /// console if empty)
    async fn attach_guest(
        &self,
        id: &str,
        cmd: Vec<String>,
        flags: AttachGuestFlags,
    ) -> Result<GuestStream>;

    async fn resize_console_window(&self, id: &str, height: u32, width: u32) -> Result<()>;

    /// Run a batch command and collect its output
    async fn execute_guest(&self, id: &str, cmd: Vec<String>) -> Result<ExecuteGuestMessage>;

    /// Exit code of a process started by [`Client::execute_guest`]
    async fn exec_exit_code(&self, id: &str, pid: i64) -> Result<i32>;

    async fn resize_guest(&self, req: ResizeGuestReq) -> Result<Msg>;

    /// Snapshot a guest's system disk into a user image
    async fn capture_guest(&self, req: CaptureGuestReq) -> Result<UserImage>;

    /// Returns the CIDR assigned to the guest
    async fn connect_network(&self, req: ConnectNetworkReq) -> Result<String>;

    async fn disconnect_network(&self, req: DisconnectNetworkReq) -> Result<String>;

    /// Stream the contents of a file inside the guest
    async fn cat(&self, id: &str, path: &str) -> Result<ByteStream>;

    /// Subscribe to daemon events matching all `filters`
    async fn events(&self, filters: HashMap<String, String>) -> Result<EventStream>;

    /// Upload `content` to `dest` inside the guest
    async fn copy_to_guest(
        &self,
        id: &str,
        dest: &str,
        content: Content,
        allow_overwrite_dir_with_file: bool,
        copy_uid_gid: bool,
    ) -> Result<()>;

    /// Networks served by the given drivers (all drivers if empty)
    async fn network_list(&self, drivers: Vec<String>) -> Result<Vec<Network>>;

    /// Block until the guest stops
    async fn wait_guest(&self, id: &str, force: bool) -> Result<WaitResult>;

    /// Stream the last `n` lines of the guest console log (all if `n <= 0`)
    async fn log(&self, id: &str, n: i64) -> Result<ByteStream>;

    async fn list_snapshot(&self, id: &str, vol_id: &str) -> Result<Vec<Snapshot>>;

    async fn create_snapshot(&self, id: &str, vol_id: &str) -> Result<Msg>;

    async fn commit_snapshot(&self, id: &str, vol_id: &str, snap_id: &str) -> Result<Msg>;

    async fn restore_snapshot(&self, id: &str, vol_id: &str, snap_id: &str) -> Result<Msg>;

    async fn push_image(&self, img_name: &str, user: &str) -> Result<String>;

    /// Returns the names of the removed images
    async fn remove_image(
        &self,
        img_name: &str,
        user: &str,
        force: bool,
        prune: bool,
    ) -> Result<Vec<String>>;

    async fn list_image(&self, filter: &str) -> Result<Vec<SysImage>>;

    async fn pull_image(&self, img_name: &str, all: bool) -> Result<String>;

    async fn digest_image(&self, img_name: &str, local: bool) -> Result<Vec<String>>;
}

/// Connection settings shared by both transports
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Deadline for a single unary request
    pub timeout: Duration,

    /// Deadline for establishing a connection
    pub connect_timeout: Duration,

    /// Retry policy for idempotent reads (`None` disables retries)
    pub retry: Option<RetryConfig>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: Some(RetryConfig::default()),
        }
    }
}

/// Create a client for the daemon at `yavirtd_uri`
///
/// `http://host:port/version` yields an [`HttpClient`], `grpc://host:port`
/// a [`GrpcClient`]. The gRPC channel connects lazily and must be created
/// inside a Tokio runtime.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidUri`] for an unparseable URI and
/// [`crate::Error::UnsupportedScheme`] for any other scheme.
pub fn new(yavirtd_uri: &str) -> Result<Box<dyn Client>> {
    new_with_options(yavirtd_uri, ClientOptions::default())
}

/// Like [`new`], with explicit timeouts and retry policy
pub fn new_with_options(yavirtd_uri: &str, options: ClientOptions) -> Result<Box<dyn Client>> {
    let endpoint = Endpoint::parse(yavirtd_uri)?;
    tracing::debug!("Creating {} client for {}", endpoint.transport(), endpoint);

    metrics::init();

    match endpoint {
        Endpoint::Http { host, version } => {
            Ok(Box::new(HttpClient::new(&host, &version, options)?))
        }
        Endpoint::Grpc { host } => Ok(Box::new(GrpcClient::new(&host, options)?)),
    }
}

/// Create a client from a loaded configuration file
pub fn from_config(config: &ClientConfig) -> Result<Box<dyn Client>> {
    new_with_options(&config.uri, config.client_options())
}

/// Run one remote call with tracing, metrics and optional retry
///
/// `retry` should only be `Some` for idempotent operations.
pub(crate) async fn instrumented<F, T, Fut>(
    transport: TransportKind,
    operation: &'static str,
    retry: Option<&RetryConfig>,
    call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let span = tracing::debug_span!(
        "yavirtd",
        transport = transport.as_str(),
        operation,
        request_id = %uuid::Uuid::new_v4()
    );

    async move {
        let started = Instant::now();
        let result = maybe_retry(retry, call).await;
        metrics::observe(transport, operation, started, result.is_ok());

        match &result {
            Ok(_) => tracing::debug!("{} completed in {:?}", operation, started.elapsed()),
            Err(e) => tracing::debug!("{} failed: {}", operation, e),
        }
        result
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Http.to_string(), "http");
        assert_eq!(TransportKind::Grpc.to_string(), "grpc");
    }

    #[test]
    fn test_default_options() {
        let options = ClientOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert!(options.retry.is_some());
    }

    #[tokio::test]
    async fn test_new_selects_http() {
        let client = new("http://127.0.0.1:9696/v1").unwrap();
        assert_eq!(client.transport(), TransportKind::Http);
    }

    #[tokio::test]
    async fn test_new_selects_grpc() {
        let client = new("grpc://127.0.0.1:9697").unwrap();
        assert_eq!(client.transport(), TransportKind::Grpc);
    }

    #[tokio::test]
    async fn test_new_rejects_unknown_scheme() {
        let result = new("ws://127.0.0.1:9696/v1");
        assert!(matches!(result, Err(Error::UnsupportedScheme { .. })));
    }

    #[tokio::test]
    async fn test_new_rejects_malformed_uri() {
        let result = new("127.0.0.1 9696");
        assert!(matches!(result, Err(Error::InvalidUri { .. })));
    }

    #[tokio::test]
    async fn test_instrumented_records_outcome() {
        let ok: Result<u8> =
            instrumented(TransportKind::Http, "client_test_op", None, || async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let err: Result<u8> = instrumented(TransportKind::Http, "client_test_op", None, || async {
            Err(Error::Decode("bad".to_string()))
        })
        .await;
        assert!(err.is_err());

        let counter = metrics::REQUESTS_TOTAL.with_label_values(&["http", "client_test_op", "ok"]);
        assert!(counter.get() >= 1);
    }
}
