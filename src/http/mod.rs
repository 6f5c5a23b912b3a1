//! yavirtd HTTP Transport
//!
//! JSON over HTTP/1.1. Every route is prefixed with the API version taken
//! from the daemon URI, so `http://127.0.0.1:9696/v1` sends `GET /info` to
//! `http://127.0.0.1:9696/v1/info`.
//!
//! # Streaming
//!
//! - `cat` and `log` read a chunked response body as raw bytes
//! - `events` reads newline-delimited JSON, one event per line
//! - `copy_to_guest` sends the content as a chunked request body
//!
//! Interactive attach needs a duplex stream, which this transport does not
//! provide; use the gRPC transport for it.

pub mod ndjson;

use crate::client::{instrumented, Client, ClientOptions, TransportKind};
use crate::error::{Error, Result};
use crate::metrics::StreamGuard;
use crate::retry::RetryConfig;
use crate::stream::{reader_chunks, ByteStream, Content, EventStream, GuestStream};
use crate::types::{
    AttachGuestFlags, CaptureGuestReq, ConnectNetworkReq, CreateGuestReq, DisconnectNetworkReq,
    ExecuteGuestMessage, GetGuestIdListReq, Guest, HostInfo, Msg, Network, ResizeGuestReq,
    Snapshot, SysImage, UserImage, WaitResult,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Body, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const TRANSPORT: TransportKind = TransportKind::Http;

/// HTTP client for yavirtd
///
/// # Configuration
///
/// - **host**: `host:port` of the daemon
/// - **version**: API version path prefix (e.g. `v1`)
/// - **options**: request/connect timeouts and retry policy
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Client for unary calls (bounded by the request timeout)
    client: reqwest::Client,

    /// Client for long-lived streams (connect timeout only)
    stream_client: reqwest::Client,

    /// `http://host/version/`
    base_url: Url,

    /// Retry policy for idempotent reads
    retry: Option<RetryConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GuestReq<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GuestForceReq<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    force: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ResizeConsoleReq<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    height: u32,
    width: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecuteReq<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    commands: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExitCodeReply {
    #[serde(with = "crate::types::saturating_i32")]
    exit_code: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SnapshotReq<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "VolID")]
    vol_id: &'a str,
    #[serde(rename = "SnapID", skip_serializing_if = "str::is_empty")]
    snap_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PushImageReq<'a> {
    img_name: &'a str,
    user: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RemoveImageReq<'a> {
    image: &'a str,
    user: &'a str,
    force: bool,
    prune: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PullImageReq<'a> {
    img_name: &'a str,
    all: bool,
}

impl HttpClient {
    /// Create a client for `http://{host}/{version}`
    pub fn new(host: &str, version: &str, options: ClientOptions) -> Result<Self> {
        let version = version.trim_matches('/');
        let raw = format!("http://{host}/{version}/");
        let base_url = Url::parse(&raw).map_err(|e| Error::invalid_uri(&raw, e))?;

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .build()?;

        let stream_client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base_url,
            retry: options.retry,
        })
    }

    /// Base URL every route is resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a route made of path segments; segments are percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::invalid_uri(self.base_url.as_str(), "cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn url_with_query<'q>(
        &self,
        segments: &[&str],
        query: impl IntoIterator<Item = (&'q str, &'q str)>,
    ) -> Result<Url> {
        let mut url = self.url(segments)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        decode_json(check_status(response).await?).await
    }

    async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(segments)?;
        tracing::debug!("POST {}", url);
        let response = self.client.post(url).json(body).send().await?;
        decode_json(check_status(response).await?).await
    }

    /// GET a long-lived body as a byte stream
    async fn get_stream(&self, url: Url, kind: &'static str) -> Result<ByteStream> {
        tracing::debug!("GET (stream) {}", url);
        let response = self.stream_client.get(url).send().await?;
        let response = check_status(response).await?;

        let guard = StreamGuard::open(TRANSPORT, kind);
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                let _open = &guard;
                chunk.map_err(Error::from)
            })
            .boxed())
    }
}

/// Turn a non-2xx response into [`Error::Api`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        message: error_message(&text, status.canonical_reason().unwrap_or("unknown error")),
    })
}

/// Extract the daemon's error text from a response body
fn error_message(body: &str, fallback: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(body) {
        for key in ["error", "Error", "msg", "Msg", "message"] {
            if let Some(serde_json::Value::String(message)) = map.get(key) {
                return message.clone();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::Decode(format!(
            "{}: {}",
            e,
            String::from_utf8_lossy(&bytes[..bytes.len().min(256)])
        ))
    })
}

#[async_trait]
impl Client for HttpClient {
    fn transport(&self) -> TransportKind {
        TRANSPORT
    }

    async fn info(&self) -> Result<HostInfo> {
        let url = self.url(&["info"])?;
        instrumented(TRANSPORT, "info", self.retry.as_ref(), || {
            self.get_json(url.clone())
        })
        .await
    }

    async fn get_guest(&self, id: &str) -> Result<Guest> {
        let url = self.url(&["guests", id])?;
        instrumented(TRANSPORT, "get_guest", self.retry.as_ref(), || {
            self.get_json(url.clone())
        })
        .await
    }

    async fn get_guest_uuid(&self, id: &str) -> Result<String> {
        let url = self.url(&["guests", id, "uuid"])?;
        instrumented(TRANSPORT, "get_guest_uuid", self.retry.as_ref(), || {
            self.get_json(url.clone())
        })
        .await
    }

    async fn get_guest_id_list(&self, req: GetGuestIdListReq) -> Result<Vec<String>> {
        instrumented(TRANSPORT, "get_guest_id_list", self.retry.as_ref(), || {
            self.post_json(&["guests", "list"], &req)
        })
        .await
    }

    async fn create_guest(&self, req: CreateGuestReq) -> Result<Guest> {
        instrumented(TRANSPORT, "create_guest", None, || {
            self.post_json(&["guests"], &req)
        })
        .await
    }

    async fn start_guest(&self, id: &str) -> Result<Msg> {
        let req = GuestReq { id };
        instrumented(TRANSPORT, "start_guest", None, || {
            self.post_json(&["guests", "start"], &req)
        })
        .await
    }

    async fn stop_guest(&self, id: &str, force: bool) -> Result<Msg> {
        let req = GuestForceReq { id, force };
        instrumented(TRANSPORT, "stop_guest", None, || {
            self.post_json(&["guests", "stop"], &req)
        })
        .await
    }

    async fn destroy_guest(&self, id: &str, force: bool) -> Result<Msg> {
        let req = GuestForceReq { id, force };
        instrumented(TRANSPORT, "destroy_guest", None, || {
            self.post_json(&["guests", "destroy"], &req)
        })
        .await
    }

    async fn attach_guest(
        &self,
        _id: &str,
        _cmd: Vec<String>,
        _flags: AttachGuestFlags,
    ) -> Result<GuestStream> {
        Err(Error::Unsupported {
            operation: "attach_guest",
            transport: TRANSPORT,
        })
    }

    async fn resize_console_window(&self, id: &str, height: u32, width: u32) -> Result<()> {
        let req = ResizeConsoleReq { id, height, width };
        let _: Msg = instrumented(TRANSPORT, "resize_console_window", None, || {
            self.post_json(&["guests", "resize_window"], &req)
        })
        .await?;
        Ok(())
    }

    async fn execute_guest(&self, id: &str, cmd: Vec<String>) -> Result<ExecuteGuestMessage> {
        let req = ExecuteReq { id, commands: &cmd };
        instrumented(TRANSPORT, "execute_guest", None, || {
            self.post_json(&["guests", "execute"], &req)
        })
        .await
    }

    async fn exec_exit_code(&self, id: &str, pid: i64) -> Result<i32> {
        let pid = pid.to_string();
        let url = self.url(&["guests", id, "exec", pid.as_str(), "exit_code"])?;
        let reply: ExitCodeReply =
            instrumented(TRANSPORT, "exec_exit_code", self.retry.as_ref(), || {
                self.get_json(url.clone())
            })
            .await?;
        Ok(reply.exit_code)
    }

    async fn resize_guest(&self, req: ResizeGuestReq) -> Result<Msg> {
        instrumented(TRANSPORT, "resize_guest", None, || {
            self.post_json(&["guests", "resize"], &req)
        })
        .await
    }

    async fn capture_guest(&self, req: CaptureGuestReq) -> Result<UserImage> {
        instrumented(TRANSPORT, "capture_guest", None, || {
            self.post_json(&["guests", "capture"], &req)
        })
        .await
    }

    async fn connect_network(&self, req: ConnectNetworkReq) -> Result<String> {
        instrumented(TRANSPORT, "connect_network", None, || {
            self.post_json(&["guests", "connect"], &req)
        })
        .await
    }

    async fn disconnect_network(&self, req: DisconnectNetworkReq) -> Result<String> {
        instrumented(TRANSPORT, "disconnect_network", None, || {
            self.post_json(&["guests", "disconnect"], &req)
        })
        .await
    }

    async fn cat(&self, id: &str, path: &str) -> Result<ByteStream> {
        let url = self.url_with_query(&["guests", id, "cat"], [("path", path)])?;
        instrumented(TRANSPORT, "cat", None, || self.get_stream(url.clone(), "cat")).await
    }

    async fn events(&self, filters: HashMap<String, String>) -> Result<EventStream> {
        let url = self.url_with_query(
            &["events"],
            filters.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )?;
        let body = instrumented(TRANSPORT, "events", None, || {
            self.get_stream(url.clone(), "events")
        })
        .await?;
        Ok(ndjson::decode(body))
    }

    async fn copy_to_guest(
        &self,
        id: &str,
        dest: &str,
        content: Content,
        allow_overwrite_dir_with_file: bool,
        copy_uid_gid: bool,
    ) -> Result<()> {
        let url = self.url_with_query(
            &["guests", id, "copy"],
            [
                ("dest", dest),
                ("override", bool_str(allow_overwrite_dir_with_file)),
                ("uid_gid", bool_str(copy_uid_gid)),
            ],
        )?;

        // The body can only be consumed once, so uploads are never retried.
        let mut content = Some(content);
        let _: Msg = instrumented(TRANSPORT, "copy_to_guest", None, || {
            let url = url.clone();
            let content = content.take();
            async move {
                let content = content.ok_or_else(|| {
                    Error::Transport("upload content already consumed".to_string())
                })?;
                let _open = StreamGuard::open(TRANSPORT, "copy");
                tracing::debug!("POST (stream) {}", url);
                let response = self
                    .stream_client
                    .post(url)
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::wrap_stream(reader_chunks(content)))
                    .send()
                    .await?;
                decode_json(check_status(response).await?).await
            }
        })
        .await?;
        Ok(())
    }

    async fn network_list(&self, drivers: Vec<String>) -> Result<Vec<Network>> {
        let url = self.url_with_query(
            &["networks"],
            drivers.iter().map(|d| ("driver", d.as_str())),
        )?;
        instrumented(TRANSPORT, "network_list", self.retry.as_ref(), || {
            self.get_json(url.clone())
        })
        .await
    }

    async fn wait_guest(&self, id: &str, force: bool) -> Result<WaitResult> {
        let req = GuestForceReq { id, force };
        let url = self.url(&["guests", "wait"])?;
        // Waiting may outlast the unary timeout.
        instrumented(TRANSPORT, "wait_guest", None, || async {
            tracing::debug!("POST {}", url);
            let response = self.stream_client.post(url.clone()).json(&req).send().await?;
            decode_json(check_status(response).await?).await
        })
        .await
    }

    async fn log(&self, id: &str, n: i64) -> Result<ByteStream> {
        let n = n.to_string();
        let url = self.url_with_query(&["guests", id, "log"], [("n", n.as_str())])?;
        instrumented(TRANSPORT, "log", None, || self.get_stream(url.clone(), "log")).await
    }

    async fn list_snapshot(&self, id: &str, vol_id: &str) -> Result<Vec<Snapshot>> {
        let url = self.url_with_query(&["guests", id, "snapshots"], [("volume", vol_id)])?;
        instrumented(TRANSPORT, "list_snapshot", self.retry.as_ref(), || {
            self.get_json(url.clone())
        })
        .await
    }

    async fn create_snapshot(&self, id: &str, vol_id: &str) -> Result<Msg> {
        let req = SnapshotReq {
            id,
            vol_id,
            snap_id: "",
        };
        instrumented(TRANSPORT, "create_snapshot", None, || {
            self.post_json(&["guests", "snapshots", "create"], &req)
        })
        .await
    }

    async fn commit_snapshot(&self, id: &str, vol_id: &str, snap_id: &str) -> Result<Msg> {
        let req = SnapshotReq {
            id,
            vol_id,
            snap_id,
        };
        instrumented(TRANSPORT, "commit_snapshot", None, || {
            self.post_json(&["guests", "snapshots", "commit"], &req)
        })
        .await
    }

    async fn restore_snapshot(&self, id: &str, vol_id: &str, snap_id: &str) -> Result<Msg> {
        let req = SnapshotReq {
            id,
            vol_id,
            snap_id,
        };
        instrumented(TRANSPORT, "restore_snapshot", None, || {
            self.post_json(&["guests", "snapshots", "restore"], &req)
        })
        .await
    }

    async fn push_image(&self, img_name: &str, user: &str) -> Result<String> {
        let req = PushImageReq { img_name, user };
        instrumented(TRANSPORT, "push_image", None, || {
            self.post_json(&["images", "push"], &req)
        })
        .await
    }

    async fn remove_image(
        &self,
        img_name: &str,
        user: &str,
        force: bool,
        prune: bool,
    ) -> Result<Vec<String>> {
        let req = RemoveImageReq {
            image: img_name,
            user,
            force,
            prune,
        };
        instrumented(TRANSPORT, "remove_image", None, || {
            self.post_json(&["images", "remove"], &req)
        })
        .await
    }

    async fn list_image(&self, filter: &str) -> Result<Vec<SysImage>> {
        let url = self.url_with_query(&["images"], [("filter", filter)])?;
        instrumented(TRANSPORT, "list_image", self.retry.as_ref(), || {
            self.get_json(url.clone())
        })
        .await
    }

    async fn pull_image(&self, img_name: &str, all: bool) -> Result<String> {
        let req = PullImageReq { img_name, all };
        instrumented(TRANSPORT, "pull_image", None, || {
            self.post_json(&["images", "pull"], &req)
        })
        .await
    }

    async fn digest_image(&self, img_name: &str, local: bool) -> Result<Vec<String>> {
        let url = self.url_with_query(
            &["images", "digest"],
            [("image", img_name), ("local", bool_str(local))],
        )?;
        instrumented(TRANSPORT, "digest_image", self.retry.as_ref(), || {
            self.get_json(url.clone())
        })
        .await
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client(version: &str) -> HttpClient {
        HttpClient::new("127.0.0.1:9696", version, ClientOptions::default()).unwrap()
    }

    #[test]
    fn test_base_url() {
        assert_eq!(client("v1").base_url().as_str(), "http://127.0.0.1:9696/v1/");
        assert_eq!(client("/v2/").base_url().as_str(), "http://127.0.0.1:9696/v2/");
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let url = client("v1").url(&["guests", "a b/c", "uuid"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9696/v1/guests/a%20b%2Fc/uuid");
    }

    #[test]
    fn test_url_nested_version() {
        let url = client("api/v1").url(&["info"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9696/api/v1/info");
    }

    #[test]
    fn test_url_with_query() {
        let c = client("v1");
        let url = c
            .url_with_query(&["guests", "g1", "cat"], [("path", "/etc/hosts")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9696/v1/guests/g1/cat?path=%2Fetc%2Fhosts"
        );

        let url = c
            .url_with_query(&["networks"], std::iter::empty::<(&str, &str)>())
            .unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9696/v1/networks");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error":"guest not found"}"#, "x"), "guest not found");
        assert_eq!(error_message(r#"{"Msg":"busy"}"#, "x"), "busy");
        assert_eq!(error_message("plain failure\n", "x"), "plain failure");
        assert_eq!(error_message("", "Not Found"), "Not Found");
        assert_eq!(error_message(r#"{"code":3}"#, "x"), r#"{"code":3}"#);
    }

    #[test]
    fn test_request_bodies_use_daemon_names() {
        let value = serde_json::to_value(GuestForceReq { id: "g1", force: true }).unwrap();
        assert_eq!(value, serde_json::json!({"ID": "g1", "Force": true}));

        let value = serde_json::to_value(SnapshotReq {
            id: "g1",
            vol_id: "vol",
            snap_id: "",
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"ID": "g1", "VolID": "vol"}));
    }

    #[tokio::test]
    async fn test_attach_is_unsupported() {
        let err = client("v1")
            .attach_guest("g1", vec![], AttachGuestFlags::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Unsupported {
                operation: "attach_guest",
                transport: TransportKind::Http
            }
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Nothing listens on port 1; retries disabled to keep the test fast
        let options = ClientOptions {
            timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            retry: None,
        };
        let c = HttpClient::new("127.0.0.1:1", "v1", options).unwrap();
        let err = c.info().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }
}
