//! yavirtd gRPC Transport
//!
//! Talks to the `yavpb.YavirtdRPC` service over a lazily connected tonic
//! channel. Unlike the HTTP transport, every operation is available here,
//! including the bidirectional console stream used by `attach_guest`.

mod convert;

/// Generated protobuf messages and service stubs for the `yavpb` package
#[allow(clippy::all)]
pub mod proto {
    tonic::include_proto!("yavpb");
}

use crate::client::{instrumented, Client, ClientOptions, TransportKind};
use crate::error::{Error, Result};
use crate::metrics::StreamGuard;
use crate::retry::RetryConfig;
use crate::stream::{reader_chunks, ByteStream, Content, EventStream, GuestStream};
use crate::types::{
    saturate_i32, AttachGuestFlags, CaptureGuestReq, ConnectNetworkReq, CreateGuestReq,
    DisconnectNetworkReq, EventMessage, ExecuteGuestMessage, GetGuestIdListReq, Guest, HostInfo,
    Msg, Network, ResizeGuestReq, Snapshot, SysImage, UserImage, WaitResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use proto as pb;
use proto::yavirtd_rpc_client::YavirtdRpcClient;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::Streaming;
use tonic::transport::{Channel, Endpoint};

const TRANSPORT: TransportKind = TransportKind::Grpc;

/// Console input frames buffered before `GuestStream::send` waits
const ATTACH_INPUT_BUFFER: usize = 32;

/// gRPC client for yavirtd
#[derive(Debug, Clone)]
pub struct GrpcClient {
    channel: Channel,
    host: String,
    timeout: Duration,
    retry: Option<RetryConfig>,
}

impl GrpcClient {
    /// Create a client for `host:port`
    ///
    /// No connection is made until the first call. Must be called from
    /// within a Tokio runtime.
    pub fn new(host: &str, options: ClientOptions) -> Result<Self> {
        let target = format!("http://{host}");
        let endpoint = Endpoint::from_shared(target.clone())
            .map_err(|e| Error::invalid_uri(&target, e))?
            .connect_timeout(options.connect_timeout)
            .tcp_nodelay(true);

        Ok(Self {
            channel: endpoint.connect_lazy(),
            host: host.to_string(),
            timeout: options.timeout,
            retry: options.retry,
        })
    }

    /// Daemon address this client talks to
    pub fn host(&self) -> &str {
        &self.host
    }

    fn rpc(&self) -> YavirtdRpcClient<Channel> {
        YavirtdRpcClient::new(self.channel.clone())
    }

    /// Wrap a unary message, advertising the request deadline to the daemon
    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.timeout);
        request
    }

    async fn deadline<T>(
        &self,
        call: impl Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    ) -> Result<T> {
        deadline(self.timeout, call).await
    }

    async fn control_guest(
        &self,
        operation: &'static str,
        metric: &'static str,
        id: &str,
        force: bool,
    ) -> Result<Msg> {
        instrumented(TRANSPORT, metric, None, || async {
            let opts = pb::ControlGuestOptions {
                id: id.to_string(),
                operation: operation.to_string(),
                force,
            };
            let reply = self
                .deadline(self.rpc().control_guest(self.request(opts)))
                .await?;
            Ok(Msg::new(reply.msg))
        })
        .await
    }
}

/// Bound a call by `timeout`
async fn deadline<T>(
    timeout: Duration,
    call: impl Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(reply) => Ok(reply?.into_inner()),
        Err(_) => Err(Error::Rpc {
            code: tonic::Code::DeadlineExceeded,
            message: format!("no reply within {timeout:?}"),
        }),
    }
}

/// Adapt a server stream of byte-carrying messages into a [`ByteStream`]
fn byte_stream<M>(
    stream: Streaming<M>,
    kind: &'static str,
    data: fn(M) -> Vec<u8>,
) -> ByteStream
where
    M: Send + 'static,
{
    let guard = StreamGuard::open(TRANSPORT, kind);
    stream
        .map(move |item| {
            let _open = &guard;
            item.map(|msg| Bytes::from(data(msg))).map_err(Error::from)
        })
        .boxed()
}

/// Request frames for an attach session: the options first, then input
fn attach_frames(
    id: &str,
    commands: Vec<String>,
    flags: AttachGuestFlags,
    input: mpsc::Receiver<Bytes>,
) -> BoxStream<'static, pb::AttachGuestOptions> {
    let first = pb::AttachGuestOptions {
        id: id.to_string(),
        commands,
        force: flags.force,
        safe: flags.safe,
        repl_cmd: Vec::new(),
    };
    let id = id.to_string();

    stream::iter([first])
        .chain(ReceiverStream::new(input).map(move |data| pb::AttachGuestOptions {
            id: id.clone(),
            repl_cmd: data.to_vec(),
            ..Default::default()
        }))
        .boxed()
}

/// Request frames for an upload: a header frame, then one frame per chunk
///
/// A read error is handed to `abort` and the stream then stays pending
/// instead of ending, so the daemon never sees a complete upload.
fn copy_frames(
    header: pb::CopyOptions,
    content: Content,
    abort: oneshot::Sender<io::Error>,
) -> BoxStream<'static, pb::CopyOptions> {
    let template = header.clone();
    let mut abort = Some(abort);
    let chunks = reader_chunks(content).flat_map(move |chunk| match chunk {
        Ok(data) => stream::once(future::ready(pb::CopyOptions {
            content: data.to_vec(),
            ..template.clone()
        }))
        .boxed(),
        Err(e) => {
            tracing::warn!("Reading copy content failed: {}", e);
            if let Some(abort) = abort.take() {
                let _ = abort.send(e);
            }
            stream::pending().boxed()
        }
    });

    stream::iter([header]).chain(chunks).boxed()
}

/// Named pass-through wrapper for request frame streams handed to tonic
///
/// Passing a bare `BoxStream` into the client-streaming calls trips a rustc
/// higher-ranked lifetime limitation when proving the call future `Send`;
/// a concrete type sidesteps it.
struct Frames<T>(BoxStream<'static, T>);

impl<T> futures::Stream for Frames<T> {
    type Item = T;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<T>> {
        self.0.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

#[async_trait]
impl Client for GrpcClient {
    fn transport(&self) -> TransportKind {
        TRANSPORT
    }

    async fn info(&self) -> Result<HostInfo> {
        instrumented(TRANSPORT, "info", self.retry.as_ref(), || async {
            let reply = self
                .deadline(self.rpc().get_info(self.request(pb::Empty {})))
                .await?;
            Ok(reply.into())
        })
        .await
    }

    async fn get_guest(&self, id: &str) -> Result<Guest> {
        instrumented(TRANSPORT, "get_guest", self.retry.as_ref(), || async {
            let opts = pb::GetGuestOptions { id: id.to_string() };
            let reply = self
                .deadline(self.rpc().get_guest(self.request(opts)))
                .await?;
            Ok(reply.into())
        })
        .await
    }

    async fn get_guest_uuid(&self, id: &str) -> Result<String> {
        instrumented(TRANSPORT, "get_guest_uuid", self.retry.as_ref(), || async {
            let opts = pb::GetGuestOptions { id: id.to_string() };
            let reply = self
                .deadline(self.rpc().get_guest_uuid(self.request(opts)))
                .await?;
            Ok(reply.uuid)
        })
        .await
    }

    async fn get_guest_id_list(&self, req: GetGuestIdListReq) -> Result<Vec<String>> {
        instrumented(TRANSPORT, "get_guest_id_list", self.retry.as_ref(), || async {
            let opts = pb::GetGuestIdListOptions {
                filters: req.filters.clone(),
            };
            let reply = self
                .deadline(self.rpc().get_guest_id_list(self.request(opts)))
                .await?;
            Ok(reply.ids)
        })
        .await
    }

    async fn create_guest(&self, req: CreateGuestReq) -> Result<Guest> {
        instrumented(TRANSPORT, "create_guest", None, || async {
            let opts = pb::CreateGuestOptions::from(req.clone());
            let reply = self
                .deadline(self.rpc().create_guest(self.request(opts)))
                .await?;
            Ok(reply.into())
        })
        .await
    }

    async fn start_guest(&self, id: &str) -> Result<Msg> {
        self.control_guest("start", "start_guest", id, false).await
    }

    async fn stop_guest(&self, id: &str, force: bool) -> Result<Msg> {
        self.control_guest("stop", "stop_guest", id, force).await
    }

    async fn destroy_guest(&self, id: &str, force: bool) -> Result<Msg> {
        self.control_guest("destroy", "destroy_guest", id, force).await
    }

    async fn attach_guest(
        &self,
        id: &str,
        cmd: Vec<String>,
        flags: AttachGuestFlags,
    ) -> Result<GuestStream> {
        let (tx, rx) = mpsc::channel::<Bytes>(ATTACH_INPUT_BUFFER);
        let mut frames = Some(attach_frames(id, cmd, flags, rx));
        let rpc = self.rpc();
        let timeout = self.timeout;

        let output = instrumented(TRANSPORT, "attach_guest", None, move || {
            let frames = frames.take();
            let mut rpc = rpc.clone();
            async move {
                let frames = frames
                    .ok_or_else(|| Error::Transport("attach input already consumed".to_string()))?;
                deadline(timeout, rpc.attach_guest(Frames(frames))).await
            }
        })
        .await?;

        tracing::debug!("Attached to guest {}", id);
        Ok(GuestStream::new(
            tx,
            byte_stream(output, "attach", |msg: pb::AttachGuestMessage| msg.data),
        ))
    }

    async fn resize_console_window(&self, id: &str, height: u32, width: u32) -> Result<()> {
        instrumented(TRANSPORT, "resize_console_window", None, || async {
            let opts = pb::ResizeWindowOptions {
                id: id.to_string(),
                height: i64::from(height),
                width: i64::from(width),
            };
            self.deadline(self.rpc().resize_console_window(self.request(opts)))
                .await?;
            Ok(())
        })
        .await
    }

    async fn execute_guest(&self, id: &str, cmd: Vec<String>) -> Result<ExecuteGuestMessage> {
        instrumented(TRANSPORT, "execute_guest", None, || async {
            let opts = pb::ExecuteGuestOptions {
                id: id.to_string(),
                commands: cmd.clone(),
            };
            let reply = self
                .deadline(self.rpc().execute_guest(self.request(opts)))
                .await?;
            Ok(reply.into())
        })
        .await
    }

    async fn exec_exit_code(&self, id: &str, pid: i64) -> Result<i32> {
        instrumented(TRANSPORT, "exec_exit_code", self.retry.as_ref(), || async {
            let opts = pb::ExecExitCodeOptions {
                id: id.to_string(),
                pid,
            };
            let reply = self
                .deadline(self.rpc().exec_exit_code(self.request(opts)))
                .await?;
            Ok(saturate_i32(reply.exit_code))
        })
        .await
    }

    async fn resize_guest(&self, req: ResizeGuestReq) -> Result<Msg> {
        instrumented(TRANSPORT, "resize_guest", None, || async {
            let opts = pb::ResizeGuestOptions::from(req.clone());
            let reply = self
                .deadline(self.rpc().resize_guest(self.request(opts)))
                .await?;
            Ok(Msg::new(reply.msg))
        })
        .await
    }

    async fn capture_guest(&self, req: CaptureGuestReq) -> Result<UserImage> {
        instrumented(TRANSPORT, "capture_guest", None, || async {
            let opts = pb::CaptureGuestOptions::from(req.clone());
            let reply = self
                .deadline(self.rpc().capture_guest(self.request(opts)))
                .await?;
            Ok(reply.into())
        })
        .await
    }

    async fn connect_network(&self, req: ConnectNetworkReq) -> Result<String> {
        instrumented(TRANSPORT, "connect_network", None, || async {
            let opts = pb::ConnectNetworkOptions::from(req.clone());
            let reply = self
                .deadline(self.rpc().connect_network(self.request(opts)))
                .await?;
            Ok(reply.cidr)
        })
        .await
    }

    async fn disconnect_network(&self, req: DisconnectNetworkReq) -> Result<String> {
        instrumented(TRANSPORT, "disconnect_network", None, || async {
            let opts = pb::DisconnectNetworkOptions::from(req.clone());
            let reply = self
                .deadline(self.rpc().disconnect_network(self.request(opts)))
                .await?;
            Ok(reply.msg)
        })
        .await
    }

    async fn cat(&self, id: &str, path: &str) -> Result<ByteStream> {
        let stream = instrumented(TRANSPORT, "cat", None, || async {
            let opts = pb::CatOptions {
                id: id.to_string(),
                path: path.to_string(),
            };
            self.deadline(self.rpc().cat(opts)).await
        })
        .await?;
        Ok(byte_stream(stream, "cat", |msg: pb::CatMessage| msg.data))
    }

    async fn events(&self, filters: HashMap<String, String>) -> Result<EventStream> {
        let stream = instrumented(TRANSPORT, "events", None, || async {
            let opts = pb::EventsOptions {
                filters: filters.clone(),
            };
            self.deadline(self.rpc().events(opts)).await
        })
        .await?;

        let guard = StreamGuard::open(TRANSPORT, "events");
        Ok(stream
            .map(move |item| {
                let _open = &guard;
                item.map(EventMessage::from).map_err(Error::from)
            })
            .boxed())
    }

    async fn copy_to_guest(
        &self,
        id: &str,
        dest: &str,
        content: Content,
        allow_overwrite_dir_with_file: bool,
        copy_uid_gid: bool,
    ) -> Result<()> {
        let header = pb::CopyOptions {
            id: id.to_string(),
            dest: dest.to_string(),
            content: Vec::new(),
            override_folder: allow_overwrite_dir_with_file,
            uid_gid: copy_uid_gid,
        };
        let (abort_tx, abort_rx) = oneshot::channel();
        let mut upload = Some((copy_frames(header, content, abort_tx), abort_rx));
        let rpc = self.rpc();

        instrumented(TRANSPORT, "copy_to_guest", None, move || {
            let upload = upload.take();
            let mut rpc = rpc.clone();
            async move {
                let (frames, mut abort) = upload.ok_or_else(|| {
                    Error::Transport("upload content already consumed".to_string())
                })?;
                let _open = StreamGuard::open(TRANSPORT, "copy");

                let call = rpc.copy_to_guest(Frames(frames));
                tokio::pin!(call);
                // Dropping the call on a read error resets the stream, so a
                // truncated upload is never committed.
                let reply = tokio::select! {
                    biased;
                    Ok(e) = &mut abort => return Err(Error::Io(e)),
                    reply = &mut call => reply?.into_inner(),
                };

                if reply.failed {
                    return Err(Error::Rpc {
                        code: tonic::Code::Internal,
                        message: reply.msg,
                    });
                }
                Ok(())
            }
        })
        .await
    }

    async fn network_list(&self, drivers: Vec<String>) -> Result<Vec<Network>> {
        instrumented(TRANSPORT, "network_list", self.retry.as_ref(), || async {
            let opts = pb::NetworkListOptions {
                drivers: drivers.clone(),
            };
            let reply = self
                .deadline(self.rpc().network_list(self.request(opts)))
                .await?;
            Ok(reply.networks.into_iter().map(Network::from).collect())
        })
        .await
    }

    async fn wait_guest(&self, id: &str, force: bool) -> Result<WaitResult> {
        instrumented(TRANSPORT, "wait_guest", None, || async {
            let opts = pb::WaitGuestOptions {
                id: id.to_string(),
                force,
            };
            // Waiting may outlast the unary timeout.
            let reply = self.rpc().wait_guest(opts).await?.into_inner();
            Ok(reply.into())
        })
        .await
    }

    async fn log(&self, id: &str, n: i64) -> Result<ByteStream> {
        let stream = instrumented(TRANSPORT, "log", None, || async {
            let opts = pb::LogOptions {
                id: id.to_string(),
                n,
            };
            self.deadline(self.rpc().log(opts)).await
        })
        .await?;
        Ok(byte_stream(stream, "log", |msg: pb::LogMessage| msg.data))
    }

    async fn list_snapshot(&self, id: &str, vol_id: &str) -> Result<Vec<Snapshot>> {
        instrumented(TRANSPORT, "list_snapshot", self.retry.as_ref(), || async {
            let opts = pb::ListSnapshotOptions {
                id: id.to_string(),
                vol_id: vol_id.to_string(),
            };
            let reply = self
                .deadline(self.rpc().list_snapshot(self.request(opts)))
                .await?;
            Ok(reply.snapshots.into_iter().map(Snapshot::from).collect())
        })
        .await
    }

    async fn create_snapshot(&self, id: &str, vol_id: &str) -> Result<Msg> {
        instrumented(TRANSPORT, "create_snapshot", None, || async {
            let opts = pb::CreateSnapshotOptions {
                id: id.to_string(),
                vol_id: vol_id.to_string(),
            };
            let reply = self
                .deadline(self.rpc().create_snapshot(self.request(opts)))
                .await?;
            Ok(Msg::new(reply.msg))
        })
        .await
    }

    async fn commit_snapshot(&self, id: &str, vol_id: &str, snap_id: &str) -> Result<Msg> {
        instrumented(TRANSPORT, "commit_snapshot", None, || async {
            let opts = pb::CommitSnapshotOptions {
                id: id.to_string(),
                vol_id: vol_id.to_string(),
                snap_id: snap_id.to_string(),
            };
            let reply = self
                .deadline(self.rpc().commit_snapshot(self.request(opts)))
                .await?;
            Ok(Msg::new(reply.msg))
        })
        .await
    }

    async fn restore_snapshot(&self, id: &str, vol_id: &str, snap_id: &str) -> Result<Msg> {
        instrumented(TRANSPORT, "restore_snapshot", None, || async {
            let opts = pb::RestoreSnapshotOptions {
                id: id.to_string(),
                vol_id: vol_id.to_string(),
                snap_id: snap_id.to_string(),
            };
            let reply = self
                .deadline(self.rpc().restore_snapshot(self.request(opts)))
                .await?;
            Ok(Msg::new(reply.msg))
        })
        .await
    }

    async fn push_image(&self, img_name: &str, user: &str) -> Result<String> {
        instrumented(TRANSPORT, "push_image", None, || async {
            let opts = pb::PushImageOptions {
                img_name: img_name.to_string(),
                user: user.to_string(),
            };
            let reply = self
                .deadline(self.rpc().push_image(self.request(opts)))
                .await?;
            Ok(reply.err)
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
        instrumented(TRANSPORT, "remove_image", None, || async {
            let opts = pb::RemoveImageOptions {
                image: img_name.to_string(),
                user: user.to_string(),
                force,
                prune,
            };
            let reply = self
                .deadline(self.rpc().remove_image(self.request(opts)))
                .await?;
            Ok(reply.removed)
        })
        .await
    }

    async fn list_image(&self, filter: &str) -> Result<Vec<SysImage>> {
        instrumented(TRANSPORT, "list_image", self.retry.as_ref(), || async {
            let opts = pb::ListImageOptions {
                filter: filter.to_string(),
            };
            let reply = self
                .deadline(self.rpc().list_image(self.request(opts)))
                .await?;
            Ok(reply.images.into_iter().map(SysImage::from).collect())
        })
        .await
    }

    async fn pull_image(&self, img_name: &str, all: bool) -> Result<String> {
        instrumented(TRANSPORT, "pull_image", None, || async {
            let opts = pb::PullImageOptions {
                img_name: img_name.to_string(),
                all,
            };
            let reply = self
                .deadline(self.rpc().pull_image(self.request(opts)))
                .await?;
            Ok(reply.msg)
        })
        .await
    }

    async fn digest_image(&self, img_name: &str, local: bool) -> Result<Vec<String>> {
        instrumented(TRANSPORT, "digest_image", self.retry.as_ref(), || async {
            let opts = pb::DigestImageOptions {
                image_name: img_name.to_string(),
                local,
            };
            let reply = self
                .deadline(self.rpc().digest_image(self.request(opts)))
                .await?;
            Ok(reply.digests)
        })
        .await
    }
}
