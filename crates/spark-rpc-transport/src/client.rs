use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use spark_rpc::{
    Call, CallContext, CallId, ClientCall, DEFAULT_STREAM_CAPACITY, Pattern, ServerCall, Status,
    Transport,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::{
    ClientCalls, ClientInbound, FrameSender, Outbound, deliver_responses, pump_requests,
    spawn_writer,
};
use crate::error::{CONFIGURE, CONNECT, TransportError, map_io_error};
use crate::frame::{DEFAULT_MAX_FRAME_LEN, Frame, FrameReader};
use crate::socket::TcpSocketConfig;
use crate::tls::TlsConnector;
use crate::util::run_with_context;

/// 建立连接时的可调参数。
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    tls: Option<TlsConnector>,
    socket: TcpSocketConfig,
    connect_timeout: Duration,
    max_frame_len: usize,
    stream_capacity: usize,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self {
            tls: None,
            socket: TcpSocketConfig::default(),
            connect_timeout: Duration::from_secs(10),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// 在 TCP 之上执行 TLS 握手。
    pub fn with_tls(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    pub fn with_socket_config(mut self, socket: TcpSocketConfig) -> Self {
        self.socket = socket;
        self
    }

    /// 建连与握手合计的超时时长。
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 单帧长度上限，收发两个方向共用；超过上限的请求消息只终结所属调用。
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// 客户端连接：在单条 TCP/TLS 连接上复用多个调用，实现 [`Transport`]。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 调用标识为奇数且单调递增；
/// - 调用的剩余截止时间随 `Open` 帧发送，被调方据此重建绝对截止时间；
/// - 调用方取消、截止时间到达或丢弃响应读取端时，向对端发送 `Cancel` 帧；
/// - 被调方停止接收请求后，调用方的下一次发送得到 `ChannelClosed`；
/// - 连接断开后，进行中的调用以传输层错误结束，新调用立即失败。
#[derive(Clone, Debug)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    writer: FrameSender,
    calls: ClientCalls,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    capacity: usize,
    max_frame_len: usize,
    peer: SocketAddr,
}

impl Connection {
    /// 连接到 `addr`，按 `options` 决定是否启用 TLS。
    pub async fn connect(addr: SocketAddr, options: ConnectOptions) -> Result<Self, TransportError> {
        let ctx = CallContext::builder()
            .with_timeout(options.connect_timeout)
            .build();
        let stream = run_with_context(&ctx, CONNECT, TcpStream::connect(addr)).await?;
        options
            .socket
            .apply(&stream)
            .map_err(|err| map_io_error(CONFIGURE, err))?;
        let connection = match &options.tls {
            Some(connector) => {
                let stream = connector.connect(&ctx, stream).await?;
                Self::start(stream, addr, &options)
            }
            None => Self::start(stream, addr, &options),
        };
        info!(peer = %addr, tls = options.tls.is_some(), "connection established");
        Ok(connection)
    }

    fn start<S>(stream: S, peer: SocketAddr, options: &ConnectOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, _writer_task) = spawn_writer(write_half);
        let calls: ClientCalls = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_responses(
            FrameReader::new(read_half, options.max_frame_len),
            Arc::clone(&calls),
            Arc::clone(&closed),
            peer,
        ));
        Self {
            inner: Arc::new(ConnectionInner {
                writer,
                calls,
                closed,
                next_id: AtomicU64::new(1),
                capacity: options.stream_capacity,
                max_frame_len: options.max_frame_len,
                peer,
            }),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// 连接是否已经断开。
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn closed_status() -> Status {
        Status::transport("connection closed")
    }
}

#[async_trait]
impl Transport for Connection {
    async fn open(
        &self,
        method: &str,
        pattern: Pattern,
        ctx: CallContext,
    ) -> Result<ClientCall, Status> {
        if self.is_closed() {
            return Err(Self::closed_status());
        }
        let call_id = self.inner.next_id.fetch_add(2, Ordering::Relaxed);
        let timeout = ctx.deadline().remaining();
        let (client, remote) =
            Call::pair(CallId(call_id), method, pattern, ctx.clone(), self.inner.capacity);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let local = inbound_tx.downgrade();
        self.inner.calls.insert(call_id, inbound_tx);
        if self.is_closed() {
            self.inner.calls.remove(&call_id);
            return Err(Self::closed_status());
        }

        let open = Frame::Open {
            call_id,
            pattern,
            timeout,
            method: method.to_owned(),
        };
        if self.inner.writer.send(open).await.is_err() {
            self.inner.calls.remove(&call_id);
            return Err(Self::closed_status());
        }

        let ServerCall {
            requests,
            responses,
            status,
            ..
        } = remote;
        let out = Outbound {
            call_id,
            writer: self.inner.writer.clone(),
            max_frame_len: self.inner.max_frame_len,
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        tokio::spawn(pump_requests(
            out.clone(),
            ctx,
            requests,
            local,
            stop_rx,
            finished_rx,
        ));
        tokio::spawn(deliver_responses(
            out,
            inbound_rx,
            responses,
            status,
            stop_tx,
            finished_tx,
        ));
        Ok(client)
    }
}

async fn read_responses<R>(
    mut frames: FrameReader<R>,
    calls: ClientCalls,
    closed: Arc<AtomicBool>,
    peer: SocketAddr,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match frames.next().await {
            Ok(Some(Frame::Message { call_id, payload })) => {
                if let Some(inbound) = calls.get(&call_id) {
                    let _ = inbound.send(ClientInbound::Message(payload));
                }
            }
            Ok(Some(Frame::HalfClose { call_id })) => {
                if let Some(inbound) = calls.get(&call_id) {
                    let _ = inbound.send(ClientInbound::RequestsClosed);
                }
            }
            Ok(Some(Frame::Status { call_id, status })) => {
                if let Some((_, inbound)) = calls.remove(&call_id) {
                    let _ = inbound.send(ClientInbound::Status(status));
                }
            }
            Ok(Some(other)) => {
                debug!(call_id = other.call_id(), "ignoring unexpected frame from server");
            }
            Ok(None) => {
                debug!(peer = %peer, "server closed the connection");
                break;
            }
            Err(err) => {
                warn!(peer = %peer, code = err.code(), error = %err, "connection failed");
                break;
            }
        }
    }
    closed.store(true, Ordering::Release);
    calls.clear();
}
