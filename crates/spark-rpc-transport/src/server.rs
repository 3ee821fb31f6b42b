use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use spark_rpc::{
    Call, CallContext, CallId, ClientCall, Code, DEFAULT_STREAM_CAPACITY, Pattern, Router, Status,
    serve_call,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::connection::{
    CallTracker, FrameSender, Outbound, ServerCalls, ServerInbound, ServerSlot,
    forward_requests, pump_responses, spawn_writer,
};
use crate::error::{ACCEPT, BIND, CONFIGURE, TransportError, map_io_error};
use crate::frame::{DEFAULT_MAX_FRAME_LEN, Frame, FrameReader};
use crate::socket::TcpSocketConfig;
use crate::tls::TlsAcceptor;

/// 服务器生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Serving,
    /// 拒绝新调用，等待进行中的调用完成。
    Draining,
    Stopped,
}

/// 服务器配置。
#[derive(Clone, Debug)]
pub struct ServerConfig {
    max_frame_len: usize,
    stream_capacity: usize,
    drain_timeout: Duration,
    handshake_timeout: Duration,
    socket: TcpSocketConfig,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            drain_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            socket: TcpSocketConfig::default(),
        }
    }

    /// 单帧长度上限。入站帧超限视为连接故障；出站响应超限只以 `Internal` 终结所属调用。
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    /// 优雅停机时等待进行中调用的最长时间，超时后剩余调用被取消。
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_socket_config(mut self, socket: TcpSocketConfig) -> Self {
        self.socket = socket;
        self
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 线上 RPC 服务器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 [`Router`] 中登记的处理器暴露在 TCP（可选 TLS）监听之上；
/// - 停机分两阶段：先拒绝新调用并等待进行中的调用，超过排空时限后再取消剩余调用。
///
/// ## 契约（What）
/// - `serve_with_shutdown`：`shutdown` 完成前持续接受连接；返回时所有连接任务均已结束；
/// - 排空期间新到的 `Open` 帧以 `Unavailable` 终态拒绝，已有调用不受影响；
/// - 状态迁移 `Starting → Serving → Draining → Stopped` 可通过 [`Server::subscribe`] 观察。
///
/// ## 风险（Trade-offs）
/// - TLS 握手在连接任务内完成，慢握手不会阻塞接受循环，但会占用一个任务直至握手超时。
#[derive(Debug)]
pub struct Server {
    router: Arc<Router>,
    config: ServerConfig,
    tls: Option<TlsAcceptor>,
    state: watch::Sender<ServerState>,
    tracker: Arc<CallTracker>,
}

impl Server {
    pub fn new(router: Router, config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ServerState::Starting);
        Self {
            router: Arc::new(router),
            config,
            tls: None,
            state,
            tracker: Arc::new(CallTracker::default()),
        }
    }

    /// 对每条接入连接先完成 TLS 握手。
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// 绑定监听地址。
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, TransportError> {
        TcpListener::bind(addr)
            .await
            .map_err(|err| map_io_error(BIND, err))
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// 订阅状态变化。
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// 当前进行中的调用数。
    pub fn active_calls(&self) -> usize {
        self.tracker.active()
    }

    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr().ok();
        self.transition(ServerState::Serving);
        info!(addr = ?local, tls = self.tls.is_some(), "server listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(accept_connection(stream, peer, self.shared()));
                    }
                    Err(err) => {
                        let err = map_io_error(ACCEPT, err);
                        warn!(code = err.code(), error = %err, "accept failed");
                    }
                },
            }
        }
        drop(listener);

        self.transition(ServerState::Draining);
        info!(active = self.tracker.active(), "server draining");
        if tokio::time::timeout(self.config.drain_timeout, self.tracker.wait_idle())
            .await
            .is_err()
        {
            warn!(
                active = self.tracker.active(),
                "drain timeout elapsed, canceling remaining calls"
            );
        }
        self.transition(ServerState::Stopped);
        while connections.join_next().await.is_some() {}
        info!("server stopped");
    }

    fn transition(&self, next: ServerState) {
        self.state.send_replace(next);
    }

    fn shared(&self) -> Shared {
        Shared {
            router: Arc::clone(&self.router),
            config: self.config.clone(),
            tls: self.tls.clone(),
            state: self.state.subscribe(),
            tracker: Arc::clone(&self.tracker),
        }
    }
}

/// 连接任务持有的服务器状态副本。
struct Shared {
    router: Arc<Router>,
    config: ServerConfig,
    tls: Option<TlsAcceptor>,
    state: watch::Receiver<ServerState>,
    tracker: Arc<CallTracker>,
}

async fn accept_connection(stream: TcpStream, peer: SocketAddr, shared: Shared) {
    if let Err(err) = shared.config.socket.apply(&stream) {
        let err = map_io_error(CONFIGURE, err);
        warn!(peer = %peer, code = err.code(), error = %err, "socket configuration failed");
        return;
    }
    match shared.tls.clone() {
        Some(acceptor) => {
            let ctx = CallContext::builder()
                .with_timeout(shared.config.handshake_timeout)
                .build();
            match acceptor.accept(&ctx, stream).await {
                Ok(stream) => serve_connection(stream, peer, shared).await,
                Err(err) => {
                    warn!(peer = %peer, code = err.code(), error = %err, "tls handshake failed");
                }
            }
        }
        None => serve_connection(stream, peer, shared).await,
    }
}

/// 驱动一条连接直到对端关闭、读取失败或服务器停止。
///
/// 读取失败时写任务被立即中止，进行中的调用不再写出终态，对端据此以传输层错误结束它们；
/// 服务器停止时则照常写出被取消调用的终态。
async fn serve_connection<S>(stream: S, peer: SocketAddr, shared: Shared)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    debug!(peer = %peer, "connection accepted");
    let Shared {
        router,
        config,
        state: mut state_rx,
        tracker,
        ..
    } = shared;
    let (read_half, write_half) = tokio::io::split(stream);
    let (writer, writer_task) = spawn_writer(write_half);
    let mut frames = FrameReader::new(read_half, config.max_frame_len);
    let calls: ServerCalls = Arc::new(DashMap::new());
    let local = Arc::new(CallTracker::default());
    let dispatcher = Dispatcher {
        router: &router,
        config: &config,
        writer: &writer,
        calls: &calls,
        server: &tracker,
        connection: &local,
    };

    let mut failed = false;
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() || *state_rx.borrow_and_update() == ServerState::Stopped {
                    break;
                }
            }
            next = frames.next() => match next {
                Ok(Some(frame)) => {
                    let serving = *state_rx.borrow() == ServerState::Serving;
                    dispatcher.dispatch(frame, serving).await;
                }
                Ok(None) => {
                    debug!(peer = %peer, "peer closed the connection");
                    break;
                }
                Err(err) => {
                    warn!(peer = %peer, code = err.code(), error = %err, "connection failed");
                    failed = true;
                    break;
                }
            },
        }
    }
    drop(frames);

    if failed {
        // 连接已不可信：不再写出任何帧，对端读到连接结束后以传输层错误终结全部调用。
        writer_task.abort();
    }
    for slot in calls.iter() {
        slot.ctx.cancel();
    }
    local.wait_idle().await;
    calls.clear();
    drop(dispatcher);
    drop(writer);
    let _ = writer_task.await;
    debug!(peer = %peer, failed, "connection closed");
}

/// 按帧类型把入站帧分派到对应调用。
struct Dispatcher<'a> {
    router: &'a Router,
    config: &'a ServerConfig,
    writer: &'a FrameSender,
    calls: &'a ServerCalls,
    server: &'a Arc<CallTracker>,
    connection: &'a Arc<CallTracker>,
}

impl Dispatcher<'_> {
    async fn dispatch(&self, frame: Frame, serving: bool) {
        match frame {
            Frame::Open {
                call_id,
                pattern,
                timeout,
                method,
            } => {
                if let Err(status) = self.open(call_id, pattern, timeout, &method, serving) {
                    debug!(call_id, method = %method, code = %status.code(), "call rejected");
                    let _ = self.writer.send(Frame::Status { call_id, status }).await;
                }
            }
            Frame::Message { call_id, payload } => {
                self.forward(call_id, ServerInbound::Message(payload));
            }
            Frame::HalfClose { call_id } => {
                self.forward(call_id, ServerInbound::HalfClose);
            }
            Frame::Cancel { call_id } => {
                if let Some(slot) = self.calls.get(&call_id) {
                    debug!(call_id, "call canceled by peer");
                    slot.ctx.cancel();
                }
            }
            Frame::Status { call_id, .. } => {
                warn!(call_id, "ignoring status frame sent by client");
            }
        }
    }

    fn open(
        &self,
        call_id: u64,
        pattern: Pattern,
        timeout: Option<Duration>,
        method: &str,
        serving: bool,
    ) -> Result<(), Status> {
        if !serving {
            return Err(Status::new(Code::Unavailable, "server is draining"));
        }
        let handler = self.router.resolve(method, pattern)?;
        if self.calls.contains_key(&call_id) {
            return Err(Status::new(
                Code::FailedPrecondition,
                format!("call id {call_id} is already in use"),
            ));
        }

        let mut builder = CallContext::builder();
        if let Some(timeout) = timeout {
            builder = builder.with_timeout(timeout);
        }
        let ctx = builder.build();
        let (proxy, server) = Call::pair(
            CallId(call_id),
            method,
            pattern,
            ctx.clone(),
            self.config.stream_capacity,
        );
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.calls.insert(
            call_id,
            ServerSlot {
                ctx,
                inbound: inbound_tx,
            },
        );

        let guards = vec![self.server.enter(), self.connection.enter()];
        let ClientCall {
            requests,
            responses,
            ..
        } = proxy;
        let out = Outbound {
            call_id,
            writer: self.writer.clone(),
            max_frame_len: self.config.max_frame_len,
        };
        tokio::spawn(serve_call(handler, server));
        tokio::spawn(forward_requests(out.clone(), inbound_rx, requests));
        tokio::spawn(pump_responses(out, responses, Arc::clone(self.calls), guards));
        Ok(())
    }

    fn forward(&self, call_id: u64, event: ServerInbound) {
        match self.calls.get(&call_id) {
            Some(slot) => {
                let _ = slot.inbound.send(event);
            }
            None => debug!(call_id, "frame for unknown call dropped"),
        }
    }
}
