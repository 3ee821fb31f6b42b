//! 单条连接上的调用多路复用。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 一条 TCP/TLS 连接承载任意多个并发调用，调用之间互不共享可变状态；
//! - 线上两端都复用核心的 [`Call::pair`]：本端的处理器或调用方拿到正常的一端，
//!   另一端由本模块的转发任务代持，充当“远端”的代理。
//!
//! ## 实现（How）
//! - 写：所有帧汇入一条有界队列，由单一写任务顺序编码并写出；
//! - 读：连接读循环按 `call_id` 把帧分发到调用登记表（`DashMap`）中的入站队列；
//! - 入站队列无界，读循环因此永不因某个慢调用而阻塞（避免队头阻塞）；
//!   每个调用另有转发任务把入站消息搬运进核心的有界通道，背压在这里生效；
//! - 消息帧在入队前经 [`Outbound`] 自查帧长：超过上限的消息只终结所属调用，
//!   不会让对端的帧读取器判定整条连接失败。
//!
//! ## 风险（Trade-offs）
//! - 处理器读取慢于对端写入时，无界入站队列会持续增长；目前依赖截止时间与取消兜底，
//!   尚未实现按调用的流量控制窗口。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use spark_rpc::{CallContext, ChannelError, Status, StatusSender, StreamReceiver, StreamSender};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{WRITE, map_io_error};
use crate::frame::Frame;

/// 出站帧队列容量。
pub(crate) const OUTBOUND_QUEUE: usize = 256;

/// 出站帧的发送句柄。
pub(crate) type FrameSender = mpsc::Sender<Frame>;

/// 派生写任务：顺序编码并写出帧，队列排空时刷新。
///
/// 所有发送句柄都被丢弃后写任务关闭写半部，对端随之观察到连接结束。
pub(crate) fn spawn_writer<W>(mut write_half: W) -> (FrameSender, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
    let task = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(8 * 1024);
        while let Some(frame) = rx.recv().await {
            buf.clear();
            frame.encode(&mut buf);
            if let Err(err) = write_half.write_all(&buf).await {
                let err = map_io_error(WRITE, err);
                warn!(code = err.code(), error = %err, "frame writer stopped");
                return;
            }
            if rx.is_empty()
                && let Err(err) = write_half.flush().await
            {
                let err = map_io_error(WRITE, err);
                warn!(code = err.code(), error = %err, "frame writer stopped");
                return;
            }
        }
        let _ = write_half.shutdown().await;
    });
    (tx, task)
}

/// 单个调用写往线上的出口。
#[derive(Clone, Debug)]
pub(crate) struct Outbound {
    pub(crate) call_id: u64,
    pub(crate) writer: FrameSender,
    pub(crate) max_frame_len: usize,
}

/// 消息帧未能入队的原因。
#[derive(Debug)]
pub(crate) enum OutboundError {
    /// 编码后超过帧长上限，消息未上线。
    TooLarge { len: usize, max: usize },
    /// 写任务已退出。
    Closed,
}

impl Outbound {
    pub(crate) async fn message(&self, payload: Bytes) -> Result<(), OutboundError> {
        let frame = Frame::Message {
            call_id: self.call_id,
            payload,
        };
        let len = frame.wire_len();
        if len > self.max_frame_len {
            return Err(OutboundError::TooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        self.writer
            .send(frame)
            .await
            .map_err(|_| OutboundError::Closed)
    }

    /// 发送控制帧；写任务已退出时返回 `false`。
    pub(crate) async fn control(&self, frame: Frame) -> bool {
        self.writer.send(frame).await.is_ok()
    }
}

/// 进行中调用的计数器，支持等待归零。
#[derive(Debug, Default)]
pub(crate) struct CallTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl CallTracker {
    pub(crate) fn enter(self: &Arc<Self>) -> CallGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        CallGuard {
            tracker: Arc::clone(self),
        }
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// 离开作用域时扣减计数。
#[derive(Debug)]
pub(crate) struct CallGuard {
    tracker: Arc<CallTracker>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.tracker.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

// ---------------------------------------------------------------------------
// 服务端：线上的请求方向喂给处理器，处理器的响应与终态写回线上。
// ---------------------------------------------------------------------------

/// 服务端入站事件。
#[derive(Debug)]
pub(crate) enum ServerInbound {
    Message(Bytes),
    HalfClose,
}

/// 服务端调用登记项。
///
/// `inbound` 无界，连接读循环因此不会被单个慢调用阻塞；
/// 代价是处理器读取慢于对端写入时，该调用积压的消息会持续占用内存。
#[derive(Debug)]
pub(crate) struct ServerSlot {
    pub(crate) ctx: CallContext,
    pub(crate) inbound: mpsc::UnboundedSender<ServerInbound>,
}

pub(crate) type ServerCalls = Arc<DashMap<u64, ServerSlot>>;

/// 把入站请求搬运进处理器的请求通道。
///
/// 处理器关闭或丢弃请求接收端后，向调用方回送 `HalfClose`，调用方随后的发送得到 `ChannelClosed`。
pub(crate) async fn forward_requests(
    out: Outbound,
    mut inbound: mpsc::UnboundedReceiver<ServerInbound>,
    mut requests: StreamSender<Bytes>,
) {
    loop {
        tokio::select! {
            biased;
            event = inbound.recv() => match event {
                Some(ServerInbound::Message(payload)) => match requests.send(payload).await {
                    Ok(()) => {}
                    Err(ChannelError::ChannelClosed { .. }) => break,
                    // 调用已终止，剩余消息丢弃。
                    Err(_) => return,
                },
                Some(ServerInbound::HalfClose) => {
                    let _ = requests.close();
                    return;
                }
                None => return,
            },
            () = requests.closed() => break,
        }
    }
    debug!(call_id = out.call_id, "callee stopped accepting requests");
    let _ = out
        .control(Frame::HalfClose {
            call_id: out.call_id,
        })
        .await;
}

/// 把处理器的响应与终态写回线上，完成后注销调用。
///
/// 超过帧长上限的响应不会上线：调用以 `Internal` 结束，处理器随之被取消。
pub(crate) async fn pump_responses(
    out: Outbound,
    mut responses: StreamReceiver<Bytes>,
    calls: ServerCalls,
    guards: Vec<CallGuard>,
) {
    let call_id = out.call_id;
    let status = loop {
        match responses.recv().await {
            Ok(Some(payload)) => match out.message(payload).await {
                Ok(()) => {}
                Err(OutboundError::Closed) => break Status::transport("connection closed"),
                Err(OutboundError::TooLarge { len, max }) => {
                    warn!(call_id, len, max, "response exceeds the frame limit");
                    if let Some(slot) = calls.get(&call_id) {
                        slot.ctx.cancel();
                    }
                    break Status::internal(format!(
                        "response message of {len} bytes exceeds the {max} byte frame limit"
                    ));
                }
            },
            Ok(None) => break Status::ok(),
            Err(status) => break status,
        }
    };
    debug!(call_id, code = %status.code(), "writing terminal status");
    let _ = out.control(Frame::Status { call_id, status }).await;
    calls.remove(&call_id);
    drop(guards);
}

// ---------------------------------------------------------------------------
// 客户端：调用方的请求写上线，线上的响应与终态交还调用方。
// ---------------------------------------------------------------------------

/// 客户端入站事件。
#[derive(Debug)]
pub(crate) enum ClientInbound {
    Message(Bytes),
    /// 被调方已停止接收请求。
    RequestsClosed,
    Status(Status),
}

pub(crate) type ClientCalls = Arc<DashMap<u64, mpsc::UnboundedSender<ClientInbound>>>;

/// 把调用方的请求写上线；调用方取消或截止时间到达时发送 `Cancel` 帧。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 请求方向半关闭之后仍然守候取消，直到调用结束（`finished` 解除）；
/// - `stop` 到达表示被调方已停止接收：关闭本地请求接收端，调用方随后的发送得到 `ChannelClosed`；
/// - 超过帧长上限的请求不会上线：经 `local` 向本调用注入 `InvalidArgument` 终态，
///   并以 `Cancel` 通知被调方，同一连接上的其他调用不受影响。
///
/// ## 风险（Trade-offs）
/// - `local` 是弱引用：连接断开后登记表释放强引用，`deliver_responses` 才能观察到入站队列结束。
pub(crate) async fn pump_requests(
    out: Outbound,
    ctx: CallContext,
    mut requests: StreamReceiver<Bytes>,
    local: mpsc::WeakUnboundedSender<ClientInbound>,
    mut stop: oneshot::Receiver<()>,
    mut finished: oneshot::Receiver<()>,
) {
    let call_id = out.call_id;
    let mut open = true;
    let mut watching = true;
    loop {
        tokio::select! {
            biased;
            _ = &mut finished => return,
            stopped = &mut stop, if watching => {
                watching = false;
                if stopped.is_ok() && open {
                    debug!(call_id, "callee stopped accepting requests");
                    open = false;
                    let _ = requests.close();
                }
            }
            next = requests.recv(), if open => match next {
                Ok(Some(payload)) => match out.message(payload).await {
                    Ok(()) => {}
                    Err(OutboundError::Closed) => return,
                    Err(OutboundError::TooLarge { len, max }) => {
                        warn!(call_id, len, max, "request exceeds the frame limit");
                        let status = Status::invalid_argument(format!(
                            "request message of {len} bytes exceeds the {max} byte frame limit"
                        ));
                        if let Some(inbound) = local.upgrade() {
                            let _ = inbound.send(ClientInbound::Status(status));
                        }
                        break;
                    }
                },
                Ok(None) => {
                    open = false;
                    if !out.control(Frame::HalfClose { call_id }).await {
                        return;
                    }
                }
                Err(_) => break,
            },
            _ = ctx.done(), if !open => break,
        }
    }
    debug!(call_id, "propagating cancellation");
    let _ = out.control(Frame::Cancel { call_id }).await;
}

/// 把线上的响应与终态交还调用方。
///
/// 调用方丢弃响应读取端后，后续响应被丢弃并向对端发送 `Cancel` 帧；连接断开时以传输层错误结束。
pub(crate) async fn deliver_responses(
    out: Outbound,
    mut inbound: mpsc::UnboundedReceiver<ClientInbound>,
    responses: StreamSender<Bytes>,
    status: StatusSender,
    stop: oneshot::Sender<()>,
    finished: oneshot::Sender<()>,
) {
    let mut responses = Some(responses);
    let mut stop = Some(stop);
    let terminal = loop {
        match inbound.recv().await {
            Some(ClientInbound::Message(payload)) => {
                let Some(sink) = responses.as_mut() else {
                    continue;
                };
                match sink.send(payload).await {
                    Ok(()) => {}
                    Err(ChannelError::ChannelClosed { .. }) => {
                        responses = None;
                        let _ = out
                            .control(Frame::Cancel {
                                call_id: out.call_id,
                            })
                            .await;
                    }
                    Err(_) => responses = None,
                }
            }
            Some(ClientInbound::RequestsClosed) => {
                if let Some(stop) = stop.take() {
                    let _ = stop.send(());
                }
            }
            Some(ClientInbound::Status(status)) => break status,
            None => break Status::transport("connection closed before the call completed"),
        }
    };
    drop(responses);
    status.send(terminal);
    drop(finished);
}
