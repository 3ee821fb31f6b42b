//! 单个调用内的双工消息通道。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 每个调用拥有两个互不干扰的方向：请求（调用方 → 被调方）与响应（被调方 → 调用方），
//!   双向流的两个方向可由独立任务驱动；
//! - 半关闭是一次性、不可逆的迁移，对端以“序列结束”观察到它；
//! - 响应方向结束之后紧跟唯一终态，使调用方即便一条响应都没有收到，也总能拿到 [`Status`]。
//!
//! ## 契约（What）
//! - [`StreamSender::send`]：本端或对端已关闭时返回 `ChannelClosed`；背压下挂起，
//!   挂起期间调用被取消或超时则返回 `Terminated`；超过消息上限返回 `InvalidState`；
//! - [`StreamSender::close`]：首次成功，再次调用返回 `InvalidState`；丢弃发送端等价于隐式关闭；
//! - [`StreamReceiver::recv`]：返回 `Ok(Some(msg))`、`Ok(None)`（序列结束）或 `Err(status)`；
//!   取消与超时优先于已排队的消息被观察到；
//! - 同一方向严格 FIFO；两个方向之间不保证任何顺序。
//!
//! ## 实现（How）
//! - 每个方向一条有界 `mpsc`，容量默认为 [`DEFAULT_STREAM_CAPACITY`]；
//! - 响应方向额外附带一条 `oneshot`，由运行时在处理器结束后写入终态；
//!   若该 `oneshot` 在未写入的情况下被丢弃，调用方得到传输层错误。

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use crate::context::CallContext;
use crate::error::ChannelError;
use crate::status::Status;

/// 每个方向默认的有界容量。
pub const DEFAULT_STREAM_CAPACITY: usize = 32;

/// 通道方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Response => f.write_str("response"),
        }
    }
}

/// 某一方向的发送端。
#[derive(Debug)]
pub struct StreamSender<T> {
    tx: Option<mpsc::Sender<T>>,
    direction: Direction,
    ctx: CallContext,
    limit: Option<usize>,
    sent: usize,
}

impl<T> StreamSender<T> {
    fn new(tx: mpsc::Sender<T>, direction: Direction, ctx: CallContext) -> Self {
        Self {
            tx: Some(tx),
            direction,
            ctx,
            limit: None,
            sent: 0,
        }
    }

    /// 限制该发送端最多发送的消息条数；一元响应使用上限 1。
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// 已成功发送的消息条数。
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// 本端已关闭，或接收端已关闭/被丢弃。
    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    /// 等待接收端关闭或被丢弃；本端已关闭时立即完成。
    pub async fn closed(&self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }

    pub async fn send(&mut self, message: T) -> Result<(), ChannelError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(ChannelError::ChannelClosed {
                direction: self.direction,
            });
        };
        if let Some(limit) = self.limit
            && self.sent >= limit
        {
            return Err(ChannelError::InvalidState("message limit reached"));
        }
        self.ctx.check().map_err(ChannelError::Terminated)?;

        let result = tokio::select! {
            biased;
            status = self.ctx.done() => Err(ChannelError::Terminated(status)),
            sent = tx.send(message) => sent.map_err(|_| ChannelError::ChannelClosed {
                direction: self.direction,
            }),
        };
        if result.is_ok() {
            self.sent += 1;
        }
        result
    }

    /// 半关闭该方向。
    pub fn close(&mut self) -> Result<(), ChannelError> {
        match self.tx.take() {
            Some(_) => Ok(()),
            None => Err(ChannelError::InvalidState("direction already closed")),
        }
    }
}

/// 某一方向的接收端。
#[derive(Debug)]
pub struct StreamReceiver<T> {
    rx: mpsc::Receiver<T>,
    status: Option<oneshot::Receiver<Status>>,
    direction: Direction,
    ctx: CallContext,
    outcome: Option<Result<(), Status>>,
    closed: bool,
}

impl<T> StreamReceiver<T> {
    fn new(
        rx: mpsc::Receiver<T>,
        status: Option<oneshot::Receiver<Status>>,
        direction: Direction,
        ctx: CallContext,
    ) -> Self {
        Self {
            rx,
            status,
            direction,
            ctx,
            outcome: None,
            closed: false,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// 等待下一条消息、序列结束或调用终止。
    ///
    /// 终止之后的重复调用返回同一结果。
    pub async fn recv(&mut self) -> Result<Option<T>, Status> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone().map(|()| None);
        }
        let next = tokio::select! {
            biased;
            status = self.ctx.done() => Err(status),
            message = self.rx.recv() => Ok(message),
        };
        match next {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => {
                let outcome = self.finish().await;
                self.outcome = Some(outcome.clone());
                outcome.map(|()| None)
            }
            Err(status) => {
                self.outcome = Some(Err(status.clone()));
                Err(status)
            }
        }
    }

    async fn finish(&mut self) -> Result<(), Status> {
        let Some(status_rx) = self.status.take() else {
            return Ok(());
        };
        let delivered = tokio::select! {
            biased;
            delivered = status_rx => delivered,
            status = self.ctx.done() => return Err(status),
        };
        match delivered {
            Ok(status) if status.is_ok() => Ok(()),
            Ok(status) => Err(status),
            Err(_) => Err(Status::transport(
                "response stream ended without a terminal status",
            )),
        }
    }

    /// 接收端停止接收；对端后续发送得到 `ChannelClosed`，已排队的消息仍可读出。
    pub fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::InvalidState("receiver already closed"));
        }
        self.closed = true;
        self.rx.close();
        Ok(())
    }
}

/// 响应方向结束后写入终态的一次性句柄。
#[derive(Debug)]
pub struct StatusSender {
    tx: oneshot::Sender<Status>,
}

impl StatusSender {
    /// 写入终态；调用方已离开时返回 `false`。
    pub fn send(self, status: Status) -> bool {
        self.tx.send(status).is_ok()
    }
}

/// 构建请求方向：调用方持有发送端，被调方持有接收端。
pub fn request_channel<T>(
    ctx: &CallContext,
    capacity: usize,
) -> (StreamSender<T>, StreamReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StreamSender::new(tx, Direction::Request, ctx.clone()),
        StreamReceiver::new(rx, None, Direction::Request, ctx.clone()),
    )
}

/// 构建响应方向，并附带终态句柄。
pub fn response_channel<T>(
    ctx: &CallContext,
    capacity: usize,
) -> (StreamSender<T>, StatusSender, StreamReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (status_tx, status_rx) = oneshot::channel();
    (
        StreamSender::new(tx, Direction::Response, ctx.clone()),
        StatusSender { tx: status_tx },
        StreamReceiver::new(rx, Some(status_rx), Direction::Response, ctx.clone()),
    )
}
