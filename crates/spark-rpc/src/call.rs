use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

use crate::channel::{
    StatusSender, StreamReceiver, StreamSender, request_channel, response_channel,
};
use crate::context::CallContext;
use crate::error::ChannelError;
use crate::status::{Status, StatusKind};

/// 四种交互形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl Pattern {
    pub const fn as_u8(self) -> u8 {
        match self {
            Pattern::Unary => 0,
            Pattern::ServerStreaming => 1,
            Pattern::ClientStreaming => 2,
            Pattern::BidiStreaming => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Pattern::Unary),
            1 => Some(Pattern::ServerStreaming),
            2 => Some(Pattern::ClientStreaming),
            3 => Some(Pattern::BidiStreaming),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Pattern::Unary => "unary",
            Pattern::ServerStreaming => "server-stream",
            Pattern::ClientStreaming => "client-stream",
            Pattern::BidiStreaming => "bidi-stream",
        }
    }

    /// 调用方是否发送多条请求。
    pub const fn client_streams(self) -> bool {
        matches!(self, Pattern::ClientStreaming | Pattern::BidiStreaming)
    }

    /// 被调方是否发送多条响应。
    pub const fn server_streams(self) -> bool {
        matches!(self, Pattern::ServerStreaming | Pattern::BidiStreaming)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调用标识，在同一连接内唯一。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// 调用生命周期状态，由终态推导。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Open,
    Completed,
    Canceled,
    Failed,
}

/// 一次 RPC 调用的共享记录。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 调用方与被调方共同持有（`Arc`），双方都观察到终止后才随最后一个句柄释放；
/// - [`Call::finalize`] 恰好成功一次，之后的任何 finalize 返回 `InvalidState`；
/// - [`Call::state`]：未终结为 `Open`，OK 终态为 `Completed`，取消与超时为 `Canceled`，其余为 `Failed`。
#[derive(Clone, Debug)]
pub struct Call {
    inner: Arc<CallInner>,
}

#[derive(Debug)]
struct CallInner {
    id: CallId,
    method: String,
    pattern: Pattern,
    context: CallContext,
    terminal: OnceLock<Status>,
}

impl Call {
    pub fn new(
        id: CallId,
        method: impl Into<String>,
        pattern: Pattern,
        context: CallContext,
    ) -> Self {
        Self {
            inner: Arc::new(CallInner {
                id,
                method: method.into(),
                pattern,
                context,
                terminal: OnceLock::new(),
            }),
        }
    }

    /// 建立一次调用的两端：调用方持有请求发送端与响应接收端，被调方持有其余部分。
    pub fn pair(
        id: CallId,
        method: impl Into<String>,
        pattern: Pattern,
        context: CallContext,
        capacity: usize,
    ) -> (ClientCall, ServerCall) {
        let call = Call::new(id, method, pattern, context);
        let ctx = call.context().clone();
        let (request_tx, request_rx) = request_channel(&ctx, capacity);
        let (response_tx, status_tx, response_rx) = response_channel(&ctx, capacity);
        let client = ClientCall {
            call: call.clone(),
            requests: request_tx,
            responses: response_rx,
        };
        let server = ServerCall {
            call,
            requests: request_rx,
            responses: response_tx,
            status: status_tx,
        };
        (client, server)
    }

    pub fn id(&self) -> CallId {
        self.inner.id
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn pattern(&self) -> Pattern {
        self.inner.pattern
    }

    pub fn context(&self) -> &CallContext {
        &self.inner.context
    }

    pub fn terminal(&self) -> Option<&Status> {
        self.inner.terminal.get()
    }

    pub fn finalize(&self, status: Status) -> Result<(), ChannelError> {
        self.inner
            .terminal
            .set(status)
            .map_err(|_| ChannelError::InvalidState("call already finalized"))
    }

    pub fn state(&self) -> CallState {
        match self.inner.terminal.get().map(Status::kind) {
            None => CallState::Open,
            Some(StatusKind::Ok) => CallState::Completed,
            Some(StatusKind::Canceled | StatusKind::DeadlineExceeded) => CallState::Canceled,
            Some(_) => CallState::Failed,
        }
    }
}

/// 调用方持有的一端。
#[derive(Debug)]
pub struct ClientCall {
    pub call: Call,
    pub requests: StreamSender<Bytes>,
    pub responses: StreamReceiver<Bytes>,
}

/// 被调方持有的一端；`status` 由运行时在处理器结束后写入。
#[derive(Debug)]
pub struct ServerCall {
    pub call: Call,
    pub requests: StreamReceiver<Bytes>,
    pub responses: StreamSender<Bytes>,
    pub status: StatusSender,
}

/// 在产出终态前的最后一次截止/取消检查。
///
/// 取消或超时已经发生时，无论处理器结果如何都以其为准，迟到的成功不会被报告为 OK。
pub fn settle(ctx: &CallContext, outcome: Result<(), Status>) -> Status {
    if let Err(status) = ctx.check() {
        return status;
    }
    match outcome {
        Ok(()) => Status::ok(),
        Err(status) => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;
    use std::time::Duration;

    #[test]
    fn finalize_succeeds_exactly_once() {
        let call = Call::new(
            CallId(1),
            "calculator.CalculatorService/Sum",
            Pattern::Unary,
            CallContext::default(),
        );
        assert_eq!(call.state(), CallState::Open);
        call.finalize(Status::ok()).expect("首次 finalize 应成功");
        assert_eq!(
            call.finalize(Status::internal("again")),
            Err(ChannelError::InvalidState("call already finalized"))
        );
        assert_eq!(call.state(), CallState::Completed);
        assert!(call.terminal().is_some_and(Status::is_ok));
    }

    #[test]
    fn state_follows_terminal_kind() {
        let canceled = Call::new(CallId(3), "m", Pattern::BidiStreaming, CallContext::default());
        canceled.finalize(Status::deadline_exceeded("late")).expect("finalize");
        assert_eq!(canceled.state(), CallState::Canceled);

        let failed = Call::new(CallId(5), "m", Pattern::Unary, CallContext::default());
        failed.finalize(Status::transport("reset")).expect("finalize");
        assert_eq!(failed.state(), CallState::Failed);
    }

    #[test]
    fn pattern_wire_values_are_stable() {
        for pattern in [
            Pattern::Unary,
            Pattern::ServerStreaming,
            Pattern::ClientStreaming,
            Pattern::BidiStreaming,
        ] {
            assert_eq!(Pattern::from_u8(pattern.as_u8()), Some(pattern));
        }
        assert_eq!(Pattern::from_u8(7), None);
        assert!(Pattern::BidiStreaming.client_streams() && Pattern::BidiStreaming.server_streams());
        assert!(!Pattern::Unary.client_streams());
    }

    #[tokio::test(start_paused = true)]
    async fn settle_turns_late_success_into_deadline_exceeded() {
        let ctx = CallContext::builder()
            .with_timeout(Duration::from_secs(1))
            .build();
        assert!(settle(&ctx, Ok(())).is_ok());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(settle(&ctx, Ok(())).code(), Code::DeadlineExceeded);
        assert_eq!(
            settle(&ctx, Err(Status::invalid_argument("bad"))).code(),
            Code::DeadlineExceeded
        );
    }
}
