use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::status::Status;

/// 协作式取消标记。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方、传输层与被调方共享同一个取消源：任何一方触发后，其余持有者都能立即观察到；
/// - 同时满足“同步探测”（处理器在计算步骤之间调用 [`Cancellation::is_cancelled`]）与
///   “异步等待”（运行时在 `select!` 中等待 [`Cancellation::cancelled`]）两类需求。
///
/// ## 契约（What）
/// - `cancel()` 仅在首次从未取消迁移到已取消时返回 `true`，后续调用幂等并返回 `false`；
/// - 一旦取消便不可恢复；
/// - 克隆得到的句柄共享同一状态。
///
/// ## 实现（How）
/// - `AtomicBool` 记录状态，`compare_exchange` 保证只有一个调用者赢得迁移；
/// - `Notify::notify_waiters` 唤醒所有等待者；等待端先 `enable` 再复查标记，避免丢失唤醒。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancellationInner>,
}

#[derive(Debug, Default)]
struct CancellationInner {
    flag: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 标记取消，若本次调用完成了状态迁移则返回 `true`。
    pub fn cancel(&self) -> bool {
        let won = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.inner.notify.notify_waiters();
        }
        won
    }

    /// 等待取消发生；若已取消则立即返回。
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// 调用的绝对截止时间，`None` 表示不设限。
///
/// 使用 Tokio 的时钟，使得暂停时间的测试（`start_paused`）能够确定性地推进截止时间。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    pub const fn none() -> Self {
        Self { instant: None }
    }

    pub const fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// 以“当前时刻 + 相对时长”构造截止时间。
    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    pub fn is_expired(&self) -> bool {
        match self.instant {
            Some(instant) => instant <= Instant::now(),
            None => false,
        }
    }

    /// 距离截止时间的剩余时长；已过期时为零，无截止时间时为 `None`。
    pub fn remaining(&self) -> Option<Duration> {
        self.instant
            .map(|instant| instant.saturating_duration_since(Instant::now()))
    }
}

/// 调用上下文：截止时间与取消源的只读组合。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - [`CallContext::check`]：已取消返回 `Canceled`（优先），否则截止时间已过返回 `DeadlineExceeded`；
/// - [`CallContext::done`]：在取消或超时任一发生时完成，并返回对应终态；两者都不会发生时永远挂起；
/// - 克隆廉价，所有克隆共享同一取消源。
///
/// ## 风险（Trade-offs）
/// - 上下文本身不会中断同步代码，处理器需在计算步骤之间主动 `check()`。
#[derive(Clone, Debug)]
pub struct CallContext {
    inner: Arc<CallContextInner>,
}

#[derive(Debug)]
struct CallContextInner {
    cancellation: Cancellation,
    deadline: Deadline,
}

impl CallContext {
    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.inner.cancellation
    }

    pub fn deadline(&self) -> Deadline {
        self.inner.deadline
    }

    /// 触发取消；返回值语义同 [`Cancellation::cancel`]。
    pub fn cancel(&self) -> bool {
        self.inner.cancellation.cancel()
    }

    pub fn check(&self) -> Result<(), Status> {
        if self.inner.cancellation.is_cancelled() {
            return Err(Status::canceled("call was canceled"));
        }
        if self.inner.deadline.is_expired() {
            return Err(Status::deadline_exceeded("deadline exceeded"));
        }
        Ok(())
    }

    pub async fn done(&self) -> Status {
        if let Err(status) = self.check() {
            return status;
        }
        match self.inner.deadline.instant() {
            Some(instant) => {
                tokio::select! {
                    biased;
                    _ = self.inner.cancellation.cancelled() => Status::canceled("call was canceled"),
                    _ = tokio::time::sleep_until(instant) => {
                        // 截止与取消同时到达时，仍以取消为准。
                        match self.check() {
                            Err(status) => status,
                            Ok(()) => Status::deadline_exceeded("deadline exceeded"),
                        }
                    }
                }
            }
            None => {
                self.inner.cancellation.cancelled().await;
                Status::canceled("call was canceled")
            }
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// [`CallContext`] 构建器。
///
/// 相对超时在 [`CallContextBuilder::build`] 时刻换算为绝对截止时间，
/// 与显式截止时间同时存在时取较早者。
#[derive(Debug, Default)]
pub struct CallContextBuilder {
    cancellation: Option<Cancellation>,
    deadline: Deadline,
    timeout: Option<Duration>,
}

impl CallContextBuilder {
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> CallContext {
        let from_timeout = self.timeout.map(Deadline::after);
        let deadline = match (self.deadline.instant(), from_timeout) {
            (Some(explicit), Some(relative)) => match relative.instant() {
                Some(relative_at) if relative_at < explicit => relative,
                _ => self.deadline,
            },
            (None, Some(relative)) => relative,
            _ => self.deadline,
        };
        CallContext {
            inner: Arc::new(CallContextInner {
                cancellation: self.cancellation.unwrap_or_default(),
                deadline,
            }),
        }
    }
}
