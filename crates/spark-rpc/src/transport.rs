use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::call::{Call, CallId, ClientCall, Pattern};
use crate::channel::DEFAULT_STREAM_CAPACITY;
use crate::context::CallContext;
use crate::service::{Router, serve_call};
use crate::status::Status;

/// 调用建立接缝：为一次调用准备调用方一端。
///
/// 实现者负责让被调方一端运行起来（进程内任务或远端服务器），
/// 并保证调用方最终总能观察到一个终态。
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(
        &self,
        method: &str,
        pattern: Pattern,
        ctx: CallContext,
    ) -> Result<ClientCall, Status>;
}

/// 进程内传输：直接在当前运行时上派生被调方任务。
///
/// 调用双方共享同一个 [`CallContext`]，取消与截止时间无需任何转发即可被双方观察到。
#[derive(Debug)]
pub struct LocalTransport {
    router: Arc<Router>,
    capacity: usize,
    next_id: AtomicU64,
}

impl LocalTransport {
    pub fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
            capacity: DEFAULT_STREAM_CAPACITY,
            next_id: AtomicU64::new(1),
        }
    }

    /// 调整每个方向的有界容量。
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn open(
        &self,
        method: &str,
        pattern: Pattern,
        ctx: CallContext,
    ) -> Result<ClientCall, Status> {
        let handler = self.router.resolve(method, pattern)?;
        let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (client, server) = Call::pair(id, method, pattern, ctx, self.capacity);
        tokio::spawn(serve_call(handler, server));
        Ok(client)
    }
}
