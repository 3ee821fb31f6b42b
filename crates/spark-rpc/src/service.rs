use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::call::{Pattern, ServerCall, settle};
use crate::codec::{Sink, Streaming};
use crate::context::CallContext;
use crate::handler::{Handler, Method};
use crate::status::Status;

/// 单个服务的方法表。
///
/// 类型化注册保证处理器签名与 [`Method`] 描述的请求/响应类型一致。
#[derive(Clone, Debug, Default)]
pub struct ServiceTable {
    handlers: HashMap<String, Handler>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以路径注册已擦除类型的处理器；同一路径重复注册时后者覆盖前者。
    pub fn with_handler(mut self, path: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(path.into(), handler);
        self
    }

    pub fn unary<Req, Resp, F, Fut>(self, method: Method<Req, Resp>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.with_handler(method.path(), Handler::unary(handler))
    }

    pub fn server_streaming<Req, Resp, F, Fut>(self, method: Method<Req, Resp>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req, Sink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        self.with_handler(method.path(), Handler::server_streaming(handler))
    }

    pub fn client_streaming<Req, Resp, F, Fut>(self, method: Method<Req, Resp>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Streaming<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.with_handler(method.path(), Handler::client_streaming(handler))
    }

    pub fn bidi_streaming<Req, Resp, F, Fut>(self, method: Method<Req, Resp>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Streaming<Req>, Sink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        self.with_handler(method.path(), Handler::bidi_streaming(handler))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// 按完整方法路径分发调用的路由表，可合并多个服务。
#[derive(Clone, Debug, Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(mut self, table: ServiceTable) -> Self {
        self.handlers.extend(table.handlers);
        self
    }

    /// 查找处理器；未知路径或交互形态与注册不一致时返回 `Unimplemented`。
    pub fn resolve(&self, path: &str, pattern: Pattern) -> Result<Handler, Status> {
        let handler = self
            .handlers
            .get(path)
            .ok_or_else(|| Status::unimplemented(format!("unknown method {path}")))?;
        if handler.pattern() != pattern {
            return Err(Status::unimplemented(format!(
                "method {path} is {}, not {pattern}",
                handler.pattern()
            )));
        }
        Ok(handler.clone())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// 驱动被调方一端直至终态。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 处理器与 `ctx.done()` 赛跑：取消或超时先到时，进行中的处理器 Future 被丢弃；
/// - 处理器 panic 只终结当前调用，终态为 `Internal`；
/// - 终态经 [`settle`] 结算后写入 [`crate::Call`] 并送达调用方，返回同一终态；
/// - 终态送达之前，响应发送端已随处理器一并释放，调用方先观察到序列结束，再观察到终态。
pub async fn serve_call(handler: Handler, server: ServerCall) -> Status {
    let ServerCall {
        call,
        requests,
        responses,
        status,
    } = server;
    let ctx = call.context().clone();

    let outcome = {
        let running =
            AssertUnwindSafe(handler.call(ctx.clone(), requests, responses)).catch_unwind();
        tokio::select! {
            biased;
            terminated = ctx.done() => Err(terminated),
            finished = running => finished
                .unwrap_or_else(|_| Err(Status::internal("handler panicked"))),
        }
    };

    let terminal = settle(&ctx, outcome);
    if let Err(err) = call.finalize(terminal.clone()) {
        warn!(call = %call.id(), method = call.method(), error = %err, "call finalized twice");
    }
    let delivered = status.send(terminal.clone());
    debug!(
        call = %call.id(),
        method = call.method(),
        pattern = %call.pattern(),
        code = %terminal.code(),
        delivered,
        "call finalized"
    );
    terminal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Call, CallId, CallState, ClientCall};
    use crate::status::Code;
    use tracing_test::traced_test;

    const DOUBLE: Method<i64, i64> = Method::new("test.Math/Double", Pattern::Unary);

    fn router() -> Router {
        Router::new().add_service(
            ServiceTable::new().unary(DOUBLE, |_ctx, value: i64| async move { Ok(value * 2) }),
        )
    }

    #[test]
    fn resolve_reports_unimplemented_for_unknown_or_mismatched_methods() {
        let router = router();
        assert!(router.resolve(DOUBLE.path(), Pattern::Unary).is_ok());
        assert_eq!(
            router
                .resolve("test.Math/Triple", Pattern::Unary)
                .unwrap_err()
                .code(),
            Code::Unimplemented
        );
        let mismatch = router
            .resolve(DOUBLE.path(), Pattern::BidiStreaming)
            .unwrap_err();
        assert_eq!(mismatch.code(), Code::Unimplemented);
        assert_eq!(
            mismatch.message(),
            "method test.Math/Double is unary, not bidi-stream"
        );
        assert_eq!(router.paths().count(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn serve_call_finalizes_and_delivers_status() {
        let handler = router()
            .resolve(DOUBLE.path(), Pattern::Unary)
            .expect("方法已注册");
        let (client, server) = Call::pair(
            CallId(7),
            DOUBLE.path(),
            Pattern::Unary,
            CallContext::default(),
            4,
        );
        let ClientCall {
            call,
            mut requests,
            mut responses,
        } = client;
        requests
            .send(crate::codec::encode(&21i64).expect("编码应成功"))
            .await
            .expect("请求应成功写入");
        requests.close().expect("首次半关闭应成功");

        let status = serve_call(handler, server).await;
        assert!(status.is_ok());
        assert_eq!(call.state(), CallState::Completed);

        let payload = responses
            .recv()
            .await
            .expect("响应应成功读取")
            .expect("应恰好有一条响应");
        assert_eq!(crate::codec::decode::<i64>(&payload), Ok(42));
        assert_eq!(responses.recv().await, Ok(None));
        assert!(logs_contain("call finalized"));
    }

    #[tokio::test]
    async fn serve_call_reports_missing_request_as_internal() {
        let handler = router()
            .resolve(DOUBLE.path(), Pattern::Unary)
            .expect("方法已注册");
        let (client, server) = Call::pair(
            CallId(9),
            DOUBLE.path(),
            Pattern::Unary,
            CallContext::default(),
            4,
        );
        let ClientCall { mut requests, .. } = client;
        requests.close().expect("首次半关闭应成功");
        let status = serve_call(handler, server).await;
        assert_eq!(status.code(), Code::Internal);
    }
}
