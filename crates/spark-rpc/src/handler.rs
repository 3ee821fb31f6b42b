use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::call::Pattern;
use crate::channel::{StreamReceiver, StreamSender};
use crate::codec::{Sink, Streaming};
use crate::context::CallContext;
use crate::status::Status;

/// 类型化的方法描述：完整路径、交互形态与请求/响应类型。
///
/// 可在常量中声明，供服务端注册与客户端调用共享同一份描述：
///
/// ```
/// use spark_rpc::{Method, Pattern};
///
/// const SUM: Method<(i64, i64), i64> = Method::new("calculator.CalculatorService/Sum", Pattern::Unary);
/// assert_eq!(SUM.path(), "calculator.CalculatorService/Sum");
/// ```
pub struct Method<Req, Resp> {
    path: &'static str,
    pattern: Pattern,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Method<Req, Resp> {
    pub const fn new(path: &'static str, pattern: Pattern) -> Self {
        Self {
            path,
            pattern,
            _marker: PhantomData,
        }
    }

    pub const fn path(&self) -> &'static str {
        self.path
    }

    pub const fn pattern(&self) -> Pattern {
        self.pattern
    }
}

impl<Req, Resp> Clone for Method<Req, Resp> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Req, Resp> Copy for Method<Req, Resp> {}

impl<Req, Resp> fmt::Debug for Method<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("path", &self.path)
            .field("pattern", &self.pattern)
            .finish()
    }
}

type HandlerFuture = BoxFuture<'static, Result<(), Status>>;
type ErasedHandler =
    dyn Fn(CallContext, StreamReceiver<Bytes>, StreamSender<Bytes>) -> HandlerFuture + Send + Sync;

/// 擦除了消息类型的处理器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 业务处理器是可插拔的协作者：只需编写类型化的 async 函数，
///   由构造函数负责解码请求、编码响应以及执行形态约束；
/// - 运行时与传输层只面对统一的 `(CallContext, 请求接收端, 响应发送端)` 形状。
///
/// ## 契约（What）
/// - 一元与客户端流：被调方恰好发送一条响应，发送前再次检查截止时间与取消；
///   响应发送端上限为 1，第二次发送得到 `InvalidState`；
/// - 一元与服务端流：缺失请求属于协议错误，返回 `Internal`；
/// - 处理器返回 `Ok` 即 OK 终态，返回 `Err(status)` 即应用错误终态。
#[derive(Clone)]
pub struct Handler {
    pattern: Pattern,
    call: Arc<ErasedHandler>,
}

impl Handler {
    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// 驱动一次调用，返回处理器结果（尚未经过终态结算）。
    pub fn call(
        &self,
        ctx: CallContext,
        requests: StreamReceiver<Bytes>,
        responses: StreamSender<Bytes>,
    ) -> HandlerFuture {
        (self.call)(ctx, requests, responses)
    }

    fn erased<F>(pattern: Pattern, call: F) -> Self
    where
        F: Fn(CallContext, StreamReceiver<Bytes>, StreamSender<Bytes>) -> HandlerFuture
            + Send
            + Sync
            + 'static,
    {
        Self {
            pattern,
            call: Arc::new(call),
        }
    }

    pub fn unary<Req, Resp, F, Fut>(handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::erased(Pattern::Unary, move |ctx, requests, responses| {
            let handler = Arc::clone(&handler);
            async move {
                let request = single_request::<Req>(requests).await?;
                let response = handler(ctx.clone(), request).await?;
                reply_once(&ctx, responses, response).await
            }
            .boxed()
        })
    }

    pub fn server_streaming<Req, Resp, F, Fut>(handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Req, Sink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::erased(Pattern::ServerStreaming, move |ctx, requests, responses| {
            let handler = Arc::clone(&handler);
            async move {
                let request = single_request::<Req>(requests).await?;
                handler(ctx, request, Sink::new(responses)).await
            }
            .boxed()
        })
    }

    pub fn client_streaming<Req, Resp, F, Fut>(handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Streaming<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::erased(Pattern::ClientStreaming, move |ctx, requests, responses| {
            let handler = Arc::clone(&handler);
            async move {
                let response = handler(ctx.clone(), Streaming::new(requests)).await?;
                reply_once(&ctx, responses, response).await
            }
            .boxed()
        })
    }

    pub fn bidi_streaming<Req, Resp, F, Fut>(handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(CallContext, Streaming<Req>, Sink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::erased(Pattern::BidiStreaming, move |ctx, requests, responses| {
            let handler = Arc::clone(&handler);
            async move {
                handler(ctx, Streaming::new(requests), Sink::new(responses)).await
            }
            .boxed()
        })
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

async fn single_request<Req: DeserializeOwned>(
    requests: StreamReceiver<Bytes>,
) -> Result<Req, Status> {
    Streaming::<Req>::new(requests)
        .message()
        .await?
        .ok_or_else(|| Status::internal("call closed without a request"))
}

async fn reply_once<Resp: Serialize>(
    ctx: &CallContext,
    responses: StreamSender<Bytes>,
    response: Resp,
) -> Result<(), Status> {
    ctx.check()?;
    let mut sink = Sink::new(responses.with_limit(1));
    sink.send(response).await?;
    Ok(())
}
