use std::pin::pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::call::ClientCall;
use crate::codec::{Sink, Streaming};
use crate::context::CallContext;
use crate::error::ChannelError;
use crate::handler::Method;
use crate::status::Status;
use crate::transport::Transport;

/// 类型化客户端，按四种交互形态发起调用。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `unary`/`client_streaming`：恰好得到一条响应或一个错误终态；
///   响应之后若跟随非 OK 终态，只返回该错误；
/// - `server_streaming`：返回读取端，序列结束后调用完成；
/// - `bidi_streaming`：返回写入端与读取端，两者可由不同任务驱动，
///   [`BidiCall::run`] 提供“发送任务 + 接收循环 + 汇合”的标准组合；
/// - 请求发送遇到对端已关闭时停止发送并转而读取终态，以便拿到被调方给出的真实原因。
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    async fn open<Req, Resp>(
        &self,
        method: Method<Req, Resp>,
        ctx: CallContext,
    ) -> Result<(Sink<Req>, Streaming<Resp>), Status>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let ClientCall {
            requests,
            responses,
            ..
        } = self
            .transport
            .open(method.path(), method.pattern(), ctx)
            .await?;
        Ok((Sink::new(requests), Streaming::new(responses)))
    }

    pub async fn unary<Req, Resp>(
        &self,
        method: Method<Req, Resp>,
        ctx: CallContext,
        request: Req,
    ) -> Result<Resp, Status>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (mut requests, responses) = self.open(method, ctx).await?;
        send_or_yield(&mut requests, request).await?;
        half_close(&mut requests);
        single_response(responses).await
    }

    pub async fn server_streaming<Req, Resp>(
        &self,
        method: Method<Req, Resp>,
        ctx: CallContext,
        request: Req,
    ) -> Result<Streaming<Resp>, Status>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (mut requests, responses) = self.open(method, ctx).await?;
        send_or_yield(&mut requests, request).await?;
        half_close(&mut requests);
        Ok(responses)
    }

    pub async fn client_streaming<Req, Resp, S>(
        &self,
        method: Method<Req, Resp>,
        ctx: CallContext,
        stream: S,
    ) -> Result<Resp, Status>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
        S: Stream<Item = Req>,
    {
        let (mut requests, responses) = self.open(method, ctx).await?;
        let mut stream = pin!(stream);
        while let Some(request) = stream.next().await {
            if !send_or_yield(&mut requests, request).await? {
                break;
            }
        }
        half_close(&mut requests);
        single_response(responses).await
    }

    pub async fn bidi_streaming<Req, Resp>(
        &self,
        method: Method<Req, Resp>,
        ctx: CallContext,
    ) -> Result<BidiCall<Req, Resp>, Status>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (requests, responses) = self.open(method, ctx).await?;
        Ok(BidiCall {
            requests,
            responses,
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

/// 双向流调用的两端。
#[derive(Debug)]
pub struct BidiCall<Req, Resp> {
    pub requests: Sink<Req>,
    pub responses: Streaming<Resp>,
}

impl<Req, Resp> BidiCall<Req, Resp>
where
    Req: Serialize + Send + 'static,
    Resp: DeserializeOwned,
{
    /// 在派生任务中发送 `requests` 并随后半关闭，同时在当前任务中接收响应。
    ///
    /// 两个活动都结束（汇合）之后才返回；接收端以错误结束时发送任务被中止。
    pub async fn run<S, F>(self, requests: S, mut on_response: F) -> Result<(), Status>
    where
        S: Stream<Item = Req> + Send + 'static,
        F: FnMut(Resp),
    {
        let BidiCall {
            requests: mut sink,
            mut responses,
        } = self;

        let sender = tokio::spawn(async move {
            let mut requests = pin!(requests);
            while let Some(request) = requests.next().await {
                if !send_or_yield(&mut sink, request).await? {
                    break;
                }
            }
            half_close(&mut sink);
            Ok::<(), Status>(())
        });

        let received = loop {
            match responses.message().await {
                Ok(Some(response)) => on_response(response),
                Ok(None) => break Ok(()),
                Err(status) => break Err(status),
            }
        };

        if received.is_err() {
            sender.abort();
        }
        let sent = match sender.await {
            Ok(sent) => sent,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(Status::internal(format!("request task failed: {err}"))),
        };
        received.and(sent)
    }
}

/// 发送一条请求；对端已关闭时返回 `Ok(false)`，调用方随后应读取终态。
async fn send_or_yield<Req: Serialize>(
    sink: &mut Sink<Req>,
    request: Req,
) -> Result<bool, Status> {
    match sink.send(request).await {
        Ok(()) => Ok(true),
        Err(ChannelError::ChannelClosed { .. }) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// 半关闭请求方向；重复关闭只会在此处出现，忽略即可。
fn half_close<Req: Serialize>(sink: &mut Sink<Req>) {
    let _ = sink.close();
}

async fn single_response<Resp: DeserializeOwned>(
    mut responses: Streaming<Resp>,
) -> Result<Resp, Status> {
    let first = responses.message().await?;
    let trailing = responses.message().await?;
    match (first, trailing) {
        (Some(response), None) => Ok(response),
        (None, _) => Err(Status::internal("call completed without a response")),
        (Some(_), Some(_)) => Err(Status::internal("call produced more than one response")),
    }
}
