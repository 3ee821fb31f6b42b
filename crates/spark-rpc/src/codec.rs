use std::marker::PhantomData;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::channel::{StreamReceiver, StreamSender};
use crate::error::ChannelError;
use crate::status::Status;

/// 以 JSON 编码消息体。
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, Status> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|err| Status::internal(format!("failed to encode message: {err}")))
}

/// 解码消息体；损坏的消息属于传输层失败，而非应用错误。
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, Status> {
    serde_json::from_slice(payload)
        .map_err(|err| Status::transport(format!("malformed message: {err}")))
}

/// 类型化的消息流读取端。
#[derive(Debug)]
pub struct Streaming<T> {
    inner: StreamReceiver<Bytes>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Streaming<T> {
    pub fn new(inner: StreamReceiver<Bytes>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// 读取下一条消息；`Ok(None)` 表示对端已半关闭。
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        match self.inner.recv().await? {
            Some(payload) => decode(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// 读取直到序列结束，返回全部消息。
    pub async fn collect(mut self) -> Result<Vec<T>, Status> {
        let mut messages = Vec::new();
        while let Some(message) = self.message().await? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// 停止接收；对端后续发送失败。
    pub fn close(&mut self) -> Result<(), ChannelError> {
        self.inner.close()
    }
}

/// 类型化的消息写入端。
#[derive(Debug)]
pub struct Sink<T> {
    inner: StreamSender<Bytes>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> Sink<T> {
    pub fn new(inner: StreamSender<Bytes>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub async fn send(&mut self, message: T) -> Result<(), ChannelError> {
        let payload = encode(&message).map_err(ChannelError::Terminated)?;
        self.inner.send(payload).await
    }

    /// 半关闭写入方向。
    pub fn close(&mut self) -> Result<(), ChannelError> {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
