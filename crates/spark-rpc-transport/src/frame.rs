//! 线上帧格式。
//!
//! 每个帧由 4 字节大端长度前缀与帧体组成，长度不含前缀本身：
//!
//! ```text
//! +-----------+--------------+---------+------------------+
//! | len (u32) | call_id (u64)| tag (u8)| body (len - 9)   |
//! +-----------+--------------+---------+------------------+
//! ```
//!
//! | tag | 帧 | 帧体 |
//! |---|---|---|
//! | 1 | `Open` | `pattern: u8`, `timeout_ms: u64`（`u64::MAX` 表示无截止时间）, `method: utf8` |
//! | 2 | `Message` | 消息字节 |
//! | 3 | `HalfClose` | 空 |
//! | 4 | `Cancel` | 空 |
//! | 5 | `Status` | `code: u8`, `transport: u8`, `message: utf8` |
//!
//! 超过上限或格式错误的帧属于连接级故障：连接被关闭，其上所有调用以传输层错误结束。
//! 发送端因此在入队前用 [`Frame::wire_len`] 自查，超限的消息只终结所属调用。
//!
//! `HalfClose` 由调用方发出时表示请求方向已半关闭；由被调方发出时表示被调方已停止接收请求，
//! 调用方随后的发送得到 `ChannelClosed`。

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use spark_rpc::{Code, Pattern, Status};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{READ, TransportError, map_io_error};

/// 默认的单帧长度上限。
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const HEADER_LEN: usize = 8 + 1;
const NO_TIMEOUT: u64 = u64::MAX;

const TAG_OPEN: u8 = 1;
const TAG_MESSAGE: u8 = 2;
const TAG_HALF_CLOSE: u8 = 3;
const TAG_CANCEL: u8 = 4;
const TAG_STATUS: u8 = 5;

/// 帧解析错误。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
    #[error("frame shorter than its header")]
    TooShort,
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),
    #[error("unknown call pattern {0}")]
    UnknownPattern(u8),
    #[error("malformed {0} frame")]
    Malformed(&'static str),
    #[error("frame text is not valid utf-8")]
    InvalidUtf8,
    #[error("connection closed in the middle of a frame")]
    Truncated,
}

/// 一个线上帧。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Open {
        call_id: u64,
        pattern: Pattern,
        timeout: Option<Duration>,
        method: String,
    },
    Message {
        call_id: u64,
        payload: Bytes,
    },
    HalfClose {
        call_id: u64,
    },
    Cancel {
        call_id: u64,
    },
    Status {
        call_id: u64,
        status: Status,
    },
}

impl Frame {
    pub fn call_id(&self) -> u64 {
        match self {
            Frame::Open { call_id, .. }
            | Frame::Message { call_id, .. }
            | Frame::HalfClose { call_id }
            | Frame::Cancel { call_id }
            | Frame::Status { call_id, .. } => *call_id,
        }
    }

    /// 长度前缀中记录的帧长（不含前缀本身），与接收端的上限比较的就是这个值。
    pub fn wire_len(&self) -> usize {
        let body_len = match self {
            Frame::Open { method, .. } => 1 + 8 + method.len(),
            Frame::Message { payload, .. } => payload.len(),
            Frame::HalfClose { .. } | Frame::Cancel { .. } => 0,
            Frame::Status { status, .. } => 2 + status.message().len(),
        };
        HEADER_LEN + body_len
    }

    /// 追加编码到 `dst`。
    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.wire_len();
        dst.reserve(LEN_PREFIX + len);
        dst.put_u32(len as u32);
        dst.put_u64(self.call_id());
        match self {
            Frame::Open {
                pattern,
                timeout,
                method,
                ..
            } => {
                dst.put_u8(TAG_OPEN);
                dst.put_u8(pattern.as_u8());
                let timeout_ms = timeout
                    .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(NO_TIMEOUT - 1))
                    .unwrap_or(NO_TIMEOUT);
                dst.put_u64(timeout_ms);
                dst.put_slice(method.as_bytes());
            }
            Frame::Message { payload, .. } => {
                dst.put_u8(TAG_MESSAGE);
                dst.put_slice(payload);
            }
            Frame::HalfClose { .. } => dst.put_u8(TAG_HALF_CLOSE),
            Frame::Cancel { .. } => dst.put_u8(TAG_CANCEL),
            Frame::Status { status, .. } => {
                dst.put_u8(TAG_STATUS);
                dst.put_u8(status.code().as_u8());
                dst.put_u8(u8::from(status.is_transport()));
                dst.put_slice(status.message().as_bytes());
            }
        }
    }

    /// 尝试从 `src` 头部解出一个完整帧；数据不足时返回 `Ok(None)` 且不消费任何字节。
    pub fn decode(src: &mut BytesMut, max_len: usize) -> Result<Option<Frame>, FrameError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > max_len {
            return Err(FrameError::TooLarge { len, max: max_len });
        }
        if len < HEADER_LEN {
            return Err(FrameError::TooShort);
        }
        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let mut frame = src.split_to(len);
        let call_id = frame.get_u64();
        let tag = frame.get_u8();
        let mut body = frame.freeze();
        let frame = match tag {
            TAG_OPEN => {
                if body.len() < 9 {
                    return Err(FrameError::Malformed("open"));
                }
                let raw_pattern = body.get_u8();
                let pattern =
                    Pattern::from_u8(raw_pattern).ok_or(FrameError::UnknownPattern(raw_pattern))?;
                let timeout = match body.get_u64() {
                    NO_TIMEOUT => None,
                    millis => Some(Duration::from_millis(millis)),
                };
                Frame::Open {
                    call_id,
                    pattern,
                    timeout,
                    method: utf8(body)?,
                }
            }
            TAG_MESSAGE => Frame::Message {
                call_id,
                payload: body,
            },
            TAG_HALF_CLOSE => Frame::HalfClose { call_id },
            TAG_CANCEL => Frame::Cancel { call_id },
            TAG_STATUS => {
                if body.len() < 2 {
                    return Err(FrameError::Malformed("status"));
                }
                let code = Code::from_u8(body.get_u8());
                let transport = body.get_u8() != 0;
                Frame::Status {
                    call_id,
                    status: Status::from_wire(code, transport, utf8(body)?),
                }
            }
            other => return Err(FrameError::UnknownTag(other)),
        };
        Ok(Some(frame))
    }
}

fn utf8(body: Bytes) -> Result<String, FrameError> {
    String::from_utf8(body.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}

/// 从字节流中逐帧读取。
///
/// `next` 可安全地放入 `select!`：已读入的字节保存在内部缓冲区，被取消时不会丢失。
#[derive(Debug)]
pub(crate) struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            max_len,
        }
    }

    /// 读取下一帧；对端在帧边界处关闭时返回 `Ok(None)`。
    pub(crate) async fn next(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf, self.max_len)? {
                return Ok(Some(frame));
            }
            let read = self
                .inner
                .read_buf(&mut self.buf)
                .await
                .map_err(|err| map_io_error(READ, err))?;
            if read == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(FrameError::Truncated.into())
                };
            }
        }
    }
}
