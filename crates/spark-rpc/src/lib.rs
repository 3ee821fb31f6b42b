#![deny(unsafe_code)]
#![doc = r#"
# spark-rpc

## 设计动机（Why）
- 为一元、服务端流、客户端流与双向流四种交互形态提供统一的调用引擎，
  让业务处理器只需关心“读请求、写响应、返回终态”；
- 将截止时间与取消在调用方、线上传输与被调方之间端到端传播，
  保证慢处理器与断开的调用方都不会让资源无限期悬挂；
- 把应用错误、取消、超时与传输失败映射为单一 [`Status`] 终态，调用方无需猜测失败来源。

## 核心契约（What）
- [`CallContext`]：携带 [`Deadline`] 与 [`Cancellation`]，`check()` 中取消优先于超时；
- 消息通道：每个方向独立有界、严格 FIFO，关闭方向为一次性不可逆操作；
- [`Call`]：调用双方共享的生命周期记录，`finalize` 恰好成功一次；
- [`Handler`]/[`ServiceTable`]/[`Router`]：按方法路径注册与分发处理器，未知方法返回 `Unimplemented`；
- [`Transport`]：对象安全的调用建立接缝，[`LocalTransport`] 为进程内实现，线上实现位于
  `spark-rpc-transport`；
- [`Client`]：按四种形态提供类型化的调用入口。

## 实现策略（How）
- 基于 Tokio 的有界 `mpsc` 实现每个方向的消息队列，`oneshot` 承载响应方向之后的终态；
- 取消采用 `AtomicBool + Notify`，既可同步探测，也可异步等待；
- 服务端运行时以 `select!` 让处理器与 `done()` 赛跑，并在产出终态前再次 `settle`，
  迟到的成功同样被判定为 `DeadlineExceeded`；
- 消息体以 `serde_json` 编码为 [`bytes::Bytes`]，类型化读写由 [`Streaming`] 与 [`Sink`] 完成。

## 风险与考量（Trade-offs）
- 取消只能在 `.await` 点生效：长时间同步计算的处理器需要自行调用 `ctx.check()`；
- 有界通道带来背压，但调用方若既不读也不取消，被调方会在 `send` 上挂起直至截止时间；
- 终态只能由运行时写入一次，处理器无法在返回之后追加消息或修改终态。
"#]

mod call;
mod channel;
mod client;
mod codec;
mod context;
mod error;
mod handler;
mod service;
mod status;
mod transport;

pub use call::{Call, CallId, CallState, ClientCall, Pattern, ServerCall, settle};
pub use channel::{
    DEFAULT_STREAM_CAPACITY, Direction, StatusSender, StreamReceiver, StreamSender,
    request_channel, response_channel,
};
pub use client::{BidiCall, Client};
pub use codec::{Sink, Streaming, decode, encode};
pub use context::{CallContext, CallContextBuilder, Cancellation, Deadline};
pub use error::ChannelError;
pub use handler::{Handler, Method};
pub use service::{Router, ServiceTable, serve_call};
pub use status::{Code, Status, StatusKind};
pub use transport::{LocalTransport, Transport};
