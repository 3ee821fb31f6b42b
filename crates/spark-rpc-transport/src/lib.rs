#![deny(unsafe_code)]
#![doc = r#"
# spark-rpc-transport

## 意图（Why）
- 把 `spark-rpc` 的调用引擎搬到网络上：调用方通过 [`Connection`] 发起调用，
  被调方由 [`Server`] 在 TCP（可选 TLS）监听上承载；
- 核心引擎只依赖 [`spark_rpc::Transport`] 接缝，本 crate 是该接缝的线上实现。

## 契约（What）
- 线上格式见 [`Frame`]：长度前缀帧，按调用标识多路复用；
- 截止时间以剩余时长随 `Open` 帧传递；取消以 `Cancel` 帧传递；
- 终态携带状态码、文案与“是否传输层失败”标记，调用方据此区分应用错误与传输错误；
- 连接断开时，其上所有进行中的调用都以传输层错误结束。

## 实现（How）
- `frame`：帧编解码与带上限的帧读取器；
- `connection`：单写任务 + 读循环分发 + 每调用转发任务；
- `client` / `server`：两端的连接管理与服务器生命周期；
- `tls`：基于 `rustls`（ring 提供者）的配置装载与握手，服务端配置支持热替换。

## 风险（Trade-offs）
- 暂未实现按调用的流量控制窗口，背压止于每调用的有界通道；
- 时钟不在两端间同步，截止时间只以相对时长传递，网络延迟会计入被调方的剩余时间。
"#]

mod client;
mod connection;
mod error;
mod frame;
mod server;
mod socket;
mod tls;
mod util;

pub use client::{ConnectOptions, Connection};
pub use error::{OperationKind, TransportError};
pub use frame::{DEFAULT_MAX_FRAME_LEN, Frame, FrameError};
pub use server::{Server, ServerConfig, ServerState};
pub use socket::TcpSocketConfig;
pub use tls::{
    TlsAcceptor, TlsConnector, client_config_from_der, client_config_from_pem,
    server_config_from_der, server_config_from_pem,
};
