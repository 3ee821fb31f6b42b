use std::io;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;

/// TCP 套接字层面的可调参数。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在 `accept` 与 `connect` 两端统一写入 `SO_LINGER` 与 `TCP_NODELAY`，
///   避免宿主层重复操作 `socket2`；
/// - 流式调用大量发送小消息，默认开启 `TCP_NODELAY` 以免 Nagle 算法拖慢逐条交互。
///
/// ## 契约（What）
/// - `linger = None` 表示沿用内核默认；
/// - [`TcpSocketConfig::apply`] 失败时返回原始 `io::Error`，由调用方映射为 `CONFIGURE` 错误。
///
/// ## 风险（Trade-offs）
/// - `SO_LINGER` 设置过短时，未发送完的终态帧可能被 RST 丢弃。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSocketConfig {
    linger: Option<Duration>,
    nodelay: bool,
}

impl TcpSocketConfig {
    pub const fn new() -> Self {
        Self {
            linger: None,
            nodelay: true,
        }
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// 设置 `TCP_NODELAY`。
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        let sock = SockRef::from(stream);
        sock.set_linger(self.linger)?;
        sock.set_tcp_nodelay(self.nodelay)
    }
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_writes_linger_and_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("绑定本地端口");
        let addr = listener.local_addr().expect("读取监听地址");
        let (client, _) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = client.expect("建立连接");

        let config = TcpSocketConfig::new()
            .with_linger(Some(Duration::from_secs(1)))
            .with_nodelay(true);
        config.apply(&client).expect("写入套接字选项");

        let sock = SockRef::from(&client);
        assert_eq!(
            sock.linger().expect("读取 SO_LINGER"),
            Some(Duration::from_secs(1))
        );
        assert!(sock.tcp_nodelay().expect("读取 TCP_NODELAY"));
    }
}
