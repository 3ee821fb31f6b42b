use std::future::Future;

use spark_rpc::{Client, Router};
use spark_rpc_transport::{Connection, Server, ServerConfig};
use tracing::{info, warn};

use crate::config::DemoConfig;
use crate::error::DemoError;

/// 按配置启动服务器，直到 `shutdown` 完成后排空并返回。
pub async fn serve<F>(router: Router, config: &DemoConfig, shutdown: F) -> Result<(), DemoError>
where
    F: Future<Output = ()>,
{
    let mut server = Server::new(
        router,
        ServerConfig::new().with_drain_timeout(config.drain_timeout()),
    );
    if let Some(acceptor) = config.tls_acceptor()? {
        server = server.with_tls(acceptor);
    }
    let listener = Server::bind(config.addr).await?;
    server.serve_with_shutdown(listener, shutdown).await;
    Ok(())
}

/// 按配置连接服务器。
pub async fn connect(config: &DemoConfig) -> Result<Client, DemoError> {
    let connection = Connection::connect(config.addr, config.connect_options()?).await?;
    Ok(Client::new(connection))
}

/// 等待 Ctrl-C；信号监听不可用时永不完成，进程只能被外部终止。
pub async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
