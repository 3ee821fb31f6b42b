use spark_rpc::Status;
use spark_rpc_transport::TransportError;

use crate::cli::Demo;
use crate::config::ConfigError;

/// 示例程序的顶层错误。
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("call failed: {0}")]
    Call(#[from] Status),
    #[error("demo `{0}` is not offered by this client")]
    Unsupported(Demo),
}
