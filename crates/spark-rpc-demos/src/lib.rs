#![deny(unsafe_code)]
#![doc = r#"
# spark-rpc-demos

## 意图（Why）
- 以两个小服务演示四种交互形态：`greet`（问候）与 `calculator`（计算器）；
- 业务逻辑只是可插拔的处理器，调用引擎与传输层对其一无所知。

## 契约（What）
- [`greet::greet_service`] 与 [`calculator::calculator_service`] 返回可合并进
  [`spark_rpc::Router`] 的方法表，同一份方法表既可挂在进程内传输上，也可挂在线上服务器上；
- [`config::DemoConfig`] 从 TOML 装载，命令行参数（[`cli::CliArgs`]）在其后覆盖；
- [`runtime`] 提供服务端启动/排空与客户端连接的公共流程，四个二进制只负责组装。
"#]

pub mod calculator;
pub mod cli;
pub mod config;
pub mod error;
pub mod greet;
pub mod logging;
pub mod runtime;

pub use cli::{CliArgs, Demo};
pub use config::{ConfigError, DemoConfig};
pub use error::DemoError;
