//! calculator 服务端：在配置的地址上提供 `calculator.CalculatorService`，Ctrl-C 后排空并退出。

use std::env;

use spark_rpc::Router;
use spark_rpc_demos::calculator::calculator_service;
use spark_rpc_demos::{CliArgs, DemoError, logging, runtime};
use tracing::info;

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(error) = run().await {
        eprintln!("calculator_server failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), DemoError> {
    let config = CliArgs::parse_server(env::args().skip(1))?.resolve()?;
    let router = Router::new().add_service(calculator_service());
    info!(addr = %config.addr, tls = config.tls.enabled, "starting calculator server");
    runtime::serve(router, &config, runtime::ctrl_c()).await
}
