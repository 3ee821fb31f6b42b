//! greet 服务端：在配置的地址上提供 `greet.GreetService`，Ctrl-C 后排空并退出。
//!
//! ```bash
//! cargo run --bin greet_server -- --addr 127.0.0.1:50051 --tls --config demo.toml
//! ```

use std::env;

use spark_rpc::Router;
use spark_rpc_demos::greet::greet_service;
use spark_rpc_demos::{CliArgs, DemoError, logging, runtime};
use tracing::info;

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(error) = run().await {
        eprintln!("greet_server failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), DemoError> {
    let config = CliArgs::parse_server(env::args().skip(1))?.resolve()?;
    let router = Router::new().add_service(greet_service(config.greet_config()));
    info!(addr = %config.addr, tls = config.tls.enabled, "starting greet server");
    runtime::serve(router, &config, runtime::ctrl_c()).await
}
