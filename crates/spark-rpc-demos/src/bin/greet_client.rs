//! greet 客户端：连接 greet 服务端并演示一种交互。
//!
//! ```bash
//! cargo run --bin greet_client -- --demo bidi
//! cargo run --bin greet_client -- --demo deadline --tls
//! ```
//!
//! 可选的演示：`unary`、`server-stream`、`client-stream`、`bidi`、`deadline`。

use std::env;
use std::time::Duration;

use futures::{StreamExt, stream};
use spark_rpc::{CallContext, Client, Code};
use spark_rpc_demos::greet::{
    GREET, GREET_EVERYONE, GREET_MANY_TIMES, GREET_WITH_DEADLINE, GreetRequest, GreetResponse,
    LONG_GREET,
};
use spark_rpc_demos::{CliArgs, Demo, DemoError, logging, runtime};
use tracing::info;

const SEND_PAUSE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(error) = run().await {
        eprintln!("greet_client failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), DemoError> {
    let args = CliArgs::parse_client(env::args().skip(1))?;
    let config = args.resolve()?;
    let client = runtime::connect(&config).await?;
    match args.demo.unwrap_or_default() {
        Demo::Unary => unary(&client).await,
        Demo::ServerStream => server_stream(&client).await,
        Demo::ClientStream => client_stream(&client).await,
        Demo::Bidi => bidi(&client).await,
        Demo::Deadline => deadline(&client).await,
        other => Err(DemoError::Unsupported(other)),
    }
}

fn people() -> Vec<GreetRequest> {
    vec![
        GreetRequest::new("Ada", "Lovelace"),
        GreetRequest::new("Grace", "Hopper"),
        GreetRequest::new("Alan", "Turing"),
        GreetRequest::new("Barbara", "Liskov"),
    ]
}

async fn unary(client: &Client) -> Result<(), DemoError> {
    let response = client
        .unary(GREET, CallContext::default(), GreetRequest::new("Ada", "Lovelace"))
        .await?;
    info!(result = %response.result, "Greet response");
    Ok(())
}

async fn server_stream(client: &Client) -> Result<(), DemoError> {
    let mut responses = client
        .server_streaming(
            GREET_MANY_TIMES,
            CallContext::default(),
            GreetRequest::new("Ada", "Lovelace"),
        )
        .await?;
    while let Some(response) = responses.message().await? {
        info!(result = %response.result, "GreetManyTimes response");
    }
    info!("GreetManyTimes finished");
    Ok(())
}

async fn client_stream(client: &Client) -> Result<(), DemoError> {
    let requests = stream::iter(people()).then(|request| async move {
        info!(first_name = %request.greeting.first_name, "sending LongGreet request");
        tokio::time::sleep(SEND_PAUSE).await;
        request
    });
    let response = client
        .client_streaming(LONG_GREET, CallContext::default(), requests)
        .await?;
    info!(result = %response.result, "LongGreet response");
    Ok(())
}

async fn bidi(client: &Client) -> Result<(), DemoError> {
    let call = client
        .bidi_streaming(GREET_EVERYONE, CallContext::default())
        .await?;
    let requests = stream::iter(people()).then(|request| async move {
        tokio::time::sleep(SEND_PAUSE).await;
        info!(first_name = %request.greeting.first_name, "sending GreetEveryone request");
        request
    });
    call.run(requests, |response: GreetResponse| {
        info!(result = %response.result, "GreetEveryone response");
    })
    .await?;
    info!("GreetEveryone finished");
    Ok(())
}

/// 先以 5 秒截止时间调用（应完成），再以 1 秒调用（应超时）。
async fn deadline(client: &Client) -> Result<(), DemoError> {
    for timeout in [Duration::from_secs(5), Duration::from_secs(1)] {
        let ctx = CallContext::builder().with_timeout(timeout).build();
        let request = GreetRequest::new("Ada", "Lovelace");
        match client.unary(GREET_WITH_DEADLINE, ctx, request).await {
            Ok(response) => {
                info!(?timeout, result = %response.result, "GreetWithDeadline response");
            }
            Err(status) if status.code() == Code::DeadlineExceeded => {
                info!(?timeout, "GreetWithDeadline hit its deadline");
            }
            Err(status) => return Err(status.into()),
        }
    }
    Ok(())
}
