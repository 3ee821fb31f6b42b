//! calculator 客户端：连接 calculator 服务端并演示一种交互。
//!
//! 可选的演示：`unary`（Sum）、`server-stream`（PrimeNumberDecomposition）、
//! `client-stream`（ComputeAverage）、`bidi`（FindMaximum）、`error`（SquareRoot 的负数输入）。

use std::env;
use std::time::Duration;

use futures::{StreamExt, stream};
use spark_rpc::{CallContext, Client, Code};
use spark_rpc_demos::calculator::{
    COMPUTE_AVERAGE, ComputeAverageRequest, FIND_MAXIMUM, FindMaximumRequest,
    FindMaximumResponse, PRIME_NUMBER_DECOMPOSITION, PrimeNumberDecompositionRequest, SQUARE_ROOT,
    SUM, SquareRootRequest, SumRequest,
};
use spark_rpc_demos::{CliArgs, Demo, DemoError, logging, runtime};
use tracing::info;

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(error) = run().await {
        eprintln!("calculator_client failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), DemoError> {
    let args = CliArgs::parse_client(env::args().skip(1))?;
    let config = args.resolve()?;
    let client = runtime::connect(&config).await?;
    match args.demo.unwrap_or_default() {
        Demo::Unary => sum(&client).await,
        Demo::ServerStream => decompose(&client).await,
        Demo::ClientStream => average(&client).await,
        Demo::Bidi => find_maximum(&client).await,
        Demo::Error => square_roots(&client).await,
        other => Err(DemoError::Unsupported(other)),
    }
}

async fn sum(client: &Client) -> Result<(), DemoError> {
    let request = SumRequest {
        first_number: 7,
        second_number: 8,
    };
    let response = client.unary(SUM, CallContext::default(), request).await?;
    info!(result = response.result, "Sum response");
    Ok(())
}

async fn decompose(client: &Client) -> Result<(), DemoError> {
    let request = PrimeNumberDecompositionRequest {
        number: 21_231_654_321_654,
    };
    let mut factors = client
        .server_streaming(PRIME_NUMBER_DECOMPOSITION, CallContext::default(), request)
        .await?;
    while let Some(response) = factors.message().await? {
        info!(prime_factor = response.prime_factor, "PrimeNumberDecomposition response");
    }
    info!("PrimeNumberDecomposition finished");
    Ok(())
}

async fn average(client: &Client) -> Result<(), DemoError> {
    let requests = stream::iter([3, 5, 9, 54, 23]).then(|number| async move {
        info!(number, "sending ComputeAverage request");
        tokio::time::sleep(Duration::from_millis(100)).await;
        ComputeAverageRequest { number }
    });
    let response = client
        .client_streaming(COMPUTE_AVERAGE, CallContext::default(), requests)
        .await?;
    info!(result = response.result, "ComputeAverage response");
    Ok(())
}

async fn find_maximum(client: &Client) -> Result<(), DemoError> {
    let call = client
        .bidi_streaming(FIND_MAXIMUM, CallContext::default())
        .await?;
    let requests = stream::iter([4, 7, 2, 19, 4, 6, 32]).then(|number| async move {
        info!(number, "sending FindMaximum request");
        tokio::time::sleep(Duration::from_secs(1)).await;
        FindMaximumRequest { number }
    });
    call.run(requests, |response: FindMaximumResponse| {
        info!(maximum = response.maximum, "new maximum received");
    })
    .await?;
    info!("FindMaximum finished");
    Ok(())
}

/// 先以合法输入调用，再以负数调用以演示应用错误的状态码与文案。
async fn square_roots(client: &Client) -> Result<(), DemoError> {
    for number in [10, -2] {
        let request = SquareRootRequest { number };
        match client.unary(SQUARE_ROOT, CallContext::default(), request).await {
            Ok(response) => info!(number, root = response.number_root, "SquareRoot response"),
            Err(status) if status.code() == Code::InvalidArgument => {
                info!(
                    number,
                    code = %status.code(),
                    message = status.message(),
                    "SquareRoot rejected the input"
                );
            }
            Err(status) => return Err(status.into()),
        }
    }
    Ok(())
}
