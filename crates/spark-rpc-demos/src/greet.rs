//! 问候服务：四种交互形态各一个方法，外加一个演示截止时间的慢一元方法。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use spark_rpc::{CallContext, Method, Pattern, ServiceTable, Status};
use tracing::info;

pub const GREET: Method<GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/Greet", Pattern::Unary);
pub const GREET_MANY_TIMES: Method<GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/GreetManyTimes", Pattern::ServerStreaming);
pub const LONG_GREET: Method<GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/LongGreet", Pattern::ClientStreaming);
pub const GREET_EVERYONE: Method<GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/GreetEveryone", Pattern::BidiStreaming);
pub const GREET_WITH_DEADLINE: Method<GreetRequest, GreetResponse> =
    Method::new("greet.GreetService/GreetWithDeadline", Pattern::Unary);

/// `GreetManyTimes` 发送的响应条数。
pub const GREET_REPEAT: u32 = 10;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub first_name: String,
    pub last_name: String,
}

impl Greeting {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetRequest {
    pub greeting: Greeting,
}

impl GreetRequest {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            greeting: Greeting::new(first_name, last_name),
        }
    }

    fn first_name(&self) -> &str {
        &self.greeting.first_name
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetResponse {
    pub result: String,
}

impl GreetResponse {
    fn new(result: String) -> Self {
        Self { result }
    }
}

/// 问候服务的节奏参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GreetConfig {
    /// `GreetManyTimes` 相邻两条响应之间的停顿。
    pub stream_interval: Duration,
    /// `GreetWithDeadline` 每个工作步骤的耗时。
    pub deadline_step: Duration,
    pub deadline_steps: u32,
}

impl Default for GreetConfig {
    fn default() -> Self {
        Self {
            stream_interval: Duration::from_secs(1),
            deadline_step: Duration::from_secs(1),
            deadline_steps: 3,
        }
    }
}

pub fn hello(first_name: &str) -> String {
    format!("Hello {first_name}")
}

pub fn hello_numbered(first_name: &str, index: u32) -> String {
    format!("Hello {first_name} - number {index}")
}

pub fn hello_exclaimed(first_name: &str) -> String {
    format!("Hello {first_name}! ")
}

/// 构造问候服务的方法表。
pub fn greet_service(config: GreetConfig) -> ServiceTable {
    ServiceTable::new()
        .unary(GREET, |_ctx, request: GreetRequest| async move {
            info!(first_name = request.first_name(), "Greet invoked");
            Ok(GreetResponse::new(hello(request.first_name())))
        })
        .server_streaming(
            GREET_MANY_TIMES,
            move |_ctx, request: GreetRequest, mut sink| async move {
                info!(first_name = request.first_name(), "GreetManyTimes invoked");
                for index in 0..GREET_REPEAT {
                    if index > 0 {
                        tokio::time::sleep(config.stream_interval).await;
                    }
                    let result = hello_numbered(request.first_name(), index);
                    sink.send(GreetResponse::new(result)).await?;
                }
                Ok(())
            },
        )
        .client_streaming(LONG_GREET, |_ctx, mut requests| async move {
            let mut result = String::new();
            while let Some(request) = requests.message().await? {
                result.push_str(&hello_exclaimed(request.first_name()));
            }
            Ok(GreetResponse::new(result))
        })
        .bidi_streaming(GREET_EVERYONE, |_ctx, mut requests, mut sink| async move {
            while let Some(request) = requests.message().await? {
                let reply = hello_exclaimed(request.first_name());
                sink.send(GreetResponse::new(reply)).await?;
            }
            Ok(())
        })
        .unary(
            GREET_WITH_DEADLINE,
            move |ctx: CallContext, request: GreetRequest| async move {
                info!(first_name = request.first_name(), "GreetWithDeadline invoked");
                for _ in 0..config.deadline_steps {
                    if let Err(status) = ctx.check() {
                        info!(code = %status.code(), "client gave up on GreetWithDeadline");
                        return Err::<GreetResponse, Status>(status);
                    }
                    tokio::time::sleep(config.deadline_step).await;
                }
                Ok(GreetResponse::new(hello(request.first_name())))
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_texts() {
        assert_eq!(hello("Ana"), "Hello Ana");
        assert_eq!(hello_numbered("Ana", 3), "Hello Ana - number 3");
        assert_eq!(hello_exclaimed("Ana"), "Hello Ana! ");
    }

    #[test]
    fn service_registers_every_method() {
        assert_eq!(greet_service(GreetConfig::default()).len(), 5);
    }
}
