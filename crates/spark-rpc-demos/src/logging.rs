use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

/// 安装全局日志订阅者：`fmt` 输出加 `EnvFilter`，未设置 `RUST_LOG` 时取 `info`。
///
/// 已有全局订阅者时保持原状。
pub fn init() {
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
