use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use spark_rpc_transport::{
    ConnectOptions, TlsAcceptor, TlsConnector, TransportError, client_config_from_pem,
    server_config_from_pem,
};

use crate::greet::GreetConfig;

/// 配置装载与命令行解析错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Tls(#[from] TransportError),
}

/// 示例程序的配置。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 所有字段都有默认值，TOML 文件只需写出要覆盖的部分；未知字段视为错误；
/// - 命令行参数在文件之后生效（见 [`crate::cli::CliArgs::resolve`]）；
/// - 服务端监听与客户端连接共用 `addr`。
///
/// ```toml
/// addr = "127.0.0.1:50051"
/// drain_timeout_ms = 5000
///
/// [tls]
/// enabled = true
/// cert = "ssl/server.crt"
/// key = "ssl/server.pem"
/// ca = "ssl/ca.crt"
/// server_name = "localhost"
///
/// [greet]
/// stream_interval_ms = 1000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    pub addr: SocketAddr,
    pub drain_timeout_ms: u64,
    pub tls: TlsSettings,
    pub greet: GreetSettings,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            drain_timeout_ms: 5_000,
            tls: TlsSettings::default(),
            greet: GreetSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSettings {
    pub enabled: bool,
    /// 服务端证书链（PEM）。
    pub cert: PathBuf,
    /// 服务端私钥（PEM）。
    pub key: PathBuf,
    /// 客户端信任的 CA 证书（PEM）。
    pub ca: PathBuf,
    pub server_name: String,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cert: PathBuf::from("ssl/server.crt"),
            key: PathBuf::from("ssl/server.pem"),
            ca: PathBuf::from("ssl/ca.crt"),
            server_name: "localhost".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GreetSettings {
    pub stream_interval_ms: u64,
    pub deadline_step_ms: u64,
    pub deadline_steps: u32,
}

impl Default for GreetSettings {
    fn default() -> Self {
        let defaults = GreetConfig::default();
        Self {
            stream_interval_ms: millis(defaults.stream_interval),
            deadline_step_ms: millis(defaults.deadline_step),
            deadline_steps: defaults.deadline_steps,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl DemoConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn greet_config(&self) -> GreetConfig {
        GreetConfig {
            stream_interval: Duration::from_millis(self.greet.stream_interval_ms),
            deadline_step: Duration::from_millis(self.greet.deadline_step_ms),
            deadline_steps: self.greet.deadline_steps,
        }
    }

    /// TLS 开启时读取证书与私钥，构造服务端握手入口。
    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ConfigError> {
        if !self.tls.enabled {
            return Ok(None);
        }
        let cert = read(&self.tls.cert)?;
        let key = read(&self.tls.key)?;
        let config = server_config_from_pem(&cert, &key)?;
        Ok(Some(TlsAcceptor::new(config)))
    }

    /// 客户端连接参数；TLS 开启时读取 CA 证书。
    pub fn connect_options(&self) -> Result<ConnectOptions, ConfigError> {
        let options = ConnectOptions::new();
        if !self.tls.enabled {
            return Ok(options);
        }
        let ca = read(&self.tls.ca)?;
        let connector = TlsConnector::new(client_config_from_pem(&ca)?, &self.tls.server_name)?;
        Ok(options.with_tls(connector))
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })
}
