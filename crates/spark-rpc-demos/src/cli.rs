use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::{ConfigError, DemoConfig};

/// 客户端要演示的交互。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Demo {
    #[default]
    Unary,
    ServerStream,
    ClientStream,
    Bidi,
    Deadline,
    Error,
}

impl Demo {
    pub const fn as_str(self) -> &'static str {
        match self {
            Demo::Unary => "unary",
            Demo::ServerStream => "server-stream",
            Demo::ClientStream => "client-stream",
            Demo::Bidi => "bidi",
            Demo::Deadline => "deadline",
            Demo::Error => "error",
        }
    }
}

impl fmt::Display for Demo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Demo {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unary" => Ok(Demo::Unary),
            "server-stream" => Ok(Demo::ServerStream),
            "client-stream" => Ok(Demo::ClientStream),
            "bidi" => Ok(Demo::Bidi),
            "deadline" => Ok(Demo::Deadline),
            "error" => Ok(Demo::Error),
            other => Err(ConfigError::Usage(format!(
                "unknown demo `{other}`, expected one of unary, server-stream, client-stream, bidi, deadline, error"
            ))),
        }
    }
}

/// 命令行参数。
///
/// 支持 `--config <file>`、`--addr host:port`、`--tls`/`--no-tls`，客户端额外支持 `--demo <name>`。
/// 同一参数出现多次时以最后一次为准。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub addr: Option<SocketAddr>,
    pub tls: Option<bool>,
    pub demo: Option<Demo>,
}

impl CliArgs {
    /// 解析服务端参数；`--demo` 视为未知参数。
    pub fn parse_server<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        Self::parse(args, false)
    }

    pub fn parse_client<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        Self::parse(args, true)
    }

    fn parse<I>(args: I, allow_demo: bool) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value(&mut args, &flag)?)),
                "--addr" => {
                    let raw = value(&mut args, &flag)?;
                    let addr = raw
                        .parse()
                        .map_err(|_| ConfigError::Usage(format!("invalid address `{raw}`")))?;
                    parsed.addr = Some(addr);
                }
                "--tls" => parsed.tls = Some(true),
                "--no-tls" => parsed.tls = Some(false),
                "--demo" if allow_demo => parsed.demo = Some(value(&mut args, &flag)?.parse()?),
                other => {
                    return Err(ConfigError::Usage(format!("unknown argument `{other}`")));
                }
            }
        }
        Ok(parsed)
    }

    /// 先装载配置文件（未指定时取默认值），再以命令行参数覆盖。
    pub fn resolve(&self) -> Result<DemoConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => DemoConfig::load(path)?,
            None => DemoConfig::default(),
        };
        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if let Some(tls) = self.tls {
            config.tls.enabled = tls;
        }
        Ok(config)
    }
}

fn value<I>(args: &mut I, flag: &str) -> Result<String, ConfigError>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| ConfigError::Usage(format!("{flag} requires a value")))
}
