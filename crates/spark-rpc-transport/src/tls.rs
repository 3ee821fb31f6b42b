//! TLS 配置装载与握手。
//!
//! 核心调用引擎只把“安全信道已建立”当作前置条件，从不检查 TLS 状态；
//! 本模块负责把 PEM/DER 材料装配为 `rustls` 配置，并在连接建立时完成握手。

use std::sync::Arc;

use arc_swap::ArcSwap;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use spark_rpc::CallContext;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{client, server};

use crate::error::{HANDSHAKE, TransportError};
use crate::util::run_with_context;

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// 以 DER 证书链与私钥构造服务端配置（ring 提供者、安全默认协议版本、无客户端认证）。
pub fn server_config_from_der(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, TransportError> {
    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// 以 PEM 编码的证书链与私钥构造服务端配置。
pub fn server_config_from_pem(
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<Arc<ServerConfig>, TransportError> {
    let certs = CertificateDer::pem_slice_iter(cert_pem).collect::<Result<Vec<_>, _>>()?;
    let key = PrivateKeyDer::from_pem_slice(key_pem)?;
    server_config_from_der(certs, key)
}

/// 以受信任的根证书构造客户端配置。
pub fn client_config_from_der(
    roots: Vec<CertificateDer<'static>>,
) -> Result<Arc<ClientConfig>, TransportError> {
    let mut store = RootCertStore::empty();
    for root in roots {
        store.add(root)?;
    }
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// 以 PEM 编码的 CA 证书构造客户端配置。
pub fn client_config_from_pem(ca_pem: &[u8]) -> Result<Arc<ClientConfig>, TransportError> {
    let roots = CertificateDer::pem_slice_iter(ca_pem).collect::<Result<Vec<_>, _>>()?;
    client_config_from_der(roots)
}

/// TLS 服务端握手入口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在 TCP 层接受连接后完成握手，为帧读写提供加密字节流；
/// - 通过 [`ArcSwap`] 支持热更新 [`ServerConfig`]，满足证书轮换需求，已建立的连接不受影响。
///
/// ## 契约（What）
/// - `accept`：握手遵循 `ctx` 的取消与截止时间；失败返回 `HANDSHAKE` 类错误；
/// - `replace_config`：原子替换 TLS 配置，之后的握手使用新配置；
/// - `config_snapshot`：获取当前配置的 `Arc` 副本。
#[derive(Clone, Debug)]
pub struct TlsAcceptor {
    config: Arc<ArcSwap<ServerConfig>>,
}

impl TlsAcceptor {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config: Arc::new(ArcSwap::new(config)),
        }
    }

    /// 替换当前 TLS 配置，通常用于证书热更新。
    pub fn replace_config(&self, config: Arc<ServerConfig>) {
        self.config.store(config);
    }

    pub fn config_snapshot(&self) -> Arc<ServerConfig> {
        self.config.load_full()
    }

    pub async fn accept<IO>(
        &self,
        ctx: &CallContext,
        stream: IO,
    ) -> Result<server::TlsStream<IO>, TransportError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let acceptor = tokio_rustls::TlsAcceptor::from(self.config.load_full());
        run_with_context(ctx, HANDSHAKE, acceptor.accept(stream)).await
    }
}

/// TLS 客户端握手入口。
#[derive(Clone, Debug)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl TlsConnector {
    /// `server_name` 用于 SNI 与证书校验，例如 `"localhost"`。
    pub fn new(config: Arc<ClientConfig>, server_name: &str) -> Result<Self, TransportError> {
        let server_name = ServerName::try_from(server_name)
            .map(|name| name.to_owned())
            .map_err(|_| TransportError::ServerName(server_name.to_owned()))?;
        Ok(Self {
            config,
            server_name,
        })
    }

    pub async fn connect<IO>(
        &self,
        ctx: &CallContext,
        stream: IO,
    ) -> Result<client::TlsStream<IO>, TransportError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let connector = tokio_rustls::TlsConnector::from(Arc::clone(&self.config));
        run_with_context(
            ctx,
            HANDSHAKE,
            connector.connect(self.server_name.clone(), stream),
        )
        .await
    }
}
