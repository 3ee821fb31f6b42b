use std::io;

use spark_rpc::Status;

use crate::frame::FrameError;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.rpc.transport.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.rpc.transport.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.rpc.transport.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.rpc.transport.read_failed",
    message: "frame read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "spark.rpc.transport.write_failed",
    message: "frame write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.rpc.transport.configure_failed",
    message: "tcp configure",
};
pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: "spark.rpc.transport.handshake_failed",
    message: "tls handshake",
};

/// 传输层错误。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `Io`/`Cancelled`/`Timeout` 携带 [`OperationKind`]，[`TransportError::code`] 返回稳定错误码；
/// - 转换为 [`Status`] 时，取消与超时分别映射为 `Canceled`/`DeadlineExceeded`，
///   其余一律为传输层失败（[`Status::transport`]），不会混入应用错误路径。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{}: {source}", kind.message)]
    Io {
        kind: OperationKind,
        source: io::Error,
    },
    #[error("{} cancelled", kind.message)]
    Cancelled { kind: OperationKind },
    #[error("{} timed out", kind.message)]
    Timeout { kind: OperationKind },
    #[error("tls configuration: {0}")]
    Tls(#[from] rustls::Error),
    #[error("pem: {0}")]
    Pem(#[from] rustls_pki_types::pem::Error),
    #[error("invalid server name: {0}")]
    ServerName(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Io { kind, .. } => kind.code,
            TransportError::Cancelled { .. } => CANCEL_CODE,
            TransportError::Timeout { .. } => TIMEOUT_CODE,
            TransportError::Tls(_) | TransportError::Pem(_) | TransportError::ServerName(_) => {
                "spark.rpc.transport.tls_config_invalid"
            }
            TransportError::Frame(_) => "spark.rpc.transport.frame_invalid",
        }
    }
}

impl From<TransportError> for Status {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Cancelled { .. } => Status::canceled(error.to_string()),
            TransportError::Timeout { .. } => Status::deadline_exceeded(error.to_string()),
            other => Status::transport(other.to_string()),
        }
    }
}

const CANCEL_CODE: &str = "spark.rpc.transport.cancelled";
const TIMEOUT_CODE: &str = "spark.rpc.transport.timeout";

/// 将 IO 错误映射为传输层错误。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> TransportError {
    TransportError::Io {
        kind,
        source: error,
    }
}

/// 构造取消错误。
pub(crate) fn cancelled_error(kind: OperationKind) -> TransportError {
    TransportError::Cancelled { kind }
}

/// 构造超时错误。
pub(crate) fn timeout_error(kind: OperationKind) -> TransportError {
    TransportError::Timeout { kind }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_rpc::{Code, StatusKind};

    #[test]
    fn io_errors_keep_operation_context() {
        let err = map_io_error(READ, io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.code(), "spark.rpc.transport.read_failed");
        assert_eq!(err.to_string(), "frame read: reset");

        let status: Status = err.into();
        assert_eq!(status.kind(), StatusKind::Transport);
    }

    #[test]
    fn interruptions_map_to_call_level_codes() {
        let status: Status = timeout_error(CONNECT).into();
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(status.message(), "tcp connect timed out");

        let status: Status = cancelled_error(HANDSHAKE).into();
        assert_eq!(status.code(), Code::Canceled);
    }
}
