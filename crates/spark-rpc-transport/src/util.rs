use std::future::Future;
use std::io;

use spark_rpc::{CallContext, Code, Status};

use crate::error::{OperationKind, TransportError, cancelled_error, map_io_error, timeout_error};

/// 在保留取消/超时语义的前提下执行 IO Future。
///
/// 取消优先于超时；两者都未发生时返回 IO 结果，失败映射为带 `kind` 的传输层错误。
pub(crate) async fn run_with_context<F, T>(
    ctx: &CallContext,
    kind: OperationKind,
    future: F,
) -> Result<T, TransportError>
where
    F: Future<Output = io::Result<T>>,
{
    if let Err(status) = ctx.check() {
        return Err(interrupted(kind, &status));
    }
    tokio::select! {
        biased;
        status = ctx.done() => Err(interrupted(kind, &status)),
        result = future => result.map_err(|err| map_io_error(kind, err)),
    }
}

fn interrupted(kind: OperationKind, status: &Status) -> TransportError {
    match status.code() {
        Code::DeadlineExceeded => timeout_error(kind),
        _ => cancelled_error(kind),
    }
}
