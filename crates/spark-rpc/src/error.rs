use crate::channel::Direction;
use crate::status::Status;

/// 消息通道与调用生命周期的契约错误。
///
/// - `ChannelClosed`：本端或对端已关闭该方向，后续发送被拒绝；
/// - `InvalidState`：违反调用契约（重复关闭、一元响应发送第二条、重复 finalize 等），
///   只对当前调用致命；
/// - `Terminated`：调用在发送挂起期间被取消或超时，携带对应终态。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("{direction} channel closed")]
    ChannelClosed { direction: Direction },
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("call terminated: {0}")]
    Terminated(Status),
}

impl From<ChannelError> for Status {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Terminated(status) => status,
            other => Status::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    #[test]
    fn contract_violations_map_to_internal() {
        let status: Status = ChannelError::InvalidState("direction already closed").into();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "invalid state: direction already closed");

        let status: Status = ChannelError::ChannelClosed {
            direction: Direction::Response,
        }
        .into();
        assert_eq!(status.code(), Code::Internal);
    }

    #[test]
    fn terminated_carries_the_call_status() {
        let status: Status =
            ChannelError::Terminated(Status::deadline_exceeded("deadline exceeded")).into();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }
}
