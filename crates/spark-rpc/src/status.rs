use std::borrow::Cow;
use std::fmt;

/// 调用终态使用的状态码，数值与 gRPC 规范保持一致，便于线上编码与跨语言对照。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 应用处理器只应使用封闭集合中的码值：`InvalidArgument`、`Canceled`、
///   `DeadlineExceeded`、`Internal` 以及路由层使用的 `Unimplemented`/`NotFound`；
/// - `Unavailable` 保留给传输层失败（连接丢失、帧损坏），配合 [`Status::transport`] 使用；
/// - 未知数值经 [`Code::from_u8`] 折叠为 [`Code::Unknown`]，绝不 panic。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    Ok = 0,
    Canceled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    FailedPrecondition = 9,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
}

impl Code {
    /// 线上编码使用的单字节表示。
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// 从线上字节还原状态码。
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Canceled,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            9 => Code::FailedPrecondition,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            _ => Code::Unknown,
        }
    }

    /// 稳定的蛇形命名，供日志与 CLI 输出使用。
    pub const fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "ok",
            Code::Canceled => "canceled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::FailedPrecondition => "failed_precondition",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调用方视角下终态的分类。
///
/// 调用方据此区分“对端明确拒绝了输入”（[`StatusKind::Application`]）、
/// “调用未能完成”（[`StatusKind::Transport`]）与“我方/对端主动放弃”
/// （[`StatusKind::Canceled`]、[`StatusKind::DeadlineExceeded`]）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Ok,
    Application,
    Canceled,
    DeadlineExceeded,
    Transport,
}

/// 一次调用唯一的终态对象。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每个 Call 恰好产出一个 `Status`，即便没有任何响应消息，调用方也总能拿到终态；
/// - 传输层失败通过 `transport` 标记与应用错误彻底隔离：处理器无法构造出
///   `StatusKind::Transport`，除非显式调用 [`Status::transport`]。
///
/// ## 契约（What）
/// - `code`：[`Code`]；`message`：面向人的描述；
/// - [`Status::kind`] 的判定顺序：`Ok` → 传输标记 → `Canceled` → `DeadlineExceeded` → 其余皆为应用错误；
/// - 实现 [`std::error::Error`]，可直接作为处理器的错误类型并配合 `?` 传播。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct Status {
    code: Code,
    message: Cow<'static, str>,
    transport: bool,
}

impl Status {
    /// 以指定状态码与文案构造终态。
    pub fn new(code: Code, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            transport: false,
        }
    }

    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unimplemented(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn canceled(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn deadline_exceeded(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// 构造传输层失败：连接丢失、帧或消息损坏、对端未给出终态等。
    pub fn transport(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: Code::Unavailable,
            message: message.into(),
            transport: true,
        }
    }

    /// 还原线上携带的终态，`transport` 标记由对端如实回传。
    pub fn from_wire(code: Code, transport: bool, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            transport,
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub fn is_transport(&self) -> bool {
        self.transport
    }

    pub fn kind(&self) -> StatusKind {
        if self.code == Code::Ok {
            StatusKind::Ok
        } else if self.transport {
            StatusKind::Transport
        } else {
            match self.code {
                Code::Canceled => StatusKind::Canceled,
                Code::DeadlineExceeded => StatusKind::DeadlineExceeded,
                _ => StatusKind::Application,
            }
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}
