use spark_rpc_core::{RpcError, codes};
use std::io;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "rpc.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "rpc.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "rpc.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "rpc.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "rpc.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "rpc.transport.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const RUNTIME: OperationKind = OperationKind {
    code: "rpc.transport.tcp.runtime_failed",
    message: "tokio runtime",
};

/// I/O 错误的处置分类，写入错误文案供排障与日志检索。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IoCategory {
    Timeout,
    Retryable,
    NonRetryable,
}

impl IoCategory {
    fn label(self) -> &'static str {
        match self {
            IoCategory::Timeout => "timeout",
            IoCategory::Retryable => "retryable",
            IoCategory::NonRetryable => "non-retryable",
        }
    }
}

/// 将 IO 错误映射为框架级 RpcError，并附带错误分类。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> RpcError {
    let category = categorize_io_error(&error);
    let code = if category == IoCategory::Timeout {
        codes::TRANSPORT_TIMEOUT
    } else {
        kind.code
    };
    RpcError::transport(
        code,
        format!("{}: {} [{}]", kind.message, error, category.label()),
    )
}

/// 构造“连接已关闭”错误。
pub(crate) fn closed_error(what: impl std::fmt::Display) -> RpcError {
    RpcError::transport(codes::TRANSPORT_CLOSED, format!("{what} is closed"))
}

pub(crate) fn categorize_io_error(error: &io::Error) -> IoCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => IoCategory::Timeout,
        ErrorKind::WouldBlock
        | ErrorKind::Interrupted
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof
        | ErrorKind::WriteZero => IoCategory::Retryable,
        _ => IoCategory::NonRetryable,
    }
}
