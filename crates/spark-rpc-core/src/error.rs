//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - RPC 链路上的失败分为两类：**业务错误**（远端服务实现自身抛出，原样传播、绝不重试）与
//!   **框架错误**（连接、超时、序列化、服务缺失、线程池饱和等，可被故障转移策略重试）；
//! - 该二分法是故障转移能否安全重试的唯一依据，因此集中定义在此，避免各层自行解析字符串。
//!
//! ## 设计要求（What）
//! - [`RpcError`] 派生 `thiserror::Error` 且可 `Clone`，以便同一结果同时交付给阻塞等待者与异步轮询者；
//! - 错误码遵循 `rpc.<领域>.<语义>` 约定，集中登记在 [`codes`]；
//! - 跨线传输时使用可序列化的 [`RemoteError`]，在 Reference 边界还原为 [`RpcError`] 并保持类别。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 稳定错误码集合。
///
/// # 契约说明（What）
/// - 码值一经发布不得修改语义；新增码值需同步更新 [`RpcError::class`] 的归类逻辑。
pub mod codes {
    /// 传输层 I/O 失败。
    pub const TRANSPORT_IO: &str = "rpc.transport.io";
    /// 连接已关闭或尚未建立。
    pub const TRANSPORT_CLOSED: &str = "rpc.transport.closed";
    /// 调用在截止时间内未收到响应。
    pub const TRANSPORT_TIMEOUT: &str = "rpc.transport.timeout";
    /// 调用被调用方显式取消。
    pub const TRANSPORT_CANCELLED: &str = "rpc.transport.cancelled";
    /// 帧头或负载不符合线协议。
    pub const PROTOCOL_DECODE: &str = "rpc.protocol.decode";
    /// 负载长度超过配置上限。
    pub const PROTOCOL_FRAME_TOO_LARGE: &str = "rpc.protocol.frame_too_large";
    /// 序列化或反序列化失败。
    pub const SERIALIZATION: &str = "rpc.codec.serialization";
    /// 服务端未注册对应服务键。
    pub const ROUTER_SERVICE_NOT_FOUND: &str = "rpc.router.service_not_found";
    /// 同一服务键重复注册 Provider。
    pub const ROUTER_DUPLICATE_PROVIDER: &str = "rpc.router.duplicate_provider";
    /// Provider 未声明请求的方法签名。
    pub const PROVIDER_METHOD_NOT_FOUND: &str = "rpc.provider.method_not_found";
    /// 业务线程池饱和，请求被拒绝。
    pub const SERVER_OVERLOADED: &str = "rpc.server.overloaded";
    /// 节点（引用、客户端、服务端）不可用。
    pub const NODE_UNAVAILABLE: &str = "rpc.node.unavailable";
    /// 集群内没有可用引用。
    pub const CLUSTER_NO_REFERENCE: &str = "rpc.cluster.no_reference";
    /// 配置非法。
    pub const CONFIG_INVALID: &str = "rpc.config.invalid";
    /// 服务实现抛出的业务失败。
    pub const BIZ_FAILURE: &str = "rpc.biz.failure";
}

/// 错误的处置类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// 远端服务逻辑失败：确定性，重试无益。
    Business,
    /// 框架/传输失败：可能是瞬时故障，允许重试。
    Framework,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Business => f.write_str("business"),
            ErrorClass::Framework => f.write_str("framework"),
        }
    }
}

/// 随 Response 跨线传输的错误描述符。
///
/// # 教案式说明
/// - **意图 (Why)**：服务端任何失败都必须转换为 Response 而不是断开连接，因此需要一个
///   可序列化、与具体错误类型解耦的描述结构；
/// - **契约 (What)**：`class` 决定客户端还原后的错误类别，`code` 为稳定错误码，`message` 面向排障人员；
/// - **风险 (Trade-offs)**：不携带调用栈，远端根因只能依赖 `message` 文本与服务端日志关联。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
}

impl RemoteError {
    /// 构造框架类错误描述。
    pub fn framework(code: &str, message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Framework,
            code: code.to_owned(),
            message: message.into(),
        }
    }

    /// 构造业务类错误描述。
    pub fn business(code: &str, message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Business,
            code: code.to_owned(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} error: {}", self.code, self.class, self.message)
    }
}

/// 框架统一错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合传输、协议、序列化、路由、配置与扩展装配等全部失败路径，
///   使调用方只需匹配一个类型即可完成分类处置；
/// - **契约 (What)**：
///   - 全部变体 `Send + Sync + Clone`，可在 I/O 线程与调用线程之间复制；
///   - [`class`](Self::class) 仅对 [`RpcError::Business`] 返回 [`ErrorClass::Business`]，其余一律视为框架错误；
/// - **执行逻辑 (How)**：传输层通过 `Transport` 变体携带 `io::ErrorKind` 的文本描述；远端错误通过
///   [`from_remote`](Self::from_remote) 按类别还原；
/// - **设计权衡 (Trade-offs)**：以 `String` 保存上下文，牺牲少量分配换取可克隆与易读。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// 服务实现抛出的业务失败。
    #[error("[{code}] business failure: {message}")]
    Business { code: String, message: String },

    /// 连接建立、读写或关闭失败。
    #[error("[{code}] transport failure: {message}")]
    Transport { code: &'static str, message: String },

    /// 请求超过截止时间未获得响应。
    #[error("[rpc.transport.timeout] request {request_id} timed out after {elapsed_ms}ms (timeout {timeout_ms}ms)")]
    Timeout {
        request_id: u64,
        timeout_ms: u64,
        elapsed_ms: u64,
    },

    /// 调用方取消了等待中的请求。
    #[error("[rpc.transport.cancelled] request {request_id} was cancelled")]
    Cancelled { request_id: u64 },

    /// 线协议违规。
    #[error("[{code}] protocol violation: {message}")]
    Protocol { code: &'static str, message: String },

    /// 序列化失败。
    #[error("[rpc.codec.serialization] serializer `{serializer}` failed: {message}")]
    Serialization { serializer: String, message: String },

    /// 其余框架级失败（服务缺失、线程池饱和、节点不可用等），包括远端回传的框架错误。
    #[error("[{code}] framework failure: {message}")]
    Framework { code: String, message: String },

    /// 扩展装配失败：配置错误，必须在启动期暴露。
    #[error(transparent)]
    Extension(#[from] ExtensionError),

    /// 配置非法。
    #[error("[rpc.config.invalid] {0}")]
    Config(String),
}

impl RpcError {
    /// 构造框架错误。
    pub fn framework(code: &str, message: impl Into<String>) -> Self {
        RpcError::Framework {
            code: code.to_owned(),
            message: message.into(),
        }
    }

    /// 构造业务错误。
    pub fn business(message: impl Into<String>) -> Self {
        RpcError::Business {
            code: codes::BIZ_FAILURE.to_owned(),
            message: message.into(),
        }
    }

    /// 构造传输错误。
    pub fn transport(code: &'static str, message: impl Into<String>) -> Self {
        RpcError::Transport {
            code,
            message: message.into(),
        }
    }

    /// 返回错误类别，驱动故障转移是否重试。
    pub fn class(&self) -> ErrorClass {
        match self {
            RpcError::Business { .. } => ErrorClass::Business,
            _ => ErrorClass::Framework,
        }
    }

    /// 是否为业务错误。
    pub fn is_business(&self) -> bool {
        self.class() == ErrorClass::Business
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &str {
        match self {
            RpcError::Business { code, .. } | RpcError::Framework { code, .. } => code,
            RpcError::Transport { code, .. } | RpcError::Protocol { code, .. } => code,
            RpcError::Timeout { .. } => codes::TRANSPORT_TIMEOUT,
            RpcError::Cancelled { .. } => codes::TRANSPORT_CANCELLED,
            RpcError::Serialization { .. } => codes::SERIALIZATION,
            RpcError::Extension(_) | RpcError::Config(_) => codes::CONFIG_INVALID,
        }
    }

    /// 转换为可跨线传输的描述符。
    pub fn to_remote(&self) -> RemoteError {
        match self {
            RpcError::Business { code, message } => RemoteError::business(code, message.clone()),
            RpcError::Framework { code, message } => RemoteError::framework(code, message.clone()),
            other => RemoteError::framework(other.code(), other.to_string()),
        }
    }

    /// 将远端描述符还原为本地错误，类别保持不变。
    pub fn from_remote(remote: RemoteError) -> Self {
        match remote.class {
            ErrorClass::Business => RpcError::Business {
                code: remote.code,
                message: remote.message,
            },
            ErrorClass::Framework => RpcError::Framework {
                code: remote.code,
                message: remote.message,
            },
        }
    }
}

/// 框架统一返回值别名。
pub type Result<T, E = RpcError> = std::result::Result<T, E>;

/// 扩展注册中心的装配错误。
///
/// # 教案式说明
/// - **意图 (Why)**：描述文件损坏、重复名称、缺失依赖都属于部署期误配置，必须在加载或构造时
///   快速失败并给出定位信息，而不是静默跳过；
/// - **契约 (What)**：每个变体都携带能力名 `capability`，描述文件相关错误额外携带来源与行号；
/// - **风险 (Trade-offs)**：错误被视为致命，不参与任何重试策略。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    /// 解析时名称为空。
    #[error("extension `{capability}`: extension name must not be empty")]
    EmptyName { capability: &'static str },

    /// 未找到指定名称的实现。
    #[error("extension `{capability}`: no implementation registered under name `{name}`")]
    NotFound {
        capability: &'static str,
        name: String,
    },

    /// 同一名称映射到不同实现。
    #[error(
        "extension `{capability}`: duplicate name `{name}` bound to `{existing}` and `{candidate}`"
    )]
    Duplicate {
        capability: &'static str,
        name: String,
        existing: String,
        candidate: String,
    },

    /// 描述文件行格式非法。
    #[error("extension `{capability}`: malformed descriptor line {line} in `{source_name}`: `{text}`")]
    MalformedDescriptor {
        capability: &'static str,
        source_name: String,
        line: usize,
        text: String,
    },

    /// 描述文件引用了未声明的实现。
    #[error(
        "extension `{capability}`: descriptor `{source_name}` line {line} references undeclared implementation `{implementation}`"
    )]
    UndeclaredImplementation {
        capability: &'static str,
        source_name: String,
        line: usize,
        implementation: String,
    },

    /// 实现构造失败。
    #[error("extension `{capability}`: failed to create `{name}`: {reason}")]
    Construction {
        capability: &'static str,
        name: String,
        reason: String,
    },

    /// 必需依赖缺失。
    #[error("extension `{capability}`: `{name}` requires missing dependency `{dependency}`")]
    MissingDependency {
        capability: &'static str,
        name: String,
        dependency: String,
    },

    /// 依赖图存在环。
    #[error("extension dependency cycle detected: {chain}")]
    CyclicDependency { chain: String },
}
