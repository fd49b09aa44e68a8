//! 客户端引用、服务导出器与协议扩展点契约。
//!
//! # 教案式说明
//! - **意图 (Why)**：集群层只面对 [`Reference`]，不关心其背后是 TCP 连接还是其他传输；
//!   [`Protocol`] 负责把 URL 变成引用（refer）、把 Provider 变成导出器（export）；
//! - **契约 (What)**：
//!   - `Reference` 绑定单一端点 URL，维护在途计数，每次调用都以守卫包裹，所有出口恢复计数；
//!   - 远端错误在 `Reference` 边界还原为 [`RpcError`] 并保持业务/框架类别；
//!   - 同步、异步、单向三种调用模式对应三个方法；
//!   - `Exporter::unexport` 从路由表移除 Provider，幂等。

use std::sync::Arc;

use crate::error::RpcError;
use crate::extension::ExtensionPoint;
use crate::future::ResponseFuture;
use crate::message::{Request, Value};
use crate::node::Node;
use crate::provider::Provider;

/// 指向单个远端端点的可调用句柄。
pub trait Reference: Node {
    fn interface_name(&self) -> &str;

    /// 同步调用：阻塞直至响应或超时。
    fn call(&self, request: Request) -> Result<Value, RpcError>;

    /// 异步调用：发送后立即返回 Future。
    fn call_async(&self, request: Request) -> Result<ResponseFuture, RpcError>;

    /// 单向调用：仅报告本地发送错误。
    fn call_one_way(&self, request: Request) -> Result<(), RpcError>;

    /// 当前在途调用数。
    fn active_count(&self) -> usize;
}

/// 已导出的服务。
pub trait Exporter: Node {
    fn provider(&self) -> Arc<dyn Provider>;

    /// 停止对外提供服务。
    fn unexport(&self);
}

/// 协议扩展点。
pub trait Protocol: Send + Sync {
    fn name(&self) -> &str;

    /// 为端点 URL 建立引用。
    fn refer(&self, url: &crate::url::Url) -> Result<Arc<dyn Reference>, RpcError>;

    /// 导出 Provider。
    fn export(&self, provider: Arc<dyn Provider>) -> Result<Arc<dyn Exporter>, RpcError>;

    /// 关闭协议持有的全部服务端与引用。
    fn destroy(&self);
}

impl ExtensionPoint for dyn Protocol {
    const CAPABILITY: &'static str = "protocol";
    const DEFAULT: Option<&'static str> = Some("spark");
}
