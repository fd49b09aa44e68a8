//! 默认 `spark` 协议：导出 Provider 到共享 TCP 服务端，为端点建立 TCP 引用。
//!
//! # 教案式说明
//! - **意图 (Why)**：同一 `host:port` 上导出的多个服务共享一个监听端口与路由表；
//! - **契约 (What)**：
//!   - `export` 按 URL 的 `host:port` 复用服务端，首次导出时启动；返回的导出器 URL 带实际监听端口；
//!   - 同一服务键重复导出为错误；`unexport` 从路由表移除并销毁 Provider，幂等；
//!   - `refer` 建连成功才返回引用；
//!   - `destroy` 关闭本协议建立的全部引用与服务端；
//! - **实现 (How)**：编解码器按 URL 的 `codec` 参数从扩展注册中心解析。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use spark_rpc_core::{
    Codec, Exporter, ExtensionRegistry, MessageRouter, Node, NodeState, Protocol, Provider,
    Reference, RpcError, Url, UrlParam,
};

use crate::reference::DefaultReference;
use crate::server::TcpServer;

struct SharedServer {
    server: Arc<TcpServer>,
    router: Arc<MessageRouter>,
}

/// 默认协议实现。
pub struct DefaultProtocol {
    registry: ExtensionRegistry,
    servers: Mutex<HashMap<String, SharedServer>>,
    references: Mutex<Vec<Arc<DefaultReference>>>,
}

impl std::fmt::Debug for DefaultProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultProtocol")
            .field("servers", &self.servers.lock().keys().cloned().collect::<Vec<_>>())
            .field("references", &self.references.lock().len())
            .finish()
    }
}

impl DefaultProtocol {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self {
            registry,
            servers: Mutex::new(HashMap::new()),
            references: Mutex::new(Vec::new()),
        }
    }

    fn codec(&self, url: &Url) -> Result<Arc<dyn Codec>, RpcError> {
        Ok(self.registry.resolve::<dyn Codec>(url.param(UrlParam::Codec))?)
    }

    fn server_for(&self, url: &Url) -> Result<(Arc<TcpServer>, Arc<MessageRouter>), RpcError> {
        let mut servers = self.servers.lock();
        if let Some(shared) = servers.get(&url.address()) {
            return Ok((Arc::clone(&shared.server), Arc::clone(&shared.router)));
        }
        let router = Arc::new(MessageRouter::new());
        let server = Arc::new(TcpServer::new(url.clone(), router.clone(), self.codec(url)?));
        server.init()?;
        servers.insert(
            url.address(),
            SharedServer {
                server: Arc::clone(&server),
                router: Arc::clone(&router),
            },
        );
        Ok((server, router))
    }
}

impl Protocol for DefaultProtocol {
    fn name(&self) -> &str {
        "spark"
    }

    fn refer(&self, url: &Url) -> Result<Arc<dyn Reference>, RpcError> {
        let reference = Arc::new(DefaultReference::new(url.clone(), self.codec(url)?)?);
        reference.init()?;
        self.references.lock().push(Arc::clone(&reference));
        tracing::debug!(url = %url, "reference created");
        Ok(reference)
    }

    fn export(&self, provider: Arc<dyn Provider>) -> Result<Arc<dyn Exporter>, RpcError> {
        let url = provider.url().clone();
        let (server, router) = self.server_for(&url)?;
        provider.init()?;
        router.add_provider(Arc::clone(&provider))?;

        let port = server.local_addr().map_or(url.port(), |addr| addr.port());
        let exporter = DefaultExporter {
            url: url.with_port(port),
            provider,
            router,
            state: NodeState::new(),
        };
        exporter.state.mark_available();
        tracing::info!(url = %exporter.url, "service exported");
        Ok(Arc::new(exporter))
    }

    fn destroy(&self) {
        for reference in self.references.lock().drain(..) {
            reference.destroy();
        }
        for (address, shared) in self.servers.lock().drain() {
            for key in shared.router.service_keys() {
                if let Some(provider) = shared.router.remove_provider(&key) {
                    provider.destroy();
                }
            }
            shared.server.destroy();
            tracing::debug!(address = %address, "protocol server closed");
        }
    }
}

impl Drop for DefaultProtocol {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// 已导出服务的句柄。
pub struct DefaultExporter {
    url: Url,
    provider: Arc<dyn Provider>,
    router: Arc<MessageRouter>,
    state: NodeState,
}

impl std::fmt::Debug for DefaultExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultExporter")
            .field("url", &self.url.to_string())
            .field("state", &self.state.status())
            .finish()
    }
}

impl Node for DefaultExporter {
    fn init(&self) -> Result<(), RpcError> {
        Ok(())
    }

    fn destroy(&self) {
        self.unexport();
    }

    fn is_available(&self) -> bool {
        self.state.is_available() && self.provider.is_available()
    }

    fn describe(&self) -> String {
        format!("exporter {} [{}]", self.url, self.state.status())
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

impl Exporter for DefaultExporter {
    fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.provider)
    }

    fn unexport(&self) {
        if !self.state.close() {
            return;
        }
        if self.router.remove_provider(&self.provider.service_key()).is_some() {
            self.provider.destroy();
        }
        tracing::info!(url = %self.url, "service unexported");
    }
}
