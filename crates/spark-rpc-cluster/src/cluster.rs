//! 集群调用器：把一组引用包装成单一调用入口。
//!
//! # 教案式说明
//! - **意图 (Why)**：消费方只面对“某个服务”，而不是某个实例；实例的增减由注册中心推送，
//!   选点与重试由负载均衡和高可用策略完成；
//! - **契约 (What)**：
//!   - 负载均衡（原型，独占）与高可用策略按消费方 URL 的 `loadbalance`、`haStrategy` 参数解析；
//!   - 收到通知时，为新增端点经协议建立引用、销毁已消失端点的引用，未变化的引用原样保留；
//!     建立失败的端点记录 `warn` 并跳过，不影响其余端点；
//!   - 端点 URL 叠加消费方参数（超时、重试、序列化等由消费方决定）；
//!   - 同步调用走高可用策略；异步与单向调用只选点一次，不做重试；
//! - **实现 (How)**：引用集合放在 `ArcSwap` 中供读路径无锁访问，通知处理以互斥锁串行化。

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use spark_rpc_core::{
    ExtensionRegistry, InvocationHandler, Node, NodeState, NotifyListener, Protocol, ProxyFactory,
    Reference, Registry, Request, ResponseFuture, RpcError, ServiceProxy, Url, UrlParam, Value,
};

use crate::ha::HaStrategy;
use crate::loadbalance::LoadBalance;

/// 面向单一服务的集群调用器。
pub struct ClusterInvoker {
    url: Url,
    protocol: Arc<dyn Protocol>,
    load_balance: Arc<dyn LoadBalance>,
    ha: Arc<dyn HaStrategy>,
    references: ArcSwap<Vec<Arc<dyn Reference>>>,
    refresh: Mutex<()>,
    state: NodeState,
}

impl std::fmt::Debug for ClusterInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterInvoker")
            .field("url", &self.url.to_string())
            .field("loadbalance", &self.load_balance.name())
            .field("ha", &self.ha.name())
            .field("references", &self.references.load().len())
            .finish()
    }
}

impl ClusterInvoker {
    /// 以消费方 URL 构造；协议按 URL 的协议名解析。
    pub fn new(url: Url, registry: &ExtensionRegistry) -> Result<Self, RpcError> {
        let protocol = registry.resolve::<dyn Protocol>(url.protocol())?;
        let load_balance = registry.resolve::<dyn LoadBalance>(url.param(UrlParam::LoadBalance))?;
        let ha = registry.resolve::<dyn HaStrategy>(url.param(UrlParam::HaStrategy))?;
        Ok(Self::with_parts(url, protocol, load_balance, ha))
    }

    /// 以显式组件构造。
    pub fn with_parts(
        url: Url,
        protocol: Arc<dyn Protocol>,
        load_balance: Arc<dyn LoadBalance>,
        ha: Arc<dyn HaStrategy>,
    ) -> Self {
        Self {
            url,
            protocol,
            load_balance,
            ha,
            references: ArcSwap::from_pointee(Vec::new()),
            refresh: Mutex::new(()),
            state: NodeState::new(),
        }
    }

    /// 当前引用集合快照。
    pub fn references(&self) -> Arc<Vec<Arc<dyn Reference>>> {
        self.references.load_full()
    }

    /// 订阅注册中心；订阅时立即收到一次当前端点列表。
    pub fn subscribe(self: &Arc<Self>, registry: &dyn Registry) -> Result<(), RpcError> {
        registry.subscribe(&self.url, Arc::clone(self) as Arc<dyn NotifyListener>)
    }

    /// 取消订阅。
    pub fn unsubscribe(self: &Arc<Self>, registry: &dyn Registry) -> Result<(), RpcError> {
        registry.unsubscribe(&self.url, &(Arc::clone(self) as Arc<dyn NotifyListener>))
    }

    /// 生成面向本服务的调用代理。
    pub fn proxy(self: &Arc<Self>, factory: &dyn ProxyFactory) -> ServiceProxy {
        factory.proxy(&self.url, Arc::clone(self) as Arc<dyn InvocationHandler>)
    }

    /// 以新的端点列表刷新引用集合。
    pub fn refresh(&self, endpoints: Vec<Url>) {
        let _serialized = self.refresh.lock();
        if self.state.is_closed() {
            return;
        }
        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| self.consumer_view(endpoint))
            .collect::<Vec<_>>();
        let current = self.references.load_full();

        let mut next = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            if let Some(existing) = current.iter().find(|reference| reference.url() == endpoint) {
                next.push(Arc::clone(existing));
                continue;
            }
            match self.protocol.refer(endpoint) {
                Ok(reference) => {
                    tracing::info!(service = %self.url.service_key(), endpoint = %endpoint.address(), "reference added");
                    next.push(reference);
                }
                Err(err) => tracing::warn!(
                    service = %self.url.service_key(),
                    endpoint = %endpoint.address(),
                    error = %err,
                    "failed to refer endpoint"
                ),
            }
        }

        self.references.store(Arc::new(next.clone()));
        self.load_balance.set_references(next);

        for stale in current.iter().filter(|reference| !endpoints.contains(reference.url())) {
            tracing::info!(service = %self.url.service_key(), endpoint = %stale.url().address(), "reference removed");
            stale.destroy();
        }
    }

    /// 端点 URL 叠加消费方参数。
    fn consumer_view(&self, mut endpoint: Url) -> Url {
        for (key, value) in self.url.parameters() {
            endpoint.set_parameter(key.clone(), value.clone());
        }
        endpoint
    }

    /// 同步调用，按高可用策略重试。
    pub fn call(&self, request: Request) -> Result<Value, RpcError> {
        self.ha.call(request, self.load_balance.as_ref())
    }

    /// 异步调用：选点一次后发送。
    pub fn call_async(&self, request: Request) -> Result<ResponseFuture, RpcError> {
        self.load_balance.select(&request)?.call_async(request)
    }

    /// 单向调用：选点一次后发送。
    pub fn call_one_way(&self, request: Request) -> Result<(), RpcError> {
        self.load_balance.select(&request)?.call_one_way(request)
    }
}

impl NotifyListener for ClusterInvoker {
    fn notify(&self, registry_url: &Url, urls: Vec<Url>) {
        tracing::debug!(
            registry = %registry_url.address(),
            service = %self.url.service_key(),
            endpoints = urls.len(),
            "endpoint list changed"
        );
        self.refresh(urls);
    }
}

impl InvocationHandler for ClusterInvoker {
    fn invoke(&self, request: Request) -> Result<Value, RpcError> {
        if request.is_one_way() {
            return self.call_one_way(request).map(|()| Value::Unit);
        }
        self.call(request)
    }
}

impl Node for ClusterInvoker {
    fn init(&self) -> Result<(), RpcError> {
        self.state.mark_available();
        Ok(())
    }

    fn destroy(&self) {
        let _serialized = self.refresh.lock();
        if !self.state.close() {
            return;
        }
        let references = self.references.swap(Arc::new(Vec::new()));
        self.load_balance.set_references(Vec::new());
        for reference in references.iter() {
            reference.destroy();
        }
    }

    fn is_available(&self) -> bool {
        self.state.is_available()
            && self
                .references
                .load()
                .iter()
                .any(|reference| reference.is_available())
    }

    fn describe(&self) -> String {
        format!(
            "cluster {} [{}] references={} loadbalance={} ha={}",
            self.url.service_key(),
            self.state.status(),
            self.references.load().len(),
            self.load_balance.name(),
            self.ha.name()
        )
    }

    fn url(&self) -> &Url {
        &self.url
    }
}
