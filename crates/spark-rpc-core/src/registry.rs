//! 注册中心协作者契约与进程内实现。
//!
//! # 教案式说明
//! - **意图 (Why)**：服务发现机制属于外部协作者，核心层只需要 `register` / `unregister`
//!   与“端点列表变更”回调；
//! - **契约 (What)**：
//!   - 端点按服务键分组，通知总是携带该服务键下的**完整**当前列表；
//!   - 订阅时立即以当前列表通知一次；
//!   - 回调在锁外执行，监听者可在回调中再次访问注册中心；
//! - **实现 (How)**：[`LocalRegistry`] 为进程内内存实现，供测试与单进程部署使用；
//!   持久化与集群成员管理不在本模块范围内。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::RpcError;
use crate::extension::ExtensionPoint;
use crate::url::Url;

/// 端点列表变更回调。
pub trait NotifyListener: Send + Sync {
    fn notify(&self, registry_url: &Url, urls: Vec<Url>);
}

/// 注册中心契约。
pub trait Registry: Send + Sync {
    fn url(&self) -> &Url;

    fn register(&self, url: Url) -> Result<(), RpcError>;

    fn unregister(&self, url: &Url) -> Result<(), RpcError>;

    /// 订阅 `url` 所属服务键的端点变更。
    fn subscribe(&self, url: &Url, listener: Arc<dyn NotifyListener>) -> Result<(), RpcError>;

    fn unsubscribe(&self, url: &Url, listener: &Arc<dyn NotifyListener>) -> Result<(), RpcError>;

    /// 查询当前端点列表。
    fn discover(&self, url: &Url) -> Vec<Url>;
}

/// 注册中心工厂扩展点。
pub trait RegistryFactory: Send + Sync {
    fn registry(&self, url: &Url) -> Result<Arc<dyn Registry>, RpcError>;
}

impl ExtensionPoint for dyn RegistryFactory {
    const CAPABILITY: &'static str = "registry";
    const DEFAULT: Option<&'static str> = Some("local");
}

/// 进程内注册中心。
pub struct LocalRegistry {
    url: Url,
    services: RwLock<HashMap<String, Vec<Url>>>,
    listeners: RwLock<HashMap<String, Vec<Arc<dyn NotifyListener>>>>,
}

impl std::fmt::Debug for LocalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegistry")
            .field("url", &self.url.to_string())
            .field("services", &self.services.read().len())
            .finish()
    }
}

impl LocalRegistry {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            services: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    fn notify_key(&self, service_key: &str) {
        let urls = self
            .services
            .read()
            .get(service_key)
            .cloned()
            .unwrap_or_default();
        let listeners = self
            .listeners
            .read()
            .get(service_key)
            .cloned()
            .unwrap_or_default();
        tracing::debug!(
            service = %service_key,
            endpoints = urls.len(),
            listeners = listeners.len(),
            "registry notifying listeners"
        );
        for listener in listeners {
            listener.notify(&self.url, urls.clone());
        }
    }
}

impl Registry for LocalRegistry {
    fn url(&self) -> &Url {
        &self.url
    }

    fn register(&self, url: Url) -> Result<(), RpcError> {
        let key = url.service_key();
        {
            let mut services = self.services.write();
            let endpoints = services.entry(key.clone()).or_default();
            if endpoints.contains(&url) {
                return Ok(());
            }
            endpoints.push(url);
        }
        self.notify_key(&key);
        Ok(())
    }

    fn unregister(&self, url: &Url) -> Result<(), RpcError> {
        let key = url.service_key();
        let removed = {
            let mut services = self.services.write();
            match services.get_mut(&key) {
                Some(endpoints) => {
                    let before = endpoints.len();
                    endpoints.retain(|existing| existing != url);
                    before != endpoints.len()
                }
                None => false,
            }
        };
        if removed {
            self.notify_key(&key);
        }
        Ok(())
    }

    fn subscribe(&self, url: &Url, listener: Arc<dyn NotifyListener>) -> Result<(), RpcError> {
        let key = url.service_key();
        let urls = self.discover(url);
        self.listeners
            .write()
            .entry(key)
            .or_default()
            .push(Arc::clone(&listener));
        listener.notify(&self.url, urls);
        Ok(())
    }

    fn unsubscribe(&self, url: &Url, listener: &Arc<dyn NotifyListener>) -> Result<(), RpcError> {
        if let Some(listeners) = self.listeners.write().get_mut(&url.service_key()) {
            listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        }
        Ok(())
    }

    fn discover(&self, url: &Url) -> Vec<Url> {
        self.services
            .read()
            .get(&url.service_key())
            .cloned()
            .unwrap_or_default()
    }
}

/// 按注册中心地址复用 [`LocalRegistry`] 的工厂。
#[derive(Default)]
pub struct LocalRegistryFactory {
    registries: Mutex<HashMap<String, Arc<LocalRegistry>>>,
}

impl RegistryFactory for LocalRegistryFactory {
    fn registry(&self, url: &Url) -> Result<Arc<dyn Registry>, RpcError> {
        let mut registries = self.registries.lock();
        let registry = registries
            .entry(url.address())
            .or_insert_with(|| Arc::new(LocalRegistry::new(url.clone())));
        Ok(Arc::clone(registry) as Arc<dyn Registry>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Vec<u16>>>,
    }

    impl NotifyListener for Recorder {
        fn notify(&self, _registry_url: &Url, urls: Vec<Url>) {
            self.seen
                .lock()
                .push(urls.iter().map(Url::port).collect());
        }
    }

    fn endpoint(port: u16) -> Url {
        Url::new("spark", "127.0.0.1", port, "Echo")
    }

    /// 订阅立即收到当前列表，之后每次变更收到完整列表。
    #[test]
    fn listeners_receive_full_lists() {
        let registry = LocalRegistry::new(Url::new("local", "127.0.0.1", 0, ""));
        registry.register(endpoint(1)).expect("注册 1");

        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn NotifyListener> = recorder.clone();
        registry
            .subscribe(&endpoint(0), Arc::clone(&listener))
            .expect("订阅");
        registry.register(endpoint(2)).expect("注册 2");
        registry.register(endpoint(2)).expect("重复注册是幂等的");
        registry.unregister(&endpoint(1)).expect("注销 1");
        registry.unsubscribe(&endpoint(0), &listener).expect("退订");
        registry.register(endpoint(3)).expect("注册 3");

        assert_eq!(*recorder.seen.lock(), vec![vec![1], vec![1, 2], vec![2]]);
        assert_eq!(registry.discover(&endpoint(0)).len(), 2);
    }

    /// 不同分组的端点互不可见。
    #[test]
    fn groups_are_isolated() {
        let registry = LocalRegistry::new(Url::new("local", "127.0.0.1", 0, ""));
        registry
            .register(endpoint(1).with_parameter("group", "blue"))
            .expect("注册 blue");
        assert!(registry.discover(&endpoint(1)).is_empty());
    }

    /// 工厂按地址复用同一注册中心。
    #[test]
    fn factory_reuses_registry_per_address() {
        let factory = LocalRegistryFactory::default();
        let url = Url::new("local", "127.0.0.1", 2181, "");
        let first = factory.registry(&url).expect("创建");
        first.register(endpoint(9)).expect("注册");
        let second = factory.registry(&url).expect("复用");
        assert_eq!(second.discover(&endpoint(0)).len(), 1);
    }
}
