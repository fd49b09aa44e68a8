//! # extension 模块说明
//!
//! ## 角色定位（Why）
//! - 序列化器、编解码器、协议、负载均衡、故障转移、代理工厂、注册中心等策略均以“能力 + 名称”
//!   的方式在运行时选择，调用方只持有 URL 参数中的名称；
//! - 本模块以**显式注册表**取代反射式扫描：实现方在进程启动时登记“实现标识 → 构造工厂”，
//!   描述文件再把对外名称映射到实现标识，二者解耦便于部署期替换。
//!
//! ## 核心契约（What）
//! - 能力以 trait object 表示，并通过 [`ExtensionPoint`] 标记为可扩展，声明能力名、作用域与默认名称；
//!   未实现该标记的 trait 无法登记，违规在编译期暴露；
//! - [`Scope::Singleton`]：同名首次解析构造并缓存，并发首次解析只构造一次；
//!   [`Scope::Prototype`]：每次解析构造新实例；
//! - 构造工厂通过 [`Injector`] 解析自身依赖，依赖图在构造期按拓扑顺序递归展开并检测环；
//! - 描述文件在首次使用对应能力时加载一次（双重检查），重复名称绑定不同实现、行格式非法、
//!   引用未登记实现均为致命错误。
//!
//! ## 风险与考量（Trade-offs）
//! - 单例槽位在构造期间持有该名称的锁；若工厂内部阻塞过久，同名的并发解析会一同等待。

mod descriptor;
mod loader;

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ExtensionError;
use descriptor::DescriptorSource;
use loader::ExtensionLoader;

/// 扩展实例的作用域。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// 每个名称进程内至多构造一次。
    Singleton,
    /// 每次解析构造新实例。
    Prototype,
}

/// 可扩展能力标记，为 `dyn Trait` 实现。
///
/// # 契约说明（What）
/// - `CAPABILITY`：能力名，用于日志、错误与描述文件定位；
/// - `SCOPE`：默认单例；
/// - `DEFAULT`：`resolve_default` 使用的名称，`None` 表示未声明默认实现。
pub trait ExtensionPoint: Send + Sync + 'static {
    const CAPABILITY: &'static str;
    const SCOPE: Scope = Scope::Singleton;
    const DEFAULT: Option<&'static str> = None;
}

/// 扩展构造工厂。
pub type ExtensionFactory<T> =
    Arc<dyn Fn(&Injector<'_>) -> Result<Arc<T>, ExtensionError> + Send + Sync>;

#[derive(Clone, Debug)]
struct Frame {
    type_id: TypeId,
    capability: &'static str,
    name: String,
}

#[derive(Default)]
struct RegistryInner {
    loaders: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

/// 扩展注册中心，可廉价克隆并在组件间共享。
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("capabilities", &self.inner.loaders.read().len())
            .finish()
    }
}

impl ExtensionRegistry {
    /// 创建空注册中心。
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建并装配核心内置扩展（序列化器、编解码器、代理工厂、本地注册中心）。
    pub fn with_builtins() -> Result<Self, ExtensionError> {
        let registry = Self::new();
        crate::extension::install_builtins(&registry)?;
        Ok(registry)
    }

    fn loader<T: ?Sized + ExtensionPoint>(&self) -> Arc<ExtensionLoader<T>> {
        let key = TypeId::of::<T>();
        let erased = {
            let existing = self.inner.loaders.read().get(&key).cloned();
            match existing {
                Some(erased) => erased,
                None => Arc::clone(
                    self.inner
                        .loaders
                        .write()
                        .entry(key)
                        .or_insert_with(|| {
                            Arc::new(ExtensionLoader::<T>::new()) as Arc<dyn Any + Send + Sync>
                        }),
                ),
            }
        };
        match erased.downcast::<ExtensionLoader<T>>() {
            Ok(loader) => loader,
            Err(_) => unreachable!("extension loader is keyed by its own capability type"),
        }
    }

    /// 在实现目录中登记实现标识，供描述文件引用。
    pub fn declare<T, F>(&self, implementation: &str, factory: F) -> Result<(), ExtensionError>
    where
        T: ?Sized + ExtensionPoint,
        F: Fn(&Injector<'_>) -> Result<Arc<T>, ExtensionError> + Send + Sync + 'static,
    {
        self.loader::<T>().declare(implementation, Arc::new(factory))
    }

    /// 直接以名称登记实现；同名重复登记为致命错误。
    pub fn register<T, F>(&self, name: &str, factory: F) -> Result<(), ExtensionError>
    where
        T: ?Sized + ExtensionPoint,
        F: Fn(&Injector<'_>) -> Result<Arc<T>, ExtensionError> + Send + Sync + 'static,
    {
        self.loader::<T>().register(name, Arc::new(factory))?;
        tracing::debug!(capability = T::CAPABILITY, name, "extension registered");
        Ok(())
    }

    /// 追加一份描述资源，在该能力下一次解析时加载。
    pub fn add_descriptor<T: ?Sized + ExtensionPoint>(
        &self,
        source_name: impl Into<String>,
        text: impl Into<Cow<'static, str>>,
    ) {
        self.loader::<T>().add_descriptor(DescriptorSource {
            name: source_name.into(),
            text: text.into(),
        });
    }

    /// 按名称解析实现。
    pub fn resolve<T: ?Sized + ExtensionPoint>(&self, name: &str) -> Result<Arc<T>, ExtensionError> {
        self.resolve_chained::<T>(name, &[])
    }

    /// 解析能力声明的默认实现；未声明默认名称时返回 `None`。
    pub fn resolve_default<T: ?Sized + ExtensionPoint>(
        &self,
    ) -> Result<Option<Arc<T>>, ExtensionError> {
        match T::DEFAULT {
            Some(name) => self.resolve::<T>(name).map(Some),
            None => Ok(None),
        }
    }

    /// 名称是否已绑定（描述文件加载失败时视为不存在）。
    pub fn has_extension<T: ?Sized + ExtensionPoint>(&self, name: &str) -> bool {
        match self.loader::<T>().binding(name) {
            Ok(_) => true,
            Err(ExtensionError::NotFound { .. }) => false,
            Err(err) => {
                tracing::warn!(capability = T::CAPABILITY, name, error = %err, "extension lookup failed");
                false
            }
        }
    }

    /// 按字典序列出已绑定名称。
    pub fn extension_names<T: ?Sized + ExtensionPoint>(&self) -> Result<Vec<String>, ExtensionError> {
        self.loader::<T>().names()
    }

    fn resolve_chained<T: ?Sized + ExtensionPoint>(
        &self,
        name: &str,
        parent: &[Frame],
    ) -> Result<Arc<T>, ExtensionError> {
        if name.is_empty() {
            return Err(ExtensionError::EmptyName {
                capability: T::CAPABILITY,
            });
        }
        let type_id = TypeId::of::<T>();
        if parent
            .iter()
            .any(|frame| frame.type_id == type_id && frame.name == name)
        {
            let chain = parent
                .iter()
                .map(|frame| format!("{}:{}", frame.capability, frame.name))
                .chain(std::iter::once(format!("{}:{name}", T::CAPABILITY)))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ExtensionError::CyclicDependency { chain });
        }

        let loader = self.loader::<T>();
        let binding = loader.binding(name)?;
        let mut chain = parent.to_vec();
        chain.push(Frame {
            type_id,
            capability: T::CAPABILITY,
            name: name.to_owned(),
        });
        let injector = Injector {
            registry: self,
            chain,
        };

        match T::SCOPE {
            Scope::Prototype => (binding.factory)(&injector),
            Scope::Singleton => {
                let slot = loader.singleton_slot(name);
                let mut cached = slot.lock();
                if let Some(instance) = cached.as_ref() {
                    return Ok(Arc::clone(instance));
                }
                let instance = (binding.factory)(&injector)?;
                tracing::debug!(
                    capability = T::CAPABILITY,
                    name,
                    implementation = %binding.implementation,
                    "extension singleton created"
                );
                *cached = Some(Arc::clone(&instance));
                Ok(instance)
            }
        }
    }
}

/// 构造期依赖注入器。
///
/// # 教案式说明
/// - **意图 (Why)**：工厂显式声明依赖，由注入器沿同一注册中心递归解析，构造顺序即依赖拓扑序；
/// - **契约 (What)**：
///   - [`inject`](Self::inject)：必需依赖，缺失时报告 [`ExtensionError::MissingDependency`]；
///   - [`inject_optional`](Self::inject_optional)：可选依赖，缺失时返回 `None`；
///   - 解析链中再次出现同一 (能力, 名称) 时报告 [`ExtensionError::CyclicDependency`]。
pub struct Injector<'a> {
    registry: &'a ExtensionRegistry,
    chain: Vec<Frame>,
}

impl Injector<'_> {
    /// 所属注册中心，供需要在运行期继续解析扩展的组件持有。
    pub fn registry(&self) -> ExtensionRegistry {
        self.registry.clone()
    }

    /// 当前正在构造的扩展名称。
    pub fn name(&self) -> &str {
        self.chain
            .last()
            .map(|frame| frame.name.as_str())
            .unwrap_or_default()
    }

    pub fn inject<U: ?Sized + ExtensionPoint>(&self, name: &str) -> Result<Arc<U>, ExtensionError> {
        self.registry
            .resolve_chained::<U>(name, &self.chain)
            .map_err(|err| self.missing::<U>(err, name))
    }

    pub fn inject_default<U: ?Sized + ExtensionPoint>(&self) -> Result<Arc<U>, ExtensionError> {
        match U::DEFAULT {
            Some(name) => self.inject::<U>(name),
            None => Err(self.missing::<U>(
                ExtensionError::NotFound {
                    capability: U::CAPABILITY,
                    name: "<default>".to_owned(),
                },
                "<default>",
            )),
        }
    }

    pub fn inject_optional<U: ?Sized + ExtensionPoint>(
        &self,
        name: &str,
    ) -> Result<Option<Arc<U>>, ExtensionError> {
        match self.registry.resolve_chained::<U>(name, &self.chain) {
            Ok(instance) => Ok(Some(instance)),
            Err(ExtensionError::NotFound { capability, .. }) if capability == U::CAPABILITY => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn missing<U: ?Sized + ExtensionPoint>(&self, err: ExtensionError, dependency: &str) -> ExtensionError {
        match (err, self.chain.last()) {
            (ExtensionError::NotFound { capability, .. }, Some(frame))
                if capability == U::CAPABILITY =>
            {
                ExtensionError::MissingDependency {
                    capability: frame.capability,
                    name: frame.name.clone(),
                    dependency: format!("{}:{dependency}", U::CAPABILITY),
                }
            }
            (err, _) => err,
        }
    }
}

/// 装配核心内置扩展。
pub fn install_builtins(registry: &ExtensionRegistry) -> Result<(), ExtensionError> {
    use crate::codec::{Codec, DefaultCodec};
    use crate::proxy::{DynamicProxyFactory, ProxyFactory};
    use crate::registry::{LocalRegistryFactory, RegistryFactory};
    use crate::serialization::{JsonSerializer, PostcardSerializer, Serializer};

    registry.declare::<dyn Serializer, _>("spark.serialization.postcard", |_| {
        Ok(Arc::new(PostcardSerializer) as Arc<dyn Serializer>)
    })?;
    registry.declare::<dyn Serializer, _>("spark.serialization.json", |_| {
        Ok(Arc::new(JsonSerializer) as Arc<dyn Serializer>)
    })?;
    registry.add_descriptor::<dyn Serializer>(
        "spark-rpc-core/extensions/serialization",
        include_str!("../../extensions/serialization"),
    );

    registry.declare::<dyn Codec, _>("spark.codec.default", |injector| {
        Ok(Arc::new(DefaultCodec::new(injector.registry())) as Arc<dyn Codec>)
    })?;
    registry.add_descriptor::<dyn Codec>(
        "spark-rpc-core/extensions/codec",
        include_str!("../../extensions/codec"),
    );

    registry.declare::<dyn ProxyFactory, _>("spark.proxy.dynamic", |_| {
        Ok(Arc::new(DynamicProxyFactory) as Arc<dyn ProxyFactory>)
    })?;
    registry.add_descriptor::<dyn ProxyFactory>(
        "spark-rpc-core/extensions/proxy",
        include_str!("../../extensions/proxy"),
    );

    registry.declare::<dyn RegistryFactory, _>("spark.registry.local", |_| {
        Ok(Arc::new(LocalRegistryFactory::default()) as Arc<dyn RegistryFactory>)
    })?;
    registry.add_descriptor::<dyn RegistryFactory>(
        "spark-rpc-core/extensions/registry",
        include_str!("../../extensions/registry"),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    impl ExtensionPoint for dyn Greeter {
        const CAPABILITY: &'static str = "test.greeter";
        const DEFAULT: Option<&'static str> = Some("plain");
    }

    trait Stamp: Send + Sync {
        fn id(&self) -> usize;
    }

    impl ExtensionPoint for dyn Stamp {
        const CAPABILITY: &'static str = "test.stamp";
        const SCOPE: Scope = Scope::Prototype;
    }

    struct Plain(String);

    impl Greeter for Plain {
        fn greet(&self) -> String {
            self.0.clone()
        }
    }

    struct Counter(usize);

    impl Stamp for Counter {
        fn id(&self) -> usize {
            self.0
        }
    }

    /// K 个线程并发首次解析单例，只构造一次且得到同一实例。
    #[test]
    fn singleton_is_constructed_once_under_contention() {
        let registry = ExtensionRegistry::new();
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&constructed);
        registry
            .register::<dyn Greeter, _>("plain", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(std::time::Duration::from_millis(5));
                Ok(Arc::new(Plain("hi".into())) as Arc<dyn Greeter>)
            })
            .expect("首次登记应成功");

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles = (0..threads)
            .map(|_| {
                let registry = registry.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.resolve::<dyn Greeter>("plain").expect("解析应成功")
                })
            })
            .collect::<Vec<_>>();
        let instances = handles
            .into_iter()
            .map(|handle| handle.join().expect("线程不应 panic"))
            .collect::<Vec<_>>();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        let default = registry
            .resolve_default::<dyn Greeter>()
            .expect("默认解析应成功")
            .expect("已声明默认名称");
        assert!(Arc::ptr_eq(&default, &instances[0]));
    }

    /// 原型作用域每次解析得到不同实例。
    #[test]
    fn prototype_yields_distinct_instances() {
        let registry = ExtensionRegistry::new();
        let sequence = Arc::new(AtomicUsize::new(0));
        let seq = Arc::clone(&sequence);
        registry
            .register::<dyn Stamp, _>("counter", move |_| {
                Ok(Arc::new(Counter(seq.fetch_add(1, Ordering::SeqCst))) as Arc<dyn Stamp>)
            })
            .expect("登记应成功");

        let resolved = (0..4)
            .map(|_| registry.resolve::<dyn Stamp>("counter").expect("解析应成功"))
            .collect::<Vec<_>>();
        let ids = resolved.iter().map(|stamp| stamp.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(!Arc::ptr_eq(&resolved[0], &resolved[1]));
        assert!(registry.resolve_default::<dyn Stamp>().expect("无默认名称").is_none());
    }

    /// 描述文件把名称映射到实现标识；同名不同实现为致命错误。
    #[test]
    fn descriptor_duplicates_are_fatal() {
        let registry = ExtensionRegistry::new();
        registry
            .declare::<dyn Greeter, _>("impl.a", |_| Ok(Arc::new(Plain("a".into())) as Arc<dyn Greeter>))
            .expect("声明 a");
        registry
            .declare::<dyn Greeter, _>("impl.b", |_| Ok(Arc::new(Plain("b".into())) as Arc<dyn Greeter>))
            .expect("声明 b");
        registry.add_descriptor::<dyn Greeter>("one", "plain=impl.a\n");
        assert_eq!(
            registry.resolve::<dyn Greeter>("plain").expect("解析 plain").greet(),
            "a"
        );

        registry.add_descriptor::<dyn Greeter>("two", "plain = impl.b\n");
        let err = registry
            .resolve::<dyn Greeter>("plain")
            .err()
            .expect("重复名称必须失败");
        assert!(matches!(err, ExtensionError::Duplicate { .. }), "{err:?}");
    }

    /// 未知名称与引用未声明实现的描述条目均报告明确错误。
    #[test]
    fn unknown_names_and_implementations_are_reported() {
        let registry = ExtensionRegistry::new();
        assert!(matches!(
            registry.resolve::<dyn Greeter>("missing").err(),
            Some(ExtensionError::NotFound { .. })
        ));
        assert!(!registry.has_extension::<dyn Greeter>("missing"));

        registry.add_descriptor::<dyn Greeter>("bad", "# header\nplain=impl.none\n");
        assert!(matches!(
            registry.resolve::<dyn Greeter>("plain").err(),
            Some(ExtensionError::UndeclaredImplementation { line: 2, .. })
        ));
    }

    struct Loud {
        inner: Arc<dyn Greeter>,
        stamp: Option<Arc<dyn Stamp>>,
    }

    impl Greeter for Loud {
        fn greet(&self) -> String {
            format!("{}!{}", self.inner.greet().to_uppercase(), self.stamp.is_some())
        }
    }

    /// 注入器递归解析依赖，可选依赖缺失时跳过，环路被检测。
    #[test]
    fn injector_resolves_dependencies_and_detects_cycles() {
        let registry = ExtensionRegistry::new();
        registry
            .register::<dyn Greeter, _>("plain", |_| Ok(Arc::new(Plain("hey".into())) as Arc<dyn Greeter>))
            .expect("登记 plain");
        registry
            .register::<dyn Greeter, _>("loud", |injector| {
                Ok(Arc::new(Loud {
                    inner: injector.inject::<dyn Greeter>("plain")?,
                    stamp: injector.inject_optional::<dyn Stamp>("absent")?,
                }) as Arc<dyn Greeter>)
            })
            .expect("登记 loud");
        registry
            .register::<dyn Greeter, _>("needy", |injector| {
                Ok(Arc::new(Loud {
                    inner: injector.inject::<dyn Greeter>("ghost")?,
                    stamp: None,
                }) as Arc<dyn Greeter>)
            })
            .expect("登记 needy");
        registry
            .register::<dyn Greeter, _>("ouroboros", |injector| {
                Ok(Arc::new(Loud {
                    inner: injector.inject::<dyn Greeter>("ouroboros")?,
                    stamp: None,
                }) as Arc<dyn Greeter>)
            })
            .expect("登记 ouroboros");

        assert_eq!(
            registry.resolve::<dyn Greeter>("loud").expect("解析 loud").greet(),
            "HEY!false"
        );
        assert!(matches!(
            registry.resolve::<dyn Greeter>("needy").err(),
            Some(ExtensionError::MissingDependency { .. })
        ));
        assert!(matches!(
            registry.resolve::<dyn Greeter>("ouroboros").err(),
            Some(ExtensionError::CyclicDependency { .. })
        ));
        assert!(matches!(
            registry.register::<dyn Greeter, _>("plain", |_| {
                Ok(Arc::new(Plain("dup".into())) as Arc<dyn Greeter>)
            }),
            Err(ExtensionError::Duplicate { .. })
        ));
        assert_eq!(
            registry.extension_names::<dyn Greeter>().expect("列出名称"),
            vec!["loud", "needy", "ouroboros", "plain"]
        );
    }

    /// 内置扩展可按默认名称解析。
    #[test]
    fn builtins_resolve_by_default_name() {
        use crate::codec::Codec;
        use crate::serialization::Serializer;

        let registry = ExtensionRegistry::with_builtins().expect("内置扩展装配成功");
        let serializer = registry
            .resolve_default::<dyn Serializer>()
            .expect("解析默认序列化器")
            .expect("序列化器声明了默认名称");
        assert_eq!(serializer.name(), "postcard");
        assert!(registry.has_extension::<dyn Serializer>("json"));
        assert!(registry.has_extension::<dyn Codec>("default"));
    }
}
