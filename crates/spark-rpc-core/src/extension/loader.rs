//! 单个能力的扩展装载器：实现目录、名称绑定、描述文件惰性加载与单例槽位。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use super::descriptor::{self, DescriptorSource};
use super::{ExtensionFactory, ExtensionPoint};
use crate::error::ExtensionError;

/// 名称到实现的绑定。
pub(crate) struct Binding<T: ?Sized> {
    pub(crate) implementation: String,
    pub(crate) factory: ExtensionFactory<T>,
}

impl<T: ?Sized> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            implementation: self.implementation.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

/// 单例槽位：每个名称一把锁，保证并发首次解析时只构造一次。
pub(crate) type SingletonSlot<T> = Arc<Mutex<Option<Arc<T>>>>;

pub(crate) struct ExtensionLoader<T: ?Sized + ExtensionPoint> {
    implementations: RwLock<HashMap<String, ExtensionFactory<T>>>,
    bindings: RwLock<BTreeMap<String, Binding<T>>>,
    pending: Mutex<Vec<DescriptorSource>>,
    loaded: AtomicBool,
    singletons: Mutex<HashMap<String, SingletonSlot<T>>>,
}

impl<T: ?Sized + ExtensionPoint> ExtensionLoader<T> {
    pub(crate) fn new() -> Self {
        Self {
            implementations: RwLock::new(HashMap::new()),
            bindings: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(Vec::new()),
            loaded: AtomicBool::new(true),
            singletons: Mutex::new(HashMap::new()),
        }
    }

    /// 在实现目录中登记一个可被描述文件引用的实现标识。
    pub(crate) fn declare(
        &self,
        implementation: &str,
        factory: ExtensionFactory<T>,
    ) -> Result<(), ExtensionError> {
        let mut implementations = self.implementations.write();
        if implementations.contains_key(implementation) {
            return Err(ExtensionError::Duplicate {
                capability: T::CAPABILITY,
                name: implementation.to_owned(),
                existing: implementation.to_owned(),
                candidate: implementation.to_owned(),
            });
        }
        implementations.insert(implementation.to_owned(), factory);
        Ok(())
    }

    /// 直接把名称绑定到工厂，不经过描述文件。
    pub(crate) fn register(
        &self,
        name: &str,
        factory: ExtensionFactory<T>,
    ) -> Result<(), ExtensionError> {
        if name.is_empty() {
            return Err(ExtensionError::EmptyName {
                capability: T::CAPABILITY,
            });
        }
        let implementation = format!("inline:{name}");
        let mut bindings = self.bindings.write();
        if let Some(existing) = bindings.get(name) {
            return Err(ExtensionError::Duplicate {
                capability: T::CAPABILITY,
                name: name.to_owned(),
                existing: existing.implementation.clone(),
                candidate: implementation,
            });
        }
        bindings.insert(
            name.to_owned(),
            Binding {
                implementation,
                factory,
            },
        );
        Ok(())
    }

    pub(crate) fn add_descriptor(&self, source: DescriptorSource) {
        let mut pending = self.pending.lock();
        pending.push(source);
        self.loaded.store(false, Ordering::Release);
    }

    /// 双重检查的惰性加载：原子标志快速路径，锁内二次确认。
    ///
    /// 失败时待加载资源保留，下一次解析会再次报告同一错误；已成功应用的条目重复应用是幂等的。
    fn ensure_loaded(&self) -> Result<(), ExtensionError> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut pending = self.pending.lock();
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        for source in pending.iter() {
            self.apply(source)?;
        }
        tracing::debug!(
            capability = T::CAPABILITY,
            sources = pending.len(),
            "extension descriptors loaded"
        );
        pending.clear();
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn apply(&self, source: &DescriptorSource) -> Result<(), ExtensionError> {
        let entries = descriptor::parse(T::CAPABILITY, source)?;
        let implementations = self.implementations.read();
        let mut bindings = self.bindings.write();
        for entry in entries {
            let factory = implementations.get(&entry.implementation).ok_or_else(|| {
                ExtensionError::UndeclaredImplementation {
                    capability: T::CAPABILITY,
                    source_name: source.name.clone(),
                    line: entry.line,
                    implementation: entry.implementation.clone(),
                }
            })?;
            match bindings.get(&entry.name) {
                Some(existing) if existing.implementation == entry.implementation => {}
                Some(existing) => {
                    return Err(ExtensionError::Duplicate {
                        capability: T::CAPABILITY,
                        name: entry.name,
                        existing: existing.implementation.clone(),
                        candidate: entry.implementation,
                    });
                }
                None => {
                    bindings.insert(
                        entry.name,
                        Binding {
                            implementation: entry.implementation,
                            factory: Arc::clone(factory),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    pub(crate) fn binding(&self, name: &str) -> Result<Binding<T>, ExtensionError> {
        self.ensure_loaded()?;
        self.bindings
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ExtensionError::NotFound {
                capability: T::CAPABILITY,
                name: name.to_owned(),
            })
    }

    pub(crate) fn names(&self) -> Result<Vec<String>, ExtensionError> {
        self.ensure_loaded()?;
        Ok(self.bindings.read().keys().cloned().collect())
    }

    pub(crate) fn singleton_slot(&self, name: &str) -> SingletonSlot<T> {
        let mut singletons = self.singletons.lock();
        Arc::clone(singletons.entry(name.to_owned()).or_default())
    }
}
