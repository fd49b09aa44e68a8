//! # router 模块说明
//!
//! ## 角色定位（Why）
//! - 服务端把解码后的请求按服务键交给对应 Provider，是“网络层 → 业务实现”的唯一入口；
//! - 路由器**永不向外抛出故障**：服务缺失、方法缺失、业务失败乃至实现 panic，都被转换为携带
//!   结构化错误的 Response，连接得以保持。
//!
//! ## 核心契约（What）
//! - 同一服务键任意时刻至多映射一个 Provider；重复注册直接拒绝，不做静默覆盖；
//! - 每次分发创建新的 [`CallContext`]，分发结束即销毁，不会泄漏到复用该线程的下一次分发。
//!
//! ## 风险与考量（Trade-offs）
//! - 读多写少，使用 `RwLock<HashMap>`；注册/注销持写锁，分发只在查找期间持读锁。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::context::CallContext;
use crate::error::{RemoteError, RpcError, codes};
use crate::message::{Request, Response};
use crate::provider::Provider;

/// 服务端请求处理契约，由传输层调用。
pub trait MessageHandler: Send + Sync {
    /// 处理一个请求并产出响应；实现不得 panic 或返回错误。
    fn handle(&self, request: &Request, remote_address: Option<SocketAddr>) -> Response;
}

/// 服务键 → Provider 的分发表。
#[derive(Default)]
pub struct MessageRouter {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys = self.service_keys();
        keys.sort();
        f.debug_struct("MessageRouter").field("services", &keys).finish()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 Provider；服务键已存在时返回 `rpc.router.duplicate_provider`。
    pub fn add_provider(&self, provider: Arc<dyn Provider>) -> Result<(), RpcError> {
        let key = provider.service_key();
        let mut providers = self.providers.write();
        if providers.contains_key(&key) {
            return Err(RpcError::framework(
                codes::ROUTER_DUPLICATE_PROVIDER,
                format!("service `{key}` already has a registered provider"),
            ));
        }
        providers.insert(key.clone(), provider);
        tracing::info!(service = %key, "provider registered");
        Ok(())
    }

    /// 注销服务键，返回被移除的 Provider。
    pub fn remove_provider(&self, service_key: &str) -> Option<Arc<dyn Provider>> {
        let removed = self.providers.write().remove(service_key);
        if removed.is_some() {
            tracing::info!(service = %service_key, "provider removed");
        }
        removed
    }

    pub fn provider(&self, service_key: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(service_key).cloned()
    }

    pub fn service_keys(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// 分发一个请求。
    pub fn dispatch(&self, request: &Request) -> Response {
        self.dispatch_from(request, None)
    }

    fn dispatch_from(&self, request: &Request, remote_address: Option<SocketAddr>) -> Response {
        let started = Instant::now();
        let key = request.service_key();
        let Some(provider) = self.provider(&key) else {
            tracing::warn!(
                request_id = request.request_id(),
                service = %key,
                "no provider registered for service"
            );
            return Response::failure(
                request.request_id(),
                RemoteError::framework(
                    codes::ROUTER_SERVICE_NOT_FOUND,
                    format!("service `{key}` is not registered"),
                ),
            )
            .with_process_time_ms(started.elapsed().as_millis() as u64);
        };

        let mut context = CallContext::new(request).with_remote_address(remote_address);
        let outcome = catch_unwind(AssertUnwindSafe(|| provider.invoke(&mut context)));
        let response = match outcome {
            Ok(Ok(value)) => Response::success(request.request_id(), value),
            Ok(Err(err)) => {
                tracing::debug!(
                    request_id = request.request_id(),
                    service = %key,
                    method = request.method_name(),
                    error = %err,
                    "provider returned an error"
                );
                Response::failure(request.request_id(), err.to_remote())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    request_id = request.request_id(),
                    service = %key,
                    method = request.method_name(),
                    panic = %message,
                    "provider panicked"
                );
                Response::failure(
                    request.request_id(),
                    RemoteError::business(codes::BIZ_FAILURE, format!("service panicked: {message}")),
                )
            }
        };
        response.with_process_time_ms(started.elapsed().as_millis() as u64)
    }
}

impl MessageHandler for MessageRouter {
    fn handle(&self, request: &Request, remote_address: Option<SocketAddr>) -> Response {
        self.dispatch_from(request, remote_address)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::message::Value;
    use crate::provider::{DefaultProvider, ServiceError};
    use crate::url::Url;

    fn provider(group: &str) -> Arc<dyn Provider> {
        Arc::new(
            DefaultProvider::builder(
                Url::new("spark", "127.0.0.1", 0, "Echo").with_parameter("group", group),
            )
            .method("echo", &["string"], |_, args| Ok(args[0].clone()))
            .method("boom", &[], |_, _| Err(ServiceError::new("boom")))
            .method("panic", &[], |_, _| panic!("kaboom"))
            .build()
            .expect("接口路径非空"),
        )
    }

    /// 未注册服务键返回框架错误响应，错误信息包含服务键。
    #[test]
    fn missing_service_yields_error_response() {
        let router = MessageRouter::new();
        let request = Request::new("Echo", "echo", vec![Value::from("ping")]);
        let response = router.dispatch(&request);
        assert_eq!(response.request_id(), request.request_id());
        let error = response.error().expect("必须是错误响应");
        assert_eq!(error.class, ErrorClass::Framework);
        assert_eq!(error.code, codes::ROUTER_SERVICE_NOT_FOUND);
        assert!(error.message.contains("Echo:1.0:default"));
    }

    /// 重复服务键被拒绝，注销后可重新注册。
    #[test]
    fn duplicate_registration_is_rejected() {
        let router = MessageRouter::new();
        router.add_provider(provider("default")).expect("首次注册");
        let err = router
            .add_provider(provider("default"))
            .expect_err("重复注册必须失败");
        assert_eq!(err.code(), codes::ROUTER_DUPLICATE_PROVIDER);
        router.add_provider(provider("blue")).expect("不同分组可共存");
        assert_eq!(router.len(), 2);

        assert!(router.remove_provider("Echo:1.0:default").is_some());
        router.add_provider(provider("default")).expect("注销后可重新注册");
    }

    /// 业务失败与 panic 均转换为业务错误响应。
    #[test]
    fn failures_become_business_responses() {
        let router = MessageRouter::new();
        router.add_provider(provider("default")).expect("注册");

        let ok = router.dispatch(&Request::new("Echo", "echo", vec![Value::from("ping")]));
        assert_eq!(ok.value(), Some(&Value::from("ping")));

        let boom = router.dispatch(&Request::new("Echo", "boom", Vec::new()));
        let error = boom.error().expect("业务失败");
        assert_eq!(error.class, ErrorClass::Business);
        assert_eq!(error.message, "boom");

        let panicked = router.dispatch(&Request::new("Echo", "panic", Vec::new()));
        let error = panicked.error().expect("panic 转为错误");
        assert_eq!(error.class, ErrorClass::Business);
        assert!(error.message.contains("kaboom"));
    }
}
