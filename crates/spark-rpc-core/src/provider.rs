//! # provider 模块说明
//!
//! ## 角色定位（Why）
//! - Provider 是服务端对“一个本地服务实现”的可分发句柄，由路由器按服务键持有；
//! - 方法分发不依赖运行期反射：注册时一次性构建 `方法名 + 参数类型 → 处理函数` 的调用表，
//!   每次调用只是一次哈希查找。
//!
//! ## 核心契约（What）
//! - 服务键格式为 `interface:version:group`，由 [`service_key`] 确定性生成；
//! - 未声明的方法签名返回框架错误 `rpc.provider.method_not_found`，错误信息包含 `interface.method`；
//! - 处理函数返回的 [`ServiceError`] 属于业务错误，原样传播给调用方且不会被重试。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::CallContext;
use crate::error::{RpcError, codes};
use crate::message::Value;
use crate::node::{Node, NodeState};
use crate::url::{Url, UrlParam};

/// 生成服务键。
pub fn service_key(interface: &str, version: &str, group: &str) -> String {
    format!("{interface}:{version}:{group}")
}

/// 服务实现抛出的业务错误。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    code: String,
    message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: codes::BIZ_FAILURE.to_owned(),
            message: message.into(),
        }
    }

    /// 使用自定义业务错误码。
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ServiceError> for RpcError {
    fn from(err: ServiceError) -> Self {
        RpcError::Business {
            code: err.code,
            message: err.message,
        }
    }
}

/// 服务端可分发句柄。
pub trait Provider: Node {
    fn interface_name(&self) -> &str;

    fn service_key(&self) -> String {
        self.url().service_key()
    }

    /// 执行一次调用。业务失败以 [`RpcError::Business`] 返回，签名缺失以框架错误返回。
    fn invoke(&self, context: &mut CallContext<'_>) -> Result<Value, RpcError>;
}

/// 方法处理函数。
pub type MethodHandler =
    Arc<dyn Fn(&mut CallContext<'_>, &[Value]) -> Result<Value, ServiceError> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct MethodKey {
    name: String,
    parameter_types: Vec<String>,
}

/// 基于调用表的默认 Provider。
pub struct DefaultProvider {
    url: Url,
    interface_name: String,
    methods: HashMap<MethodKey, MethodHandler>,
    state: NodeState,
}

impl fmt::Debug for DefaultProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultProvider")
            .field("url", &self.url.to_string())
            .field("methods", &self.methods.len())
            .field("state", &self.state.status())
            .finish()
    }
}

impl DefaultProvider {
    /// 以发布 URL 开始构建；接口名取 URL 路径。
    pub fn builder(url: Url) -> DefaultProviderBuilder {
        DefaultProviderBuilder {
            interface_name: url.path().to_owned(),
            url,
            methods: HashMap::new(),
        }
    }

    /// 已声明的方法签名，按字典序排列。
    pub fn method_signatures(&self) -> Vec<String> {
        let mut signatures = self
            .methods
            .keys()
            .map(|key| format!("{}({})", key.name, key.parameter_types.join(",")))
            .collect::<Vec<_>>();
        signatures.sort();
        signatures
    }
}

/// [`DefaultProvider`] 构建器。
pub struct DefaultProviderBuilder {
    url: Url,
    interface_name: String,
    methods: HashMap<MethodKey, MethodHandler>,
}

impl DefaultProviderBuilder {
    /// 声明一个方法签名及其处理函数；同签名后声明者覆盖先声明者。
    pub fn method<F>(mut self, name: &str, parameter_types: &[&str], handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &[Value]) -> Result<Value, ServiceError> + Send + Sync + 'static,
    {
        let key = MethodKey {
            name: name.to_owned(),
            parameter_types: parameter_types.iter().map(|ty| (*ty).to_owned()).collect(),
        };
        self.methods.insert(key, Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<DefaultProvider, RpcError> {
        if self.interface_name.is_empty() {
            return Err(RpcError::Config(format!(
                "provider url `{}` has no interface path",
                self.url
            )));
        }
        Ok(DefaultProvider {
            url: self.url,
            interface_name: self.interface_name,
            methods: self.methods,
            state: NodeState::new(),
        })
    }
}

impl Node for DefaultProvider {
    fn init(&self) -> Result<(), RpcError> {
        if self.state.mark_available() {
            tracing::debug!(service = %self.service_key(), methods = self.methods.len(), "provider initialised");
        }
        Ok(())
    }

    fn destroy(&self) {
        self.state.close();
    }

    fn is_available(&self) -> bool {
        self.state.is_available()
    }

    fn describe(&self) -> String {
        format!(
            "provider {} v{} [{}]",
            self.interface_name,
            self.url.param(UrlParam::Version),
            self.state.status()
        )
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

impl Provider for DefaultProvider {
    fn interface_name(&self) -> &str {
        &self.interface_name
    }

    fn invoke(&self, context: &mut CallContext<'_>) -> Result<Value, RpcError> {
        let request = context.request();
        let key = MethodKey {
            name: request.method_name().to_owned(),
            parameter_types: request.parameter_types().to_vec(),
        };
        let handler = self.methods.get(&key).ok_or_else(|| {
            RpcError::framework(
                codes::PROVIDER_METHOD_NOT_FOUND,
                format!(
                    "method `{}.{}` with parameters ({}) is not provided",
                    self.interface_name,
                    request.method_name(),
                    request.parameter_types().join(",")
                ),
            )
        })?;
        handler(context, request.arguments()).map_err(RpcError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Request;

    fn echo_provider() -> DefaultProvider {
        DefaultProvider::builder(Url::new("spark", "127.0.0.1", 0, "Echo"))
            .method("echo", &["string"], |_, args| Ok(args[0].clone()))
            .method("fail", &[], |_, _| Err(ServiceError::new("boom")))
            .build()
            .expect("接口路径非空")
    }

    /// 调用表按方法名与参数类型定位处理函数。
    #[test]
    fn dispatch_table_matches_signature() {
        let provider = echo_provider();
        assert_eq!(provider.service_key(), "Echo:1.0:default");
        assert_eq!(provider.method_signatures(), vec!["echo(string)", "fail()"]);

        let request = Request::new("Echo", "echo", vec![Value::from("ping")]);
        let mut context = CallContext::new(&request);
        assert_eq!(
            provider.invoke(&mut context).expect("echo 应成功"),
            Value::from("ping")
        );

        let request = Request::new("Echo", "echo", vec![Value::from(1_i64)]);
        let mut context = CallContext::new(&request);
        let err = provider.invoke(&mut context).expect_err("签名不匹配");
        assert_eq!(err.code(), codes::PROVIDER_METHOD_NOT_FOUND);
        assert!(err.to_string().contains("Echo.echo"));
        assert!(!err.is_business());
    }

    /// 处理函数返回的错误归类为业务错误。
    #[test]
    fn service_errors_are_business_errors() {
        let provider = echo_provider();
        let request = Request::new("Echo", "fail", Vec::new());
        let mut context = CallContext::new(&request);
        let err = provider.invoke(&mut context).expect_err("fail 必须失败");
        assert!(err.is_business());
        assert!(err.to_string().contains("boom"));
    }
}
