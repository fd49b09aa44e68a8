//! 代理生成协作者：为接口生成“拦截调用的替身”。
//!
//! # 教案式说明
//! - **意图 (Why)**：调用方以“接口名 + 方法名 + 参数”发起调用，替身负责组装 [`Request`]
//!   （请求号、`version`/`group` 附件）并交给处理器；处理器通常是集群调用器；
//! - **契约 (What)**：替身本身无状态、可克隆；单向调用构建单向请求，处理器返回的值被忽略。

use std::fmt;
use std::sync::Arc;

use crate::error::RpcError;
use crate::extension::ExtensionPoint;
use crate::message::{Request, Value};
use crate::url::{Url, UrlParam};

/// 调用处理器。
pub trait InvocationHandler: Send + Sync {
    fn invoke(&self, request: Request) -> Result<Value, RpcError>;
}

/// 代理工厂扩展点。
pub trait ProxyFactory: Send + Sync {
    fn proxy(&self, url: &Url, handler: Arc<dyn InvocationHandler>) -> ServiceProxy;
}

impl ExtensionPoint for dyn ProxyFactory {
    const CAPABILITY: &'static str = "proxy";
    const DEFAULT: Option<&'static str> = Some("dynamic");
}

/// 默认的动态代理工厂。
#[derive(Clone, Copy, Debug, Default)]
pub struct DynamicProxyFactory;

impl ProxyFactory for DynamicProxyFactory {
    fn proxy(&self, url: &Url, handler: Arc<dyn InvocationHandler>) -> ServiceProxy {
        ServiceProxy {
            interface_name: url.path().to_owned(),
            version: url.param(UrlParam::Version).to_owned(),
            group: url.param(UrlParam::Group).to_owned(),
            handler,
        }
    }
}

/// 接口替身。
#[derive(Clone)]
pub struct ServiceProxy {
    interface_name: String,
    version: String,
    group: String,
    handler: Arc<dyn InvocationHandler>,
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("interface_name", &self.interface_name)
            .field("version", &self.version)
            .field("group", &self.group)
            .finish()
    }
}

impl ServiceProxy {
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    fn request(&self, method: &str, arguments: Vec<Value>) -> Request {
        Request::new(self.interface_name.clone(), method, arguments)
            .with_attachment(UrlParam::Version.key(), self.version.clone())
            .with_attachment(UrlParam::Group.key(), self.group.clone())
    }

    /// 双向调用。
    pub fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, RpcError> {
        self.handler.invoke(self.request(method, arguments))
    }

    /// 单向调用。
    pub fn invoke_one_way(&self, method: &str, arguments: Vec<Value>) -> Result<(), RpcError> {
        self.handler
            .invoke(self.request(method, arguments).one_way())
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<Request>>);

    impl InvocationHandler for Capture {
        fn invoke(&self, request: Request) -> Result<Value, RpcError> {
            let reply = request.arguments().first().cloned().unwrap_or(Value::Unit);
            self.0.lock().push(request);
            Ok(reply)
        }
    }

    /// 替身组装的请求携带接口名与版本/分组附件。
    #[test]
    fn proxy_builds_requests_with_attachments() {
        let capture = Arc::new(Capture::default());
        let url = Url::new("spark", "127.0.0.1", 1, "Echo").with_parameter("group", "blue");
        let proxy = DynamicProxyFactory.proxy(&url, capture.clone());

        assert_eq!(
            proxy.invoke("echo", vec![Value::from("ping")]).expect("调用成功"),
            Value::from("ping")
        );
        proxy.invoke_one_way("log", Vec::new()).expect("单向调用成功");

        let requests = capture.0.lock();
        assert_eq!(requests[0].service_key(), "Echo:1.0:blue");
        assert_eq!(requests[0].method_name(), "echo");
        assert!(requests[1].is_one_way());
    }
}
