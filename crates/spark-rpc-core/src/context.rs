//! 单次分发的调用上下文。
//!
//! # 教案式说明
//! - **意图 (Why)**：服务实现需要读取当前请求的附件、记录属性、获知对端地址，但不应依赖
//!   线程局部存储，否则在工作线程复用时容易串号；
//! - **契约 (What)**：上下文由路由器在每次分发开始时创建，以 `&mut` 显式传入 Provider，
//!   分发结束随栈帧销毁；借用请求，生命周期不超过一次分发；
//! - **风险 (Trade-offs)**：属性值限定为 [`Value`]，需要跨分发保留的状态应放在服务实现自身。

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::message::{Request, Value};

#[derive(Debug)]
pub struct CallContext<'a> {
    request: &'a Request,
    remote_address: Option<SocketAddr>,
    attributes: BTreeMap<String, Value>,
    started: Instant,
}

impl<'a> CallContext<'a> {
    pub fn new(request: &'a Request) -> Self {
        Self {
            request,
            remote_address: None,
            attributes: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    pub fn with_remote_address(mut self, remote_address: Option<SocketAddr>) -> Self {
        self.remote_address = remote_address;
        self
    }

    pub fn request(&self) -> &'a Request {
        self.request
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    /// 读取请求附件。
    pub fn attachment(&self, key: &str) -> Option<&'a str> {
        self.request.attachment(key)
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// 自分发开始以来的耗时。
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 属性读写互不影响请求附件。
    #[test]
    fn attributes_are_local_to_the_context() {
        let request = Request::new("Echo", "echo", Vec::new()).with_attachment("trace", "t-1");
        let mut context = CallContext::new(&request);
        context.set_attribute("user", "alice");
        assert_eq!(context.attribute("user"), Some(&Value::from("alice")));
        assert_eq!(context.attachment("trace"), Some("t-1"));
        assert_eq!(context.remove_attribute("user"), Some(Value::from("alice")));
        assert!(context.attribute("user").is_none());

        let fresh = CallContext::new(&request);
        assert!(fresh.attribute("user").is_none());
    }
}
