//! 基于 [`TcpClient`] 的单端点引用。

use std::sync::Arc;

use spark_rpc_core::{
    ActiveCounter, Codec, Node, Reference, Request, ResponseFuture, RpcError, Url, UrlParam, Value,
};

use crate::client::TcpClient;

/// 单端点引用：补全服务键附件，并以在途计数包裹每次调用。
///
/// # 契约说明（What）
/// - 同步与单向调用的守卫在方法返回时释放；
/// - 异步调用的守卫随挂起条目移动，响应、超时、取消或连接断开任一路径移除条目时归还。
#[derive(Debug)]
pub struct DefaultReference {
    url: Url,
    client: TcpClient,
    active: ActiveCounter,
}

impl DefaultReference {
    pub fn new(url: Url, codec: Arc<dyn Codec>) -> Result<Self, RpcError> {
        Ok(Self {
            client: TcpClient::new(url.clone(), codec)?,
            url,
            active: ActiveCounter::new(),
        })
    }

    /// 当前挂起的双向调用数。
    pub fn pending_count(&self) -> usize {
        self.client.pending_count()
    }

    /// 是否持有存活连接；断线后为 `false`，引用仍可用，下一次调用重连。
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn prepare(&self, mut request: Request) -> Request {
        for param in [UrlParam::Version, UrlParam::Group] {
            if request.attachment(param.key()).is_none() {
                request.set_attachment(param.key(), self.url.param(param));
            }
        }
        request
    }
}

impl Node for DefaultReference {
    fn init(&self) -> Result<(), RpcError> {
        self.client.init()
    }

    fn destroy(&self) {
        self.client.destroy();
    }

    fn is_available(&self) -> bool {
        self.client.is_available()
    }

    fn describe(&self) -> String {
        format!(
            "reference {} -> {} (active={})",
            self.url.path(),
            self.client.describe(),
            self.active.get()
        )
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

impl Reference for DefaultReference {
    fn interface_name(&self) -> &str {
        self.url.path()
    }

    fn call(&self, request: Request) -> Result<Value, RpcError> {
        let _active = self.active.enter();
        let request = self.prepare(request);
        self.client.request(&request, None)?.get()
    }

    fn call_async(&self, request: Request) -> Result<ResponseFuture, RpcError> {
        let active = self.active.enter();
        let request = self.prepare(request);
        self.client.request(&request, Some(active))
    }

    fn call_one_way(&self, request: Request) -> Result<(), RpcError> {
        let _active = self.active.enter();
        let request = self.prepare(request).one_way();
        self.client.send_one_way(&request)
    }

    fn active_count(&self) -> usize {
        self.active.get()
    }
}
