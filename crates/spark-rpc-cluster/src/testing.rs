//! 单元测试共用的桩引用。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use spark_rpc_core::{
    ActiveCounter, ActiveGuard, Node, Reference, Request, ResponseFuture, RpcError, Url, Value,
};

/// 按脚本返回结果的引用；脚本耗尽后返回自身端口号。
pub(crate) struct StubReference {
    url: Url,
    available: AtomicBool,
    active: ActiveCounter,
    attempts: AtomicUsize,
    script: Mutex<VecDeque<Result<Value, RpcError>>>,
    destroyed: AtomicBool,
}

impl StubReference {
    pub(crate) fn new(port: u16) -> Self {
        Self::with_url(Url::new("spark", "127.0.0.1", port, "Echo"))
    }

    pub(crate) fn with_url(url: Url) -> Self {
        Self {
            url,
            available: AtomicBool::new(true),
            active: ActiveCounter::new(),
            attempts: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// 追加一条脚本结果。
    pub(crate) fn push(&self, outcome: Result<Value, RpcError>) {
        self.script.lock().expect("脚本锁").push_back(outcome);
    }

    /// 模拟一个在途调用。
    pub(crate) fn hold(&self) -> ActiveGuard {
        self.active.enter()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<Value, RpcError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("脚本锁")
            .pop_front()
            .unwrap_or_else(|| Ok(Value::U64(u64::from(self.url.port()))))
    }
}

impl Node for StubReference {
    fn init(&self) -> Result<(), RpcError> {
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.set_available(false);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn describe(&self) -> String {
        format!("stub {}", self.url)
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

impl Reference for StubReference {
    fn interface_name(&self) -> &str {
        self.url.path()
    }

    fn call(&self, _request: Request) -> Result<Value, RpcError> {
        let _active = self.active.enter();
        self.next()
    }

    fn call_async(&self, request: Request) -> Result<ResponseFuture, RpcError> {
        let _active = self.active.enter();
        let future = ResponseFuture::new(request.request_id(), Duration::from_secs(1));
        future.complete(self.next());
        Ok(future)
    }

    fn call_one_way(&self, _request: Request) -> Result<(), RpcError> {
        let _active = self.active.enter();
        self.next().map(|_| ())
    }

    fn active_count(&self) -> usize {
        self.active.get()
    }
}
