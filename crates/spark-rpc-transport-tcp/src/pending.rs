//! 客户端挂起调用表：请求号 → 待完成的 Future。
//!
//! 条目只会被移除一次：响应到达、超时计时器、等待者超时/取消、连接断开四条路径都先
//! `remove` 再完成 Future，谁先移除谁负责完成，其余路径拿到 `None` 直接放弃。

use dashmap::DashMap;
use spark_rpc_core::{ActiveGuard, ResponseFuture, RpcError};

pub(crate) struct PendingCall {
    pub(crate) future: ResponseFuture,
    // 异步调用的在途计数随条目存活，条目移除即归还。
    _active: Option<ActiveGuard>,
}

impl PendingCall {
    pub(crate) fn new(future: ResponseFuture, active: Option<ActiveGuard>) -> Self {
        Self {
            future,
            _active: active,
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: DashMap<u64, PendingCall>,
}

impl PendingCalls {
    pub(crate) fn insert(&self, request_id: u64, call: PendingCall) {
        self.calls.insert(request_id, call);
    }

    pub(crate) fn remove(&self, request_id: u64) -> Option<PendingCall> {
        self.calls.remove(&request_id).map(|(_, call)| call)
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }

    /// 以同一错误完成全部挂起调用，返回完成数量。
    pub(crate) fn fail_all(&self, error: &RpcError) -> usize {
        let ids = self.calls.iter().map(|entry| *entry.key()).collect::<Vec<_>>();
        let mut failed = 0;
        for id in ids {
            if let Some(call) = self.remove(id) {
                call.future.complete(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_rpc_core::{ActiveCounter, Value};
    use std::time::Duration;

    /// 条目只能被移除一次，移除后在途计数归还。
    #[test]
    fn entries_are_removed_exactly_once() {
        let pending = PendingCalls::default();
        let counter = ActiveCounter::new();
        let future = ResponseFuture::new(1, Duration::from_secs(1));
        pending.insert(1, PendingCall::new(future.clone(), Some(counter.enter())));
        assert_eq!(counter.get(), 1);

        let call = pending.remove(1).expect("首次移除成功");
        assert!(pending.remove(1).is_none());
        assert!(call.future.complete(Ok(Value::Unit)));
        drop(call);
        assert_eq!(counter.get(), 0);
        assert!(future.is_success());
    }

    /// 连接断开时全部挂起调用以同一错误完成。
    #[test]
    fn fail_all_drains_the_table() {
        let pending = PendingCalls::default();
        let futures = (1..=3)
            .map(|id| {
                let future = ResponseFuture::new(id, Duration::from_secs(1));
                pending.insert(id, PendingCall::new(future.clone(), None));
                future
            })
            .collect::<Vec<_>>();
        let closed = RpcError::transport(spark_rpc_core::codes::TRANSPORT_CLOSED, "gone");
        assert_eq!(pending.fail_all(&closed), 3);
        assert_eq!(pending.len(), 0);
        assert!(futures.iter().all(|future| future.try_get() == Some(Err(closed.clone()))));
    }
}
