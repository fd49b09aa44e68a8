//! 待定响应的 Future。
//!
//! # 教案式说明
//! - **意图 (Why)**：同一个挂起调用既要支持同步调用方阻塞等待，也要支持异步调用方轮询，
//!   还要能被 I/O 线程在任意时刻完成；
//! - **契约 (What)**：
//!   - 结果只写入一次，后续 [`complete`](ResponseFuture::complete) 返回 `false` 并被忽略；
//!   - 超时定义为 `now - created >= timeout`；
//!   - 取消或超时会执行一次“放弃回调”，由客户端用来从挂起表中移除对应条目，
//!     迟到的响应因此可以被安全丢弃；
//! - **实现 (How)**：`parking_lot::Mutex + Condvar` 服务阻塞等待者，`Waker` 列表服务异步轮询者。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::RpcError;
use crate::message::{Response, Value};

type AbandonHook = Box<dyn FnOnce(u64) + Send>;

struct State {
    result: Option<Result<Value, RpcError>>,
    cancelled: bool,
    wakers: Vec<Waker>,
}

struct Shared {
    request_id: u64,
    timeout: Duration,
    created: Instant,
    state: Mutex<State>,
    ready: Condvar,
    abandon: Mutex<Option<AbandonHook>>,
}

/// 可克隆的响应句柄，所有克隆共享同一结果。
#[derive(Clone)]
pub struct ResponseFuture {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("request_id", &self.shared.request_id)
            .field("timeout", &self.shared.timeout)
            .field("done", &self.is_done())
            .finish()
    }
}

impl ResponseFuture {
    pub fn new(request_id: u64, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                request_id,
                timeout,
                created: Instant::now(),
                state: Mutex::new(State {
                    result: None,
                    cancelled: false,
                    wakers: Vec::new(),
                }),
                ready: Condvar::new(),
                abandon: Mutex::new(None),
            }),
        }
    }

    /// 设置放弃回调（取消或超时时执行一次）。
    pub fn on_abandon(&self, hook: impl FnOnce(u64) + Send + 'static) {
        *self.shared.abandon.lock() = Some(Box::new(hook));
    }

    pub fn request_id(&self) -> u64 {
        self.shared.request_id
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.shared.created.elapsed()
    }

    /// 写入结果；已完成时返回 `false`。
    pub fn complete(&self, result: Result<Value, RpcError>) -> bool {
        self.finish(result, false)
    }

    fn finish(&self, result: Result<Value, RpcError>, cancelled: bool) -> bool {
        let wakers = {
            let mut state = self.shared.state.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result);
            state.cancelled = cancelled;
            std::mem::take(&mut state.wakers)
        };
        self.shared.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// 以响应完成，远端错误还原为本地错误。
    pub fn complete_response(&self, response: Response) -> bool {
        self.complete(response.into_result())
    }

    /// 以超时失败；由计时器或等待者触发。
    pub fn fail_timeout(&self) -> bool {
        let err = RpcError::Timeout {
            request_id: self.shared.request_id,
            timeout_ms: self.shared.timeout.as_millis() as u64,
            elapsed_ms: self.elapsed().as_millis() as u64,
        };
        let completed = self.complete(Err(err));
        if completed {
            self.abandon();
        }
        completed
    }

    /// 取消等待；已完成时返回 `false`。
    pub fn cancel(&self) -> bool {
        let cancelled = RpcError::Cancelled {
            request_id: self.shared.request_id,
        };
        let completed = self.finish(Err(cancelled), true);
        if completed {
            self.abandon();
        }
        completed
    }

    fn abandon(&self) {
        let hook = self.shared.abandon.lock().take();
        if let Some(hook) = hook {
            hook(self.shared.request_id);
        }
    }

    pub fn is_done(&self) -> bool {
        self.shared.state.lock().result.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().cancelled
    }

    pub fn is_success(&self) -> bool {
        matches!(self.shared.state.lock().result, Some(Ok(_)))
    }

    /// 是否已超过截止时间（不论是否已完成）。
    pub fn is_timeout(&self) -> bool {
        self.elapsed() >= self.shared.timeout
    }

    /// 已完成时返回结果副本。
    pub fn try_get(&self) -> Option<Result<Value, RpcError>> {
        self.shared.state.lock().result.clone()
    }

    /// 阻塞直至完成或超时。
    pub fn get(&self) -> Result<Value, RpcError> {
        let deadline = self.shared.created + self.shared.timeout;
        {
            let mut state = self.shared.state.lock();
            loop {
                if let Some(result) = state.result.as_ref() {
                    return result.clone();
                }
                if self
                    .shared
                    .ready
                    .wait_until(&mut state, deadline)
                    .timed_out()
                    && state.result.is_none()
                {
                    break;
                }
            }
        }
        self.fail_timeout();
        self.try_get().unwrap_or(Err(RpcError::Timeout {
            request_id: self.shared.request_id,
            timeout_ms: self.shared.timeout.as_millis() as u64,
            elapsed_ms: self.elapsed().as_millis() as u64,
        }))
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value, RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        {
            let mut state = self.shared.state.lock();
            if let Some(result) = state.result.as_ref() {
                return Poll::Ready(result.clone());
            }
            if !self.is_timeout() {
                if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                return Poll::Pending;
            }
        }
        self.fail_timeout();
        match self.try_get() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    /// 另一线程完成后，阻塞等待者获得结果；重复完成被忽略。
    #[test]
    fn get_returns_result_completed_elsewhere() {
        let future = ResponseFuture::new(1, Duration::from_secs(5));
        let completer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            assert!(completer.complete(Ok(Value::from("pong"))));
        });
        assert_eq!(future.get().expect("应成功"), Value::from("pong"));
        handle.join().expect("线程不应 panic");
        assert!(!future.complete(Ok(Value::Unit)));
        assert!(future.is_success());
        assert!(!future.is_timeout());
    }

    /// 超时后等待者收到超时错误，并执行一次放弃回调。
    #[test]
    fn get_times_out_and_runs_abandon_hook() {
        let future = ResponseFuture::new(7, Duration::from_millis(30));
        let abandoned = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&abandoned);
        future.on_abandon(move |id| {
            seen.store(id, Ordering::SeqCst);
        });
        let err = future.get().expect_err("必须超时");
        assert!(matches!(err, RpcError::Timeout { request_id: 7, .. }));
        assert!(future.is_timeout());
        assert_eq!(abandoned.load(Ordering::SeqCst), 7);
        assert!(!future.complete(Ok(Value::Unit)), "迟到的响应应被丢弃");
    }

    /// 取消后状态可见，且不可再次取消。
    #[test]
    fn cancel_marks_state() {
        let future = ResponseFuture::new(3, Duration::from_secs(1));
        assert!(future.cancel());
        assert!(future.is_cancelled());
        assert!(future.is_done());
        assert!(!future.cancel());
        assert!(matches!(future.get(), Err(RpcError::Cancelled { request_id: 3 })));
    }
}
