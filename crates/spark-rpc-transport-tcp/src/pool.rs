//! 有界业务线程池。
//!
//! # 教案式说明
//! - **意图 (Why)**：I/O 线程绝不执行业务逻辑；业务任务交给独立的有界线程池，
//!   饱和时立即拒绝，让服务端合成“过载”响应而不是堆积请求或断开连接；
//! - **契约 (What)**：
//!   - 容量 = `maxWorkerThread + workerQueueSize`；超过容量的提交返回 [`Rejected`]；
//!   - 许可随任务一起移动，任务结束（包括 panic 展开）时归还；
//! - **实现 (How)**：`tokio::sync::Semaphore::try_acquire_owned` 做非阻塞准入，
//!   `spawn_blocking` 在运行时的阻塞线程池中执行（其上限在构建运行时时设置为 `maxWorkerThread`）；
//! - **风险 (Trade-offs)**：阻塞线程按需创建、空闲回收，`minWorkerThread` 仅作为配置校验下限，
//!   不做预热。

use std::sync::Arc;

use spark_rpc_core::{Url, UrlParam};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// 线程池饱和。
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("worker pool saturated: {capacity} tasks in flight")]
pub struct Rejected {
    pub capacity: usize,
}

/// 线程池尺寸配置。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// 配置下限，仅用于夹紧与日志，不预热线程。
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_size: usize,
}

impl PoolConfig {
    /// 从 URL 读取并夹紧：`1 <= min <= max`，队列非负。
    pub fn from_url(url: &Url) -> Self {
        let clamp = |param: UrlParam| usize::try_from(url.int_param(param).max(0)).unwrap_or(0);
        let max_workers = clamp(UrlParam::MaxWorkerThread).max(1);
        let min_workers = clamp(UrlParam::MinWorkerThread).clamp(1, max_workers);
        Self {
            min_workers,
            max_workers,
            queue_size: clamp(UrlParam::WorkerQueueSize),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_workers + self.queue_size
    }
}

/// 有界线程池。
#[derive(Clone, Debug)]
pub(crate) struct WorkerPool {
    permits: Arc<Semaphore>,
    config: PoolConfig,
    handle: Handle,
}

impl WorkerPool {
    pub(crate) fn new(config: PoolConfig, handle: Handle) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.capacity())),
            config,
            handle,
        }
    }

    /// 尝试提交任务；饱和时立即拒绝。
    pub(crate) fn try_execute<F>(&self, task: F) -> Result<(), Rejected>
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| Rejected {
                capacity: self.config.capacity(),
            })?;
        self.handle.spawn_blocking(move || {
            let _permit = permit;
            task();
        });
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
