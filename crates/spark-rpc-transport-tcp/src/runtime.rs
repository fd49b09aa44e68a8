//! Tokio 运行时装配。
//!
//! - 服务端：每个监听端点独占一个多线程运行时，I/O 线程数取 `ioThreads`，
//!   阻塞线程池上限取 `maxWorkerThread`，业务代码只在阻塞线程池中执行；
//! - 客户端：进程内共享一个 I/O 运行时，首次建连时惰性创建。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use spark_rpc_core::{FRAMEWORK_NAME, RpcError};
use tokio::runtime::{Builder, Runtime};

use crate::error::{self, map_io_error};

const WORKER_KEEP_ALIVE: Duration = Duration::from_secs(120);
const CLIENT_IO_THREADS: usize = 2;

static CLIENT_RUNTIME: Mutex<Option<Arc<Runtime>>> = Mutex::new(None);

/// 构造服务端运行时。
pub(crate) fn server_runtime(
    name: &str,
    io_threads: usize,
    max_workers: usize,
) -> Result<Runtime, RpcError> {
    let prefix = format!("{FRAMEWORK_NAME}-{name}");
    let sequence = AtomicUsize::new(0);
    Builder::new_multi_thread()
        .worker_threads(io_threads.max(1))
        .max_blocking_threads(max_workers.max(1))
        .thread_keep_alive(WORKER_KEEP_ALIVE)
        .thread_name_fn(move || format!("{prefix}-{}", sequence.fetch_add(1, Ordering::Relaxed)))
        .enable_all()
        .build()
        .map_err(|err| map_io_error(error::RUNTIME, err))
}

/// 获取共享的客户端 I/O 运行时。
pub(crate) fn client_runtime() -> Result<Arc<Runtime>, RpcError> {
    let mut slot = CLIENT_RUNTIME.lock();
    if let Some(runtime) = slot.as_ref() {
        return Ok(Arc::clone(runtime));
    }
    let runtime = Builder::new_multi_thread()
        .worker_threads(CLIENT_IO_THREADS)
        .thread_name(format!("{FRAMEWORK_NAME}-client-io"))
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|err| map_io_error(error::RUNTIME, err))?;
    *slot = Some(Arc::clone(&runtime));
    Ok(runtime)
}
