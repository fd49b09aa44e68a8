//! TCP 客户端。
//!
//! # 教案式说明
//! - **意图 (Why)**：把“发送一帧、按请求号等待对应响应”封装为同步、异步、单向三种调用模式，
//!   调用线程只在同步模式下阻塞，且阻塞的是调用线程而非 I/O 线程；
//! - **契约 (What)**：
//!   - 状态机 `New → Available → Closed`，`destroy` 幂等；
//!   - 双向请求发送前登记挂起条目，条目由响应到达、超时计时器、等待者超时/取消、连接断开
//!     四条路径中最先发生者移除，迟到响应被丢弃；
//!   - 连接断开时全部挂起调用以 `rpc.transport.closed` 失败；客户端未关闭时，下一次调用惰性重连；
//!   - 可用性只取决于生命周期状态而非连接存活，断线后仍可被选中，从而触发重连；
//!     重连失败以传输错误返回，由上层故障转移换点；
//! - **实现 (How)**：建连在调用线程同步完成，随后在共享 I/O 运行时中派生读/写两个任务；
//!   写任务通过无界通道接收已编码帧，读任务把响应分发给挂起表。

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_rpc_core::frame::{self, Frame, FrameDecoder};
use spark_rpc_core::{
    ActiveGuard, Codec, Message, MessageRef, MessageType, Node, NodeState, Request,
    ResponseFuture, RpcError, Url, UrlParam,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection;
use crate::error::{self, closed_error, map_io_error};
use crate::pending::{PendingCall, PendingCalls};
use crate::runtime;
use crate::socket::{self, SocketOptions};

struct Connection {
    outbound: mpsc::UnboundedSender<Bytes>,
    alive: Arc<AtomicBool>,
    local_addr: SocketAddr,
    tasks: [JoinHandle<()>; 2],
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    fn abort(&self) {
        self.alive.store(false, Ordering::Release);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// 单连接 TCP 客户端。
pub struct TcpClient {
    url: Url,
    codec: Arc<dyn Codec>,
    options: SocketOptions,
    state: NodeState,
    pending: Arc<PendingCalls>,
    connection: Mutex<Option<Connection>>,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("url", &self.url.to_string())
            .field("state", &self.state.status())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl TcpClient {
    pub fn new(url: Url, codec: Arc<dyn Codec>) -> Result<Self, RpcError> {
        Ok(Self {
            options: SocketOptions::from_url(&url),
            url,
            codec,
            state: NodeState::new(),
            pending: Arc::new(PendingCalls::default()),
            connection: Mutex::new(None),
            runtime: runtime::client_runtime()?,
        })
    }

    /// 当前挂起的双向调用数。
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// 当前是否持有存活连接。
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(Connection::is_alive)
    }

    /// 当前连接的本地地址。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.lock().as_ref().map(|conn| conn.local_addr)
    }

    fn connect(&self) -> Result<Connection, RpcError> {
        let addr = socket::resolve(&self.url, error::CONNECT)?;
        let timeout = self.url.duration_ms_param(UrlParam::ConnectTimeout);
        let std_stream = socket::connect(addr, timeout, &self.options)?;

        let _entered = self.runtime.enter();
        let stream = tokio::net::TcpStream::from_std(std_stream)
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        let local_addr = stream
            .local_addr()
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        let (reader, writer) = stream.into_split();
        let (outbound, inbound) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        let writer_task = self
            .runtime
            .spawn(connection::write_loop(writer, inbound, addr));
        let reader_task = {
            let pending = Arc::clone(&self.pending);
            let codec = Arc::clone(&self.codec);
            let url = self.url.clone();
            let alive = Arc::clone(&alive);
            let decoder = FrameDecoder::from_url(&self.url);
            let buffer_size = self.options.buffer_size;
            self.runtime.spawn(async move {
                let reason = connection::read_loop(reader, decoder, buffer_size, addr, |frame| {
                    on_response_frame(&pending, codec.as_ref(), &url, frame)
                })
                .await;
                let failed = pending.fail_all(&reason);
                alive.store(false, Ordering::Release);
                tracing::info!(
                    peer = %addr,
                    failed_calls = failed,
                    reason = %reason,
                    "client connection closed"
                );
            })
        };

        tracing::debug!(peer = %addr, local = %local_addr, "client connected");
        Ok(Connection {
            outbound,
            alive,
            local_addr,
            tasks: [reader_task, writer_task],
        })
    }

    /// 取得可用连接的发送端，必要时重连。
    fn sender(&self) -> Result<mpsc::UnboundedSender<Bytes>, RpcError> {
        if !self.state.is_available() {
            return Err(closed_error(format_args!("client {}", self.url.address())));
        }
        let mut slot = self.connection.lock();
        if let Some(conn) = slot.as_ref().filter(|conn| conn.is_alive()) {
            return Ok(conn.outbound.clone());
        }
        if let Some(stale) = slot.take() {
            stale.abort();
            tracing::info!(peer = %self.url.address(), "reconnecting client");
        }
        let conn = self.connect()?;
        let outbound = conn.outbound.clone();
        *slot = Some(conn);
        Ok(outbound)
    }

    fn send(&self, request: &Request) -> Result<(), RpcError> {
        let bytes = frame::encode_message(self.codec.as_ref(), &self.url, MessageRef::from(request))?;
        self.sender()?
            .send(bytes)
            .map_err(|_| closed_error(format_args!("connection to {}", self.url.address())))
    }

    /// 发送双向请求并返回 Future；`active` 守卫随挂起条目存活。
    pub fn request(
        &self,
        request: &Request,
        active: Option<ActiveGuard>,
    ) -> Result<ResponseFuture, RpcError> {
        let request_id = request.request_id();
        let timeout = self.url.duration_ms_param(UrlParam::RequestTimeout);
        let future = ResponseFuture::new(request_id, timeout);

        self.pending
            .insert(request_id, PendingCall::new(future.clone(), active));
        let weak = Arc::downgrade(&self.pending);
        future.on_abandon(move |id| {
            if let Some(pending) = weak.upgrade() {
                pending.remove(id);
            }
        });

        if let Err(err) = self.send(request) {
            if let Some(call) = self.pending.remove(request_id) {
                call.future.complete(Err(err.clone()));
            }
            return Err(err);
        }

        let pending = Arc::clone(&self.pending);
        self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(call) = pending.remove(request_id) {
                tracing::debug!(request_id, "request timed out");
                call.future.fail_timeout();
            }
        });
        Ok(future)
    }

    /// 同步调用。
    pub fn call(&self, request: &Request) -> Result<spark_rpc_core::Value, RpcError> {
        self.request(request, None)?.get()
    }

    /// 单向调用：只发送，不登记挂起条目。
    pub fn send_one_way(&self, request: &Request) -> Result<(), RpcError> {
        self.send(request)
    }
}

fn on_response_frame(pending: &PendingCalls, codec: &dyn Codec, url: &Url, frame: Frame) {
    if frame.message_type != MessageType::Response {
        tracing::warn!(
            request_id = frame.request_id,
            message_type = ?frame.message_type,
            "client ignored non-response frame"
        );
        return;
    }
    match frame::decode_message(codec, url, &frame) {
        Ok(Message::Response(response)) => match pending.remove(response.request_id()) {
            Some(call) => {
                call.future.complete_response(response);
            }
            None => tracing::debug!(
                request_id = response.request_id(),
                "late response discarded"
            ),
        },
        Ok(Message::Request(_)) => {}
        Err(err) => {
            tracing::warn!(request_id = frame.request_id, error = %err, "failed to decode response");
            if let Some(call) = pending.remove(frame.request_id) {
                call.future.complete(Err(err));
            }
        }
    }
}

impl Node for TcpClient {
    fn init(&self) -> Result<(), RpcError> {
        if self.state.is_closed() {
            return Err(closed_error(format_args!("client {}", self.url.address())));
        }
        let mut slot = self.connection.lock();
        if slot.as_ref().is_none_or(|conn| !conn.is_alive()) {
            *slot = Some(self.connect()?);
        }
        self.state.mark_available();
        Ok(())
    }

    fn destroy(&self) {
        if !self.state.close() {
            return;
        }
        if let Some(conn) = self.connection.lock().take() {
            conn.abort();
        }
        let failed = self
            .pending
            .fail_all(&closed_error(format_args!("client {}", self.url.address())));
        tracing::debug!(peer = %self.url.address(), failed_calls = failed, "client destroyed");
    }

    fn is_available(&self) -> bool {
        self.state.is_available()
    }

    fn describe(&self) -> String {
        format!("tcp client {} [{}]", self.url.address(), self.state.status())
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.destroy();
    }
}
