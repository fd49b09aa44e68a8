//! TCP 服务端。
//!
//! # 教案式说明
//! - **意图 (Why)**：接收连接、切帧、解码请求，再把业务执行交给有界线程池；
//!   I/O 线程只负责字节搬运，业务阻塞不会拖慢其他连接的读写；
//! - **契约 (What)**：
//!   - `init` 同步完成监听，返回后即可建连；重复 `init` 无副作用；
//!   - 双向请求必有且仅有一个响应：业务结果、业务异常、解码失败或线程池饱和（`rpc.server.overloaded`）；
//!   - 单向请求永不产生响应，饱和时直接丢弃并记录 `warn`；
//!   - 协议违规（魔数、版本、超长）直接关闭该连接，不影响其他连接；
//!   - `destroy` 幂等：通知全部连接退出，再在限定时间内关闭运行时；
//! - **实现 (How)**：每个服务端独占一个 Tokio 运行时，accept 循环与每条连接的读/写任务都运行其上，
//!   关闭信号通过 `watch` 通道广播。
//!
//! # 风险与考量（Trade-offs）
//! - 处理耗时从“解码完成”开始计时，不含排队前的网络耗时。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use spark_rpc_core::frame::{self, Frame, FrameDecoder};
use spark_rpc_core::{
    Codec, Message, MessageHandler, MessageRef, MessageType, Node, NodeState, RemoteError,
    Request, Response, RpcError, Url, UrlParam, codes,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, watch};

use crate::connection;
use crate::error::{self, closed_error, map_io_error};
use crate::pool::{PoolConfig, Rejected, WorkerPool};
use crate::runtime;
use crate::socket::{self, SocketOptions};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

struct Running {
    runtime: Runtime,
    shutdown: watch::Sender<bool>,
    local_addr: SocketAddr,
}

/// 连接任务共享的服务端上下文。
struct ServerContext {
    url: Url,
    handler: Arc<dyn MessageHandler>,
    codec: Arc<dyn Codec>,
    pool: WorkerPool,
    options: SocketOptions,
}

/// 单端点 TCP 服务端。
pub struct TcpServer {
    url: Url,
    handler: Arc<dyn MessageHandler>,
    codec: Arc<dyn Codec>,
    state: NodeState,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("url", &self.url.to_string())
            .field("state", &self.state.status())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl TcpServer {
    pub fn new(url: Url, handler: Arc<dyn MessageHandler>, codec: Arc<dyn Codec>) -> Self {
        Self {
            url,
            handler,
            codec,
            state: NodeState::new(),
            running: Mutex::new(None),
        }
    }

    /// 实际监听地址；未启动时为 `None`。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    fn start(&self) -> Result<Running, RpcError> {
        let addr = socket::resolve(&self.url, error::BIND)?;
        let config = PoolConfig::from_url(&self.url);
        let io_threads = usize::try_from(self.url.int_param(UrlParam::IoThreads).max(1)).unwrap_or(1);
        let runtime = runtime::server_runtime(
            &format!("server-{}", addr.port()),
            io_threads,
            config.max_workers,
        )?;

        let std_listener = socket::bind(addr)?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        let listener = {
            let _entered = runtime.enter();
            TcpListener::from_std(std_listener).map_err(|err| map_io_error(error::BIND, err))?
        };

        let context = Arc::new(ServerContext {
            url: self.url.clone(),
            handler: Arc::clone(&self.handler),
            codec: Arc::clone(&self.codec),
            pool: WorkerPool::new(config, runtime.handle().clone()),
            options: SocketOptions::from_url(&self.url),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        runtime.spawn(accept_loop(listener, context, shutdown_rx));

        tracing::info!(
            address = %local_addr,
            io_threads,
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            queue_size = config.queue_size,
            "rpc server listening"
        );
        Ok(Running {
            runtime,
            shutdown,
            local_addr,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        Arc::clone(&context),
                        shutdown.clone(),
                    ));
                }
                Err(err) => {
                    let err = map_io_error(error::ACCEPT, err);
                    tracing::warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
    tracing::debug!("accept loop stopped");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(err) = stream.set_nodelay(context.options.nodelay) {
        tracing::debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY");
    }
    tracing::debug!(peer = %peer, "connection accepted");

    let (reader, writer) = stream.into_split();
    let (outbound, inbound) = mpsc::unbounded_channel();
    tokio::spawn(connection::write_loop(writer, inbound, peer));

    let decoder = FrameDecoder::from_url(&context.url);
    let reading = connection::read_loop(reader, decoder, context.options.buffer_size, peer, |frame| {
        on_request_frame(&context, frame, peer, &outbound)
    });
    tokio::select! {
        reason = reading => {
            tracing::debug!(peer = %peer, reason = %reason, "connection closed");
        }
        _ = shutdown.changed() => {
            tracing::debug!(peer = %peer, "connection closed by server shutdown");
        }
    }
}

fn on_request_frame(
    context: &Arc<ServerContext>,
    frame: Frame,
    peer: SocketAddr,
    outbound: &mpsc::UnboundedSender<Bytes>,
) {
    if frame.message_type == MessageType::Response {
        tracing::warn!(peer = %peer, request_id = frame.request_id, "server ignored response frame");
        return;
    }
    let two_way = frame.message_type == MessageType::Request;
    let request = match frame::decode_message(context.codec.as_ref(), &context.url, &frame) {
        Ok(Message::Request(request)) => request,
        Ok(Message::Response(_)) => return,
        Err(err) => {
            tracing::warn!(peer = %peer, request_id = frame.request_id, error = %err, "failed to decode request");
            if two_way {
                write_response(
                    context,
                    outbound,
                    Response::failure(frame.request_id, err.to_remote()),
                );
            }
            return;
        }
    };
    let decoded_at = Instant::now();

    let task = {
        let context = Arc::clone(context);
        let outbound = outbound.clone();
        move || execute(&context, &request, peer, decoded_at, &outbound)
    };
    if let Err(rejected) = context.pool.try_execute(task) {
        if two_way {
            tracing::warn!(
                peer = %peer,
                request_id = frame.request_id,
                capacity = rejected.capacity,
                "worker pool saturated, rejecting request"
            );
            write_response(
                context,
                outbound,
                overloaded_response(frame.request_id, rejected, decoded_at),
            );
        } else {
            tracing::warn!(
                peer = %peer,
                request_id = frame.request_id,
                capacity = rejected.capacity,
                "worker pool saturated, dropping one-way request"
            );
        }
    }
}

fn execute(
    context: &ServerContext,
    request: &Request,
    peer: SocketAddr,
    decoded_at: Instant,
    outbound: &mpsc::UnboundedSender<Bytes>,
) {
    let response = context.handler.handle(request, Some(peer));
    if request.is_one_way() {
        if let Some(error) = response.error() {
            tracing::debug!(
                request_id = request.request_id(),
                code = %error.code,
                "one-way request failed"
            );
        }
        return;
    }
    write_response(
        context,
        outbound,
        response.with_process_time_ms(elapsed_ms(decoded_at)),
    );
}

/// 线程池饱和时代替业务执行的响应，处理耗时同样从解码完成起算。
fn overloaded_response(request_id: u64, rejected: Rejected, decoded_at: Instant) -> Response {
    Response::failure(
        request_id,
        RemoteError::framework(codes::SERVER_OVERLOADED, rejected.to_string()),
    )
    .with_process_time_ms(elapsed_ms(decoded_at))
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn write_response(
    context: &ServerContext,
    outbound: &mpsc::UnboundedSender<Bytes>,
    response: Response,
) {
    let encoded = frame::encode_message(context.codec.as_ref(), &context.url, MessageRef::from(&response))
        .or_else(|err| {
            tracing::warn!(request_id = response.request_id(), error = %err, "failed to encode response");
            let fallback = Response::failure(response.request_id(), err.to_remote());
            frame::encode_message(context.codec.as_ref(), &context.url, MessageRef::from(&fallback))
        });
    match encoded {
        Ok(bytes) => {
            if outbound.send(bytes).is_err() {
                tracing::debug!(
                    request_id = response.request_id(),
                    "connection closed before response was written"
                );
            }
        }
        Err(err) => tracing::error!(
            request_id = response.request_id(),
            error = %err,
            "response dropped"
        ),
    }
}

impl Node for TcpServer {
    fn init(&self) -> Result<(), RpcError> {
        if self.state.is_closed() {
            return Err(closed_error(format_args!("server {}", self.url.address())));
        }
        let mut running = self.running.lock();
        if running.is_none() {
            *running = Some(self.start()?);
        }
        self.state.mark_available();
        Ok(())
    }

    fn destroy(&self) {
        if !self.state.close() {
            return;
        }
        let Some(running) = self.running.lock().take() else {
            return;
        };
        if running.shutdown.send(true).is_err() {
            tracing::debug!(address = %running.local_addr, "no listeners for shutdown signal");
        }
        if Handle::try_current().is_ok() {
            running.runtime.shutdown_background();
        } else {
            running.runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
        tracing::info!(address = %running.local_addr, "rpc server stopped");
    }

    fn is_available(&self) -> bool {
        self.state.is_available()
    }

    fn describe(&self) -> String {
        match self.local_addr() {
            Some(addr) => format!("tcp server {addr} [{}]", self.state.status()),
            None => format!("tcp server {} [{}]", self.url.address(), self.state.status()),
        }
    }

    fn url(&self) -> &Url {
        &self.url
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.destroy();
    }
}
