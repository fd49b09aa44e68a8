//! 套接字选项与阻塞式建连/监听。
//!
//! # 教案式说明
//! - **意图 (Why)**：服务端与客户端都可能在任意线程（包括非 Tokio 线程）上被初始化，
//!   因此先用标准库 + `socket2` 同步完成监听/建连，再在运行时上下文中转换为 Tokio 套接字，
//!   避免在调用线程上 `block_on`；
//! - **契约 (What)**：
//!   - [`SocketOptions`] 从 URL 读取缓冲区尺寸，统一开启 `TCP_NODELAY` 与 keepalive；
//!   - 返回的标准库套接字均已设置为非阻塞，可直接交给 `from_std`。

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use spark_rpc_core::{RpcError, Url, UrlParam};

use crate::error::{self, map_io_error};

const LISTEN_BACKLOG: i32 = 1024;
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// 连接级套接字选项。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketOptions {
    pub buffer_size: usize,
    pub nodelay: bool,
    pub keepalive: Option<Duration>,
}

impl SocketOptions {
    pub fn from_url(url: &Url) -> Self {
        Self {
            buffer_size: usize::try_from(url.int_param(UrlParam::BufferSize).max(1024))
                .unwrap_or(64 * 1024),
            nodelay: true,
            keepalive: Some(KEEPALIVE_IDLE),
        }
    }

    /// 把选项应用到已建立的连接。
    pub(crate) fn apply(&self, stream: &TcpStream) -> Result<(), RpcError> {
        stream
            .set_nodelay(self.nodelay)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let sock = SockRef::from(stream);
        sock.set_recv_buffer_size(self.buffer_size)
            .and_then(|_| sock.set_send_buffer_size(self.buffer_size))
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        if let Some(idle) = self.keepalive {
            sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))
                .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        }
        Ok(())
    }
}

/// 解析 URL 中的 `host:port`，取第一个地址。
pub(crate) fn resolve(url: &Url, kind: error::OperationKind) -> Result<SocketAddr, RpcError> {
    (url.host(), url.port())
        .to_socket_addrs()
        .map_err(|err| map_io_error(kind, err))?
        .next()
        .ok_or_else(|| {
            RpcError::transport(kind.code, format!("{}: cannot resolve `{}`", kind.message, url.address()))
        })
}

/// 同步绑定监听套接字（`SO_REUSEADDR`），返回非阻塞的标准库监听器。
pub(crate) fn bind(addr: SocketAddr) -> Result<TcpListener, RpcError> {
    let map = |err| map_io_error(error::BIND, err);
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(map)?;
    socket.set_reuse_address(true).map_err(map)?;
    socket.bind(&addr.into()).map_err(map)?;
    socket.listen(LISTEN_BACKLOG).map_err(map)?;
    socket.set_nonblocking(true).map_err(map)?;
    Ok(socket.into())
}

/// 带超时的同步建连，返回已配置、非阻塞的标准库连接。
pub(crate) fn connect(
    addr: SocketAddr,
    timeout: Duration,
    options: &SocketOptions,
) -> Result<TcpStream, RpcError> {
    let timeout = if timeout.is_zero() {
        Duration::from_millis(1)
    } else {
        timeout
    };
    let stream =
        TcpStream::connect_timeout(&addr, timeout).map_err(|err| map_io_error(error::CONNECT, err))?;
    options.apply(&stream)?;
    stream
        .set_nonblocking(true)
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    Ok(stream)
}
