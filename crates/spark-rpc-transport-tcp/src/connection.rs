//! 连接读写循环，服务端与客户端共用。
//!
//! - 写循环：从无界通道取出已编码的完整帧顺序写出，写失败即退出，通道随之关闭；
//! - 读循环：把字节流交给 [`FrameDecoder`] 重组，每切出一帧回调一次；对端关闭、I/O 失败或
//!   协议违规时返回关闭原因，调用方据此清理连接。协议违规不会尝试跳过坏数据。

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use spark_rpc_core::frame::{Frame, FrameDecoder};
use spark_rpc_core::RpcError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::error::{self, closed_error, map_io_error};

pub(crate) async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    peer: SocketAddr,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            let err = map_io_error(error::WRITE, err);
            tracing::warn!(peer = %peer, error = %err, "connection write failed");
            break;
        }
    }
    outbound.close();
    if let Err(err) = writer.shutdown().await {
        tracing::debug!(peer = %peer, error = %err, "connection shutdown failed");
    }
}

pub(crate) async fn read_loop<F>(
    mut reader: OwnedReadHalf,
    mut decoder: FrameDecoder,
    buffer_size: usize,
    peer: SocketAddr,
    mut on_frame: F,
) -> RpcError
where
    F: FnMut(Frame),
{
    let mut buffer = BytesMut::with_capacity(buffer_size);
    loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) => return closed_error(format_args!("connection to {peer}")),
            Ok(_) => {}
            Err(err) => return map_io_error(error::READ, err),
        }
        loop {
            match decoder.decode(&mut buffer) {
                Ok(Some(frame)) => on_frame(frame),
                Ok(None) => break,
                Err(violation) => {
                    tracing::warn!(
                        peer = %peer,
                        code = violation.code(),
                        error = %violation,
                        "protocol violation, closing connection"
                    );
                    return violation.into();
                }
            }
        }
    }
}
