#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# spark-rpc-transport-tcp

## 设计动机（Why）
- 为 `spark-rpc-core` 的 [`Protocol`](spark_rpc_core::Protocol) 契约提供基于 Tokio 的 TCP 实现；
- 调用方可以在任意线程（包括非 Tokio 线程）上同步调用，I/O 始终运行在框架自有的运行时上。

## 核心契约（What）
- [`TcpServer`]：监听、切帧、把请求交给有界业务线程池，饱和时合成过载响应；
- [`TcpClient`]：单连接、按请求号关联响应，支持同步/异步/单向调用与惰性重连；
- [`DefaultReference`] / [`DefaultProtocol`]：把客户端与服务端适配为引用与导出器；
- [`install`]：把 `spark` 协议登记到扩展注册中心。

## 风险与考量（Trade-offs）
- 每个监听端点独占一个运行时；端点数量很多时线程数随之线性增长。
"#]

mod client;
mod connection;
mod error;
mod pending;
mod pool;
mod protocol;
mod reference;
mod runtime;
mod server;
mod socket;

use std::sync::Arc;

use spark_rpc_core::{ExtensionError, ExtensionRegistry, Protocol};

pub use client::TcpClient;
pub use pool::{PoolConfig, Rejected};
pub use protocol::{DefaultExporter, DefaultProtocol};
pub use reference::DefaultReference;
pub use server::TcpServer;
pub use socket::SocketOptions;

/// 登记 `spark` 协议扩展。
pub fn install(registry: &ExtensionRegistry) -> Result<(), ExtensionError> {
    registry.declare::<dyn Protocol, _>("spark.protocol.tcp", |injector| {
        Ok(Arc::new(DefaultProtocol::new(injector.registry())) as Arc<dyn Protocol>)
    })?;
    registry.add_descriptor::<dyn Protocol>(
        "spark-rpc-transport-tcp/extensions/protocol",
        include_str!("../extensions/protocol"),
    );
    Ok(())
}
