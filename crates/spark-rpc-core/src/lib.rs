#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# spark-rpc-core

## 设计动机（Why）
- **定位**：RPC 框架的核心契约层，负责把“远程方法调用”拆解为可插拔的策略与稳定的数据模型，
  传输实现（TCP）与集群容错（负载均衡 + 故障转移）均只依赖本 crate 暴露的 trait。
- **架构角色**：自叶到根依次为扩展注册中心 → 消息模型与编解码 → 线协议分帧 → 服务路由与调用上下文；
  传输层、集群层只需把这些积木按数据流串起来。

## 核心契约（What）
- [`extension::ExtensionRegistry`]：按能力（capability）+ 名称解析策略实现，支持单例/原型作用域与依赖注入；
- [`message`]：`Request`/`Response` 值类型与动态参数 [`message::Value`]；
- [`codec::Codec`] + [`serialization::Serializer`]：字节数组契约下的可插拔序列化；
- [`frame`]：16 字节定长帧头 + 负载的长度前缀分帧；
- [`router::MessageRouter`]：服务键 → Provider 的分发表，永不向外抛出故障；
- [`url::Url`]：贯穿全部组件的配置载体，缺失键回退到 [`url::UrlParam`] 声明的默认值。

## 风险与考量（Trade-offs）
- 方法分发采用注册期构建的调用表而非反射，服务实现需在注册时显式声明方法签名；
- 调用上下文显式作为参数传递，不依赖线程局部存储，天然兼容工作线程复用。
"#]

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod extension;
pub mod frame;
pub mod future;
pub mod message;
pub mod node;
pub mod provider;
pub mod proxy;
pub mod reference;
pub mod registry;
pub mod router;
pub mod serialization;
pub mod url;

pub use codec::{Codec, DefaultCodec};
pub use context::CallContext;
pub use error::{ErrorClass, ExtensionError, RemoteError, Result, RpcError, codes};
pub use extension::{ExtensionPoint, ExtensionRegistry, Injector, Scope};
pub use frame::{Frame, FrameDecoder, ProtocolError};
pub use future::ResponseFuture;
pub use message::{
    CallKind, MAX_VALUE_DEPTH, Message, MessageRef, MessageType, Request, Response, ResponseBody,
    Value, next_request_id,
};
pub use node::{ActiveCounter, ActiveGuard, Node, NodeState, NodeStatus};
pub use provider::{DefaultProvider, Provider, ServiceError, service_key};
pub use proxy::{DynamicProxyFactory, InvocationHandler, ProxyFactory, ServiceProxy};
pub use reference::{Exporter, Protocol, Reference};
pub use registry::{LocalRegistry, LocalRegistryFactory, NotifyListener, Registry, RegistryFactory};
pub use router::{MessageHandler, MessageRouter};
pub use serialization::{JsonSerializer, PostcardSerializer, Serializer};
pub use url::{Url, UrlParam};

/// 框架名，用于线程命名与日志前缀。
pub const FRAMEWORK_NAME: &str = "spark-rpc";
