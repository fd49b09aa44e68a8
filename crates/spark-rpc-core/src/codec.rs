//! 编解码器：在序列化器之上完成“消息 ↔ 负载字节”的转换。
//!
//! # 教案式说明
//! - **意图 (Why)**：帧层只搬运字节，编解码器负责按端点配置选择序列化器，并依据帧头类型标记
//!   决定反序列化目标（请求或响应）；
//! - **契约 (What)**：不解释负载语义；类型标记非法或负载损坏时返回错误，由调用方决定关闭连接
//!   或合成错误响应；
//! - **实现 (How)**：[`DefaultCodec`] 每次编解码按 URL 参数 `serialization` 解析序列化器，
//!   序列化器为单例，解析开销只是一次名称查找。

use std::sync::Arc;

use crate::error::RpcError;
use crate::extension::{ExtensionPoint, ExtensionRegistry};
use crate::message::{Message, MessageRef, MessageType};
use crate::serialization::Serializer;
use crate::url::{Url, UrlParam};

/// 编解码能力。
pub trait Codec: Send + Sync {
    fn encode(&self, url: &Url, message: MessageRef<'_>) -> Result<Vec<u8>, RpcError>;

    fn decode(
        &self,
        url: &Url,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Message, RpcError>;
}

impl ExtensionPoint for dyn Codec {
    const CAPABILITY: &'static str = "codec";
    const DEFAULT: Option<&'static str> = Some("default");
}

/// 默认编解码器。
#[derive(Clone, Debug)]
pub struct DefaultCodec {
    registry: ExtensionRegistry,
}

impl DefaultCodec {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self { registry }
    }

    fn serializer(&self, url: &Url) -> Result<Arc<dyn Serializer>, RpcError> {
        Ok(self
            .registry
            .resolve::<dyn Serializer>(url.param(UrlParam::Serialization))?)
    }
}

impl Codec for DefaultCodec {
    fn encode(&self, url: &Url, message: MessageRef<'_>) -> Result<Vec<u8>, RpcError> {
        let serializer = self.serializer(url)?;
        match message {
            MessageRef::Request(request) => serializer.serialize_request(request),
            MessageRef::Response(response) => serializer.serialize_response(response),
        }
    }

    fn decode(
        &self,
        url: &Url,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<Message, RpcError> {
        let serializer = self.serializer(url)?;
        let message = match message_type {
            MessageType::Request | MessageType::OneWayRequest => {
                Message::Request(serializer.deserialize_request(payload)?)
            }
            MessageType::Response => Message::Response(serializer.deserialize_response(payload)?),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response, Value};

    /// 编解码器按 URL 参数选择序列化器，并依据类型标记还原消息。
    #[test]
    fn codec_follows_url_serialization() {
        let registry = ExtensionRegistry::with_builtins().expect("装配内置扩展");
        let codec = registry
            .resolve_default::<dyn Codec>()
            .expect("解析编解码器")
            .expect("声明了默认编解码器");
        let json = Url::new("spark", "127.0.0.1", 1, "Echo").with_parameter("serialization", "json");

        let response = Response::success(5, Value::from("pong"));
        let payload = codec
            .encode(&json, MessageRef::from(&response))
            .expect("编码成功");
        assert_eq!(payload.first(), Some(&b'{'));
        let decoded = codec
            .decode(&json, MessageType::Response, &payload)
            .expect("解码成功");
        assert_eq!(decoded, Message::Response(response));

        let request = Request::new("Echo", "echo", vec![Value::from("x")]);
        let postcard = Url::new("spark", "127.0.0.1", 1, "Echo");
        let payload = codec
            .encode(&postcard, MessageRef::from(&request))
            .expect("编码成功");
        assert!(codec.decode(&postcard, MessageType::Response, &payload).is_err());
    }

    /// 未登记的序列化器名称映射为配置错误。
    #[test]
    fn unknown_serializer_is_a_config_error() {
        let codec = DefaultCodec::new(ExtensionRegistry::with_builtins().expect("装配内置扩展"));
        let url = Url::new("spark", "127.0.0.1", 1, "Echo").with_parameter("serialization", "xml");
        let response = Response::success(1, Value::Unit);
        let err = codec
            .encode(&url, MessageRef::from(&response))
            .expect_err("未知序列化器必须失败");
        assert!(matches!(err, RpcError::Extension(_)));
    }
}
