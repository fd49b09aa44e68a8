//! 可插拔序列化器：字节数组契约。
//!
//! # 教案式说明
//! - **意图 (Why)**：编解码器只关心“消息 ↔ 字节”，具体编码格式由 URL 参数 `serialization`
//!   通过扩展注册中心选择；
//! - **契约 (What)**：序列化器必须无状态且线程安全；输入非法时返回
//!   [`RpcError::Serialization`]，不得 panic；
//! - **实现 (How)**：默认 `postcard`（紧凑、非自描述的二进制格式），备选 `json`（便于抓包排障）。

use crate::error::RpcError;
use crate::extension::ExtensionPoint;
use crate::message::{Request, Response};

/// 序列化能力。
pub trait Serializer: Send + Sync {
    /// 扩展名称。
    fn name(&self) -> &'static str;

    fn serialize_request(&self, request: &Request) -> Result<Vec<u8>, RpcError>;

    fn serialize_response(&self, response: &Response) -> Result<Vec<u8>, RpcError>;

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request, RpcError>;

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response, RpcError>;
}

impl ExtensionPoint for dyn Serializer {
    const CAPABILITY: &'static str = "serialization";
    const DEFAULT: Option<&'static str> = Some("postcard");
}

fn failure(serializer: &str, err: impl std::fmt::Display) -> RpcError {
    RpcError::Serialization {
        serializer: serializer.to_owned(),
        message: err.to_string(),
    }
}

/// `postcard` 紧凑二进制序列化。
#[derive(Clone, Copy, Debug, Default)]
pub struct PostcardSerializer;

impl Serializer for PostcardSerializer {
    fn name(&self) -> &'static str {
        "postcard"
    }

    fn serialize_request(&self, request: &Request) -> Result<Vec<u8>, RpcError> {
        postcard::to_stdvec(request).map_err(|err| failure(self.name(), err))
    }

    fn serialize_response(&self, response: &Response) -> Result<Vec<u8>, RpcError> {
        postcard::to_stdvec(response).map_err(|err| failure(self.name(), err))
    }

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request, RpcError> {
        postcard::from_bytes(bytes).map_err(|err| failure(self.name(), err))
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response, RpcError> {
        postcard::from_bytes(bytes).map_err(|err| failure(self.name(), err))
    }
}

/// `serde_json` 文本序列化。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize_request(&self, request: &Request) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(request).map_err(|err| failure(self.name(), err))
    }

    fn serialize_response(&self, response: &Response) -> Result<Vec<u8>, RpcError> {
        serde_json::to_vec(response).map_err(|err| failure(self.name(), err))
    }

    fn deserialize_request(&self, bytes: &[u8]) -> Result<Request, RpcError> {
        serde_json::from_slice(bytes).map_err(|err| failure(self.name(), err))
    }

    fn deserialize_response(&self, bytes: &[u8]) -> Result<Response, RpcError> {
        serde_json::from_slice(bytes).map_err(|err| failure(self.name(), err))
    }
}
