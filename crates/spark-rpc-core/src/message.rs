//! # message 模块说明
//!
//! ## 角色定位（Why）
//! - 定义线上传输的两种值类型：[`Request`] 与 [`Response`]，以及承载动态参数/返回值的 [`Value`]；
//! - 方法签名以“参数类型名”序列描述，服务端据此在注册期构建的调用表中定位方法。
//!
//! ## 核心契约（What）
//! - `Request` 创建后除附件（attachments）外不可变；请求号由进程级原子计数器分配，从 1 开始单调递增；
//! - `Response` 的结果与错误互斥，由 [`ResponseBody`] 在类型层面保证；
//! - 帧头中的类型标记 [`MessageType`] 位于序列化负载之外，编解码器依据它选择反序列化目标。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::{
    self, DeserializeSeed, Deserializer, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor,
};
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, RpcError};
use crate::provider::service_key;
use crate::url::UrlParam;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// 分配进程内唯一的请求号。
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// 反序列化 [`Value`] 时允许的最大嵌套层数，顶层值计为第 1 层。
pub const MAX_VALUE_DEPTH: usize = 64;

/// 动态参数与返回值。
///
/// 反序列化为手写实现：逐层计数嵌套深度，超过 [`MAX_VALUE_DEPTH`] 即返回错误，
/// 使恶意构造的深层负载只让所在连接得到解码失败，而不会耗尽 I/O 线程的栈。
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Value {
    Unit,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// 参数类型描述符，用于方法签名匹配。
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(value) => Some(*value),
            Value::U64(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::U64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::I64(value) => write!(f, "{value}"),
            Value::U64(value) => write!(f, "{value}"),
            Value::F64(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value:?}"),
            Value::Bytes(value) => write!(f, "<{} bytes>", value.len()),
            Value::List(items) => write!(f, "<list of {}>", items.len()),
            Value::Map(entries) => write!(f, "<map of {}>", entries.len()),
        }
    }
}

#[derive(Deserialize)]
#[serde(variant_identifier)]
enum ValueTag {
    Unit,
    Bool,
    I64,
    U64,
    F64,
    Str,
    Bytes,
    List,
    Map,
}

const VALUE_VARIANTS: &[&str] = &[
    "Unit", "Bool", "I64", "U64", "F64", "Str", "Bytes", "List", "Map",
];

/// 预分配上限；长度前缀来自对端，不可信。
const MAX_PREALLOC: usize = 1024;

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ValueSeed { depth: 1 }.deserialize(deserializer)
    }
}

#[derive(Clone, Copy)]
struct ValueSeed {
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for ValueSeed {
    type Value = Value;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        if self.depth > MAX_VALUE_DEPTH {
            return Err(de::Error::custom(format_args!(
                "value nesting exceeds {MAX_VALUE_DEPTH} levels"
            )));
        }
        deserializer.deserialize_enum("Value", VALUE_VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for ValueSeed {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("enum Value")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Value, A::Error> {
        let (tag, variant) = data.variant::<ValueTag>()?;
        let nested = NestedSeed {
            depth: self.depth + 1,
        };
        match tag {
            ValueTag::Unit => variant.unit_variant().map(|()| Value::Unit),
            ValueTag::Bool => variant.newtype_variant().map(Value::Bool),
            ValueTag::I64 => variant.newtype_variant().map(Value::I64),
            ValueTag::U64 => variant.newtype_variant().map(Value::U64),
            ValueTag::F64 => variant.newtype_variant().map(Value::F64),
            ValueTag::Str => variant.newtype_variant().map(Value::Str),
            ValueTag::Bytes => variant.newtype_variant().map(Value::Bytes),
            ValueTag::List => variant.newtype_variant_seed(ListSeed(nested)).map(Value::List),
            ValueTag::Map => variant.newtype_variant_seed(MapSeed(nested)).map(Value::Map),
        }
    }
}

/// 容器元素所在层。
#[derive(Clone, Copy)]
struct NestedSeed {
    depth: usize,
}

impl NestedSeed {
    fn element(self) -> ValueSeed {
        ValueSeed { depth: self.depth }
    }
}

struct ListSeed(NestedSeed);

impl<'de> DeserializeSeed<'de> for ListSeed {
    type Value = Vec<Value>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Vec<Value>, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ListSeed {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Value>, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(MAX_PREALLOC));
        while let Some(item) = seq.next_element_seed(self.0.element())? {
            items.push(item);
        }
        Ok(items)
    }
}

struct MapSeed(NestedSeed);

impl<'de> DeserializeSeed<'de> for MapSeed {
    type Value = BTreeMap<String, Value>;

    fn deserialize<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<BTreeMap<String, Value>, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for MapSeed {
    type Value = BTreeMap<String, Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of values")
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut map: A,
    ) -> Result<BTreeMap<String, Value>, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(self.0.element())?;
            entries.insert(key, value);
        }
        Ok(entries)
    }
}

/// 调用模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    /// 需要响应。
    TwoWay,
    /// 单向调用，服务端不回写响应。
    OneWay,
}

/// 帧头中的消息类型标记。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    OneWayRequest = 2,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(MessageType::Request),
            1 => Some(MessageType::Response),
            2 => Some(MessageType::OneWayRequest),
            _ => None,
        }
    }
}

/// 远程调用请求。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    request_id: u64,
    interface_name: String,
    method_name: String,
    arguments: Vec<Value>,
    parameter_types: Vec<String>,
    attachments: BTreeMap<String, String>,
    call_kind: CallKind,
}

impl Request {
    /// 构造双向请求，分配新请求号，参数类型由实参推导。
    pub fn new(
        interface_name: impl Into<String>,
        method_name: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        let parameter_types = arguments
            .iter()
            .map(|argument| argument.type_name().to_owned())
            .collect();
        Self {
            request_id: next_request_id(),
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            arguments,
            parameter_types,
            attachments: BTreeMap::new(),
            call_kind: CallKind::TwoWay,
        }
    }

    /// 转为单向调用。
    pub fn one_way(mut self) -> Self {
        self.call_kind = CallKind::OneWay;
        self
    }

    /// 追加附件（构建器风格）。
    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn attachments(&self) -> &BTreeMap<String, String> {
        &self.attachments
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attachments.insert(key.into(), value.into());
    }

    pub fn call_kind(&self) -> CallKind {
        self.call_kind
    }

    pub fn is_one_way(&self) -> bool {
        self.call_kind == CallKind::OneWay
    }

    /// 帧头类型标记。
    pub fn message_type(&self) -> MessageType {
        match self.call_kind {
            CallKind::TwoWay => MessageType::Request,
            CallKind::OneWay => MessageType::OneWayRequest,
        }
    }

    /// 由接口名与 `version`/`group` 附件推导服务键。
    pub fn service_key(&self) -> String {
        service_key(
            &self.interface_name,
            self.attachment(UrlParam::Version.key())
                .unwrap_or(UrlParam::Version.default_value()),
            self.attachment(UrlParam::Group.key())
                .unwrap_or(UrlParam::Group.default_value()),
        )
    }

    /// `interface.method(types)` 形式的方法描述，用于日志与错误信息。
    pub fn method_signature(&self) -> String {
        format!(
            "{}.{}({})",
            self.interface_name,
            self.method_name,
            self.parameter_types.join(",")
        )
    }
}

/// 响应体：结果与错误互斥。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    Value(Value),
    Error(RemoteError),
}

/// 远程调用响应。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    request_id: u64,
    body: ResponseBody,
    process_time_ms: u64,
}

impl Response {
    pub fn success(request_id: u64, value: Value) -> Self {
        Self {
            request_id,
            body: ResponseBody::Value(value),
            process_time_ms: 0,
        }
    }

    pub fn failure(request_id: u64, error: RemoteError) -> Self {
        Self {
            request_id,
            body: ResponseBody::Error(error),
            process_time_ms: 0,
        }
    }

    /// 记录服务端处理耗时（毫秒）。
    pub fn with_process_time_ms(mut self, process_time_ms: u64) -> Self {
        self.process_time_ms = process_time_ms;
        self
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Value(value) => Some(value),
            ResponseBody::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RemoteError> {
        match &self.body {
            ResponseBody::Value(_) => None,
            ResponseBody::Error(error) => Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error(_))
    }

    pub fn process_time_ms(&self) -> u64 {
        self.process_time_ms
    }

    /// 还原为调用方可见的结果，远端错误保持类别。
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.body {
            ResponseBody::Value(value) => Ok(value),
            ResponseBody::Error(error) => Err(RpcError::from_remote(error)),
        }
    }
}

/// 解码后的消息。
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn request_id(&self) -> u64 {
        match self {
            Message::Request(request) => request.request_id(),
            Message::Response(response) => response.request_id(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.as_message_ref().message_type()
    }

    pub fn as_message_ref(&self) -> MessageRef<'_> {
        match self {
            Message::Request(request) => MessageRef::Request(request),
            Message::Response(response) => MessageRef::Response(response),
        }
    }
}

/// 待编码消息的借用视图，避免编码前克隆。
#[derive(Clone, Copy, Debug)]
pub enum MessageRef<'a> {
    Request(&'a Request),
    Response(&'a Response),
}

impl MessageRef<'_> {
    pub fn request_id(&self) -> u64 {
        match self {
            MessageRef::Request(request) => request.request_id(),
            MessageRef::Response(response) => response.request_id(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            MessageRef::Request(request) => request.message_type(),
            MessageRef::Response(_) => MessageType::Response,
        }
    }
}

impl<'a> From<&'a Request> for MessageRef<'a> {
    fn from(request: &'a Request) -> Self {
        MessageRef::Request(request)
    }
}

impl<'a> From<&'a Response> for MessageRef<'a> {
    fn from(response: &'a Response) -> Self {
        MessageRef::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClass, codes};

    /// 请求号单调递增，参数类型由实参推导。
    #[test]
    fn request_ids_increase_and_types_are_derived() {
        let first = Request::new("Echo", "echo", vec![Value::from("ping"), Value::from(3_i64)]);
        let second = Request::new("Echo", "echo", Vec::new());
        assert!(second.request_id() > first.request_id());
        assert!(first.request_id() >= 1);
        assert_eq!(first.parameter_types(), ["string", "i64"]);
        assert_eq!(first.method_signature(), "Echo.echo(string,i64)");
        assert_eq!(first.message_type(), MessageType::Request);
        assert_eq!(first.clone().one_way().message_type(), MessageType::OneWayRequest);
    }

    fn nested_list(levels: usize) -> Value {
        (0..levels).fold(Value::Unit, |inner, _| Value::List(vec![inner]))
    }

    /// 上限以内的嵌套在两种格式下都能还原，超限时返回错误而不是递归到底。
    #[test]
    fn value_nesting_is_bounded() {
        let within = Value::Map(BTreeMap::from([(
            "k".to_owned(),
            nested_list(MAX_VALUE_DEPTH - 2),
        )]));
        let bytes = postcard::to_stdvec(&within).expect("编码成功");
        assert_eq!(postcard::from_bytes::<Value>(&bytes).expect("上限以内"), within);
        let shallow = nested_list(16);
        let text = serde_json::to_string(&shallow).expect("编码成功");
        assert_eq!(serde_json::from_str::<Value>(&text).expect("上限以内"), shallow);

        let beyond = postcard::to_stdvec(&nested_list(MAX_VALUE_DEPTH)).expect("编码成功");
        let err = postcard::from_bytes::<Value>(&beyond).expect_err("超过嵌套上限");
        assert_eq!(err, postcard::Error::SerdeDeCustom);
        let text = serde_json::to_string(&nested_list(MAX_VALUE_DEPTH)).expect("编码成功");
        assert!(serde_json::from_str::<Value>(&text).is_err());
    }

    /// 手工拼出的百万层列表负载被拒绝，长度前缀不会触发超大预分配。
    #[test]
    fn crafted_deep_payload_is_rejected() {
        let levels = 1_000_000;
        let mut bytes = Vec::with_capacity(levels * 2 + 2);
        for _ in 0..levels {
            bytes.extend_from_slice(&[7, 1]);
        }
        bytes.extend_from_slice(&[7, 0]);
        assert!(postcard::from_bytes::<Value>(&bytes).is_err());

        let huge_length = [7_u8, 0xff, 0xff, 0xff, 0xff, 0x0f];
        assert!(postcard::from_bytes::<Value>(&huge_length).is_err());
    }

    /// 服务键取自附件并回退默认版本与分组。
    #[test]
    fn service_key_uses_attachments() {
        let request = Request::new("Echo", "echo", Vec::new());
        assert_eq!(request.service_key(), "Echo:1.0:default");
        let request = request.with_attachment("group", "blue").with_attachment("version", "2.0");
        assert_eq!(request.service_key(), "Echo:2.0:blue");
    }

    /// 错误响应还原为保持类别的本地错误。
    #[test]
    fn response_into_result_restores_error_class() {
        let response = Response::failure(9, RemoteError::business(codes::BIZ_FAILURE, "boom"));
        assert!(response.is_error());
        assert!(response.value().is_none());
        let err = response.into_result().expect_err("错误响应必须还原为错误");
        assert_eq!(err.class(), ErrorClass::Business);

        let ok = Response::success(9, Value::from("pong")).with_process_time_ms(4);
        assert_eq!(ok.process_time_ms(), 4);
        assert_eq!(ok.into_result().expect("成功响应"), Value::from("pong"));
    }
}
