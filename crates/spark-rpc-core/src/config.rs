//! 声明式服务/引用描述，从 TOML 加载并转换为 [`Url`]。
//!
//! # 教案式说明
//! - **意图 (Why)**：部署者以文件描述“暴露哪些服务、引用哪些远端”，核心层只消费 URL 参数，
//!   因此描述对象的唯一职责是落地为 URL；
//! - **契约 (What)**：未填写的字段不写入 URL，读取时由 [`UrlParam`] 默认值兜底；
//!   `parameters` 表允许透传任意扩展参数；
//! - **风险 (Trade-offs)**：不做跨字段校验（例如 `minWorkerThread <= maxWorkerThread`），
//!   由消费方在初始化时夹紧。

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::RpcError;
use crate::url::{Url, UrlParam};

const DEFAULT_PROTOCOL: &str = "spark";
const DEFAULT_HOST: &str = "127.0.0.1";

/// 顶层配置文档。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RpcConfig {
    pub services: Vec<ServiceDescriptor>,
    pub references: Vec<ReferenceDescriptor>,
}

impl RpcConfig {
    /// 从 TOML 文本解析。
    pub fn from_toml_str(text: &str) -> Result<Self, RpcError> {
        toml::from_str(text).map_err(|err| RpcError::Config(format!("invalid rpc config: {err}")))
    }

    /// 从文件加载。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RpcError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            RpcError::Config(format!("failed to read `{}`: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }
}

/// 服务端暴露描述。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServiceDescriptor {
    pub interface: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub serialization: Option<String>,
    #[serde(default)]
    pub min_worker_threads: Option<u32>,
    #[serde(default)]
    pub max_worker_threads: Option<u32>,
    #[serde(default)]
    pub worker_queue_size: Option<u32>,
    #[serde(default)]
    pub max_content_length: Option<u32>,
    #[serde(default)]
    pub buffer_size: Option<u32>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    pub fn into_url(self) -> Url {
        let mut url = Url::new(
            self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL),
            self.host.as_deref().unwrap_or(DEFAULT_HOST),
            self.port,
            self.interface,
        );
        put(&mut url, UrlParam::Version, self.version);
        put(&mut url, UrlParam::Group, self.group);
        put(&mut url, UrlParam::Serialization, self.serialization);
        put(&mut url, UrlParam::MinWorkerThread, self.min_worker_threads);
        put(&mut url, UrlParam::MaxWorkerThread, self.max_worker_threads);
        put(&mut url, UrlParam::WorkerQueueSize, self.worker_queue_size);
        put(&mut url, UrlParam::MaxContentLength, self.max_content_length);
        put(&mut url, UrlParam::BufferSize, self.buffer_size);
        for (key, value) in self.parameters {
            url.set_parameter(key, value);
        }
        url
    }
}

/// 客户端引用描述。`address` 可重复出现多个实例。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReferenceDescriptor {
    pub interface: String,
    #[serde(default)]
    pub protocol: Option<String>,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub serialization: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<i32>,
    #[serde(default)]
    pub loadbalance: Option<String>,
    #[serde(default)]
    pub ha_strategy: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl ReferenceDescriptor {
    /// 每个地址生成一个 URL。
    pub fn into_urls(self) -> Result<Vec<Url>, RpcError> {
        if self.addresses.is_empty() {
            return Err(RpcError::Config(format!(
                "reference `{}` declares no addresses",
                self.interface
            )));
        }
        let protocol = self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL);
        self.addresses
            .iter()
            .map(|address| {
                let (host, port) = address.rsplit_once(':').ok_or_else(|| {
                    RpcError::Config(format!("address `{address}` is missing a port"))
                })?;
                let port = port.parse::<u16>().map_err(|err| {
                    RpcError::Config(format!("address `{address}` has an invalid port: {err}"))
                })?;
                let mut url = Url::new(protocol, host, port, self.interface.clone());
                put(&mut url, UrlParam::Version, self.version.clone());
                put(&mut url, UrlParam::Group, self.group.clone());
                put(&mut url, UrlParam::Serialization, self.serialization.clone());
                put(&mut url, UrlParam::RequestTimeout, self.request_timeout_ms);
                put(&mut url, UrlParam::ConnectTimeout, self.connect_timeout_ms);
                put(&mut url, UrlParam::Retries, self.retries);
                put(&mut url, UrlParam::LoadBalance, self.loadbalance.clone());
                put(&mut url, UrlParam::HaStrategy, self.ha_strategy.clone());
                for (key, value) in &self.parameters {
                    url.set_parameter(key.clone(), value.clone());
                }
                Ok(url)
            })
            .collect()
    }
}

fn put<T: ToString>(url: &mut Url, param: UrlParam, value: Option<T>) {
    if let Some(value) = value {
        url.set_parameter(param.key(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[services]]
interface = "Echo"
port = 20880
max_worker_threads = 8

[[references]]
interface = "Echo"
addresses = ["127.0.0.1:20880", "127.0.0.1:20881"]
retries = -1
loadbalance = "roundrobin"

[references.parameters]
trace = "on"
"#;

    /// TOML 描述转换为 URL，未填写字段回退默认值。
    #[test]
    fn descriptors_convert_into_urls() {
        let config = RpcConfig::from_toml_str(SAMPLE).expect("示例配置应解析成功");
        let service = config.services[0].clone().into_url();
        assert_eq!(service.to_string(), "spark://127.0.0.1:20880/Echo?maxWorkerThread=8");
        assert_eq!(service.int_param(UrlParam::MinWorkerThread), 2);

        let urls = config.references[0]
            .clone()
            .into_urls()
            .expect("引用地址应合法");
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[1].port(), 20881);
        assert_eq!(urls[0].int_param(UrlParam::Retries), -1);
        assert_eq!(urls[0].param(UrlParam::LoadBalance), "roundrobin");
        assert_eq!(urls[0].parameter("trace"), Some("on"));
    }

    /// 缺少地址的引用被拒绝。
    #[test]
    fn reference_without_addresses_is_rejected() {
        let descriptor = ReferenceDescriptor {
            interface: "Echo".into(),
            protocol: None,
            addresses: Vec::new(),
            version: None,
            group: None,
            serialization: None,
            request_timeout_ms: None,
            connect_timeout_ms: None,
            retries: None,
            loadbalance: None,
            ha_strategy: None,
            parameters: BTreeMap::new(),
        };
        assert!(matches!(descriptor.into_urls(), Err(RpcError::Config(_))));
    }
}
