//! 端点描述符：贯穿全部组件的配置载体。
//!
//! # 教案式说明
//! - **意图 (Why)**：协议名、地址、服务接口与开放参数表统一由 [`Url`] 携带，服务端线程池、
//!   客户端超时、序列化选择、重试上限等全部以键值对形式读取，组件之间无需额外的配置对象；
//! - **契约 (What)**：
//!   - 文本形式为 `protocol://host:port/path?k1=v1&k2=v2`，参数按键排序，格式化结果稳定可比较；
//!   - 带类型的访问器接收 [`UrlParam`]，键缺失时回退到声明的默认值，绝不因缺失而失败；
//!   - 数值解析失败同样回退到默认值并记录 `warn` 日志，避免一处笔误拖垮整条链路；
//! - **风险 (Trade-offs)**：不做百分号编码，参数值中不得出现 `&`、`=`、`?`。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RpcError;

/// 已声明的参数键及其默认值。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UrlParam {
    Version,
    Group,
    Serialization,
    Codec,
    RequestTimeout,
    Retries,
    MinWorkerThread,
    MaxWorkerThread,
    WorkerQueueSize,
    MaxContentLength,
    BufferSize,
    IoThreads,
    ConnectTimeout,
    LoadBalance,
    HaStrategy,
    Weight,
    Proxy,
}

impl UrlParam {
    /// 参数在 URL 中的键名。
    pub const fn key(self) -> &'static str {
        match self {
            UrlParam::Version => "version",
            UrlParam::Group => "group",
            UrlParam::Serialization => "serialization",
            UrlParam::Codec => "codec",
            UrlParam::RequestTimeout => "requestTimeout",
            UrlParam::Retries => "retries",
            UrlParam::MinWorkerThread => "minWorkerThread",
            UrlParam::MaxWorkerThread => "maxWorkerThread",
            UrlParam::WorkerQueueSize => "workerQueueSize",
            UrlParam::MaxContentLength => "maxContentLength",
            UrlParam::BufferSize => "bufferSize",
            UrlParam::IoThreads => "ioThreads",
            UrlParam::ConnectTimeout => "connectTimeout",
            UrlParam::LoadBalance => "loadbalance",
            UrlParam::HaStrategy => "haStrategy",
            UrlParam::Weight => "weight",
            UrlParam::Proxy => "proxy",
        }
    }

    /// 声明的默认值（文本形式）。
    pub const fn default_value(self) -> &'static str {
        match self {
            UrlParam::Version => "1.0",
            UrlParam::Group => "default",
            UrlParam::Serialization => "postcard",
            UrlParam::Codec => "default",
            UrlParam::RequestTimeout => "3000",
            UrlParam::Retries => "2",
            UrlParam::MinWorkerThread => "2",
            UrlParam::MaxWorkerThread => "200",
            UrlParam::WorkerQueueSize => "0",
            UrlParam::MaxContentLength => "10485760",
            UrlParam::BufferSize => "65536",
            UrlParam::IoThreads => "2",
            UrlParam::ConnectTimeout => "1000",
            UrlParam::LoadBalance => "random",
            UrlParam::HaStrategy => "failover",
            UrlParam::Weight => "1",
            UrlParam::Proxy => "dynamic",
        }
    }
}

/// 结构化端点地址 + 开放参数表。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Url {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl Url {
    /// 构造不带参数的 URL。
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// 解析文本形式的 URL。
    ///
    /// # 契约说明（What）
    /// - 必须包含 `://` 与 `host:port`；端口需为合法 `u16`；
    /// - 路径与查询串可选，查询项缺少 `=` 时视为空值。
    pub fn parse(text: &str) -> Result<Self, RpcError> {
        let (protocol, rest) = text
            .split_once("://")
            .ok_or_else(|| RpcError::Config(format!("url `{text}` is missing `://`")))?;
        if protocol.is_empty() {
            return Err(RpcError::Config(format!("url `{text}` has an empty protocol")));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        let (authority, path) = match location.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (location, ""),
        };
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| RpcError::Config(format!("url `{text}` is missing a port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|err| RpcError::Config(format!("url `{text}` has an invalid port: {err}")))?;

        let mut url = Url::new(protocol, host, port, path);
        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                url.parameters.insert(key.to_owned(), value.to_owned());
            }
        }
        Ok(url)
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 服务路径，通常即接口名。
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` 形式的网络地址。
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// 读取原始参数值。
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// 读取声明参数，缺失时回退默认值。
    pub fn param(&self, param: UrlParam) -> &str {
        self.parameter(param.key())
            .filter(|value| !value.is_empty())
            .unwrap_or(param.default_value())
    }

    /// 读取整数参数；缺失或格式非法时回退默认值。
    pub fn int_param(&self, param: UrlParam) -> i64 {
        let raw = self.param(param);
        match raw.trim().parse::<i64>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    key = param.key(),
                    value = raw,
                    url = %self,
                    "invalid integer parameter, falling back to default"
                );
                param.default_value().parse::<i64>().unwrap_or_default()
            }
        }
    }

    /// 读取布尔参数（`true`/`false`，大小写不敏感）。
    pub fn bool_parameter(&self, key: &str, default: bool) -> bool {
        match self.parameter(key) {
            Some(value) if value.eq_ignore_ascii_case("true") => true,
            Some(value) if value.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }

    /// 以毫秒为单位读取时长参数，负值视为 0。
    pub fn duration_ms_param(&self, param: UrlParam) -> Duration {
        Duration::from_millis(self.int_param(param).max(0) as u64)
    }

    /// 替换端口，导出到端口 0 后用实际监听端口回填。
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 追加或覆盖参数（构建器风格）。
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 原地追加或覆盖参数。
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
    }

    /// 由路径与 `version`/`group` 参数推导服务键。
    pub fn service_key(&self) -> String {
        crate::provider::service_key(
            &self.path,
            self.param(UrlParam::Version),
            self.param(UrlParam::Group),
        )
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/{}", self.protocol, self.host, self.port, self.path)?;
        let mut separator = '?';
        for (key, value) in &self.parameters {
            write!(f, "{separator}{key}={value}")?;
            separator = '&';
        }
        Ok(())
    }
}

impl FromStr for Url {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Url::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    /// 解析后再格式化应得到规范化文本（参数按键排序）。
    #[test]
    fn parse_and_format_are_stable() {
        let url = Url::parse("spark://127.0.0.1:9000/Echo?retries=3&group=g1")
            .expect("合法 URL 应解析成功");
        assert_eq!(url.protocol(), "spark");
        assert_eq!(url.host(), "127.0.0.1");
        assert_eq!(url.port(), 9000);
        assert_eq!(url.path(), "Echo");
        assert_eq!(url.address(), "127.0.0.1:9000");
        assert_eq!(
            url.to_string(),
            "spark://127.0.0.1:9000/Echo?group=g1&retries=3"
        );
        assert_eq!(url.service_key(), "Echo:1.0:g1");
    }

    /// 缺失键与非法数值回退到声明默认值，非法数值记录告警。
    #[test]
    #[traced_test]
    fn typed_accessors_fall_back_to_defaults() {
        let url = Url::new("spark", "localhost", 1, "Echo").with_parameter("retries", "abc");
        assert_eq!(url.int_param(UrlParam::Retries), 2);
        assert_eq!(url.int_param(UrlParam::RequestTimeout), 3000);
        assert_eq!(url.param(UrlParam::Serialization), "postcard");
        assert_eq!(
            url.duration_ms_param(UrlParam::ConnectTimeout),
            Duration::from_millis(1000)
        );
        assert!(!url.bool_parameter("check", false));
        assert!(logs_contain("invalid integer parameter"));
    }

    /// 缺少端口或协议分隔符的文本被拒绝。
    #[test]
    fn malformed_urls_are_rejected() {
        assert!(Url::parse("localhost:80/Echo").is_err());
        assert!(Url::parse("spark://localhost/Echo").is_err());
        assert!(Url::parse("spark://localhost:99999/Echo").is_err());
    }
}
