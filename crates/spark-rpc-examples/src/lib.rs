//! Echo 演示的装配逻辑：日志初始化、扩展登记、按描述导出服务与建立集群引用。
//!
//! # 教案式说明
//! - **意图 (Why)**：演示一个完整进程如何把三个 crate 串起来；二进制只负责读取配置与打印结果，
//!   装配逻辑放在库中以便测试；
//! - **契约 (What)**：
//!   - [`init_tracing`] 安装 `fmt + EnvFilter`，默认 `info`，可由 `RUST_LOG` 覆盖，重复调用无副作用；
//!   - [`EchoDemo::export_services`] 为每个服务描述导出 Echo 服务，返回实际监听地址；
//!   - [`EchoDemo::refer`] 为引用描述建立集群调用器，端点列表直接取自描述中的地址；
//!   - [`EchoDemo::shutdown`] 依次销毁调用器、导出器与协议。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use spark_rpc_cluster::ClusterInvoker;
use spark_rpc_core::config::{ReferenceDescriptor, RpcConfig};
use spark_rpc_core::{
    DefaultProvider, Exporter, ExtensionRegistry, Node, Protocol, Provider, ProxyFactory,
    ServiceError, ServiceProxy, Url, Value,
};
use tracing_subscriber::EnvFilter;

/// 安装全局日志订阅者；已安装时返回 `false`。
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// 装配核心、传输与集群扩展。
pub fn bootstrap_registry() -> anyhow::Result<ExtensionRegistry> {
    let registry = ExtensionRegistry::with_builtins().context("install core extensions")?;
    spark_rpc_transport_tcp::install(&registry).context("install tcp protocol")?;
    spark_rpc_cluster::install(&registry).context("install cluster strategies")?;
    Ok(registry)
}

/// Echo 服务：`echo(string)`、`upper(string)`、`add(i64,i64)`、`log(string)`。
pub fn echo_provider(url: Url) -> anyhow::Result<Arc<dyn Provider>> {
    let provider = DefaultProvider::builder(url)
        .method("echo", &["string"], |_, args| Ok(args[0].clone()))
        .method("upper", &["string"], |_, args| {
            args[0]
                .as_str()
                .map(|text| Value::from(text.to_uppercase()))
                .ok_or_else(|| ServiceError::new("upper expects a string"))
        })
        .method("add", &["i64", "i64"], |_, args| {
            match (args[0].as_i64(), args[1].as_i64()) {
                (Some(left), Some(right)) => left
                    .checked_add(right)
                    .map(Value::from)
                    .ok_or_else(|| ServiceError::with_code("echo.overflow", "add overflowed")),
                _ => Err(ServiceError::new("add expects two integers")),
            }
        })
        .method("log", &["string"], |context, args| {
            tracing::info!(
                peer = ?context.remote_address(),
                message = %args[0],
                "one-way log received"
            );
            Ok(Value::Unit)
        })
        .build()?;
    Ok(Arc::new(provider))
}

/// 演示进程持有的全部运行期对象。
pub struct EchoDemo {
    registry: ExtensionRegistry,
    exporters: Vec<Arc<dyn Exporter>>,
    invokers: HashMap<String, Arc<ClusterInvoker>>,
}

impl EchoDemo {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self {
            registry,
            exporters: Vec::new(),
            invokers: HashMap::new(),
        }
    }

    /// 导出配置中的全部服务，返回导出器 URL（端口为实际监听端口）。
    pub fn export_services(&mut self, config: &RpcConfig) -> anyhow::Result<Vec<Url>> {
        let mut exported = Vec::with_capacity(config.services.len());
        for descriptor in &config.services {
            let url = descriptor.clone().into_url();
            let protocol = self
                .registry
                .resolve::<dyn Protocol>(url.protocol())
                .with_context(|| format!("resolve protocol `{}`", url.protocol()))?;
            let exporter = protocol
                .export(echo_provider(url.clone())?)
                .with_context(|| format!("export {url}"))?;
            exported.push(exporter.url().clone());
            self.exporters.push(exporter);
        }
        Ok(exported)
    }

    /// 为引用描述建立集群调用器。
    pub fn refer(&mut self, descriptor: &ReferenceDescriptor) -> anyhow::Result<()> {
        let endpoints = descriptor.clone().into_urls()?;
        let consumer = endpoints
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("reference `{}` has no endpoints", descriptor.interface))?;
        let invoker = Arc::new(ClusterInvoker::new(consumer, &self.registry)?);
        invoker.init()?;
        invoker.refresh(endpoints);
        if !invoker.is_available() {
            tracing::warn!(interface = %descriptor.interface, "no endpoint reachable yet");
        }
        self.invokers.insert(descriptor.interface.clone(), invoker);
        Ok(())
    }

    /// 取得接口的调用代理。
    pub fn proxy(&self, interface: &str) -> anyhow::Result<ServiceProxy> {
        let invoker = self
            .invokers
            .get(interface)
            .ok_or_else(|| anyhow!("no reference configured for `{interface}`"))?;
        let factory = self
            .registry
            .resolve_default::<dyn ProxyFactory>()?
            .ok_or_else(|| anyhow!("no default proxy factory"))?;
        Ok(invoker.proxy(factory.as_ref()))
    }

    /// 关闭全部对象。
    pub fn shutdown(&mut self) {
        for (_, invoker) in self.invokers.drain() {
            invoker.destroy();
        }
        for exporter in self.exporters.drain(..) {
            exporter.unexport();
        }
        if let Ok(protocols) = self.registry.extension_names::<dyn Protocol>() {
            for name in protocols {
                match self.registry.resolve::<dyn Protocol>(&name) {
                    Ok(protocol) => protocol.destroy(),
                    Err(err) => tracing::warn!(protocol = %name, error = %err, "protocol shutdown skipped"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按描述导出后经集群代理回环调用，覆盖双向、业务错误与单向调用。
    #[test]
    fn demo_round_trips_through_the_cluster() {
        let registry = bootstrap_registry().expect("装配扩展");
        let mut demo = EchoDemo::new(registry);
        let config = RpcConfig::from_toml_str(
            r#"
[[services]]
interface = "Echo"
port = 0
"#,
        )
        .expect("解析服务描述");
        let exported = demo.export_services(&config).expect("导出服务");
        let address = exported[0].address();

        let references = RpcConfig::from_toml_str(&format!(
            r#"
[[references]]
interface = "Echo"
addresses = ["{address}"]
retries = 0
"#
        ))
        .expect("解析引用描述");
        demo.refer(&references.references[0]).expect("建立引用");

        let echo = demo.proxy("Echo").expect("取得代理");
        assert_eq!(
            echo.invoke("upper", vec![Value::from("ping")]).expect("调用成功"),
            Value::from("PING")
        );
        assert_eq!(
            echo.invoke("add", vec![Value::from(40_i64), Value::from(2_i64)])
                .expect("调用成功"),
            Value::from(42_i64)
        );
        let err = echo
            .invoke("add", vec![Value::from(i64::MAX), Value::from(1_i64)])
            .expect_err("溢出");
        assert!(err.is_business());
        assert_eq!(err.code(), "echo.overflow");
        echo.invoke_one_way("log", vec![Value::from("hello")]).expect("单向发送成功");

        assert!(demo.proxy("Missing").is_err());
        demo.shutdown();
    }
}
