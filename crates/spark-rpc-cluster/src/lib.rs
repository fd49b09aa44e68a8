#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# spark-rpc-cluster

## 设计动机（Why）
- 消费方面向“服务”而非“实例”：多个端点上的同一服务由 [`ClusterInvoker`] 统一调度；
- 选点（[`LoadBalance`]）与失败处置（[`HaStrategy`]）都是扩展点，可按 URL 参数替换。

## 核心契约（What）
- 负载均衡：`random`（默认）、`roundrobin`、`leastactive`，原型作用域；
- 高可用：`failover`（默认，业务错误不重试）、`failfast`；
- [`install`]：把上述实现登记到扩展注册中心。
"#]

mod cluster;
mod ha;
mod loadbalance;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use spark_rpc_core::{ExtensionError, ExtensionRegistry};

pub use cluster::ClusterInvoker;
pub use ha::{FailfastHaStrategy, FailoverHaStrategy, HaStrategy};
pub use loadbalance::{LeastActiveLoadBalance, LoadBalance, RandomLoadBalance, RoundRobinLoadBalance};

/// 登记负载均衡与高可用策略扩展。
pub fn install(registry: &ExtensionRegistry) -> Result<(), ExtensionError> {
    registry.declare::<dyn LoadBalance, _>("spark.loadbalance.random", |_| {
        Ok(Arc::new(RandomLoadBalance::default()) as Arc<dyn LoadBalance>)
    })?;
    registry.declare::<dyn LoadBalance, _>("spark.loadbalance.roundrobin", |_| {
        Ok(Arc::new(RoundRobinLoadBalance::default()) as Arc<dyn LoadBalance>)
    })?;
    registry.declare::<dyn LoadBalance, _>("spark.loadbalance.leastactive", |_| {
        Ok(Arc::new(LeastActiveLoadBalance::default()) as Arc<dyn LoadBalance>)
    })?;
    registry.add_descriptor::<dyn LoadBalance>(
        "spark-rpc-cluster/extensions/loadbalance",
        include_str!("../extensions/loadbalance"),
    );

    registry.declare::<dyn HaStrategy, _>("spark.ha.failover", |_| {
        Ok(Arc::new(FailoverHaStrategy) as Arc<dyn HaStrategy>)
    })?;
    registry.declare::<dyn HaStrategy, _>("spark.ha.failfast", |_| {
        Ok(Arc::new(FailfastHaStrategy) as Arc<dyn HaStrategy>)
    })?;
    registry.add_descriptor::<dyn HaStrategy>(
        "spark-rpc-cluster/extensions/ha",
        include_str!("../extensions/ha"),
    );
    Ok(())
}
