//! 负载均衡策略。
//!
//! # 教案式说明
//! - **意图 (Why)**：故障转移的每次尝试都要重新选点，让重试落到不同实例上；
//!   选点逻辑与引用集合的维护解耦，集群调用器只负责在注册中心通知时整体替换集合；
//! - **契约 (What)**：
//!   - 作用域为原型：每个集群调用器持有独立实例，引用集合与轮询游标互不干扰；
//!   - 只在可用引用中选择；全部不可用或集合为空时返回 `rpc.cluster.no_reference` 框架错误；
//!   - `random`（默认）均匀随机；`roundrobin` 全局游标取模；`leastactive` 取在途调用最少者，并列时随机；
//! - **实现 (How)**：引用集合放在 `ArcSwap` 中，读路径无锁取快照，写路径整体替换。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use rand::Rng;
use spark_rpc_core::{ExtensionPoint, Node, Reference, Request, RpcError, Scope, codes};

/// 负载均衡扩展点。
pub trait LoadBalance: Send + Sync {
    fn name(&self) -> &str;

    /// 整体替换候选引用集合。
    fn set_references(&self, references: Vec<Arc<dyn Reference>>);

    /// 当前候选引用集合快照。
    fn references(&self) -> Arc<Vec<Arc<dyn Reference>>>;

    /// 在给定的可用候选中选择一个；`candidates` 非空。
    fn choose(&self, candidates: &[Arc<dyn Reference>], request: &Request) -> Arc<dyn Reference>;

    /// 从当前集合的可用引用中选择。
    fn select(&self, request: &Request) -> Result<Arc<dyn Reference>, RpcError> {
        let snapshot = self.references();
        let candidates = snapshot
            .iter()
            .filter(|reference| reference.is_available())
            .cloned()
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Err(RpcError::framework(
                codes::CLUSTER_NO_REFERENCE,
                format!(
                    "no available reference for `{}` ({} known, loadbalance={})",
                    request.service_key(),
                    snapshot.len(),
                    self.name()
                ),
            ));
        }
        Ok(self.choose(&candidates, request))
    }
}

impl ExtensionPoint for dyn LoadBalance {
    const CAPABILITY: &'static str = "loadbalance";
    const SCOPE: Scope = Scope::Prototype;
    const DEFAULT: Option<&'static str> = Some("random");
}

/// 策略共享的引用集合。
#[derive(Default)]
struct ReferenceSet(ArcSwap<Vec<Arc<dyn Reference>>>);

impl ReferenceSet {
    fn replace(&self, references: Vec<Arc<dyn Reference>>) {
        self.0.store(Arc::new(references));
    }

    fn snapshot(&self) -> Arc<Vec<Arc<dyn Reference>>> {
        self.0.load_full()
    }
}

fn random_index(len: usize) -> usize {
    rand::rng().random_range(0..len)
}

/// 均匀随机。
#[derive(Default)]
pub struct RandomLoadBalance {
    references: ReferenceSet,
}

impl LoadBalance for RandomLoadBalance {
    fn name(&self) -> &str {
        "random"
    }

    fn set_references(&self, references: Vec<Arc<dyn Reference>>) {
        self.references.replace(references);
    }

    fn references(&self) -> Arc<Vec<Arc<dyn Reference>>> {
        self.references.snapshot()
    }

    fn choose(&self, candidates: &[Arc<dyn Reference>], _request: &Request) -> Arc<dyn Reference> {
        Arc::clone(&candidates[random_index(candidates.len())])
    }
}

/// 轮询。
#[derive(Default)]
pub struct RoundRobinLoadBalance {
    references: ReferenceSet,
    cursor: AtomicUsize,
}

impl LoadBalance for RoundRobinLoadBalance {
    fn name(&self) -> &str {
        "roundrobin"
    }

    fn set_references(&self, references: Vec<Arc<dyn Reference>>) {
        self.references.replace(references);
    }

    fn references(&self) -> Arc<Vec<Arc<dyn Reference>>> {
        self.references.snapshot()
    }

    fn choose(&self, candidates: &[Arc<dyn Reference>], _request: &Request) -> Arc<dyn Reference> {
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&candidates[turn % candidates.len()])
    }
}

/// 最少在途调用，并列时随机。
#[derive(Default)]
pub struct LeastActiveLoadBalance {
    references: ReferenceSet,
}

impl LoadBalance for LeastActiveLoadBalance {
    fn name(&self) -> &str {
        "leastactive"
    }

    fn set_references(&self, references: Vec<Arc<dyn Reference>>) {
        self.references.replace(references);
    }

    fn references(&self) -> Arc<Vec<Arc<dyn Reference>>> {
        self.references.snapshot()
    }

    fn choose(&self, candidates: &[Arc<dyn Reference>], _request: &Request) -> Arc<dyn Reference> {
        let least = candidates
            .iter()
            .map(|reference| reference.active_count())
            .min()
            .unwrap_or_default();
        let tied = candidates
            .iter()
            .filter(|reference| reference.active_count() == least)
            .collect::<Vec<_>>();
        match tied.as_slice() {
            [] => Arc::clone(&candidates[0]),
            [only] => Arc::clone(only),
            many => Arc::clone(many[random_index(many.len())]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubReference;
    use std::collections::HashSet;

    fn request() -> Request {
        Request::new("Echo", "echo", Vec::new())
    }

    fn stubs(count: u16) -> Vec<Arc<StubReference>> {
        (0..count).map(|index| Arc::new(StubReference::new(20880 + index))).collect()
    }

    fn erase(stubs: &[Arc<StubReference>]) -> Vec<Arc<dyn Reference>> {
        stubs
            .iter()
            .map(|stub| Arc::clone(stub) as Arc<dyn Reference>)
            .collect()
    }

    /// 空集合与全部不可用时返回框架错误。
    #[test]
    fn no_available_reference_is_a_framework_error() {
        let balance = RandomLoadBalance::default();
        let err = balance.select(&request()).err().expect("空集合");
        assert_eq!(err.code(), codes::CLUSTER_NO_REFERENCE);
        assert!(!err.is_business());

        let stubs = stubs(2);
        stubs.iter().for_each(|stub| stub.set_available(false));
        balance.set_references(erase(&stubs));
        let err = balance.select(&request()).err().expect("全部不可用");
        assert!(err.to_string().contains("2 known"));
    }

    /// 随机策略跳过不可用引用。
    #[test]
    fn random_skips_unavailable_references() {
        let stubs = stubs(3);
        stubs[1].set_available(false);
        let balance = RandomLoadBalance::default();
        balance.set_references(erase(&stubs));
        let picked = (0..200)
            .map(|_| balance.select(&request()).expect("有可用引用").url().port())
            .collect::<HashSet<_>>();
        assert_eq!(picked, HashSet::from([20880, 20882]));
    }

    /// 轮询策略依次覆盖全部可用引用。
    #[test]
    fn round_robin_cycles_through_candidates() {
        let stubs = stubs(3);
        let balance = RoundRobinLoadBalance::default();
        balance.set_references(erase(&stubs));
        let ports = (0..6)
            .map(|_| balance.select(&request()).expect("有可用引用").url().port())
            .collect::<Vec<_>>();
        assert_eq!(ports, vec![20880, 20881, 20882, 20880, 20881, 20882]);
    }

    /// 最少在途策略选择空闲引用，并列时在并列者中随机。
    #[test]
    fn least_active_prefers_idle_references() {
        let stubs = stubs(3);
        let balance = LeastActiveLoadBalance::default();
        balance.set_references(erase(&stubs));

        let _busy = stubs[0].hold();
        let picked = (0..100)
            .map(|_| balance.select(&request()).expect("有可用引用").url().port())
            .collect::<HashSet<_>>();
        assert_eq!(picked, HashSet::from([20881, 20882]));

        let _also_busy = stubs[2].hold();
        let picked = balance.select(&request()).expect("有可用引用");
        assert_eq!(picked.url().port(), 20881);
    }
}
