//! 高可用策略：故障转移（failover）与快速失败（failfast）。
//!
//! # 教案式说明
//! - **意图 (Why)**：业务错误是确定性的，重试无益；传输/框架错误往往是单点瞬时故障，
//!   换一个实例重试即可恢复；
//! - **契约 (What)**：
//!   - `failover`：重试上限取首次选中引用 URL 的 `retries`，负值按 0 处理，最多尝试 `retries + 1` 次；
//!     每次尝试重新选点；成功立即返回，业务错误立即返回，框架错误在预算耗尽时返回最后一次错误；
//!   - `failfast`：只尝试一次；
//!   - 在途计数由引用在每次尝试内部成对维护，本层不重复计数。

use spark_rpc_core::{ExtensionPoint, Node, Request, RpcError, UrlParam, Value};

use crate::loadbalance::LoadBalance;

/// 高可用策略扩展点。
pub trait HaStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn call(&self, request: Request, load_balance: &dyn LoadBalance) -> Result<Value, RpcError>;
}

impl ExtensionPoint for dyn HaStrategy {
    const CAPABILITY: &'static str = "ha";
    const DEFAULT: Option<&'static str> = Some("failover");
}

/// 故障转移。
#[derive(Clone, Copy, Debug, Default)]
pub struct FailoverHaStrategy;

impl HaStrategy for FailoverHaStrategy {
    fn name(&self) -> &str {
        "failover"
    }

    fn call(&self, request: Request, load_balance: &dyn LoadBalance) -> Result<Value, RpcError> {
        let mut reference = load_balance.select(&request)?;
        let retries = reference.url().int_param(UrlParam::Retries).max(0);
        let retries = u32::try_from(retries).unwrap_or(u32::MAX);

        let mut attempt = 0;
        loop {
            let err = match reference.call(request.clone()) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_business() || attempt >= retries => return Err(err),
                Err(err) => err,
            };
            tracing::warn!(
                request_id = request.request_id(),
                service = %request.service_key(),
                method = request.method_name(),
                attempt = attempt + 1,
                retries,
                endpoint = %reference.url().address(),
                error = %err,
                "call failed, failing over"
            );
            attempt += 1;
            reference = load_balance.select(&request)?;
        }
    }
}

/// 快速失败。
#[derive(Clone, Copy, Debug, Default)]
pub struct FailfastHaStrategy;

impl HaStrategy for FailfastHaStrategy {
    fn name(&self) -> &str {
        "failfast"
    }

    fn call(&self, request: Request, load_balance: &dyn LoadBalance) -> Result<Value, RpcError> {
        load_balance.select(&request)?.call(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::loadbalance::RoundRobinLoadBalance;
    use crate::testing::StubReference;
    use spark_rpc_core::{Reference, Url, codes};

    fn transport_failure() -> RpcError {
        RpcError::transport(codes::TRANSPORT_IO, "connection reset")
    }

    fn balance_over(stubs: &[Arc<StubReference>]) -> RoundRobinLoadBalance {
        let balance = RoundRobinLoadBalance::default();
        balance.set_references(
            stubs
                .iter()
                .map(|stub| Arc::clone(stub) as Arc<dyn Reference>)
                .collect(),
        );
        balance
    }

    fn stub_with_retries(port: u16, retries: &str) -> Arc<StubReference> {
        Arc::new(StubReference::with_url(
            Url::new("spark", "127.0.0.1", port, "Echo").with_parameter("retries", retries),
        ))
    }

    /// 持续的传输错误恰好尝试 `R + 1` 次后抛出最后一次错误。
    #[test]
    fn failover_attempts_retries_plus_one() {
        let stubs = vec![stub_with_retries(20880, "3"), stub_with_retries(20881, "3")];
        for stub in &stubs {
            (0..4).for_each(|_| stub.push(Err(transport_failure())));
        }
        let balance = balance_over(&stubs);

        let err = FailoverHaStrategy
            .call(Request::new("Echo", "echo", Vec::new()), &balance)
            .expect_err("全部尝试失败");
        assert_eq!(err.code(), codes::TRANSPORT_IO);
        assert_eq!(stubs.iter().map(|stub| stub.attempts()).sum::<usize>(), 4);
        assert_eq!(stubs[0].attempts(), 2, "每次尝试重新选点，轮询交替命中");
        assert!(stubs.iter().all(|stub| stub.active_count() == 0));
    }

    /// 业务错误只尝试一次。
    #[test]
    fn business_errors_are_not_retried() {
        let stub = stub_with_retries(20880, "5");
        stub.push(Err(RpcError::business("boom")));
        let balance = balance_over(std::slice::from_ref(&stub));

        let err = FailoverHaStrategy
            .call(Request::new("Echo", "echo", Vec::new()), &balance)
            .expect_err("业务错误直接抛出");
        assert!(err.is_business());
        assert_eq!(stub.attempts(), 1);
        assert_eq!(stub.active_count(), 0);
    }

    /// 重试次数为负时按 0 处理；中途成功立即返回。
    #[test]
    fn negative_retries_clamp_and_success_short_circuits() {
        let stub = stub_with_retries(20880, "-4");
        stub.push(Err(transport_failure()));
        let balance = balance_over(std::slice::from_ref(&stub));
        FailoverHaStrategy
            .call(Request::new("Echo", "echo", Vec::new()), &balance)
            .expect_err("只尝试一次");
        assert_eq!(stub.attempts(), 1);

        let stub = stub_with_retries(20881, "2");
        stub.push(Err(transport_failure()));
        let balance = balance_over(std::slice::from_ref(&stub));
        let value = FailoverHaStrategy
            .call(Request::new("Echo", "echo", Vec::new()), &balance)
            .expect("第二次尝试成功");
        assert_eq!(value, Value::U64(20881));
        assert_eq!(stub.attempts(), 2);
    }

    /// 快速失败只尝试一次；未配置重试时使用默认值 2。
    #[test]
    fn failfast_tries_once_and_default_retries_is_two() {
        let stub = Arc::new(StubReference::new(20880));
        (0..5).for_each(|_| stub.push(Err(transport_failure())));
        let balance = balance_over(std::slice::from_ref(&stub));

        FailfastHaStrategy
            .call(Request::new("Echo", "echo", Vec::new()), &balance)
            .expect_err("快速失败");
        assert_eq!(stub.attempts(), 1);

        FailoverHaStrategy
            .call(Request::new("Echo", "echo", Vec::new()), &balance)
            .expect_err("默认重试 2 次");
        assert_eq!(stub.attempts(), 4);
    }
}
