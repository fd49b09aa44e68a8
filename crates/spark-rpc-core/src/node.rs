//! 节点契约与共享状态助手。
//!
//! # 教案式说明
//! - **意图 (Why)**：引用、Provider、导出器、客户端、服务端都具备“初始化 / 销毁 / 是否可用 / 描述”
//!   这一组生命周期操作，以一个小 trait 统一，公共行为（状态机、在途计数）以组合的助手对象提供；
//! - **契约 (What)**：
//!   - [`NodeState`]：`New → Available → Closed`，关闭幂等，重复关闭返回 `false` 而非报错；
//!   - [`ActiveCounter`]：在途调用计数，只能通过 [`ActiveGuard`] 增减，守卫析构必定回退计数，
//!     因此成功、业务失败、传输失败、panic 展开等所有出口都恢复到调用前的值。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::error::RpcError;
use crate::url::Url;

/// 生命周期契约。
pub trait Node: Send + Sync {
    /// 进入可用状态；重复初始化为幂等操作。
    fn init(&self) -> Result<(), RpcError>;

    /// 释放资源并进入关闭状态；幂等。
    fn destroy(&self);

    fn is_available(&self) -> bool;

    /// 面向日志的单行描述。
    fn describe(&self) -> String;

    fn url(&self) -> &Url;
}

/// 节点状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    New,
    Available,
    Closed,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NodeStatus::New => "new",
            NodeStatus::Available => "available",
            NodeStatus::Closed => "closed",
        };
        f.write_str(text)
    }
}

const NEW: u8 = 0;
const AVAILABLE: u8 = 1;
const CLOSED: u8 = 2;

/// 原子状态机。
#[derive(Debug)]
pub struct NodeState(AtomicU8);

impl Default for NodeState {
    fn default() -> Self {
        Self(AtomicU8::new(NEW))
    }
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> NodeStatus {
        match self.0.load(Ordering::Acquire) {
            NEW => NodeStatus::New,
            AVAILABLE => NodeStatus::Available,
            _ => NodeStatus::Closed,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status() == NodeStatus::Available
    }

    pub fn is_closed(&self) -> bool {
        self.status() == NodeStatus::Closed
    }

    /// `New → Available`；仅首个成功的调用者返回 `true`。
    pub fn mark_available(&self) -> bool {
        self.0
            .compare_exchange(NEW, AVAILABLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 进入 `Closed`；仅首个关闭者返回 `true`。
    pub fn close(&self) -> bool {
        self.0.swap(CLOSED, Ordering::AcqRel) != CLOSED
    }
}

/// 在途调用计数器。
#[derive(Clone, Debug, Default)]
pub struct ActiveCounter(Arc<AtomicUsize>);

impl ActiveCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计数加一并返回守卫，守卫析构时减一。
    pub fn enter(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        ActiveGuard(Arc::clone(&self.0))
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

/// 在途计数守卫，可随异步调用一起移动。
#[derive(Debug)]
#[must_use = "dropping the guard immediately ends the active call"]
pub struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 状态机只允许一次开启与一次关闭。
    #[test]
    fn state_transitions_are_idempotent() {
        let state = NodeState::new();
        assert_eq!(state.status(), NodeStatus::New);
        assert!(state.mark_available());
        assert!(!state.mark_available());
        assert!(state.is_available());
        assert!(state.close());
        assert!(!state.close());
        assert!(!state.mark_available());
        assert_eq!(state.status(), NodeStatus::Closed);
    }

    /// 守卫在 panic 展开时同样回退计数。
    #[test]
    fn guard_restores_count_on_unwind() {
        let counter = ActiveCounter::new();
        {
            let _outer = counter.enter();
            let _inner = counter.enter();
            assert_eq!(counter.get(), 2);
        }
        assert_eq!(counter.get(), 0);

        let shared = counter.clone();
        let outcome = std::panic::catch_unwind(move || {
            let _guard = shared.enter();
            panic!("boom");
        });
        assert!(outcome.is_err());
        assert_eq!(counter.get(), 0);
    }
}
