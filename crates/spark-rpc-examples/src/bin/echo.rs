//! Echo 演示：导出服务、建立集群引用并发起几次调用。
//!
//! # 使用方法
//! ```bash
//! RUST_LOG=spark_rpc_transport_tcp=debug,info cargo run -p spark-rpc-examples --bin echo -- config/echo.toml
//! ```
//! 未指定配置文件时使用内置的 `config/echo.toml`。

use std::env;

use anyhow::Context;
use spark_rpc_core::Value;
use spark_rpc_core::config::RpcConfig;
use spark_rpc_examples::{EchoDemo, bootstrap_registry, init_tracing};

const BUILTIN_CONFIG: &str = include_str!("../../config/echo.toml");

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match env::args().nth(1) {
        Some(path) => RpcConfig::load(&path).with_context(|| format!("load config `{path}`"))?,
        None => RpcConfig::from_toml_str(BUILTIN_CONFIG).context("parse builtin config")?,
    };

    let mut demo = EchoDemo::new(bootstrap_registry()?);
    for url in demo.export_services(&config)? {
        tracing::info!(url = %url, "exported");
    }
    for reference in &config.references {
        demo.refer(reference)?;
    }

    let outcome = run_calls(&demo);
    demo.shutdown();
    outcome
}

fn run_calls(demo: &EchoDemo) -> anyhow::Result<()> {
    let echo = demo.proxy("Echo")?;
    let reply = echo.invoke("echo", vec![Value::from("ping")])?;
    tracing::info!(%reply, "echo");

    let reply = echo.invoke("upper", vec![Value::from("spark rpc")])?;
    tracing::info!(%reply, "upper");

    let reply = echo.invoke("add", vec![Value::from(20_i64), Value::from(22_i64)])?;
    tracing::info!(%reply, "add");

    match echo.invoke("add", vec![Value::from(i64::MAX), Value::from(1_i64)]) {
        Ok(reply) => tracing::warn!(%reply, "overflow unexpectedly succeeded"),
        Err(err) => tracing::info!(code = err.code(), business = err.is_business(), error = %err, "add rejected"),
    }

    echo.invoke_one_way("log", vec![Value::from("bye")])?;
    Ok(())
}
