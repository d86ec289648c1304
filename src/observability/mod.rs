//! 日志初始化
//!
//! 默认 info 级别，RUST_LOG 可覆盖（例如 `RUST_LOG=hearth=debug`）。日志写 stderr，stdout 留给对话。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
