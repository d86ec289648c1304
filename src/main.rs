//! Hearth - 常驻陪伴智能体
//!
//! 入口：初始化日志与配置，装配 Companion，恢复延迟事件，启动主动问候循环，
//! 然后逐行读取 stdin 作为用户输入、把回复写到 stdout，直到 Ctrl+C / SIGTERM / 输入结束。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use hearth::channel::{Channel, ConsoleChannel};
use hearth::config::{load_config, AppConfig};
use hearth::core::{
    DeferredTimerCleanup, ProfileFlushCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason, SystemClock,
};
use hearth::llm::create_llm_from_config;
use hearth::observability;
use hearth::store::{InMemoryStore, SqliteStore, Store};
use hearth::{Companion, CompanionParts};

fn open_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    match cfg.store.backend.as_str() {
        "memory" => {
            tracing::info!("Using in-memory store, nothing will survive a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        _ => {
            let path = cfg
                .store
                .sqlite_path
                .clone()
                .unwrap_or_else(|| cfg.app.data_dir.join("hearth.db"));
            let store = SqliteStore::open(&path)
                .with_context(|| format!("Failed to open SQLite store at {}", path.display()))?;
            tracing::info!(path = %path.display(), "SQLite store opened");
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    std::fs::create_dir_all(&cfg.app.data_dir)
        .with_context(|| format!("Failed to create data dir {}", cfg.app.data_dir.display()))?;

    let store = open_store(&cfg)?;
    let llm = create_llm_from_config(&cfg);
    let channel: Arc<dyn Channel> = Arc::new(ConsoleChannel::new(cfg.app.name.clone()));
    let parts = CompanionParts::from_data_dir(
        &cfg,
        store,
        llm,
        Arc::clone(&channel),
        Arc::new(SystemClock),
    );
    let companion = Companion::new(&cfg, parts);

    match companion.restore().await {
        Ok(Some(event)) => tracing::info!(
            event_id = %event.id,
            action = event.action.as_str(),
            trigger_time = %event.trigger_time,
            "Pending deferred event restored"
        ),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to restore deferred event"),
    }

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let proactive = tokio::spawn(companion.proactive().clone().run(shutdown.token()));

    tracing::info!(name = %cfg.app.name, "Hearth is listening on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let token = shutdown.token();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let text = match line {
            Ok(Some(text)) => text,
            Ok(None) => {
                shutdown.shutdown(ShutdownReason::InputClosed);
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                shutdown.shutdown(ShutdownReason::InputClosed);
                break;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        let reply = companion.process_message(&text).await;
        if let Err(e) = channel.deliver(&reply).await {
            tracing::warn!(error = %e, "Reply not delivered");
        }
    }

    if let Err(e) = proactive.await {
        tracing::warn!(error = %e, "Proactive scheduler task ended abnormally");
    }

    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(10));
    coordinator
        .push(ProfileFlushCleanup(Arc::clone(companion.orchestrator())))
        .push(DeferredTimerCleanup(companion.deferred().clone()));
    coordinator.run().await;

    tracing::info!(reason = ?shutdown.reason(), "Hearth stopped");
    Ok(())
}
