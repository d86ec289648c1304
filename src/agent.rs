//! 陪伴智能体运行时
//!
//! Companion 把意图路由、工具执行、延迟事件调度、主动问候与回复编排接到一起，
//! process_message 处理一条用户输入并返回要发给用户的回复。传输层（stdin、聊天平台）只负责收发。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;

use crate::channel::Channel;
use crate::config::AppConfig;
use crate::core::{Clock, CompanionError, ResponseOrchestrator, SharedState};
use crate::llm::LlmClient;
use crate::memory::{MemoryStore, Role};
use crate::profile::{load_json, LlmProfileAdapter, Persona, ProfileAdapter};
use crate::router::{Decision, IntentRouter};
use crate::schedule::{resolve_time_expression, DeferredScheduler, ProactiveScheduler};
use crate::store::{DeferredEvent, EventAction, Store};
use crate::tools::{builtin_registry, ScheduleAction, ToolExecutor, ToolRegistry};

/// 生成后端失败时给用户的回复
pub const GENERATION_FAILURE_REPLY: &str =
    "Sorry, something went wrong on my side. Could you say that again in a moment?";

/// 结束会话时的回复
pub const GOOD_NIGHT_REPLY: &str = "Good night! I'll remember what we talked about today.";

/// 用户取消当前提醒 / 暂停的命令
pub const CANCEL_COMMAND: &str = "/cancel";

/// 取消写入失败时的回复；事件仍然有效
pub const CANCEL_FAILURE_REPLY: &str =
    "Sorry, I couldn't cancel that just now. It's still scheduled, please try again in a moment.";

/// 外部注入的协作者
pub struct CompanionParts {
    pub store: Arc<dyn Store>,
    pub llm: Arc<dyn LlmClient>,
    pub channel: Arc<dyn Channel>,
    pub clock: Arc<dyn Clock>,
    pub profile: Arc<dyn ProfileAdapter>,
    pub persona: Persona,
    /// 人设调整后写回的文件
    pub persona_path: Option<PathBuf>,
}

impl CompanionParts {
    /// 画像与人设从 data_dir 下的 profile.json / persona.json 加载（不存在时使用默认值）
    pub fn from_data_dir(
        cfg: &AppConfig,
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmClient>,
        channel: Arc<dyn Channel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let data_dir = &cfg.app.data_dir;
        let persona_path = data_dir.join("persona.json");
        let persona = match load_json::<Persona>(&persona_path) {
            Ok(Some(p)) => p,
            Ok(None) => Persona::named(cfg.app.name.clone()),
            Err(e) => {
                tracing::warn!(path = %persona_path.display(), error = %e, "Persona file unreadable, using defaults");
                Persona::named(cfg.app.name.clone())
            }
        };
        let profile = Arc::new(LlmProfileAdapter::load(
            Arc::clone(&llm),
            data_dir.join("profile.json"),
        ));
        Self {
            store,
            llm,
            channel,
            clock,
            profile,
            persona,
            persona_path: Some(persona_path),
        }
    }
}

/// 陪伴智能体
pub struct Companion {
    clock: Arc<dyn Clock>,
    state: SharedState,
    offset: FixedOffset,
    end_session_keywords: Vec<String>,
    tool_timeout_secs: u64,
    router: IntentRouter,
    executor: ToolExecutor,
    orchestrator: Arc<ResponseOrchestrator>,
    deferred: DeferredScheduler,
    proactive: ProactiveScheduler,
}

impl Companion {
    /// 按配置装配全部组件，工具使用内置目录
    pub fn new(cfg: &AppConfig, parts: CompanionParts) -> Self {
        let offset = cfg.app.local_offset();
        let clock = parts.clock;
        let state = SharedState::new(clock.now());
        let llm_timeout = Duration::from_secs(cfg.llm.timeouts.request);

        let memory = Arc::new(MemoryStore::new(
            Arc::clone(&parts.store),
            Arc::clone(&clock),
            cfg.memory.recent_window,
        ));
        let mut orchestrator = ResponseOrchestrator::new(
            Arc::clone(&parts.llm),
            memory,
            parts.profile,
            parts.persona,
            llm_timeout,
            cfg.memory.relevant_top_n,
        );
        if let Some(path) = parts.persona_path {
            orchestrator = orchestrator.with_persona_path(path);
        }
        let orchestrator = Arc::new(orchestrator);

        let deferred = DeferredScheduler::new(
            Arc::clone(&parts.store),
            state.clone(),
            Arc::clone(&clock),
            Arc::clone(&orchestrator),
            Arc::clone(&parts.channel),
        );
        let proactive = ProactiveScheduler::new(
            parts.store,
            state.clone(),
            Arc::clone(&clock),
            Arc::clone(&orchestrator),
            parts.channel,
            cfg.scheduler.clone(),
            offset,
        );
        let registry = builtin_registry(cfg, Arc::clone(&clock), offset);

        Self {
            clock,
            state,
            offset,
            end_session_keywords: cfg
                .app
                .end_session_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
            tool_timeout_secs: cfg.tools.tool_timeout_secs,
            router: IntentRouter::new(parts.llm, llm_timeout),
            executor: ToolExecutor::new(registry, cfg.tools.tool_timeout_secs),
            orchestrator,
            deferred,
            proactive,
        }
    }

    /// 替换工具目录（测试或自定义部署）
    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        self.executor = ToolExecutor::new(registry, self.tool_timeout_secs);
        self
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn orchestrator(&self) -> &Arc<ResponseOrchestrator> {
        &self.orchestrator
    }

    pub fn deferred(&self) -> &DeferredScheduler {
        &self.deferred
    }

    pub fn proactive(&self) -> &ProactiveScheduler {
        &self.proactive
    }

    /// 启动时恢复持久化的延迟事件
    pub async fn restore(&self) -> Result<Option<DeferredEvent>, CompanionError> {
        self.deferred.restore().await
    }

    /// 处理一条用户消息，返回回复文本
    pub async fn process_message(&self, text: &str) -> String {
        let text = text.trim();
        self.state.touch_user(self.clock.now()).await;

        let lowered = text.to_lowercase();
        if self.end_session_keywords.iter().any(|k| *k == lowered) {
            return self.end_session().await;
        }
        if lowered == CANCEL_COMMAND {
            return self.cancel_pending().await;
        }

        let decision = self.router.classify(text, self.executor.registry()).await;
        let result = match decision {
            Decision::GeneralChat => self.orchestrator.respond(text, None, None).await,
            Decision::ToolCalls(calls) => {
                let bag = self.executor.execute(&calls).await;
                self.orchestrator.respond(text, Some(&bag), None).await
            }
            Decision::ScheduleInstruction {
                action,
                time_expression,
                specific_message,
            } => {
                match self
                    .schedule(action, &time_expression, specific_message)
                    .await
                {
                    Ok(note) => self.orchestrator.respond(text, None, note.as_deref()).await,
                    Err(reply) => {
                        self.record_exchange(text, &reply).await;
                        return reply;
                    }
                }
            }
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "Failed to generate reply");
                GENERATION_FAILURE_REPLY.to_string()
            }
        }
    }

    /// 解析时间并登记事件。时间无法解析时返回给用户的提示（Err）；
    /// 持久化失败只记日志，返回 Ok(None) 让回复照常生成
    async fn schedule(
        &self,
        action: ScheduleAction,
        time_expression: &str,
        specific_message: Option<String>,
    ) -> Result<Option<String>, String> {
        let trigger = match resolve_time_expression(time_expression, self.clock.now(), self.offset)
        {
            Ok(t) => t,
            Err(e) => {
                tracing::info!(time_expression, error = %e, "Unresolvable time expression");
                return Err(format!(
                    "Sorry, I couldn't work out when \"{time_expression}\" is. \
                     Could you put it another way, like \"in 2 hours\" or \"tomorrow at 9am\"?"
                ));
            }
        };

        let event_action = match action {
            ScheduleAction::ScheduleReminder => EventAction::Reminder,
            ScheduleAction::PauseConversation => EventAction::Pause,
        };
        match self
            .deferred
            .register(event_action, trigger, specific_message.clone())
            .await
        {
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to register deferred event");
                return Ok(None);
            }
        }

        let local = trigger
            .with_timezone(&self.offset)
            .format("%A %Y-%m-%d %H:%M");
        let note = match (event_action, specific_message) {
            (EventAction::Reminder, Some(msg)) => {
                format!("A reminder has been set for {local} about \"{msg}\". Confirm it briefly.")
            }
            (EventAction::Reminder, None) => {
                format!("A reminder has been set for {local}. Confirm it briefly.")
            }
            (EventAction::Pause, _) => format!(
                "The user asked not to be disturbed until {local}. Acknowledge briefly and do not start new topics."
            ),
        };
        Ok(Some(note))
    }

    async fn end_session(&self) -> String {
        let memory = self.orchestrator.memory();
        let log = memory.session_turns().await;
        if log.is_empty() {
            return GOOD_NIGHT_REPLY.to_string();
        }
        if let Err(e) = memory
            .summarize_and_store(
                self.orchestrator.llm().as_ref(),
                &log,
                self.orchestrator.timeout(),
            )
            .await
        {
            tracing::warn!(error = %e, turns = log.len(), "Failed to summarize session");
        }
        GOOD_NIGHT_REPLY.to_string()
    }

    async fn cancel_pending(&self) -> String {
        match self.deferred.cancel_current().await {
            Ok(Some(_)) => "Okay, I've cancelled it.".to_string(),
            Ok(None) => "There's nothing scheduled right now.".to_string(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to cancel deferred event");
                CANCEL_FAILURE_REPLY.to_string()
            }
        }
    }

    async fn record_exchange(&self, user: &str, reply: &str) {
        let memory = self.orchestrator.memory();
        memory.append_turn(Role::User, user).await;
        memory.append_turn(Role::Assistant, reply).await;
    }
}
