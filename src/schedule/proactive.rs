//! 主动问候调度器
//!
//! 自我续期的后台定时器：每次醒来先按抖动区间挂好下一次唤醒，再把本轮评估放进独立任务执行。
//! 评估失败甚至 panic 都不会影响下一次唤醒。
//!
//! 评估规则：存在未到期的 pause 事件时整轮跳过；否则要求用户沉默超过阈值且距上次主动消息超过冷却期，
//! 才按本地时段与沉默时长拼出问候 prompt，生成并投递，投递成功后更新 last_proactive_sent_time。

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike, Utc};
use futures_util::FutureExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::config::SchedulerSection;
use crate::core::{Clock, ResponseOrchestrator, SharedState};
use crate::store::{EventAction, Store};

/// 调度器所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Evaluating,
}

/// 一次评估的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// 有未到期的 pause 事件
    Suppressed,
    /// 沉默时长或冷却期不满足
    NotEligible,
    Sent,
    /// 生成或投递失败
    Failed,
}

/// 本地时段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBand {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl DayBand {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => DayBand::Morning,
            12..=17 => DayBand::Afternoon,
            18..=21 => DayBand::Evening,
            _ => DayBand::Night,
        }
    }

    fn greeting(&self) -> &'static str {
        match self {
            DayBand::Morning => "Good morning!",
            DayBand::Afternoon => "Hope your day's going well.",
            DayBand::Evening => "Evening already!",
            DayBand::Night => "Hey, still awake?",
        }
    }

    fn emotion(&self) -> &'static str {
        match self {
            DayBand::Morning => "cheerful",
            DayBand::Afternoon => "caring",
            DayBand::Evening => "soft",
            DayBand::Night => "whispering",
        }
    }
}

/// 沉默时长对应的语气
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceBand {
    Casual,
    Warm,
    Worried,
}

impl SilenceBand {
    pub fn from_silence(silence: ChronoDuration) -> Self {
        if silence > ChronoDuration::hours(12) {
            SilenceBand::Worried
        } else if silence > ChronoDuration::hours(6) {
            SilenceBand::Warm
        } else {
            SilenceBand::Casual
        }
    }
}

/// 拼接主动问候 prompt
pub fn check_in_prompt(day: DayBand, silence: SilenceBand, name: &str) -> String {
    let emotion = day.emotion();
    let mood = match silence {
        SilenceBand::Worried => format!(
            "Send a worried message asking if everything is okay. {name} is concerned. Be gentle and {emotion}."
        ),
        SilenceBand::Warm => format!(
            "Send a heartfelt message as if {name} misses the user. Make it warm, emotional, and {emotion}."
        ),
        SilenceBand::Casual => format!("Send a casual check-in message in a {emotion} tone."),
    };
    format!("{}\n\n{}", day.greeting(), mood)
}

/// 主动问候调度器，可廉价 clone
#[derive(Clone)]
pub struct ProactiveScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    state: SharedState,
    clock: Arc<dyn Clock>,
    orchestrator: Arc<ResponseOrchestrator>,
    channel: Arc<dyn Channel>,
    config: SchedulerSection,
    offset: FixedOffset,
    phase: Mutex<SchedulerPhase>,
    next_wake_at: Mutex<Option<DateTime<Utc>>>,
    armed: AtomicU64,
}

impl ProactiveScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        state: SharedState,
        clock: Arc<dyn Clock>,
        orchestrator: Arc<ResponseOrchestrator>,
        channel: Arc<dyn Channel>,
        config: SchedulerSection,
        offset: FixedOffset,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                state,
                clock,
                orchestrator,
                channel,
                config,
                offset,
                phase: Mutex::new(SchedulerPhase::Idle),
                next_wake_at: Mutex::new(None),
                armed: AtomicU64::new(0),
            }),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.inner.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 已挂上的唤醒次数（含首次）
    pub fn armed_count(&self) -> u64 {
        self.inner.armed.load(Ordering::SeqCst)
    }

    pub fn next_wake_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.next_wake_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn initial_delay(&self) -> Duration {
        let (lo, hi) = self.inner.config.initial_delay_range();
        self.arm(jitter(lo, hi))
    }

    fn reschedule_delay(&self) -> Duration {
        let (lo, hi) = self.inner.config.reschedule_range();
        self.arm(jitter(lo, hi))
    }

    fn arm(&self, delay: Duration) -> Duration {
        let at = ChronoDuration::from_std(delay)
            .ok()
            .and_then(|d| self.inner.clock.now().checked_add_signed(d));
        *self.inner.next_wake_at.lock().unwrap_or_else(|e| e.into_inner()) = at;
        let armed = self.inner.armed.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(next_wake_at = ?at, armed, "Proactive wake armed");
        delay
    }

    /// 一次唤醒：先挂好下一次唤醒，再在独立任务中评估。返回下一次唤醒的延迟与评估任务句柄
    pub fn wake(&self) -> (Duration, JoinHandle<Option<WakeOutcome>>) {
        let next = self.reschedule_delay();
        let scheduler = self.clone();
        let handle = tokio::spawn(async move { scheduler.guarded_evaluate().await });
        (next, handle)
    }

    async fn guarded_evaluate(&self) -> Option<WakeOutcome> {
        {
            let mut phase = self.inner.phase.lock().unwrap_or_else(|e| e.into_inner());
            if *phase == SchedulerPhase::Evaluating {
                tracing::warn!("Previous proactive evaluation still running, skipping this wake");
                return None;
            }
            *phase = SchedulerPhase::Evaluating;
        }
        let now = self.inner.clock.now();
        let outcome = catch_panics(self.evaluate(now)).await;
        *self.inner.phase.lock().unwrap_or_else(|e| e.into_inner()) = SchedulerPhase::Idle;
        outcome
    }

    /// 评估本轮是否发送主动问候
    pub async fn evaluate(&self, now: DateTime<Utc>) -> WakeOutcome {
        let inner = &self.inner;
        match inner.store.get_active_event().await {
            Ok(Some(event)) if event.action == EventAction::Pause && event.trigger_time > now => {
                tracing::info!(
                    event_id = %event.id,
                    until = %event.trigger_time,
                    "Proactive check-in suppressed by active pause"
                );
                return WakeOutcome::Suppressed;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read active event, skipping proactive check-in");
                return WakeOutcome::Failed;
            }
        }

        let activity = inner.state.activity().await;
        let silence = now - activity.last_user_message_time;
        let since_proactive = now - activity.last_proactive_sent_time;
        if silence <= ChronoDuration::minutes(inner.config.silence_threshold_minutes)
            || since_proactive <= ChronoDuration::minutes(inner.config.cooldown_minutes)
        {
            tracing::debug!(
                silence_minutes = silence.num_minutes(),
                since_proactive_minutes = since_proactive.num_minutes(),
                "Proactive check-in not eligible"
            );
            return WakeOutcome::NotEligible;
        }

        let local_hour = now.with_timezone(&inner.offset).hour();
        let name = inner.orchestrator.persona().name;
        let prompt = check_in_prompt(
            DayBand::from_hour(local_hour),
            SilenceBand::from_silence(silence),
            &name,
        );
        tracing::info!(silence_minutes = silence.num_minutes(), "Proactive check-in initiated");

        let reply = match inner.orchestrator.respond_raw(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "Failed to generate proactive check-in");
                return WakeOutcome::Failed;
            }
        };
        match inner.channel.deliver(&reply).await {
            Ok(()) => {
                inner.state.mark_proactive_sent(inner.clock.now()).await;
                tracing::info!("Proactive check-in sent");
                WakeOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(error = %e, "Proactive check-in not delivered");
                WakeOutcome::Failed
            }
        }
    }

    /// 主循环：首次唤醒用初始抖动区间，之后每次唤醒都先续期再评估，直到 token 被取消
    pub async fn run(self, shutdown: CancellationToken) {
        if !self.inner.config.enabled {
            tracing::info!("Proactive scheduler disabled");
            return;
        }
        let mut delay = self.initial_delay();
        tracing::info!(first_wake_in_secs = delay.as_secs(), "Proactive scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Proactive scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            let (next, _evaluation) = self.wake();
            delay = next;
        }
    }
}

fn jitter(lo: Duration, hi: Duration) -> Duration {
    if hi <= lo {
        return lo;
    }
    let secs = rand::thread_rng().gen_range(lo.as_secs_f64()..hi.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// 运行评估，panic 记为失败
pub async fn catch_panics<F>(fut: F) -> Option<WakeOutcome>
where
    F: std::future::Future<Output = WakeOutcome>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "Proactive evaluation finished");
            Some(outcome)
        }
        Err(_) => {
            tracing::error!("Proactive evaluation panicked");
            None
        }
    }
}
