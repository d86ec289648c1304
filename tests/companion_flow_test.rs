//! Companion 端到端测试：Mock 生成后端 + 内存存储 + 记录型通道，全程离线

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use serde_json::Value;

use hearth::channel::RecordingChannel;
use hearth::config::AppConfig;
use hearth::core::{Clock, ManualClock};
use hearth::llm::MockLlmClient;
use hearth::profile::{LlmProfileAdapter, Persona, Profile};
use hearth::schedule::WakeOutcome;
use hearth::store::{EventAction, InMemoryStore, Store};
use hearth::tools::{DateTimeTool, ScheduleConversationTool, Tool, ToolRegistry};
use hearth::{Companion, CompanionParts};

struct BrokenWeather;

#[async_trait]
impl Tool for BrokenWeather {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Current weather for a latitude/longitude."
    }

    fn result_key(&self) -> &str {
        "weather"
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        Err("weather service down".to_string())
    }
}

struct Setup {
    companion: Companion,
    llm: Arc<MockLlmClient>,
    store: Arc<InMemoryStore>,
    channel: Arc<RecordingChannel>,
    clock: ManualClock,
}

fn monday_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn setup(script: Vec<Result<String, String>>) -> Setup {
    let mut cfg = AppConfig::default();
    cfg.app.utc_offset_minutes = Some(0);
    let clock = ManualClock::new(monday_noon());
    let llm = Arc::new(MockLlmClient::scripted(script));
    let store = Arc::new(InMemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());

    let parts = CompanionParts {
        store: store.clone(),
        llm: llm.clone(),
        channel: channel.clone(),
        clock: Arc::new(clock.clone()),
        profile: Arc::new(LlmProfileAdapter::in_memory(llm.clone(), Profile::default())),
        persona: Persona::named("Mira"),
        persona_path: None,
    };

    let mut registry = ToolRegistry::new();
    let tool_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    registry.register(DateTimeTool::new(tool_clock, FixedOffset::east_opt(0).unwrap()));
    registry.register(BrokenWeather);
    registry.register(ScheduleConversationTool);

    Setup {
        companion: Companion::new(&cfg, parts).with_tools(registry),
        llm,
        store,
        channel,
        clock,
    }
}

fn reply_prompt(llm: &MockLlmClient, call: usize) -> String {
    llm.calls()[call][1].content.clone()
}

#[tokio::test]
async fn test_tool_turn_survives_partial_failure() {
    let s = setup(vec![
        Ok(r#"[{"tool":"get_current_datetime"},{"tool":"get_weather","args":{"latitude":51.5,"longitude":-0.1}}]"#.into()),
        Ok("It's Monday, and I couldn't reach the weather service.".into()),
        Ok("{}".into()),
    ]);

    let reply = s.companion.process_message("what day is it and is it raining?").await;
    assert_eq!(reply, "It's Monday, and I couldn't reach the weather service.");

    let prompt = reply_prompt(&s.llm, 1);
    assert!(prompt.contains("\"Monday\""));
    assert!(prompt.contains("weather_error"));
    assert!(prompt.contains("weather service down"));
}

#[tokio::test(start_paused = true)]
async fn test_reminder_is_registered_and_fires() {
    let s = setup(vec![
        Ok(r#"[{"tool":"schedule_conversation","args":{"action":"schedule_reminder","time_expression":"in 10 minutes","specific_message":"drink water"}}]"#.into()),
        Ok("Got it, I'll remind you.".into()),
        Ok("{}".into()),
    ]);

    let reply = s.companion.process_message("remind me to drink water in 10 minutes").await;
    assert_eq!(reply, "Got it, I'll remind you.");
    s.companion.orchestrator().flush_profile_updates().await;

    let pending = s.companion.deferred().active_pending().await.unwrap().unwrap();
    assert_eq!(pending.action, EventAction::Reminder);
    assert_eq!(pending.trigger_time, monday_noon() + ChronoDuration::minutes(10));
    assert!(reply_prompt(&s.llm, 1).contains("Scheduling Note: A reminder has been set"));

    tokio::time::sleep(Duration::from_secs(11 * 60)).await;

    let delivered = s.channel.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].contains("drink water"));
    assert!(!s.store.get_event(&pending.id).await.unwrap().unwrap().active);
}

#[tokio::test(start_paused = true)]
async fn test_new_schedule_replaces_pause() {
    let s = setup(vec![
        Ok(r#"[{"tool":"pause_conversation","args":{"time_expression":"for 2 hours"}}]"#.into()),
        Ok("I'll give you some space.".into()),
        Ok("{}".into()),
        Ok(r#"[{"tool":"schedule_reminder","args":{"time_expression":"in 30 minutes"}}]"#.into()),
        Ok("Reminder set.".into()),
        Ok("{}".into()),
    ]);

    s.companion.process_message("don't bother me for 2 hours").await;
    s.companion.orchestrator().flush_profile_updates().await;
    let pause = s.companion.deferred().active_pending().await.unwrap().unwrap();
    assert_eq!(pause.action, EventAction::Pause);

    s.companion.process_message("actually remind me in 30 minutes").await;
    s.companion.orchestrator().flush_profile_updates().await;

    let active: Vec<_> = s.store.all_events().into_iter().filter(|e| e.active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].action, EventAction::Reminder);
    assert!(!s.store.get_event(&pause.id).await.unwrap().unwrap().active);
}

#[tokio::test]
async fn test_pause_suppresses_proactive_check_in() {
    let s = setup(vec![
        Ok(r#"[{"tool":"schedule_conversation","args":{"action":"pause_conversation","time_expression":"until 6pm"}}]"#.into()),
        Ok("Talk later!".into()),
        Ok("{}".into()),
    ]);

    s.companion.process_message("busy until 6pm, don't ping me").await;
    s.companion.orchestrator().flush_profile_updates().await;
    let before = s.companion.state().activity().await;
    let calls_before = s.llm.call_count();

    s.clock.advance(ChronoDuration::hours(4));
    let outcome = s.companion.proactive().evaluate(s.clock.now()).await;
    assert_eq!(outcome, WakeOutcome::Suppressed);
    assert!(s.channel.delivered().is_empty());
    assert_eq!(s.llm.call_count(), calls_before);
    assert_eq!(s.companion.state().activity().await, before);
}

#[tokio::test]
async fn test_session_summary_grounds_later_reply() {
    let s = setup(vec![
        Ok("general_chat".into()),
        Ok("Biscuit sounds adorable!".into()),
        Ok("{}".into()),
        Ok("The user has a beagle named Biscuit who loves the park.".into()),
        Ok("general_chat".into()),
        Ok("Did Biscuit enjoy the park?".into()),
    ]);

    s.companion.process_message("my beagle Biscuit loves the park").await;
    s.companion.orchestrator().flush_profile_updates().await;
    s.companion.process_message("sleep").await;
    assert_eq!(s.store.get_summaries().await.unwrap().len(), 1);

    let reply = s.companion.process_message("how is my beagle doing?").await;
    assert_eq!(reply, "Did Biscuit enjoy the park?");
    assert!(reply_prompt(&s.llm, 5).contains("beagle named Biscuit"));
}
