//! 投递通道：把消息交给用户所在的传输层
//!
//! 投递失败只记录日志，不重试；交出去之后是否送达不在保证范围内。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait Channel: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<(), String>;
}

/// 控制台通道：写到 stdout，前缀为助手名字
pub struct ConsoleChannel {
    speaker: String,
}

impl ConsoleChannel {
    pub fn new(speaker: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
        }
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    async fn deliver(&self, text: &str) -> Result<(), String> {
        let mut stdout = tokio::io::stdout();
        let line = format!("{}: {}\n", self.speaker, text);
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| e.to_string())?;
        stdout.flush().await.map_err(|e| e.to_string())
    }
}

/// 记录型通道：保存所有投递内容，可模拟失败（测试用）
#[derive(Default)]
pub struct RecordingChannel {
    delivered: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn deliver(&self, text: &str) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("channel unavailable".to_string());
        }
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_channel_failure_toggle() {
        let channel = RecordingChannel::new();
        channel.deliver("one").await.unwrap();
        channel.set_fail(true);
        assert!(channel.deliver("two").await.is_err());
        assert_eq!(channel.delivered(), vec!["one"]);
    }
}
