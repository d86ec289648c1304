//! 助手人设
//!
//! 关键词自适应（每条用户消息最多触发一条，按顺序）：
//! 含 "formal" → formality = formal；否则含 "joke" → humor_level = high；否则含 "serious talk" → chat_style = thoughtful。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub name: String,
    pub role: String,
    pub tone: String,
    pub humor_level: String,
    pub formality: String,
    pub chat_style: String,
    pub emotional_intelligence: String,
    pub default_response_tone: String,
    pub emoji_usage: String,
    pub allows_teasing: bool,
    pub response_length_preference: String,
    pub reaction_to_mistakes: String,
    pub preferred_nickname: String,
    pub personal_philosophy: String,
    pub topics_liked: Vec<String>,
    pub topics_disliked: Vec<String>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Hearth".into(),
            role: "AI Companion".into(),
            tone: "playful".into(),
            humor_level: "medium".into(),
            formality: "informal".into(),
            chat_style: "engaging".into(),
            emotional_intelligence: "high".into(),
            default_response_tone: "casual and witty".into(),
            emoji_usage: "high".into(),
            allows_teasing: true,
            response_length_preference: "varied".into(),
            reaction_to_mistakes: "lighthearted correction".into(),
            preferred_nickname: "Hearthy".into(),
            personal_philosophy: "Be curious, be fun, and always explore new ideas!".into(),
            topics_liked: Vec::new(),
            topics_disliked: Vec::new(),
        }
    }
}

impl Persona {
    /// 以给定名字创建默认人设
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 按消息中的关键词调整人设；返回被修改的特征名
    pub fn adapt(&mut self, user_message: &str) -> Option<&'static str> {
        let lower = user_message.to_lowercase();
        let (field, target, value) = if lower.contains("formal") {
            ("formality", &mut self.formality, "formal")
        } else if lower.contains("joke") {
            ("humor_level", &mut self.humor_level, "high")
        } else if lower.contains("serious talk") {
            ("chat_style", &mut self.chat_style, "thoughtful")
        } else {
            return None;
        };
        if target.as_str() == value {
            return None;
        }
        *target = value.to_string();
        Some(field)
    }

    /// prompt 中的人设段落
    pub fn describe(&self) -> String {
        let list = |items: &[String]| {
            if items.is_empty() {
                "none in particular".to_string()
            } else {
                items.join(", ")
            }
        };
        format!(
            "- Name: {}\n- Role: {}\n- Tone: {}\n- Humor Level: {}\n- Speech Formality: {}\n- Chat Style: {}\n- Emoji Usage: {}\n- Topics Liked: {}\n- Topics Disliked: {}",
            self.name,
            self.role,
            self.tone,
            self.humor_level,
            self.formality,
            self.chat_style,
            self.emoji_usage,
            list(&self.topics_liked),
            list(&self.topics_disliked),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapt_rules_in_order() {
        let mut persona = Persona::default();
        assert_eq!(persona.adapt("Please be FORMAL and tell a joke"), Some("formality"));
        assert_eq!(persona.formality, "formal");
        assert_eq!(persona.humor_level, "medium");

        assert_eq!(persona.adapt("tell me a joke"), Some("humor_level"));
        assert_eq!(persona.humor_level, "high");

        assert_eq!(persona.adapt("we need a serious talk"), Some("chat_style"));
        assert_eq!(persona.chat_style, "thoughtful");
    }

    #[test]
    fn test_adapt_no_match_or_no_change() {
        let mut persona = Persona::default();
        assert_eq!(persona.adapt("hello there"), None);
        persona.adapt("joke please");
        assert_eq!(persona.adapt("another joke"), None);
    }

    #[test]
    fn test_describe_mentions_name_and_topics() {
        let mut persona = Persona::named("Mira");
        persona.topics_liked = vec!["astronomy".into()];
        let text = persona.describe();
        assert!(text.contains("Name: Mira"));
        assert!(text.contains("Topics Liked: astronomy"));
        assert!(text.contains("Topics Disliked: none in particular"));
    }
}
