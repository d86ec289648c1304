//! 用户画像与助手人设
//!
//! - `Profile`：用户特征集合（name、hobbies、preferences …），合并规则见 [`merge`]
//! - `ProfileAdapter`：从对话历史中提取特征并合并（尽力而为，失败只记日志）
//! - `Persona`：助手自身的人设，含关键词自适应规则

pub mod adapter;
pub mod persona;

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use adapter::{LlmProfileAdapter, ProfileAdapter};
pub use persona::Persona;

/// 单个特征值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraitValue {
    /// 列表：合并时取并集（去重）
    List(Vec<Value>),
    /// 嵌套对象：合并时按键递归
    Nested(BTreeMap<String, TraitValue>),
    /// 标量（字符串、数字、布尔、null）：合并时覆盖
    Scalar(Value),
}

/// 用户画像
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    pub traits: BTreeMap<String, TraitValue>,
}

impl Profile {
    /// 新用户的初始画像
    pub fn default_user() -> Self {
        let value = json!({
            "name": "Unknown",
            "age": null,
            "gender": "Unspecified",
            "location": "Unknown",
            "language": "English",
            "hobbies": [],
            "profession": "Unspecified",
            "preferences": {
                "communication_style": "neutral",
                "favorite_topics": [],
                "disliked_topics": []
            },
            "activities": {
                "internships": [],
                "projects": [],
                "presentations": [],
                "certifications": [],
                "other_achievements": []
            }
        });
        Self::from_value(value).unwrap_or_default()
    }

    /// 仅接受 JSON 对象
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(_) => serde_json::from_value(value).ok(),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&TraitValue> {
        self.traits.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.traits.is_empty()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// 合并两份画像：列表取并集（去重，旧值在前），标量以新值覆盖，嵌套对象按键递归；类型不一致时以新值为准
pub fn merge(old: &Profile, new: &Profile) -> Profile {
    Profile {
        traits: merge_maps(&old.traits, &new.traits),
    }
}

fn merge_maps(
    old: &BTreeMap<String, TraitValue>,
    new: &BTreeMap<String, TraitValue>,
) -> BTreeMap<String, TraitValue> {
    let mut out = old.clone();
    for (key, incoming) in new {
        let merged = match out.get(key) {
            Some(existing) => merge_values(existing, incoming),
            None => incoming.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

fn merge_values(old: &TraitValue, new: &TraitValue) -> TraitValue {
    match (old, new) {
        (TraitValue::List(a), TraitValue::List(b)) => {
            let mut union = a.clone();
            for item in b {
                if !union.contains(item) {
                    union.push(item.clone());
                }
            }
            TraitValue::List(union)
        }
        (TraitValue::Nested(a), TraitValue::Nested(b)) => TraitValue::Nested(merge_maps(a, b)),
        _ => new.clone(),
    }
}

/// 从 JSON 文件加载；文件不存在时返回 None
pub fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

/// 写入 JSON 文件；父目录不存在时自动创建
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(v: Value) -> Profile {
        Profile::from_value(v).unwrap()
    }

    #[test]
    fn test_lists_union_scalars_overwrite() {
        let old = profile(json!({"name": "Unknown", "hobbies": ["chess", "music"]}));
        let new = profile(json!({"name": "Asha", "hobbies": ["music", "hiking"]}));
        let merged = merge(&old, &new);
        assert_eq!(merged.get("name"), Some(&TraitValue::Scalar(json!("Asha"))));
        assert_eq!(
            merged.get("hobbies"),
            Some(&TraitValue::List(vec![json!("chess"), json!("music"), json!("hiking")]))
        );
    }

    #[test]
    fn test_nested_merge_is_recursive() {
        let old = profile(json!({
            "preferences": {"communication_style": "neutral", "favorite_topics": ["space"],
                            "deep": {"a": 1, "b": [1]}}
        }));
        let new = profile(json!({
            "preferences": {"favorite_topics": ["cooking"], "deep": {"b": [2]}}
        }));
        let merged = merge(&old, &new);
        let expected = profile(json!({
            "preferences": {"communication_style": "neutral",
                            "favorite_topics": ["space", "cooking"],
                            "deep": {"a": 1, "b": [1, 2]}}
        }));
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_untouched_keys_kept_and_new_keys_added() {
        let old = Profile::default_user();
        let new = profile(json!({"pet": "cat"}));
        let merged = merge(&old, &new);
        assert_eq!(merged.get("language"), Some(&TraitValue::Scalar(json!("English"))));
        assert_eq!(merged.get("pet"), Some(&TraitValue::Scalar(json!("cat"))));
    }

    #[test]
    fn test_type_mismatch_takes_new() {
        let old = profile(json!({"location": {"city": "Pune"}}));
        let new = profile(json!({"location": "Mumbai"}));
        assert_eq!(
            merge(&old, &new).get("location"),
            Some(&TraitValue::Scalar(json!("Mumbai")))
        );
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Profile::from_value(json!(["a"])).is_none());
    }

    #[test]
    fn test_json_file_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("profile.json");
        assert!(load_json::<Profile>(&path).unwrap().is_none());
        save_json(&path, &Profile::default_user()).unwrap();
        assert_eq!(load_json::<Profile>(&path).unwrap(), Some(Profile::default_user()));
    }
}
