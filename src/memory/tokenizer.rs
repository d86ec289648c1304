//! 分词与相似度
//!
//! 长期记忆检索使用的相关度：小写化、按非字母数字字符切分，再计算 Jaccard 相似度。

use std::collections::HashSet;

/// 分词：小写后按非字母数字字符切分，丢弃空串
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// 分词并返回词集合（用于相似度计算）
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard 相似度 |A∩B| / |A∪B|；两个集合都为空时定义为 0
pub fn jaccard_similarity(set1: &HashSet<String>, set2: &HashSet<String>) -> f64 {
    let union = set1.union(set2).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = set1.intersection(set2).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_tokenize_lowercase_alnum() {
        assert_eq!(
            tokenize("Hello, World! It's 2024."),
            vec!["hello", "world", "it", "s", "2024"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_jaccard_identity_and_empty() {
        let a = set(&["rust", "tokio"]);
        assert_eq!(jaccard_similarity(&a, &a), 1.0);
        assert_eq!(jaccard_similarity(&HashSet::new(), &HashSet::new()), 0.0);
        assert_eq!(jaccard_similarity(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn test_jaccard_bounded() {
        let a = set(&["a", "b", "c"]);
        let b = set(&["b", "c", "d", "e"]);
        let s = jaccard_similarity(&a, &b);
        assert!((0.0..=1.0).contains(&s));
        assert!((s - 2.0 / 5.0).abs() < 1e-9);
        assert_eq!(s, jaccard_similarity(&b, &a));
    }
}
