//! 文本规范化与场景描述匹配

use regex::Regex;
use std::sync::OnceLock;

use crate::caption_index::CaptionIndex;

/// 默认模糊匹配阈值（严格大于才算命中）
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 70.0;

fn non_word() -> &'static Regex {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    NON_WORD.get_or_init(|| Regex::new(r"\W+").expect("静态正则表达式"))
}

/// 单词规范化：转小写并去掉所有非单词字符
pub fn normalize_word(word: &str) -> String {
    non_word().replace_all(&word.to_lowercase(), "").into_owned()
}

/// 文本规范化：按空白切分，逐词规范化，丢弃空词，用单个空格连接
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 部分相似度（0-100）
///
/// 用较短字符串长度的窗口在较长字符串上滑动，对每个窗口计算插删相似度
/// `2 * LCS * 100 / (|短串| + |窗口|)`，取最高值。
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }

    let len = short.len();
    let mut best = 0usize;
    for window in long.windows(len) {
        best = best.max(common_subsequence_len(&short, window));
        if best == len {
            break;
        }
    }

    // 整数运算后再转浮点，保证 70 分边界精确
    (2 * best * 100) as f64 / (2 * len) as f64
}

/// 最长公共子序列长度
fn common_subsequence_len(a: &[char], b: &[char]) -> usize {
    similar::capture_diff_slices(similar::Algorithm::Lcs, a, b)
        .iter()
        .map(|op| match op {
            similar::DiffOp::Equal { len, .. } => *len,
            _ => 0,
        })
        .sum()
}

/// 单条描述是否匹配查询（参数均为规范化后的文本）
///
/// 先检查子串，命中即返回；否则看部分相似度是否严格大于阈值。
pub fn caption_matches(normalized_query: &str, normalized_caption: &str, fuzzy_threshold: f64) -> bool {
    normalized_caption.contains(normalized_query)
        || partial_ratio(normalized_query, normalized_caption) > fuzzy_threshold
}

/// 在场景描述中搜索，返回命中的场景编号（保持索引的迭代顺序）
///
/// 空查询规范化后为空串，是所有描述的子串，因此会返回全部场景。
pub fn search(captions: &CaptionIndex, query: &str, fuzzy_threshold: f64) -> Vec<String> {
    let query = normalize(query);
    captions
        .iter()
        .filter(|(_, caption)| caption_matches(&query, &normalize(caption), fuzzy_threshold))
        .map(|(scene, _)| scene.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_captions() -> CaptionIndex {
        CaptionIndex::from_entries([
            ("1", "a red car driving"),
            ("2", "a blue house"),
            ("3", "a red car parked"),
        ])
    }

    #[test]
    fn test_normalize_folds_case_and_punctuation() {
        assert_eq!(normalize("A Red-Car, driving!"), "a redcar driving");
        assert_eq!(normalize("  Hello   WORLD  "), "hello world");
        assert_eq!(normalize("snake_case stays"), "snake_case stays");
        assert_eq!(normalize("-- ... !!"), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "A man, a plan; a canal: Panama!",
            "  tabs\tand\nnewlines ",
            "don't -- stop",
            "Ünïcode Ärger über Straße",
            "",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "input: {:?}", input);
            assert!(!once.contains("  "));
            assert_eq!(once, once.to_lowercase());
        }
    }

    #[test]
    fn test_partial_ratio_basics() {
        assert_eq!(partial_ratio("car", "a red car driving"), 100.0);
        assert_eq!(partial_ratio("a red car driving", "car"), 100.0);
        assert_eq!(partial_ratio("", ""), 100.0);
        assert_eq!(partial_ratio("", "abc"), 0.0);
        assert_eq!(partial_ratio("redd car", "a red car driving"), 87.5);
        assert_eq!(partial_ratio("car", "cra"), 200.0 / 3.0);
    }

    #[test]
    fn test_fuzzy_threshold_is_strict() {
        let query = "a".repeat(100);
        let seventy = format!("{}{}", "a".repeat(70), "b".repeat(30));
        let seventy_one = format!("{}{}", "a".repeat(71), "b".repeat(29));

        assert_eq!(partial_ratio(&query, &seventy), 70.0);
        assert!(!caption_matches(&query, &seventy, DEFAULT_FUZZY_THRESHOLD));

        assert_eq!(partial_ratio(&query, &seventy_one), 71.0);
        assert!(caption_matches(&query, &seventy_one, DEFAULT_FUZZY_THRESHOLD));
    }

    #[test]
    fn test_substring_always_matches() {
        // 阈值设为不可达，子串仍然命中
        assert!(caption_matches("car", "a red car parked", 1000.0));
    }

    #[test]
    fn test_search_substring() {
        let hits = search(&sample_captions(), "red car", DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(hits, vec!["1", "3"]);
    }

    #[test]
    fn test_search_typo_uses_fuzzy() {
        let captions = sample_captions();
        assert!(!normalize("a red car driving").contains(&normalize("redd car")));

        let hits = search(&captions, "redd car", DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(hits, vec!["1", "3"]);
    }

    #[test]
    fn test_search_missing_space_uses_fuzzy() {
        let score = partial_ratio("redcar", "a red car driving");
        assert!((score - 500.0 / 6.0).abs() < 1e-9, "score: {}", score);

        let hits = search(&sample_captions(), "redcar", DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(hits, vec!["1", "3"]);
    }

    #[test]
    fn test_search_query_is_normalized() {
        let hits = search(&sample_captions(), "  BLUE, ", DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(hits, vec!["2"]);
    }

    #[test]
    fn test_empty_query_returns_every_scene() {
        let hits = search(&sample_captions(), "", DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(hits, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_search_keeps_index_order() {
        let captions = CaptionIndex::from_entries([
            ("10", "a dog"),
            ("2", "another dog"),
        ]);
        assert_eq!(search(&captions, "dog", DEFAULT_FUZZY_THRESHOLD), vec!["10", "2"]);
    }
}
