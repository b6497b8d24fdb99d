//! 响应头规则匹配
//!
//! 规则按顺序匹配，第一个命中的规则决定对象的 header 集合。
//! 无法编译的正则视为不匹配，并以诊断信息的形式暴露出来。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// header 名 -> header 值
pub type HeaderSet = HashMap<String, String>;

/// 默认规则：html 不缓存
pub const DEFAULT_HEADER_RULES: &str =
    r#"[{"path": "\\.html$", "headers": {"Cache-Control": "public, max-age=0, must-revalidate"}}]"#;

/// 单条 header 规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderRule {
    /// 正则，空字符串匹配所有对象
    pub path: String,
    #[serde(default)]
    pub headers: HeaderSet,
}

impl HeaderRule {
    pub fn new<I, K, V>(path: &str, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: path.to_string(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// 无效规则的诊断信息
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleDiagnostic {
    pub index: usize,
    pub pattern: String,
    pub error: String,
}

impl std::fmt::Display for RuleDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "header 规则 #{} ({:?}) 无法编译，已忽略: {}",
            self.index, self.pattern, self.error
        )
    }
}

/// 单个对象的匹配结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMatch {
    pub headers: HeaderSet,
    pub fingerprint: String,
    /// 命中的规则下标
    pub matched_rule: Option<usize>,
    /// 命中之前被跳过的无效规则下标
    pub skipped_invalid: Vec<usize>,
}

struct CompiledRule {
    regex: Option<Regex>,
    headers: HeaderSet,
}

/// header 规则匹配器（规则在构造时一次性编译）
pub struct HeaderRuleMatcher {
    rules: Vec<CompiledRule>,
    diagnostics: Vec<RuleDiagnostic>,
}

impl HeaderRuleMatcher {
    pub fn new(rules: &[HeaderRule]) -> Self {
        let mut diagnostics = Vec::new();
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                let regex = match Regex::new(&rule.path) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        let diagnostic = RuleDiagnostic {
                            index,
                            pattern: rule.path.clone(),
                            error: e.to_string(),
                        };
                        warn!("{}", diagnostic);
                        diagnostics.push(diagnostic);
                        None
                    }
                };
                CompiledRule {
                    regex,
                    headers: rule.headers.clone(),
                }
            })
            .collect();

        Self { rules, diagnostics }
    }

    pub fn diagnostics(&self) -> &[RuleDiagnostic] {
        &self.diagnostics
    }

    /// 为对象 key 解析 header 集合与 header 指纹
    ///
    /// 规则匹配的目标是 `"/" + key`。
    pub fn resolve(&self, object_key: &str) -> HeaderMatch {
        let target = format!("/{}", object_key.trim_start_matches('/'));
        let mut skipped_invalid = Vec::new();

        for (index, rule) in self.rules.iter().enumerate() {
            let Some(regex) = &rule.regex else {
                skipped_invalid.push(index);
                continue;
            };
            if regex.is_match(&target) {
                return HeaderMatch {
                    fingerprint: fingerprint_headers(&rule.headers),
                    headers: rule.headers.clone(),
                    matched_rule: Some(index),
                    skipped_invalid,
                };
            }
        }

        HeaderMatch {
            skipped_invalid,
            ..HeaderMatch::default()
        }
    }
}

/// header 集合指纹：空集合为空字符串，否则按 key 排序后拼接 `key:value` 再哈希
pub fn fingerprint_headers(headers: &HeaderSet) -> String {
    if headers.is_empty() {
        return String::new();
    }

    let mut keys: Vec<&String> = headers.keys().collect();
    keys.sort();

    let mut hasher = blake3::Hasher::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(headers[key].as_bytes());
    }
    hasher.finalize().to_hex()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn site_rules() -> Vec<HeaderRule> {
        vec![
            HeaderRule::new(r"\.html", [("Cache-Control", "public, max-age=0, must-revalidate")]),
            HeaderRule::new(r"\.(jpg|png|gif|webp|ico)$", [("Cache-Control", "max-age=31536000")]),
            HeaderRule::new(r"\.pdf$", [("Cache-Control", "max-age=11536000")]),
            HeaderRule::new("", [("Cache-Control", "no-cache")]),
        ]
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let matcher = HeaderRuleMatcher::new(&site_rules());

        let m = matcher.resolve("index.html");
        assert_eq!(m.matched_rule, Some(0));
        assert_eq!(m.headers["Cache-Control"], "public, max-age=0, must-revalidate");

        let m = matcher.resolve("img/favicon.ico");
        assert_eq!(m.matched_rule, Some(1));

        // 空规则兜底
        let m = matcher.resolve("app.js");
        assert_eq!(m.matched_rule, Some(3));
        assert_eq!(m.headers["Cache-Control"], "no-cache");
    }

    #[test]
    fn test_no_match_returns_empty_set() {
        let matcher = HeaderRuleMatcher::new(&[HeaderRule::new(r"\.css$", [("A", "b")])]);
        let m = matcher.resolve("app.js");
        assert!(m.headers.is_empty());
        assert_eq!(m.fingerprint, "");
        assert_eq!(m.matched_rule, None);
    }

    #[test]
    fn test_match_target_has_leading_slash() {
        let matcher = HeaderRuleMatcher::new(&[HeaderRule::new(r"^/index\.html$", [("A", "b")])]);
        assert_eq!(matcher.resolve("index.html").matched_rule, Some(0));
        assert_eq!(matcher.resolve("docs/index.html").matched_rule, None);
    }

    #[test]
    fn test_invalid_pattern_is_skipped_and_reported() {
        let rules = vec![
            HeaderRule::new(r"(\.js$", [("Cache-Control", "broken")]),
            HeaderRule::new(r"\.js$", [("Cache-Control", "max-age=60")]),
        ];
        let matcher = HeaderRuleMatcher::new(&rules);

        assert_eq!(matcher.diagnostics().len(), 1);
        assert_eq!(matcher.diagnostics()[0].index, 0);

        let m = matcher.resolve("app.js");
        assert_eq!(m.matched_rule, Some(1));
        assert_eq!(m.skipped_invalid, vec![0]);
        assert_eq!(m.headers["Cache-Control"], "max-age=60");
    }

    #[test]
    fn test_fingerprint_sensitive_to_keys_and_values() {
        let base = HeaderRule::new("", [("Cache-Control", "no-cache")]).headers;
        let other_value = HeaderRule::new("", [("Cache-Control", "max-age=60")]).headers;
        let other_key = HeaderRule::new("", [("Cache-Contro", "no-cache")]).headers;
        let extra = HeaderRule::new("", [("Cache-Control", "no-cache"), ("X-Frame", "deny")]).headers;

        let fp = fingerprint_headers(&base);
        assert_eq!(fp.len(), 32);
        assert_ne!(fp, fingerprint_headers(&other_value));
        assert_ne!(fp, fingerprint_headers(&other_key));
        assert_ne!(fp, fingerprint_headers(&extra));
        assert_eq!(fingerprint_headers(&HeaderSet::new()), "");
    }

    #[test]
    fn test_rules_deserialize_from_json() {
        let rules: Vec<HeaderRule> = serde_json::from_str(DEFAULT_HEADER_RULES).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].path, r"\.html$");
        assert_eq!(
            rules[0].headers["Cache-Control"],
            "public, max-age=0, must-revalidate"
        );
    }

    proptest! {
        #[test]
        fn prop_fingerprint_ignores_insertion_order(
            pairs in proptest::collection::vec(("[a-zA-Z-]{1,12}", "[ -~]{0,24}"), 1..8)
        ) {
            let unique: BTreeMap<String, String> = pairs.into_iter().collect();
            let forward: HeaderSet = unique.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let backward: HeaderSet = unique.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect();
            prop_assert_eq!(fingerprint_headers(&forward), fingerprint_headers(&backward));
        }
    }
}
