//! 排除规则
//!
//! 模式匹配的是对象 key（不带前导 `/`），区分大小写：
//! - 以 `/` 结尾：目录前缀，`exclude/` 匹配 `exclude/a.txt` 和 `docs/exclude/a.txt`
//! - 含 `*` 或 `?`：glob，`**` 可跨越 `/`，`*` 与 `?` 不跨越
//! - 其他：完整 key，或以 `/` + 模式结尾的 key
//!
//! 以 `/` 开头的模式只从 key 的开头匹配。

use regex::Regex;
use tracing::warn;

/// 排除匹配器
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    patterns: Vec<(String, Regex)>,
}

impl ExcludeMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .filter_map(|p| match Regex::new(&Self::to_regex(p)) {
                Ok(re) => Some((p.to_string(), re)),
                Err(e) => {
                    warn!("排除规则 {:?} 无法编译，已忽略: {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// 任意一个模式命中即排除
    pub fn is_excluded(&self, object_key: &str) -> bool {
        self.matching_pattern(object_key).is_some()
    }

    /// 返回第一个命中的模式（用于日志）
    pub fn matching_pattern(&self, object_key: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(object_key))
            .map(|(p, _)| p.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn to_regex(pattern: &str) -> String {
        let (anchor, body) = match pattern.strip_prefix('/') {
            Some(rest) => ("^", rest),
            None => ("(^|/)", pattern),
        };

        if body.ends_with('/') {
            return format!("{}{}", anchor, regex::escape(body));
        }

        if body.contains(['*', '?']) {
            return format!("{}{}$", anchor, Self::glob_to_regex(body));
        }

        format!("{}{}$", anchor, regex::escape(body))
    }

    fn glob_to_regex(glob: &str) -> String {
        let mut out = String::new();
        let mut chars = glob.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    // `**/` 也匹配零层目录
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                }
                '*' => out.push_str("[^/]*"),
                '?' => out.push_str("[^/]"),
                c => out.push_str(&regex::escape(&c.to_string())),
            }
        }
        out
    }
}
