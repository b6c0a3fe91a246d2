/// The method filter: which methods queries may invoke
///
/// A policy is a semicolon-separated list of entries, checked first to last;
/// the first entry matching a call decides it, and a call matching no entry
/// is denied. An entry is `classpattern#methodpattern` (or just a class
/// pattern, which covers every method), and a leading `!` turns it into a
/// deny. Class patterns support `java.util.*` for a single package,
/// `java.util.**` for a package and everything below it, and `Foo*` / `*Impl`
/// prefix and suffix forms.
use tracing::warn;

use crate::eval::errors::EvalError;

/// The policy used when the environment does not override it. Reflective and
/// process-control entry points are listed as explicit denies ahead of the
/// broad allows so that widening an allow never reopens them.
pub const DEFAULT_FILTER: &str = "!java.lang.System#*;!java.lang.Runtime#*;!java.lang.Thread#*;!java.lang.reflect.**;!java.lang.ProcessBuilder#*;heapql.model.**;java.util.**;java.lang.String#*;java.lang.Class#*;java.lang.Number#*;java.lang.Boolean#*;java.lang.Character#*";

pub const FILTER_ENV_VAR: &str = "HEAPQL_METHOD_FILTER";

#[derive(Debug, Clone, PartialEq, Eq)]
enum NamePattern {
    Any,
    Exact(String),
    /// `Foo*`
    Prefix(String),
    /// `*Impl`
    Suffix(String),
    /// `java.util.*`: members of the package, not of nested packages
    Package(String),
    /// `java.util.**`: the package and everything below it
    Tree(String),
}

impl NamePattern {
    fn parse(text: &str) -> NamePattern {
        if text == "*" {
            return NamePattern::Any;
        }
        if let Some(pkg) = text.strip_suffix(".**") {
            return NamePattern::Tree(pkg.to_string());
        }
        if let Some(pkg) = text.strip_suffix(".*") {
            return NamePattern::Package(pkg.to_string());
        }
        if let Some(prefix) = text.strip_suffix('*') {
            return NamePattern::Prefix(prefix.to_string());
        }
        if let Some(suffix) = text.strip_prefix('*') {
            return NamePattern::Suffix(suffix.to_string());
        }
        NamePattern::Exact(text.to_string())
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Any => true,
            NamePattern::Exact(e) => name == e,
            NamePattern::Prefix(p) => name.starts_with(p),
            NamePattern::Suffix(s) => name.ends_with(s),
            NamePattern::Package(pkg) => match name.strip_prefix(pkg.as_str()) {
                Some(rest) => {
                    rest.starts_with('.') && !rest[1..].contains('.')
                }
                None => false,
            },
            NamePattern::Tree(pkg) => match name.strip_prefix(pkg.as_str()) {
                Some(rest) => rest.starts_with('.'),
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone)]
struct PolicyEntry {
    deny: bool,
    class_pattern: NamePattern,
    method_pattern: NamePattern,
    /// Original entry text, quoted in denial errors
    source: String,
}

#[derive(Debug, Clone)]
pub struct MethodPolicy {
    entries: Vec<PolicyEntry>,
    source: String,
}

impl MethodPolicy {
    pub fn parse(text: &str) -> MethodPolicy {
        let mut entries = Vec::new();
        for raw in text.split(';') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (deny, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, raw),
            };
            let (class_part, method_part) = match body.split_once('#') {
                Some((c, m)) => (c.trim(), m.trim()),
                None => (body, "*"),
            };
            entries.push(PolicyEntry {
                deny,
                class_pattern: NamePattern::parse(class_part),
                method_pattern: NamePattern::parse(method_part),
                source: raw.to_string(),
            });
        }
        MethodPolicy {
            entries,
            source: text.to_string(),
        }
    }

    /// The default policy, or the contents of `HEAPQL_METHOD_FILTER` when set
    pub fn from_env() -> MethodPolicy {
        match std::env::var(FILTER_ENV_VAR) {
            Ok(text) if !text.trim().is_empty() => {
                warn!(target: "heapql", "method filter overridden from {}", FILTER_ENV_VAR);
                MethodPolicy::parse(&text)
            }
            _ => MethodPolicy::parse(DEFAULT_FILTER),
        }
    }

    pub fn allows(&self, class_name: &str, method_name: &str) -> bool {
        for entry in &self.entries {
            if entry.class_pattern.matches(class_name)
                && entry.method_pattern.matches(method_name)
            {
                return !entry.deny;
            }
        }
        false
    }

    /// Check a call, producing the denial error the evaluator raises
    pub fn check(&self, class_name: &str, method_name: &str) -> Result<(), EvalError> {
        for entry in &self.entries {
            if entry.class_pattern.matches(class_name)
                && entry.method_pattern.matches(method_name)
            {
                if entry.deny {
                    return Err(EvalError::AccessDenied {
                        qualified: format!("{class_name}#{method_name}"),
                        policy: entry.source.clone(),
                    });
                }
                return Ok(());
            }
        }
        Err(EvalError::AccessDenied {
            qualified: format!("{class_name}#{method_name}"),
            policy: self.source.clone(),
        })
    }
}

impl Default for MethodPolicy {
    fn default() -> MethodPolicy {
        MethodPolicy::parse(DEFAULT_FILTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_denies_process_control() {
        let p = MethodPolicy::default();
        assert!(!p.allows("java.lang.System", "exit"));
        assert!(!p.allows("java.lang.Runtime", "exec"));
        assert!(p.allows("java.util.ArrayList", "get"));
        assert!(p.allows("java.lang.String", "substring"));
        assert!(p.allows("heapql.model.HeapObject", "getObjectId"));
    }

    #[test]
    fn first_match_wins() {
        let p = MethodPolicy::parse("!java.util.ArrayList#clear;java.util.**");
        assert!(!p.allows("java.util.ArrayList", "clear"));
        assert!(p.allows("java.util.ArrayList", "size"));
        assert!(p.allows("java.util.concurrent.ConcurrentHashMap", "size"));
    }

    #[test]
    fn unmatched_calls_are_denied() {
        let p = MethodPolicy::parse("java.util.*");
        assert!(p.allows("java.util.HashMap", "get"));
        // single-star package patterns stop at the package boundary
        assert!(!p.allows("java.util.concurrent.ConcurrentHashMap", "get"));
        assert!(!p.allows("com.example.Thing", "get"));
    }

    #[test]
    fn prefix_and_suffix_patterns() {
        let p = MethodPolicy::parse("*List#size;java.lang.String#to*");
        assert!(p.allows("java.util.ArrayList", "size"));
        assert!(!p.allows("java.util.ArrayList", "clear"));
        assert!(p.allows("java.lang.String", "toUpperCase"));
        assert!(!p.allows("java.lang.String", "substring"));
    }
}
