//! The execution policy: what candidate code may and may not do.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Denylist and allowlist tables consulted by the validator and the
/// interpreter bootstrap.
///
/// The default tables are deliberately conservative: anything that reaches
/// the filesystem, the process table, dynamic evaluation or the interpreter's
/// introspection machinery is denied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecPolicy {
    /// Builtins candidate code may call. Everything else is shadowed with a
    /// guard that raises at call time.
    pub allowed_builtins: BTreeSet<String>,
    /// Builtins whose direct call is rejected statically.
    pub blocked_builtins: BTreeSet<String>,
    /// Attribute names whose access is rejected statically.
    pub blocked_attributes: BTreeSet<String>,
    /// Regular expressions matched against the lowercased raw source.
    pub dangerous_patterns: Vec<String>,
    /// Modules the import hook resolves; everything else raises ImportError.
    pub allowed_modules: BTreeSet<String>,
}

fn set_of(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            allowed_builtins: set_of(&[
                "len", "str", "int", "float", "bool", "list", "dict", "tuple", "set",
                "range", "enumerate", "zip", "sorted", "sum", "min", "max", "abs",
                "round", "type", "print",
            ]),
            blocked_builtins: set_of(&[
                "open", "exec", "eval", "compile", "__import__", "input", "raw_input",
                "file", "execfile", "reload", "vars", "dir", "globals", "locals",
                "delattr", "setattr", "getattr", "hasattr", "callable", "isinstance",
                "issubclass", "super", "property", "staticmethod", "classmethod",
            ]),
            blocked_attributes: set_of(&[
                "__class__",
                "__bases__",
                "__subclasses__",
                "__mro__",
                "__dict__",
                "__globals__",
                "__locals__",
                "__code__",
                "__func__",
                "__self__",
                "__module__",
                "__qualname__",
            ]),
            dangerous_patterns: vec![
                r"__.*__".to_string(),
                r"import\s+(os|sys|subprocess)".to_string(),
                r"from\s+(os|sys|subprocess)".to_string(),
                r"exec\s*\(".to_string(),
                r"eval\s*\(".to_string(),
                r"compile\s*\(".to_string(),
                r"open\s*\(".to_string(),
                r"file\s*\(".to_string(),
                r"input\s*\(".to_string(),
                r"raw_input\s*\(".to_string(),
                r"\.system\s*\(".to_string(),
                r"\.popen\s*\(".to_string(),
                r"\.call\s*\(".to_string(),
                r"\.run\s*\(".to_string(),
            ],
            allowed_modules: set_of(&["math", "statistics", "datetime", "plt", "tabular"]),
        }
    }
}

impl ExecPolicy {
    pub fn is_builtin_allowed(&self, name: &str) -> bool {
        self.allowed_builtins.contains(name)
    }

    pub fn is_builtin_blocked(&self, name: &str) -> bool {
        self.blocked_builtins.contains(name)
    }

    pub fn is_attribute_blocked(&self, name: &str) -> bool {
        self.blocked_attributes.contains(name)
    }

    pub fn is_module_allowed(&self, name: &str) -> bool {
        self.allowed_modules.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables_are_disjoint() {
        let policy = ExecPolicy::default();
        for name in &policy.allowed_builtins {
            assert!(
                !policy.blocked_builtins.contains(name),
                "{} both allowed and blocked",
                name
            );
        }
    }

    #[test]
    fn test_denied_entries_present() {
        let policy = ExecPolicy::default();
        assert!(policy.is_builtin_blocked("eval"));
        assert!(policy.is_builtin_blocked("__import__"));
        assert!(policy.is_attribute_blocked("__subclasses__"));
        assert!(policy.is_builtin_allowed("print"));
        assert!(!policy.is_builtin_allowed("open"));
        assert!(policy.is_module_allowed("math"));
        assert!(!policy.is_module_allowed("os"));
    }

    #[test]
    fn test_patterns_compile() {
        let policy = ExecPolicy::default();
        let set = regex::RegexSet::new(&policy.dangerous_patterns).unwrap();
        assert!(set.is_match("import os"));
        assert!(set.is_match("x.__class__"));
        assert!(!set.is_match("total = sum(values)"));
    }

    #[test]
    fn test_policy_serde_roundtrip() {
        let policy = ExecPolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        let back: ExecPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.allowed_builtins, policy.allowed_builtins);
        assert_eq!(back.dangerous_patterns, policy.dangerous_patterns);
    }
}
