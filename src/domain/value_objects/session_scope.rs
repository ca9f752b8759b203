use serde::{Deserialize, Serialize};
use std::fmt;

/// 同期の境界となるセッション（1つのイベント）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionScope(String);

impl SessionScope {
    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err("Session scope cannot be empty".to_string());
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, scope: &str) -> bool {
        self.0 == scope
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SessionScope> for String {
    fn from(scope: SessionScope) -> Self {
        scope.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_scope() {
        assert!(SessionScope::new("  ").is_err());
        assert!(SessionScope::new("").is_err());
    }

    #[test]
    fn matches_exact_value_only() {
        let scope = SessionScope::new("wedding-2026").unwrap();
        assert!(scope.matches("wedding-2026"));
        assert!(!scope.matches("wedding-2025"));
        assert_eq!(scope.to_string(), "wedding-2026");
    }
}
