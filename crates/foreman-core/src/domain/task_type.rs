//! TaskType - ルーターが参照する task_type キー
//!
//! 入力は常に小文字化して保持します（ルーティングは case-insensitive）。

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<TaskType> for String {
    fn from(t: TaskType) -> Self {
        t.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_is_lowercased() {
        assert_eq!(TaskType::new(" DeV ").as_str(), "dev");
        assert_eq!(TaskType::from("Review"), TaskType::new("review"));
    }

    #[test]
    fn task_type_deserializes_lowercased() {
        let t: TaskType = serde_json::from_str("\"QA\"").unwrap();
        assert_eq!(t.as_str(), "qa");
    }
}
