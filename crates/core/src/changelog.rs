//! Change-log audit records.
//!
//! When a change-log writer is configured, every VFS and file operation
//! emits a start record and a complete record as JSON lines. The stream is
//! audit-only; nothing reads it back.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One change-log line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arg_name: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub arg_flags: u32,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub off: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub ret_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ret_error: Option<String>,
}

impl ChangeRecord {
    /// A start record for an operation about to run.
    pub fn start(action: &str, name: &str, flags: u32, off: i64) -> Self {
        Self {
            ts: OffsetDateTime::now_utc(),
            action: format!("{action}Start"),
            arg_name: name.to_string(),
            arg_flags: flags,
            off,
            ret_count: 0,
            ret_error: None,
        }
    }

    /// A completion record carrying the operation's result.
    pub fn complete(action: &str, name: &str, ret_count: i64, ret_error: Option<String>) -> Self {
        Self {
            ts: OffsetDateTime::now_utc(),
            action: format!("{action}Complete"),
            arg_name: name.to_string(),
            arg_flags: 0,
            off: 0,
            ret_count,
            ret_error,
        }
    }
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_to_single_json_line() {
        let rec = ChangeRecord::start("WriteAt", "test.db", 0, 4096);
        let line = serde_json::to_string(&rec).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"action\":\"WriteAtStart\""));
        assert!(line.contains("\"arg_name\":\"test.db\""));
        assert!(line.contains("\"off\":4096"));
    }

    #[test]
    fn test_complete_record_carries_error() {
        let rec = ChangeRecord::complete("ReadAt", "test.db", 14, Some("boom".to_string()));
        let line = serde_json::to_string(&rec).unwrap();
        assert!(line.contains("\"ret_count\":14"));
        assert!(line.contains("\"ret_error\":\"boom\""));
    }
}
