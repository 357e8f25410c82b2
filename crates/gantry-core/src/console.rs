//! Console lines streamed from a running job.

use crate::ids::{BuildId, JobIdentifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag used when none is supplied.
pub const DEFAULT_TAG: &str = "  ";

/// Two-character prefixes that classify console lines.
pub mod tags {
    pub const NOTICE: &str = "##";
    pub const PREP: &str = "pr";
    pub const PREP_ERR: &str = "pe";
    pub const TASK_START: &str = "!!";
    pub const TASK_PASS: &str = "?0";
    pub const TASK_FAIL: &str = "?1";
    pub const TASK_CANCELLED: &str = "^C";
    pub const OUT: &str = "&1";
    pub const ERR: &str = "&2";
    pub const JOB_PASS: &str = "j0";
    pub const JOB_FAIL: &str = "j1";
}

/// Which job a console line belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleTarget {
    Job(JobIdentifier),
    Build(BuildId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleTransmission {
    tag: String,
    line: String,
    target: ConsoleTarget,
    timestamp: DateTime<Utc>,
}

impl ConsoleTransmission {
    /// The timestamp is captured here, not when the line is sent.
    pub fn new(tag: Option<&str>, line: impl Into<String>, target: ConsoleTarget) -> Self {
        Self::at(tag, line, target, Utc::now())
    }

    pub fn at(
        tag: Option<&str>,
        line: impl Into<String>,
        target: ConsoleTarget,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tag: tag.unwrap_or(DEFAULT_TAG).to_string(),
            line: line.into(),
            target,
            timestamp,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn target(&self) -> &ConsoleTarget {
        &self.target
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// `{tag}|{HH:MM:SS.mmm} ` before every physical line, one trailing newline.
    pub fn render(&self) -> String {
        let prefix = format!("{}|{} ", self.tag, self.timestamp.format("%H:%M:%S%.3f"));
        let body = self.line.strip_suffix('\n').unwrap_or(&self.line);

        let mut out = String::with_capacity(body.len() + prefix.len() + 1);
        for segment in body.split('\n') {
            out.push_str(&prefix);
            out.push_str(segment.strip_suffix('\r').unwrap_or(segment));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at_noon(tag: Option<&str>, line: &str) -> ConsoleTransmission {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 34, 56).unwrap()
            + chrono::Duration::milliseconds(7);
        ConsoleTransmission::at(tag, line, ConsoleTarget::Build(BuildId(1)), ts)
    }

    #[test]
    fn test_default_tag_is_two_spaces() {
        assert_eq!(at_noon(None, "hello").render(), "  |12:34:56.007 hello\n");
    }

    #[test]
    fn test_tagged_line() {
        assert_eq!(
            at_noon(Some(tags::PREP_ERR), "checkout failed").render(),
            "pe|12:34:56.007 checkout failed\n"
        );
    }

    #[test]
    fn test_embedded_newline_shares_timestamp() {
        assert_eq!(
            at_noon(Some(tags::OUT), "one\ntwo").render(),
            "&1|12:34:56.007 one\n&1|12:34:56.007 two\n"
        );
    }

    #[test]
    fn test_exactly_one_trailing_newline() {
        assert_eq!(at_noon(None, "done\n").render(), "  |12:34:56.007 done\n");
        assert_eq!(at_noon(None, "crlf\r\n").render(), "  |12:34:56.007 crlf\n");
    }

    #[test]
    fn test_timestamp_captured_at_construction() {
        let before = Utc::now();
        let t = ConsoleTransmission::new(None, "x", ConsoleTarget::Build(BuildId(2)));
        let after = Utc::now();
        assert!(t.timestamp() >= before && t.timestamp() <= after);
    }
}
