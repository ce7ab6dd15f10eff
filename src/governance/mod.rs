//! Governance middleware ("Omega").
//!
//! Every externally visible action passes a four-step pipeline: pre-check
//! the vault, schema-validate the candidate log record, persist it, and
//! (for tool calls) emit a post-record after the action. Whether failures
//! block or fall through is policy, not code.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::GovernanceSettings;
use crate::error::GovernanceError;
use crate::vault::NotebookVault;

/// Result alias for governance operations.
pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Durable record of one action.
///
/// All four of timestamp, type, source, and action are required; `data` is
/// free-form payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub source: String,
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

impl LogRecord {
    /// Record for a tool invocation.
    pub fn tool_call(source: &str, action: &str, data: Value) -> Self {
        Self {
            timestamp: now_timestamp(),
            record_type: "tool_call".to_string(),
            source: source.to_string(),
            action: action.to_string(),
            data,
        }
    }

    /// Record for a transport-level request.
    pub fn http_request(source: &str, action: &str, data: Value) -> Self {
        Self {
            timestamp: now_timestamp(),
            record_type: "http_request".to_string(),
            source: source.to_string(),
            action: action.to_string(),
            data,
        }
    }

    /// Derive the post-verification record for this action.
    pub fn result_record(&self, summary: Value) -> Self {
        Self {
            timestamp: now_timestamp(),
            record_type: self.record_type.clone(),
            source: self.source.clone(),
            action: format!("{}_result", self.action),
            data: summary,
        }
    }
}

/// Strict UTC timestamp for log records.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Check the strict `YYYY-MM-DDTHH:MM:SS(.sss)?Z` shape.
///
/// The shape check catches offset forms (`+00:00`) that chrono would happily
/// parse; the parse catches shapes with impossible dates.
pub fn is_strict_utc_timestamp(text: &str) -> bool {
    let bytes = text.as_bytes();
    let head_ok = |b: &[u8]| {
        b.len() >= 19
            && b[0..4].iter().all(u8::is_ascii_digit)
            && b[4] == b'-'
            && b[5..7].iter().all(u8::is_ascii_digit)
            && b[7] == b'-'
            && b[8..10].iter().all(u8::is_ascii_digit)
            && b[10] == b'T'
            && b[11..13].iter().all(u8::is_ascii_digit)
            && b[13] == b':'
            && b[14..16].iter().all(u8::is_ascii_digit)
            && b[16] == b':'
            && b[17..19].iter().all(u8::is_ascii_digit)
    };

    let shape_ok = match bytes.len() {
        20 => head_ok(bytes) && bytes[19] == b'Z',
        24 => {
            head_ok(bytes)
                && bytes[19] == b'.'
                && bytes[20..23].iter().all(u8::is_ascii_digit)
                && bytes[23] == b'Z'
        }
        _ => false,
    };

    shape_ok && chrono::DateTime::parse_from_rfc3339(text).is_ok()
}

/// The governance pipeline.
pub struct Omega {
    vault: NotebookVault,
    settings: GovernanceSettings,
}

impl Omega {
    /// Build the pipeline over a vault with the configured policy.
    pub fn new(vault: NotebookVault, settings: GovernanceSettings) -> Self {
        Self { vault, settings }
    }

    /// Active policy knobs.
    pub fn settings(&self) -> &GovernanceSettings {
        &self.settings
    }

    /// Pre-check: the vault root must be writable before any action runs.
    ///
    /// Returns `Ok(true)` when the check passed, `Ok(false)` when it failed
    /// but policy lets the action continue.
    pub async fn pre_check(&self) -> GovernanceResult<bool> {
        match self.vault.ensure_root().await {
            Ok(()) => Ok(true),
            Err(e) if self.settings.block_on_failure => Err(GovernanceError::Blocked {
                reason: format!("vault pre-check failed: {}", e),
            }),
            Err(e) => {
                warn!(error = %e, "Vault pre-check failed, continuing per policy");
                Ok(false)
            }
        }
    }

    /// Schema validation of a candidate record.
    pub fn validate(&self, record: &LogRecord) -> GovernanceResult<()> {
        if !self.settings.validate_schema {
            return Ok(());
        }

        if self.settings.require_timestamp && record.timestamp.trim().is_empty() {
            return Err(invalid("timestamp", "must be a non-empty string"));
        }
        if record.record_type.trim().is_empty() {
            return Err(invalid("type", "must be a non-empty string"));
        }
        if self.settings.require_source && record.source.trim().is_empty() {
            return Err(invalid("source", "must be a non-empty string"));
        }
        if self.settings.require_action && record.action.trim().is_empty() {
            return Err(invalid("action", "must be a non-empty string"));
        }
        if self.settings.iso8601_strict && !is_strict_utc_timestamp(&record.timestamp) {
            return Err(invalid(
                "timestamp",
                "must match YYYY-MM-DDTHH:MM:SS(.sss)?Z in UTC",
            ));
        }
        Ok(())
    }

    /// Persist a validated record to today's log file.
    ///
    /// Returns whether the record was written; a write failure only fails
    /// the call under `enforce_logging`.
    pub async fn write_record(&self, record: &LogRecord) -> GovernanceResult<bool> {
        let block = render_record(record);
        match self.vault.append_daily_log(&block).await {
            Ok(path) => {
                debug!(
                    action = %record.action,
                    source = %record.source,
                    path = %path.display(),
                    "Log record written"
                );
                Ok(true)
            }
            Err(e) if self.settings.enforce_logging => Err(GovernanceError::WriteFailed {
                message: e.to_string(),
            }),
            Err(e) => {
                warn!(error = %e, action = %record.action, "Log write failed, continuing per policy");
                Ok(false)
            }
        }
    }

    /// Full pre-action pipeline: pre-check, validate, write.
    pub async fn pre_action(&self, record: &LogRecord) -> GovernanceResult<bool> {
        self.pre_check().await?;
        self.validate(record)?;
        self.write_record(record).await
    }

    /// Post-verification record for a completed action.
    ///
    /// The action already ran, so failures here never undo it; they are
    /// surfaced as warnings unless enforcement makes the write itself fail.
    pub async fn post_action(&self, original: &LogRecord, summary: Value) -> GovernanceResult<bool> {
        let record = original.result_record(summary);
        self.validate(&record)?;
        self.write_record(&record).await
    }

    /// Transport hook: one record per non-tool dispatch.
    pub async fn log_transport(&self, source: &str, action: &str, data: Value) {
        let record = LogRecord::http_request(source, action, data);
        if let Err(e) = self.pre_action(&record).await {
            warn!(error = %e, action = %action, "Transport record not logged");
        }
    }
}

fn invalid(field: &str, reason: &str) -> GovernanceError {
    GovernanceError::InvalidFormat {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Render one record in the daily-log block format.
fn render_record(record: &LogRecord) -> String {
    let mut out = format!(
        "### [{}] {} :: {}\n\n**Metadata**\n- Type: {}\n- Source: {}\n- Action: {}\n",
        record.timestamp,
        record.source.to_uppercase(),
        record.action.to_uppercase(),
        record.record_type,
        record.source,
        record.action,
    );

    let known_sections = ["context", "changes", "result", "artifacts", "references"];
    let mut rendered_any = false;
    if let Value::Object(data) = &record.data {
        for section in known_sections {
            if let Some(value) = data.get(section) {
                rendered_any = true;
                out.push_str(&format!(
                    "\n**{}{}**\n{}\n",
                    section[..1].to_uppercase(),
                    &section[1..],
                    fenced_json(value)
                ));
            }
        }
    }
    if !rendered_any && !record.data.is_null() {
        out.push_str(&format!("\n**Context**\n{}\n", fenced_json(&record.data)));
    }
    out
}

fn fenced_json(value: &Value) -> String {
    let body = serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| "null".to_string());
    format!("```json\n{}\n```", body)
}

/// Summarize a tool result for the post-record without copying large payloads.
pub fn summarize_result(is_error: bool, text: &str) -> Value {
    const MAX_SUMMARY: usize = 512;
    let mut snippet = text.to_string();
    if snippet.len() > MAX_SUMMARY {
        let mut end = MAX_SUMMARY;
        while !snippet.is_char_boundary(end) {
            end -= 1;
        }
        snippet.truncate(end);
        snippet.push_str("...");
    }
    json!({
        "result": {
            "is_error": is_error,
            "summary": snippet,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_timestamp_accepts_utc_forms() {
        assert!(is_strict_utc_timestamp("2026-08-02T12:30:45Z"));
        assert!(is_strict_utc_timestamp("2026-08-02T12:30:45.123Z"));
        assert!(is_strict_utc_timestamp(&now_timestamp()));
    }

    #[test]
    fn test_strict_timestamp_rejects_offsets_and_noise() {
        assert!(!is_strict_utc_timestamp("2026-08-02T12:30:45+00:00"));
        assert!(!is_strict_utc_timestamp("2026-08-02 12:30:45Z"));
        assert!(!is_strict_utc_timestamp("2026-08-02T12:30:45"));
        assert!(!is_strict_utc_timestamp("2026-08-02T12:30:45.12Z"));
        assert!(!is_strict_utc_timestamp("not a timestamp"));
        assert!(!is_strict_utc_timestamp(""));
    }

    #[test]
    fn test_strict_timestamp_rejects_impossible_dates() {
        // shape is right, calendar is not
        assert!(!is_strict_utc_timestamp("2026-13-02T12:30:45Z"));
        assert!(!is_strict_utc_timestamp("2026-02-30T12:30:45Z"));
        assert!(!is_strict_utc_timestamp("2026-08-02T25:30:45Z"));
    }

    #[test]
    fn test_record_constructors() {
        let record = LogRecord::tool_call("graph-memory", "create_entity", json!({"id": "p1"}));
        assert_eq!(record.record_type, "tool_call");
        assert_eq!(record.source, "graph-memory");
        assert_eq!(record.action, "create_entity");
        assert!(is_strict_utc_timestamp(&record.timestamp));

        let result = record.result_record(json!({"ok": true}));
        assert_eq!(result.action, "create_entity_result");
        assert_eq!(result.source, "graph-memory");
    }

    #[test]
    fn test_render_record_heading_and_metadata() {
        let record = LogRecord {
            timestamp: "2026-08-02T12:00:00.000Z".to_string(),
            record_type: "tool_call".to_string(),
            source: "graph-memory".to_string(),
            action: "create_entity".to_string(),
            data: json!({"context": {"label": "Person"}}),
        };
        let block = render_record(&record);
        assert!(block.starts_with("### [2026-08-02T12:00:00.000Z] GRAPH-MEMORY :: CREATE_ENTITY"));
        assert!(block.contains("- Type: tool_call"));
        assert!(block.contains("- Source: graph-memory"));
        assert!(block.contains("- Action: create_entity"));
        assert!(block.contains("**Context**"));
        assert!(block.contains("\"label\": \"Person\""));
    }

    #[test]
    fn test_render_record_falls_back_to_context_section() {
        let record = LogRecord::tool_call("tasks", "create_task", json!({"title": "P"}));
        let block = render_record(&record);
        assert!(block.contains("**Context**"));
        assert!(block.contains("\"title\": \"P\""));
    }

    #[test]
    fn test_summarize_result_truncates() {
        let long = "x".repeat(2000);
        let summary = summarize_result(false, &long);
        let text = summary["result"]["summary"].as_str().unwrap();
        assert!(text.len() < 600);
        assert!(text.ends_with("..."));
        assert_eq!(summary["result"]["is_error"], false);
    }

    mod validation {
        use super::*;
        use crate::config::{GovernanceSettings, VaultConfig};
        use std::path::PathBuf;

        fn omega() -> Omega {
            let vault = NotebookVault::new(&VaultConfig {
                root: PathBuf::from("/tmp/unused"),
                logs_folder: None,
            });
            Omega::new(vault, GovernanceSettings::default())
        }

        #[test]
        fn test_validate_accepts_complete_record() {
            let record = LogRecord::tool_call("model", "chat", json!({}));
            assert!(omega().validate(&record).is_ok());
        }

        #[test]
        fn test_validate_rejects_missing_fields() {
            let mut record = LogRecord::tool_call("model", "chat", json!({}));
            record.source = String::new();
            assert!(matches!(
                omega().validate(&record),
                Err(GovernanceError::InvalidFormat { .. })
            ));

            let mut record = LogRecord::tool_call("model", "chat", json!({}));
            record.action = "  ".to_string();
            assert!(omega().validate(&record).is_err());
        }

        #[test]
        fn test_validate_rejects_loose_timestamp() {
            let mut record = LogRecord::tool_call("model", "chat", json!({}));
            record.timestamp = "2026-08-02T12:30:45+02:00".to_string();
            assert!(omega().validate(&record).is_err());
        }

        #[test]
        fn test_validate_skips_when_disabled() {
            let vault = NotebookVault::new(&VaultConfig {
                root: PathBuf::from("/tmp/unused"),
                logs_folder: None,
            });
            let omega = Omega::new(
                vault,
                GovernanceSettings {
                    validate_schema: false,
                    ..GovernanceSettings::default()
                },
            );
            let mut record = LogRecord::tool_call("model", "chat", json!({}));
            record.timestamp = String::new();
            assert!(omega.validate(&record).is_ok());
        }
    }
}
