//! Deterministic classification of raw executor output.

use serde::Deserialize;

use crate::core::types::ExecutorResult;

/// Structured executor reply: `{"status": "ok" | "error", "message": "..."}`.
#[derive(Debug, Deserialize)]
struct StructuredReply {
    status: StructuredStatus,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StructuredStatus {
    #[serde(alias = "success")]
    Ok,
    #[serde(alias = "failure")]
    Error,
}

/// Classify executor stdout into a tagged result.
///
/// - A JSON object with a `status` field is taken at its word; the marker is
///   never scanned in structured replies.
/// - Otherwise the output fails when it contains `marker`, case-insensitively.
pub fn classify_output(stdout: &str, marker: &str) -> ExecutorResult {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{')
        && let Ok(reply) = serde_json::from_str::<StructuredReply>(trimmed)
    {
        return match reply.status {
            StructuredStatus::Ok => ExecutorResult::success(reply.message),
            StructuredStatus::Error => ExecutorResult::reported_failure(reply.message),
        };
    }

    if contains_marker(trimmed, marker) {
        ExecutorResult::reported_failure(trimmed)
    } else {
        ExecutorResult::success(trimmed)
    }
}

fn contains_marker(text: &str, marker: &str) -> bool {
    !marker.is_empty() && text.to_uppercase().contains(&marker.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailureCode;

    #[test]
    fn plain_output_is_success() {
        assert_eq!(
            classify_output("Data extracted and saved to ./data/a.csv\n", "ERROR"),
            ExecutorResult::success("Data extracted and saved to ./data/a.csv")
        );
    }

    #[test]
    fn marker_anywhere_is_failure() {
        let result = classify_output("ERROR : File a.csv does not exist in bucket B.", "ERROR");
        assert_eq!(
            result,
            ExecutorResult::Failure {
                code: FailureCode::Reported,
                message: "ERROR : File a.csv does not exist in bucket B.".to_string(),
            }
        );
        assert!(classify_output("query failed: error 403", "ERROR").is_failure());
    }

    #[test]
    fn structured_reply_ignores_marker_text() {
        let result = classify_output(
            r#"{"status": "ok", "message": "rows with ERROR codes filtered out"}"#,
            "ERROR",
        );
        assert_eq!(
            result,
            ExecutorResult::success("rows with ERROR codes filtered out")
        );
    }

    #[test]
    fn structured_error_is_failure() {
        let result = classify_output(r#"{"status": "error", "message": "no such table"}"#, "ERROR");
        assert_eq!(result, ExecutorResult::reported_failure("no such table"));
    }

    #[test]
    fn json_without_status_falls_back_to_marker() {
        let result = classify_output(r#"{"rows": 3}"#, "ERROR");
        assert_eq!(result, ExecutorResult::success(r#"{"rows": 3}"#));
    }

    #[test]
    fn empty_marker_never_fails() {
        assert!(!classify_output("ERROR", "").is_failure());
    }
}
