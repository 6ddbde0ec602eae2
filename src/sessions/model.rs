use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

/// Scalar state of one in-progress attempt, stored as a single JSON blob.
/// `current_question_index` is the single source of truth for which answer
/// is allowed next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttemptSession {
    pub attempt_number: u32,
    pub current_question_index: u32,
    #[validate(range(min = 1, message = "totalQuestions must be positive"))]
    pub total_questions: u32,
    /// RFC 3339 UTC timestamp, set at creation and never touched again.
    pub started_at: String,
    pub is_finalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalization_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_summary: Option<FinalSummary>,
}

/// Attached to the session by finalization; present if and only if
/// `is_finalized` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FinalSummary {
    pub score: f64,
    pub correct_answers_count: u32,
    pub total_questions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xp_penalty_info: Option<serde_json::Value>,
}

/// One answered question, stored as a hash field keyed by its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnsweredQuestion {
    /// `null` means "reported as a content issue, not scored", so the field
    /// must be present even when null; an absent field is schema drift.
    #[serde(deserialize_with = "present_bool_or_null")]
    pub is_correct: Option<bool>,
    /// Caller-defined payload, stored verbatim and never interpreted.
    pub response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reported: Option<bool>,
}

/// Merged read view: the scalar session plus every answered question,
/// ordered by question index.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session: AttemptSession,
    pub questions: BTreeMap<u32, AnsweredQuestion>,
}

fn present_bool_or_null<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<bool>::deserialize(deserializer)
}
