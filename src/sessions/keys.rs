const SESSION_PREFIX: &str = "attempt:session";
const QUESTIONS_PREFIX: &str = "attempt:questions";

/// The two store keys backing one attempt: a scalar session blob and a hash
/// of answered questions keyed by question index. Deterministic for a given
/// `(user, assessment, attempt)` tuple so retries and concurrent readers
/// always land on the same pair. Identifiers are expected to be UUID-style
/// tokens without `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptKeys {
    pub session: String,
    pub questions: String,
}

impl AttemptKeys {
    pub fn new(user_id: &str, assessment_id: &str, attempt_number: u32) -> Self {
        Self {
            session: format!("{SESSION_PREFIX}:{user_id}:{assessment_id}:{attempt_number}"),
            questions: format!("{QUESTIONS_PREFIX}:{user_id}:{assessment_id}:{attempt_number}"),
        }
    }
}
