//! Strict encode/decode between the model types and the store's string
//! representation. A decode or validation failure is a hard error: guessing
//! at recovery could silently corrupt a user's in-progress attempt.

use validator::Validate;

use crate::core::time;
use crate::sessions::error::SessionError;
use crate::sessions::model::{AnsweredQuestion, AttemptSession};

pub(crate) fn encode_session(key: &str, session: &AttemptSession) -> Result<String, SessionError> {
    validate_session(key, session)?;
    serde_json::to_string(session).map_err(|err| invalid(key, err))
}

pub(crate) fn decode_session(key: &str, raw: &str) -> Result<AttemptSession, SessionError> {
    let session: AttemptSession = serde_json::from_str(raw).map_err(|err| invalid(key, err))?;
    validate_session(key, &session)?;
    Ok(session)
}

pub(crate) fn encode_question(
    key: &str,
    index: u32,
    question: &AnsweredQuestion,
) -> Result<String, SessionError> {
    serde_json::to_string(question)
        .map_err(|err| invalid(key, format!("question {index}: {err}")))
}

pub(crate) fn decode_question(
    key: &str,
    field: &str,
    raw: &str,
) -> Result<AnsweredQuestion, SessionError> {
    serde_json::from_str(raw).map_err(|err| invalid(key, format!("question {field}: {err}")))
}

/// Hash field names are the decimal question index; anything else means the
/// hash was written by something other than this subsystem.
pub(crate) fn question_index(key: &str, field: &str) -> Result<u32, SessionError> {
    field
        .parse::<u32>()
        .map_err(|_| invalid(key, format!("non-numeric question field {field:?}")))
}

fn validate_session(key: &str, session: &AttemptSession) -> Result<(), SessionError> {
    session.validate().map_err(|err| invalid(key, err))?;

    if session.current_question_index > session.total_questions {
        return Err(invalid(
            key,
            format!(
                "currentQuestionIndex {} exceeds totalQuestions {}",
                session.current_question_index, session.total_questions
            ),
        ));
    }

    if session.is_finalized != session.final_summary.is_some() {
        return Err(invalid(key, "isFinalized and finalSummary must change together"));
    }

    if time::parse_rfc3339(&session.started_at).is_err() {
        return Err(invalid(key, format!("startedAt {:?} is not RFC 3339", session.started_at)));
    }

    Ok(())
}

fn invalid(key: &str, reason: impl std::fmt::Display) -> SessionError {
    SessionError::InvalidRecord { key: key.to_string(), reason: reason.to_string() }
}
