//! The attempt session store: ephemeral per-attempt state in Redis, with
//! optimistic locking around answer submissions so concurrent writers can
//! never lose, duplicate, or reorder an answer.

pub mod backend;
pub mod error;
pub mod keys;
pub mod model;

mod codec;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::SessionSettings;
use crate::core::time;
use crate::sessions::backend::{AnswerBatch, CommitOutcome, SessionBackend};
use crate::sessions::error::SessionError;
use crate::sessions::keys::AttemptKeys;
use crate::sessions::model::{AnsweredQuestion, AttemptSession, FinalSummary, SessionView};

/// Coordinates all reads and writes for attempt sessions. Holds an explicit
/// backend handle; each `(user, assessment, attempt)` key pair is an
/// independent unit of concurrency control, so one manager serves any number
/// of concurrent request handlers.
pub struct SessionManager {
    backend: Arc<dyn SessionBackend>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn SessionBackend>, settings: SessionSettings) -> Self {
        Self { backend, settings }
    }

    /// Writes a fresh session for an externally-assigned attempt number.
    /// Callers are responsible for attempt-number uniqueness; there is no
    /// pre-existence check.
    pub async fn create(
        &self,
        user_id: &str,
        assessment_id: &str,
        attempt_number: u32,
        total_questions: u32,
    ) -> Result<AttemptSession, SessionError> {
        let keys = AttemptKeys::new(user_id, assessment_id, attempt_number);
        let session = AttemptSession {
            attempt_number,
            current_question_index: 0,
            total_questions,
            started_at: time::now_rfc3339(),
            is_finalized: false,
            finalization_error: None,
            final_summary: None,
        };

        let raw = codec::encode_session(&keys.session, &session)?;
        self.backend.set_with_ttl(&keys.session, &raw, self.settings.ttl_seconds).await?;
        // The question hash cannot exist before its first field, so this is a
        // no-op until an answer lands; every commit refreshes it afterwards.
        self.backend.expire(&keys.questions, self.settings.ttl_seconds).await?;

        tracing::debug!(key = %keys.session, total_questions, "Created attempt session");
        Ok(session)
    }

    /// Returns the merged view of a session, or `None` if it never existed
    /// or has expired. A present-but-malformed record is a hard error, not
    /// absence. Refreshes the TTL on both keys.
    pub async fn get(
        &self,
        user_id: &str,
        assessment_id: &str,
        attempt_number: u32,
    ) -> Result<Option<SessionView>, SessionError> {
        let keys = AttemptKeys::new(user_id, assessment_id, attempt_number);

        let Some(raw) = self.backend.get(&keys.session).await? else {
            return Ok(None);
        };
        let session = codec::decode_session(&keys.session, &raw)?;

        let fields = self.backend.hash_get_all(&keys.questions).await?;
        let mut questions = BTreeMap::new();
        for (field, payload) in &fields {
            let index = codec::question_index(&keys.questions, field)?;
            questions.insert(index, codec::decode_question(&keys.questions, field, payload)?);
        }

        self.refresh_ttls(&keys).await?;

        Ok(Some(SessionView { session, questions }))
    }

    /// Records the answer for `question_index` and advances the session's
    /// expected index, atomically, under optimistic locking.
    ///
    /// Returns whether the question payload was stored by this call: always
    /// true with `overwrite`, and false when a duplicate lost first-write-wins
    /// for the field. A submission for any index other than the expected next
    /// one fails with [`SessionError::OutOfOrder`] and is never retried; a
    /// physical race on the session key is retried up to the configured
    /// attempt bound with exponential backoff, then surfaces as
    /// [`SessionError::ConcurrentModification`].
    pub async fn update_state_and_question(
        &self,
        user_id: &str,
        assessment_id: &str,
        attempt_number: u32,
        question_index: u32,
        question: &AnsweredQuestion,
        overwrite: bool,
    ) -> Result<bool, SessionError> {
        let keys = AttemptKeys::new(user_id, assessment_id, attempt_number);
        let payload = codec::encode_question(&keys.questions, question_index, question)?;
        let field = question_index.to_string();
        let max_attempts = self.settings.update_max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            let Some(raw) = self.backend.get(&keys.session).await? else {
                return Err(SessionError::NotFound { key: keys.session.clone() });
            };
            let mut session = codec::decode_session(&keys.session, &raw)?;

            if question_index >= session.total_questions
                || session.current_question_index != question_index
            {
                return Err(SessionError::OutOfOrder {
                    expected: session.current_question_index,
                    received: question_index,
                });
            }

            session.current_question_index = question_index + 1;
            let updated = codec::encode_session(&keys.session, &session)?;

            let outcome = self
                .backend
                .commit_answer(AnswerBatch {
                    session_key: &keys.session,
                    expected_session: &raw,
                    new_session: &updated,
                    questions_key: &keys.questions,
                    field: &field,
                    payload: &payload,
                    overwrite,
                    ttl_seconds: self.settings.ttl_seconds,
                })
                .await?;

            match outcome {
                CommitOutcome::Committed { wrote_field } => {
                    tracing::debug!(
                        key = %keys.session,
                        question_index,
                        wrote_field,
                        "Recorded attempt answer"
                    );
                    return Ok(wrote_field);
                }
                CommitOutcome::Conflict => {
                    metrics::counter!("attempt_session_update_conflicts_total").increment(1);

                    if attempt >= max_attempts {
                        metrics::counter!("attempt_session_update_exhausted_total").increment(1);
                        tracing::warn!(
                            key = %keys.session,
                            attempts = attempt,
                            "Attempt session kept changing concurrently; giving up"
                        );
                        return Err(SessionError::ConcurrentModification {
                            key: keys.session.clone(),
                            attempts: attempt,
                        });
                    }

                    // 50ms before the 2nd attempt, 100ms before the 3rd.
                    let delay = self.settings.update_backoff_ms << (attempt - 1);
                    tracing::debug!(
                        key = %keys.session,
                        attempt,
                        delay_ms = delay,
                        "Attempt session update conflicted; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Marks the session finalized and attaches the externally computed
    /// summary. Finalizing a session that has already expired or been deleted
    /// is not an error: there is nothing left to protect. Not protected by
    /// optimistic locking; finalization is terminal and last-writer-wins.
    pub async fn mark_finalized(
        &self,
        user_id: &str,
        assessment_id: &str,
        attempt_number: u32,
        summary: FinalSummary,
    ) -> Result<(), SessionError> {
        let keys = AttemptKeys::new(user_id, assessment_id, attempt_number);

        let Some(raw) = self.backend.get(&keys.session).await? else {
            tracing::debug!(key = %keys.session, "No attempt session left to finalize");
            return Ok(());
        };
        let mut session = codec::decode_session(&keys.session, &raw)?;

        session.is_finalized = true;
        session.final_summary = Some(summary);
        let updated = codec::encode_session(&keys.session, &session)?;

        self.backend.set_with_ttl(&keys.session, &updated, self.settings.ttl_seconds).await?;
        self.backend.expire(&keys.questions, self.settings.ttl_seconds).await?;

        tracing::debug!(key = %keys.session, "Finalized attempt session");
        Ok(())
    }

    /// Best-effort record of a finalization failure. A missing or
    /// undecodable session is logged and swallowed, and the rewrite keeps
    /// the existing TTL: this path must never extend or shorten the
    /// session's natural expiry.
    pub async fn mark_finalization_failed(
        &self,
        user_id: &str,
        assessment_id: &str,
        attempt_number: u32,
        message: &str,
    ) -> Result<(), SessionError> {
        let keys = AttemptKeys::new(user_id, assessment_id, attempt_number);

        let Some(raw) = self.backend.get(&keys.session).await? else {
            tracing::warn!(key = %keys.session, "No attempt session to mark finalization failure");
            return Ok(());
        };
        let mut session = match codec::decode_session(&keys.session, &raw) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(
                    key = %keys.session,
                    error = %err,
                    "Undecodable attempt session; skipping finalization failure mark"
                );
                return Ok(());
            }
        };

        session.finalization_error = Some(message.to_string());
        let updated = codec::encode_session(&keys.session, &session)?;
        self.backend.set_keep_ttl(&keys.session, &updated).await?;

        Ok(())
    }

    /// Unconditionally removes both keys. Used for explicit attempt reset or
    /// abandonment.
    pub async fn delete(
        &self,
        user_id: &str,
        assessment_id: &str,
        attempt_number: u32,
    ) -> Result<(), SessionError> {
        let keys = AttemptKeys::new(user_id, assessment_id, attempt_number);
        self.backend.delete(&[keys.session.as_str(), keys.questions.as_str()]).await?;
        tracing::debug!(key = %keys.session, "Deleted attempt session");
        Ok(())
    }

    /// The session and its answers share one TTL lifecycle: whenever either
    /// key is touched, both get the full TTL again so they expire together.
    async fn refresh_ttls(&self, keys: &AttemptKeys) -> Result<(), SessionError> {
        self.backend.expire(&keys.session, self.settings.ttl_seconds).await?;
        self.backend.expire(&keys.questions, self.settings.ttl_seconds).await?;
        Ok(())
    }
}
