//! Session life cycle: idempotent start/resume, batch creation with
//! carry-forward records, lazy reclamation of stale actives.

use chrono::NaiveDate;
use rand::Rng;
use serde::Serialize;
use sqlx::{PgConnection, PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::services::interval_policy::{LearningState, UnknownState};
use crate::services::phrase_selector::{self, SelectError, SelectedPhrase};
use crate::services::profile;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("learner not found")]
    LearnerMissing,
    #[error("no phrases available for a new session")]
    NoContent,
    #[error("phrase already answered in this session")]
    AlreadyAnswered,
    #[error("no pending record for this phrase and session")]
    RecordMissing,
    #[error("active session slot contended")]
    Contended,
    #[error("corrupt record state: {0}")]
    CorruptState(#[from] UnknownState),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl From<SelectError> for SessionError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::Sql(e) => Self::Sql(e),
            SelectError::CorruptState(e) => Self::CorruptState(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Practice,
    Scheduled,
}

impl SessionKind {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("scheduled") => Self::Scheduled,
            _ => Self::Practice,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Practice => "practice",
            Self::Scheduled => "scheduled",
        }
    }
}

/// One phrase as handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPhrase {
    pub phrase_id: String,
    pub text: String,
    pub translation: String,
    pub explanation: Option<String>,
    pub audio_url: Option<String>,
    pub state: LearningState,
    pub order: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub session_id: String,
    pub kind: String,
    pub total_phrases: i32,
    pub answered_count: i32,
    pub resumed: bool,
    pub motivational_message: String,
    pub phrases: Vec<SessionPhrase>,
}

#[derive(Debug)]
struct ActiveSession {
    id: String,
    kind: String,
    total_phrases: i32,
    answered_count: i32,
}

/// Start a session, or hand back the outstanding part of the one already
/// active. Safe to call repeatedly: an active session with pending phrases
/// is returned unchanged, one with none left is lazily completed and
/// replaced. Losing the store-level race for the active slot resumes the
/// winner's session instead of failing.
pub async fn start_or_resume(
    pool: &PgPool,
    learner_id: &str,
    kind: SessionKind,
    today: NaiveDate,
    rng: &mut (impl Rng + ?Sized),
) -> Result<StartedSession, SessionError> {
    let learner = profile::get_profile(pool, learner_id)
        .await?
        .ok_or(SessionError::LearnerMissing)?;

    // Two passes: one normal attempt plus one retry if a concurrent request
    // claims the active slot between our check and our insert.
    for _ in 0..2 {
        if let Some(active) = find_active_session(pool, learner_id).await? {
            let pending = pending_phrases(pool, &active.id).await?;
            if !pending.is_empty() {
                return Ok(StartedSession {
                    session_id: active.id,
                    kind: active.kind,
                    total_phrases: active.total_phrases,
                    answered_count: active.answered_count,
                    resumed: true,
                    motivational_message: "Você parou na metade! Vamos continuar 💪".to_string(),
                    phrases: pending,
                });
            }
            // Stale artifact: everything answered but never flipped.
            complete_stale_session(pool, &active.id).await?;
        }

        let batch = phrase_selector::select_batch(
            pool,
            learner_id,
            &learner.level,
            learner.phrases_per_day as i64,
            today,
            rng,
        )
        .await?;
        if batch.is_empty() {
            return Err(SessionError::NoContent);
        }

        // Session row, batch records and the profile flag commit together;
        // a failure partway leaves nothing behind to reclaim.
        let mut tx = pool.begin().await?;
        let session_id =
            match insert_session(&mut tx, learner_id, kind, batch.len() as i32).await? {
                Some(id) => id,
                // Unique active-session index fired: someone else just started
                // one. Loop back and resume theirs.
                None => {
                    tx.rollback().await?;
                    continue;
                }
            };

        insert_batch_records(&mut tx, learner_id, &session_id, &batch).await?;
        profile::mark_session_active(&mut tx, learner_id).await?;
        tx.commit().await?;

        let message = motivational_message(&batch);
        let phrases: Vec<SessionPhrase> = batch.into_iter().map(to_session_phrase).collect();
        return Ok(StartedSession {
            session_id,
            kind: kind.as_str().to_string(),
            total_phrases: phrases.len() as i32,
            answered_count: 0,
            resumed: false,
            motivational_message: message,
            phrases,
        });
    }

    // Both passes lost the race; the slot owner keeps flapping. Surface a
    // retryable condition rather than inventing a session.
    Err(SessionError::Contended)
}

fn to_session_phrase(selected: SelectedPhrase) -> SessionPhrase {
    SessionPhrase {
        phrase_id: selected.phrase_id,
        text: selected.text,
        translation: selected.translation,
        explanation: selected.explanation,
        audio_url: selected.audio_url,
        state: selected.state,
        order: selected.order,
    }
}

/// Session-open copy, keyed by what the batch is mostly made of.
fn motivational_message(batch: &[SelectedPhrase]) -> String {
    let learning = batch
        .iter()
        .filter(|p| p.state == LearningState::Learning)
        .count();
    let confirming = batch
        .iter()
        .filter(|p| p.state == LearningState::Confirming)
        .count();
    let fresh = batch
        .iter()
        .filter(|p| p.state == LearningState::New)
        .count();

    if learning > 0 {
        let plural = if learning > 1 { "ões" } else { "ão" };
        format!("{learning} revis{plural} esperando você. Seu cérebro vai agradecer! 🧠")
    } else if confirming > 0 {
        let plural = if confirming > 1 { "s" } else { "" };
        format!("{confirming} frase{plural} para confirmar hoje! ✓")
    } else if fresh > 0 {
        let plural = if fresh > 1 { "s" } else { "" };
        format!("{fresh} frase{plural} nova{plural} para você hoje! 🚀")
    } else {
        "Hora de manter o que você já domina afiado! 💪".to_string()
    }
}

async fn find_active_session(
    pool: &PgPool,
    learner_id: &str,
) -> Result<Option<ActiveSession>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT "id", "kind", "totalPhrases", "answeredCount"
        FROM "practice_sessions"
        WHERE "learnerId" = $1 AND "status" = 'active'
        ORDER BY "startedAt" DESC
        LIMIT 1
        "#,
    )
    .bind(learner_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| ActiveSession {
        id: row.try_get("id").unwrap_or_default(),
        kind: row
            .try_get("kind")
            .unwrap_or_else(|_| "practice".to_string()),
        total_phrases: row.try_get("totalPhrases").unwrap_or(0),
        answered_count: row.try_get("answeredCount").unwrap_or(0),
    }))
}

/// Unanswered phrases of a session, in presentation order.
async fn pending_phrases(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<SessionPhrase>, SessionError> {
    let rows = sqlx::query(
        r#"
        SELECT lr."phraseId", lr."state", lr."orderInSession",
               p."text", p."translation", p."explanation", p."audioUrl"
        FROM "learning_records" lr
        JOIN "phrases" p ON p."id" = lr."phraseId"
        WHERE lr."sessionId" = $1 AND lr."knows" IS NULL
        ORDER BY lr."orderInSession" ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let state_raw: String = row.try_get("state")?;
            Ok(SessionPhrase {
                phrase_id: row.try_get("phraseId")?,
                text: row.try_get("text")?,
                translation: row.try_get("translation")?,
                explanation: row.try_get("explanation").ok().flatten(),
                audio_url: row.try_get("audioUrl").ok().flatten(),
                state: LearningState::parse(&state_raw)?,
                order: row.try_get("orderInSession").unwrap_or(0),
            })
        })
        .collect()
}

async fn complete_stale_session(pool: &PgPool, session_id: &str) -> Result<(), sqlx::Error> {
    tracing::info!(session_id, "completing stale active session with no pending records");
    sqlx::query(
        r#"
        UPDATE "practice_sessions"
        SET "status" = 'completed', "completedAt" = NOW()
        WHERE "id" = $1 AND "status" = 'active'
        "#,
    )
    .bind(session_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns None when the one-active-session-per-learner index rejects the
/// insert (a concurrent request won).
async fn insert_session(
    conn: &mut PgConnection,
    learner_id: &str,
    kind: SessionKind,
    total_phrases: i32,
) -> Result<Option<String>, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let row = sqlx::query(
        r#"
        INSERT INTO "practice_sessions"
            ("id", "learnerId", "kind", "status", "totalPhrases")
        VALUES ($1, $2, $3, 'active', $4)
        ON CONFLICT ("learnerId") WHERE "status" = 'active' DO NOTHING
        RETURNING "id"
        "#,
    )
    .bind(&id)
    .bind(learner_id)
    .bind(kind.as_str())
    .bind(total_phrases)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| row.try_get("id").unwrap_or(id)))
}

/// One fresh record per selected phrase, each carrying forward the phrase's
/// latest known scheduling state with `knows` left NULL until answered.
async fn insert_batch_records(
    conn: &mut PgConnection,
    learner_id: &str,
    session_id: &str,
    batch: &[SelectedPhrase],
) -> Result<(), sqlx::Error> {
    let total = batch.len() as i32;
    let mut builder = QueryBuilder::new(
        r#"INSERT INTO "learning_records"
            ("id", "learnerId", "phraseId", "sessionId", "state", "repetitions",
             "learningLevel", "firstAttemptCorrect", "sendKind", "orderInSession",
             "sessionTotal") "#,
    );
    builder.push_values(batch, |mut row, phrase| {
        row.push_bind(Uuid::new_v4().to_string())
            .push_bind(learner_id)
            .push_bind(&phrase.phrase_id)
            .push_bind(session_id)
            .push_bind(phrase.state.as_str())
            .push_bind(phrase.repetitions)
            .push_bind(phrase.learning_level)
            .push_bind(phrase.first_attempt_correct)
            .push_bind(if phrase.is_review { "review" } else { "new" })
            .push_bind(phrase.order)
            .push_bind(total);
    });
    builder.build().execute(&mut *conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selected(id: &str, state: LearningState, order: i32) -> SelectedPhrase {
        SelectedPhrase {
            phrase_id: id.to_string(),
            text: String::new(),
            translation: String::new(),
            explanation: None,
            audio_url: None,
            state,
            repetitions: 0,
            learning_level: 1,
            first_attempt_correct: None,
            is_review: state != LearningState::New,
            order,
        }
    }

    #[test]
    fn kind_parses_with_practice_default() {
        assert_eq!(SessionKind::parse(None), SessionKind::Practice);
        assert_eq!(SessionKind::parse(Some("practice")), SessionKind::Practice);
        assert_eq!(SessionKind::parse(Some("scheduled")), SessionKind::Scheduled);
        assert_eq!(SessionKind::parse(Some("???")), SessionKind::Practice);
    }

    #[test]
    fn message_prefers_remediation_over_everything() {
        let batch = vec![
            selected("a", LearningState::Learning, 1),
            selected("b", LearningState::New, 2),
        ];
        assert!(motivational_message(&batch).contains("revisão"));
    }

    #[test]
    fn message_pluralizes_remediation() {
        let batch = vec![
            selected("a", LearningState::Learning, 1),
            selected("b", LearningState::Learning, 2),
        ];
        assert!(motivational_message(&batch).contains("2 revisões"));
    }

    #[test]
    fn message_for_fresh_only_batch() {
        let batch = vec![selected("a", LearningState::New, 1)];
        assert_eq!(motivational_message(&batch), "1 frase nova para você hoje! 🚀");
    }

    #[test]
    fn message_for_maintenance_only_batch() {
        let batch = vec![selected("a", LearningState::Maintenance, 1)];
        assert!(motivational_message(&batch).contains("domina"));
    }
}
