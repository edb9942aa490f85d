//! Answer processing: one learner response flows through the interval
//! policy and lands as a single transaction over record, session and
//! profile rows. Cosmetic output (translation info) is loaded after commit
//! and degrades without touching the committed transition.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::services::feedback::{self, Feedback};
use crate::services::interval_policy::{self, LearningState, PolicySnapshot};
use crate::services::profile;
use crate::services::session::SessionError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub answered: i32,
    pub total: i32,
    pub correct: i32,
    pub incorrect: i32,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationInfo {
    pub translation: String,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub feedback: Feedback,
    pub next_eligible_date: NaiveDate,
    pub new_state: LearningState,
    pub session: SessionSummary,
    pub translation_info: Option<TranslationInfo>,
}

#[derive(Debug)]
struct PendingRecord {
    id: String,
    snapshot: PolicySnapshot,
    first_attempt_correct: Option<bool>,
}

/// A session is complete exactly when every phrase has been answered.
fn summarize(answered: i32, total: i32, correct: i32, incorrect: i32) -> SessionSummary {
    SessionSummary {
        answered,
        total,
        correct,
        incorrect,
        completed: answered >= total,
    }
}

pub async fn answer(
    pool: &PgPool,
    learner_id: &str,
    session_id: &str,
    phrase_id: &str,
    knows: bool,
    today: NaiveDate,
) -> Result<AnswerOutcome, SessionError> {
    let mut tx = pool.begin().await?;

    let pending = match load_pending(&mut tx, learner_id, session_id, phrase_id).await? {
        Some(record) => record,
        None => {
            // Distinguish a duplicate answer from a record that never
            // existed; the caller reacts differently to each.
            drop(tx);
            return Err(classify_missing(pool, learner_id, session_id, phrase_id).await?);
        }
    };

    let prior_state = pending.snapshot.state;
    let transition = interval_policy::apply(&pending.snapshot, knows);
    let first_attempt = interval_policy::first_attempt_correct(
        prior_state,
        pending.first_attempt_correct,
        knows,
    );
    let next_eligible = interval_policy::next_eligible_date(today, transition.interval_days);

    // Guarded one-way flip; a concurrent duplicate loses here even after
    // both requests saw the record as pending.
    let updated = sqlx::query(
        r#"
        UPDATE "learning_records"
        SET "knows" = $2,
            "answeredAt" = NOW(),
            "state" = $3,
            "repetitions" = $4,
            "learningLevel" = $5,
            "firstAttemptCorrect" = $6,
            "nextEligibleDate" = $7
        WHERE "id" = $1 AND "knows" IS NULL
        "#,
    )
    .bind(&pending.id)
    .bind(knows)
    .bind(transition.state.as_str())
    .bind(transition.repetitions)
    .bind(transition.learning_level)
    .bind(first_attempt)
    .bind(next_eligible)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(SessionError::AlreadyAnswered);
    }

    let counters = sqlx::query(
        r#"
        UPDATE "practice_sessions"
        SET "answeredCount" = "answeredCount" + 1,
            "correctCount" = "correctCount" + CASE WHEN $2 THEN 1 ELSE 0 END,
            "incorrectCount" = "incorrectCount" + CASE WHEN $2 THEN 0 ELSE 1 END
        WHERE "id" = $1
        RETURNING "answeredCount", "totalPhrases", "correctCount", "incorrectCount"
        "#,
    )
    .bind(session_id)
    .bind(knows)
    .fetch_one(&mut *tx)
    .await?;

    let summary = summarize(
        counters.try_get("answeredCount").unwrap_or(0),
        counters.try_get("totalPhrases").unwrap_or(0),
        counters.try_get("correctCount").unwrap_or(0),
        counters.try_get("incorrectCount").unwrap_or(0),
    );

    if summary.completed {
        sqlx::query(
            r#"
            UPDATE "practice_sessions"
            SET "status" = 'completed', "completedAt" = NOW()
            WHERE "id" = $1 AND "status" = 'active'
            "#,
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
    }

    profile::apply_answer(&mut *tx, learner_id, knows, summary.completed, today).await?;

    tx.commit().await?;

    // Scheduling is durable from here on; display metadata is best effort.
    let translation_info = load_translation_info(pool, phrase_id).await;
    let feedback = feedback::for_answer(knows, prior_state);

    Ok(AnswerOutcome {
        feedback,
        next_eligible_date: next_eligible,
        new_state: transition.state,
        session: summary,
        translation_info,
    })
}

async fn load_pending(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    learner_id: &str,
    session_id: &str,
    phrase_id: &str,
) -> Result<Option<PendingRecord>, SessionError> {
    let row = sqlx::query(
        r#"
        SELECT "id", "state", "repetitions", "learningLevel", "firstAttemptCorrect"
        FROM "learning_records"
        WHERE "learnerId" = $1 AND "sessionId" = $2 AND "phraseId" = $3
          AND "knows" IS NULL
        FOR UPDATE
        "#,
    )
    .bind(learner_id)
    .bind(session_id)
    .bind(phrase_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let state_raw: String = row.try_get("state")?;
    Ok(Some(PendingRecord {
        id: row.try_get("id")?,
        snapshot: PolicySnapshot {
            state: LearningState::parse(&state_raw)?,
            repetitions: row.try_get("repetitions").unwrap_or(0),
            learning_level: row.try_get("learningLevel").unwrap_or(1),
        },
        first_attempt_correct: row.try_get("firstAttemptCorrect").ok().flatten(),
    }))
}

async fn classify_missing(
    pool: &PgPool,
    learner_id: &str,
    session_id: &str,
    phrase_id: &str,
) -> Result<SessionError, sqlx::Error> {
    let answered: Option<String> = sqlx::query_scalar(
        r#"
        SELECT "id" FROM "learning_records"
        WHERE "learnerId" = $1 AND "sessionId" = $2 AND "phraseId" = $3
          AND "knows" IS NOT NULL
        LIMIT 1
        "#,
    )
    .bind(learner_id)
    .bind(session_id)
    .bind(phrase_id)
    .fetch_optional(pool)
    .await?;

    Ok(if answered.is_some() {
        SessionError::AlreadyAnswered
    } else {
        SessionError::RecordMissing
    })
}

async fn load_translation_info(pool: &PgPool, phrase_id: &str) -> Option<TranslationInfo> {
    let result = sqlx::query(
        r#"SELECT "translation", "explanation" FROM "phrases" WHERE "id" = $1"#,
    )
    .bind(phrase_id)
    .fetch_optional(pool)
    .await;

    match result {
        Ok(Some(row)) => Some(TranslationInfo {
            translation: row.try_get("translation").unwrap_or_default(),
            explanation: row.try_get("explanation").ok().flatten(),
        }),
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(error = %err, phrase_id, "translation info unavailable, degrading");
            None
        }
    }
}
