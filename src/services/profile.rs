//! Learner profile aggregates: rolling totals and the practice streak.
//!
//! Counter updates are read-modify-write under row locks inside the caller's
//! transaction; each update is a pure function of (old aggregate, event).

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    pub id: String,
    pub display_name: String,
    pub level: String,
    pub phrases_per_day: i32,
    pub active_notebook_id: Option<String>,
    pub has_active_session: bool,
    pub total_seen: i64,
    pub total_correct: i64,
    pub consecutive_days: i32,
    pub last_practice_date: Option<NaiveDate>,
}

/// Streak rule: finishing a second session on the same day changes nothing,
/// finishing on the day after the last practice extends the streak, any gap
/// restarts it at 1.
pub fn roll_streak(
    consecutive_days: i32,
    last_practice_date: Option<NaiveDate>,
    today: NaiveDate,
) -> i32 {
    match last_practice_date {
        Some(last) if last == today => consecutive_days.max(1),
        Some(last) if last.succ_opt() == Some(today) => consecutive_days + 1,
        _ => 1,
    }
}

pub async fn get_profile(
    pool: &PgPool,
    learner_id: &str,
) -> Result<Option<LearnerProfile>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT "id", "displayName", "level", "phrasesPerDay", "activeNotebookId",
               "hasActiveSession", "totalSeen", "totalCorrect", "consecutiveDays",
               "lastPracticeDate"
        FROM "learner_profiles"
        WHERE "id" = $1
        "#,
    )
    .bind(learner_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| map_profile_row(&row)))
}

fn map_profile_row(row: &sqlx::postgres::PgRow) -> LearnerProfile {
    LearnerProfile {
        id: row.try_get("id").unwrap_or_default(),
        display_name: row.try_get("displayName").unwrap_or_default(),
        level: row
            .try_get("level")
            .unwrap_or_else(|_| "basico".to_string()),
        phrases_per_day: row.try_get("phrasesPerDay").unwrap_or(5),
        active_notebook_id: row.try_get("activeNotebookId").ok().flatten(),
        has_active_session: row.try_get("hasActiveSession").unwrap_or(false),
        total_seen: row.try_get("totalSeen").unwrap_or(0),
        total_correct: row.try_get("totalCorrect").unwrap_or(0),
        consecutive_days: row.try_get("consecutiveDays").unwrap_or(0),
        last_practice_date: row.try_get("lastPracticeDate").ok().flatten(),
    }
}

pub async fn mark_session_active(
    conn: &mut PgConnection,
    learner_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE "learner_profiles"
        SET "hasActiveSession" = TRUE, "lastInteractionAt" = NOW()
        WHERE "id" = $1
        "#,
    )
    .bind(learner_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// One answer's worth of profile aggregation: `totalSeen` always increments,
/// `totalCorrect` only on a correct answer. When the answer completed the
/// session, the active flag is cleared and the streak rolled.
pub async fn apply_answer(
    conn: &mut PgConnection,
    learner_id: &str,
    knows: bool,
    session_completed: bool,
    today: NaiveDate,
) -> Result<(), sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT "consecutiveDays", "lastPracticeDate"
        FROM "learner_profiles"
        WHERE "id" = $1
        FOR UPDATE
        "#,
    )
    .bind(learner_id)
    .fetch_one(&mut *conn)
    .await?;

    let consecutive_days: i32 = row.try_get("consecutiveDays").unwrap_or(0);
    let last_practice: Option<NaiveDate> = row.try_get("lastPracticeDate").ok().flatten();

    if session_completed {
        let streak = roll_streak(consecutive_days, last_practice, today);
        sqlx::query(
            r#"
            UPDATE "learner_profiles"
            SET "totalSeen" = "totalSeen" + 1,
                "totalCorrect" = "totalCorrect" + CASE WHEN $2 THEN 1 ELSE 0 END,
                "hasActiveSession" = FALSE,
                "consecutiveDays" = $3,
                "lastPracticeDate" = $4,
                "lastInteractionAt" = NOW()
            WHERE "id" = $1
            "#,
        )
        .bind(learner_id)
        .bind(knows)
        .bind(streak)
        .bind(today)
        .execute(conn)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE "learner_profiles"
            SET "totalSeen" = "totalSeen" + 1,
                "totalCorrect" = "totalCorrect" + CASE WHEN $2 THEN 1 ELSE 0 END,
                "lastInteractionAt" = NOW()
            WHERE "id" = $1
            "#,
        )
        .bind(learner_id)
        .bind(knows)
        .execute(conn)
        .await?;
    }

    Ok(())
}
