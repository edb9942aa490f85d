//! Store-backed behavior tests. They need a reachable Postgres and skip
//! themselves unless TEST_DATABASE_URL (or DATABASE_URL) points at one.
//! Every test works on its own learner and its own phrase level, so the
//! suite runs against a shared database without cleanup between runs.

use std::collections::HashSet;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;
use uuid::Uuid;

use frases_backend::db::migrate;
use frases_backend::services::answer;
use frases_backend::services::session::{self, SessionError, SessionKind};

static MIGRATIONS: OnceCell<()> = OnceCell::const_new();

async fn store_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|v| !v.trim().is_empty())?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to test database");

    MIGRATIONS
        .get_or_init(|| async {
            migrate::run_migrations(&pool)
                .await
                .expect("run migrations against test database");
        })
        .await;

    Some(pool)
}

fn unique_level() -> String {
    format!("nivel-{}", Uuid::new_v4())
}

async fn seed_learner(pool: &PgPool, level: &str, phrases_per_day: i32) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO "learner_profiles" ("id", "displayName", "level", "phrasesPerDay")
        VALUES ($1, 'Teste', $2, $3)
        "#,
    )
    .bind(&id)
    .bind(level)
    .bind(phrases_per_day)
    .execute(pool)
    .await
    .expect("seed learner");
    id
}

async fn seed_phrase(pool: &PgPool, level: &str) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO "phrases" ("id", "text", "translation", "level", "status")
        VALUES ($1, $2, $3, $4, 'active')
        "#,
    )
    .bind(&id)
    .bind(format!("phrase {id}"))
    .bind(format!("tradução {id}"))
    .bind(level)
    .execute(pool)
    .await
    .expect("seed phrase");
    id
}

async fn raw_active_session(pool: &PgPool, learner_id: &str) -> Result<String, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO "practice_sessions" ("id", "learnerId", "status", "totalPhrases")
        VALUES ($1, $2, 'active', 1)
        "#,
    )
    .bind(&id)
    .bind(learner_id)
    .execute(pool)
    .await
    .map(|_| id)
}

async fn raw_pending_record(
    pool: &PgPool,
    learner_id: &str,
    session_id: &str,
    phrase_id: &str,
) -> Result<String, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO "learning_records"
            ("id", "learnerId", "phraseId", "sessionId", "state", "orderInSession", "sessionTotal")
        VALUES ($1, $2, $3, $4, 'new', 1, 1)
        "#,
    )
    .bind(&id)
    .bind(learner_id)
    .bind(phrase_id)
    .bind(session_id)
    .execute(pool)
    .await
    .map(|_| id)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[tokio::test]
async fn double_start_resumes_the_same_session_and_pending_set() {
    let Some(pool) = store_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let level = unique_level();
    let learner = seed_learner(&pool, &level, 3).await;
    for _ in 0..3 {
        seed_phrase(&pool, &level).await;
    }

    let today = Utc::now().date_naive();
    let mut rng = StdRng::seed_from_u64(1);

    let first = session::start_or_resume(&pool, &learner, SessionKind::Practice, today, &mut rng)
        .await
        .expect("first start");
    assert!(!first.resumed);
    assert_eq!(first.total_phrases, 3);

    let second = session::start_or_resume(&pool, &learner, SessionKind::Practice, today, &mut rng)
        .await
        .expect("second start");
    assert!(second.resumed);
    assert_eq!(second.session_id, first.session_id);

    let first_ids: HashSet<_> = first.phrases.iter().map(|p| p.phrase_id.clone()).collect();
    let second_ids: HashSet<_> = second.phrases.iter().map(|p| p.phrase_id.clone()).collect();
    assert_eq!(second_ids, first_ids);

    // The start path commits as one unit: session row, batch records and
    // the profile flag all land or none do.
    let flagged: bool =
        sqlx::query_scalar(r#"SELECT "hasActiveSession" FROM "learner_profiles" WHERE "id" = $1"#)
            .bind(&learner)
            .fetch_one(&pool)
            .await
            .expect("profile flag");
    assert!(flagged);

    let records: i64 =
        sqlx::query_scalar(r#"SELECT COUNT(*) FROM "learning_records" WHERE "sessionId" = $1"#)
            .bind(&first.session_id)
            .fetch_one(&pool)
            .await
            .expect("record count");
    assert_eq!(records, 3);
}

#[tokio::test]
async fn exhausted_catalog_creates_no_session_row() {
    let Some(pool) = store_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    // A level with no phrases behind it: every tier comes back empty.
    let learner = seed_learner(&pool, &unique_level(), 5).await;
    let today = Utc::now().date_naive();
    let mut rng = StdRng::seed_from_u64(2);

    let result =
        session::start_or_resume(&pool, &learner, SessionKind::Practice, today, &mut rng).await;
    assert!(matches!(result, Err(SessionError::NoContent)));

    let sessions: i64 =
        sqlx::query_scalar(r#"SELECT COUNT(*) FROM "practice_sessions" WHERE "learnerId" = $1"#)
            .bind(&learner)
            .fetch_one(&pool)
            .await
            .expect("session count");
    assert_eq!(sessions, 0);
}

#[tokio::test]
async fn duplicate_answer_conflicts_and_keeps_the_first_commit() {
    let Some(pool) = store_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let level = unique_level();
    let learner = seed_learner(&pool, &level, 2).await;
    for _ in 0..2 {
        seed_phrase(&pool, &level).await;
    }

    let today = Utc::now().date_naive();
    let mut rng = StdRng::seed_from_u64(3);
    let started = session::start_or_resume(&pool, &learner, SessionKind::Practice, today, &mut rng)
        .await
        .expect("start");
    let phrase = started.phrases[0].phrase_id.clone();

    let first = answer::answer(&pool, &learner, &started.session_id, &phrase, true, today)
        .await
        .expect("first answer");
    assert!(!first.session.completed);

    let second = answer::answer(&pool, &learner, &started.session_id, &phrase, false, today).await;
    assert!(matches!(second, Err(SessionError::AlreadyAnswered)));

    // The losing answer must not have touched the committed transition.
    let row = sqlx::query(
        r#"
        SELECT "knows", "state" FROM "learning_records"
        WHERE "sessionId" = $1 AND "phraseId" = $2
        "#,
    )
    .bind(&started.session_id)
    .bind(&phrase)
    .fetch_one(&pool)
    .await
    .expect("record row");
    let knows: Option<bool> = row.try_get("knows").unwrap();
    let state: String = row.try_get("state").unwrap();
    assert_eq!(knows, Some(true));
    assert_eq!(state, "confirming");

    let answered: i32 =
        sqlx::query_scalar(r#"SELECT "answeredCount" FROM "practice_sessions" WHERE "id" = $1"#)
            .bind(&started.session_id)
            .fetch_one(&pool)
            .await
            .expect("answered count");
    assert_eq!(answered, 1);
}

#[tokio::test]
async fn active_session_slot_is_unique_per_learner() {
    let Some(pool) = store_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let learner = seed_learner(&pool, &unique_level(), 5).await;

    raw_active_session(&pool, &learner)
        .await
        .expect("first active session");
    let second = raw_active_session(&pool, &learner).await;
    let err = second.expect_err("second active session must be rejected");
    assert!(is_unique_violation(&err));
}

#[tokio::test]
async fn pending_record_is_unique_per_session_and_phrase() {
    let Some(pool) = store_pool().await else {
        eprintln!("skipping: TEST_DATABASE_URL not set");
        return;
    };

    let level = unique_level();
    let learner = seed_learner(&pool, &level, 5).await;
    let phrase = seed_phrase(&pool, &level).await;
    let session_id = raw_active_session(&pool, &learner)
        .await
        .expect("session row");

    let first = raw_pending_record(&pool, &learner, &session_id, &phrase)
        .await
        .expect("first pending record");
    let duplicate = raw_pending_record(&pool, &learner, &session_id, &phrase).await;
    let err = duplicate.expect_err("second pending record must be rejected");
    assert!(is_unique_violation(&err));

    // The index only guards pending rows; once answered, a later session
    // may record the same phrase again.
    sqlx::query(r#"UPDATE "learning_records" SET "knows" = TRUE, "answeredAt" = NOW() WHERE "id" = $1"#)
        .bind(&first)
        .execute(&pool)
        .await
        .expect("flip knows");
    raw_pending_record(&pool, &learner, &session_id, &phrase)
        .await
        .expect("pending record after the first was answered");
}
