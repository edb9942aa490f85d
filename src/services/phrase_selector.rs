//! Session batch selection.
//!
//! Fills a batch of at most `quota` phrases by priority tier: learning-due,
//! confirming-due, new, maintenance-due. Review tiers look only at the
//! latest answered record per phrase; the new tier draws unseen phrases from
//! the catalog at the learner's level and shuffles them with a caller-owned
//! rng so tests can fix the order.

use std::collections::HashSet;

use chrono::NaiveDate;
use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::{PgPool, Row};
use thiserror::Error;

use crate::services::interval_policy::{LearningState, UnknownState};

/// How many unseen candidates to pull before shuffling. Bounded so a large
/// catalog does not get dragged into memory for a five-phrase session.
const NEW_PHRASE_CANDIDATE_WINDOW: i64 = 50;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("corrupt record state: {0}")]
    CorruptState(#[from] UnknownState),
}

/// A phrase chosen for a session, with the carried-forward scheduling
/// metadata of its most recent record (defaults for never-seen phrases).
#[derive(Debug, Clone)]
pub struct SelectedPhrase {
    pub phrase_id: String,
    pub text: String,
    pub translation: String,
    pub explanation: Option<String>,
    pub audio_url: Option<String>,
    pub state: LearningState,
    pub repetitions: i32,
    pub learning_level: i32,
    pub first_attempt_correct: Option<bool>,
    pub is_review: bool,
    /// 1-based position in the session, stable for the session's life.
    pub order: i32,
}

#[derive(Debug, Clone)]
struct TierCandidate {
    phrase_id: String,
    text: String,
    translation: String,
    explanation: Option<String>,
    audio_url: Option<String>,
    state: LearningState,
    repetitions: i32,
    learning_level: i32,
    first_attempt_correct: Option<bool>,
    is_review: bool,
}

/// Accumulates tier output in priority order, skipping phrases already
/// placed by an earlier tier and assigning `orderInSession`.
#[derive(Debug)]
struct BatchBuilder {
    quota: usize,
    chosen: HashSet<String>,
    batch: Vec<SelectedPhrase>,
}

impl BatchBuilder {
    fn new(quota: usize) -> Self {
        Self {
            quota,
            chosen: HashSet::new(),
            batch: Vec::new(),
        }
    }

    fn remaining(&self) -> usize {
        self.quota.saturating_sub(self.batch.len())
    }

    fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    fn push(&mut self, candidate: TierCandidate) {
        if self.is_full() || !self.chosen.insert(candidate.phrase_id.clone()) {
            return;
        }
        let order = self.batch.len() as i32 + 1;
        self.batch.push(SelectedPhrase {
            phrase_id: candidate.phrase_id,
            text: candidate.text,
            translation: candidate.translation,
            explanation: candidate.explanation,
            audio_url: candidate.audio_url,
            state: candidate.state,
            repetitions: candidate.repetitions,
            learning_level: candidate.learning_level,
            first_attempt_correct: candidate.first_attempt_correct,
            is_review: candidate.is_review,
            order,
        });
    }

    fn finish(self) -> Vec<SelectedPhrase> {
        self.batch
    }
}

/// Select one session's worth of phrases. An empty vec means no tier had
/// anything to offer; the caller surfaces that as its no-content condition.
pub async fn select_batch(
    pool: &PgPool,
    learner_id: &str,
    learner_level: &str,
    quota: i64,
    today: NaiveDate,
    rng: &mut (impl Rng + ?Sized),
) -> Result<Vec<SelectedPhrase>, SelectError> {
    let quota = quota.max(1) as usize;
    let mut builder = BatchBuilder::new(quota);

    // Tier 1: active remediation.
    if !builder.is_full() {
        let due = due_review_phrases(
            pool,
            learner_id,
            &["learning"],
            today,
            builder.remaining() as i64,
        )
        .await?;
        for candidate in due {
            builder.push(candidate);
        }
    }

    // Tier 2: confirm yesterday's first-try hits.
    if !builder.is_full() {
        let due = due_review_phrases(
            pool,
            learner_id,
            &["confirming"],
            today,
            builder.remaining() as i64,
        )
        .await?;
        for candidate in due {
            builder.push(candidate);
        }
    }

    // Tier 3: unseen phrases at the learner's level, shuffled.
    if !builder.is_full() {
        let mut fresh = unseen_phrases(pool, learner_id, learner_level).await?;
        fresh.shuffle(rng);
        for candidate in fresh {
            if builder.is_full() {
                break;
            }
            builder.push(candidate);
        }
    }

    // Tier 4: long-interval retention checks.
    if !builder.is_full() {
        let due = due_review_phrases(
            pool,
            learner_id,
            &["mastered", "maintenance"],
            today,
            builder.remaining() as i64,
        )
        .await?;
        for candidate in due {
            builder.push(candidate);
        }
    }

    Ok(builder.finish())
}

/// Due review phrases in one or more states, soonest first. Only the latest
/// answered record per phrase counts; stale rows from older sessions must
/// not resurrect a state the phrase has since left.
async fn due_review_phrases(
    pool: &PgPool,
    learner_id: &str,
    states: &[&str],
    today: NaiveDate,
    limit: i64,
) -> Result<Vec<TierCandidate>, SelectError> {
    let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
    let rows = sqlx::query(
        r#"
        SELECT latest."phraseId", latest."state", latest."repetitions",
               latest."learningLevel", latest."firstAttemptCorrect",
               p."text", p."translation", p."explanation", p."audioUrl"
        FROM (
            SELECT DISTINCT ON ("phraseId")
                   "phraseId", "state", "repetitions", "learningLevel",
                   "firstAttemptCorrect", "nextEligibleDate"
            FROM "learning_records"
            WHERE "learnerId" = $1 AND "knows" IS NOT NULL
            ORDER BY "phraseId", "answeredAt" DESC
        ) latest
        JOIN "phrases" p ON p."id" = latest."phraseId"
        WHERE latest."state" = ANY($2)
          AND latest."nextEligibleDate" IS NOT NULL
          AND latest."nextEligibleDate" <= $3
        ORDER BY latest."nextEligibleDate" ASC
        LIMIT $4
        "#,
    )
    .bind(learner_id)
    .bind(&states)
    .bind(today)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let state_raw: String = row.try_get("state")?;
            Ok(TierCandidate {
                phrase_id: row.try_get("phraseId")?,
                text: row.try_get("text")?,
                translation: row.try_get("translation")?,
                explanation: row.try_get("explanation").ok().flatten(),
                audio_url: row.try_get("audioUrl").ok().flatten(),
                state: LearningState::parse(&state_raw)?,
                repetitions: row.try_get("repetitions").unwrap_or(0),
                learning_level: row.try_get("learningLevel").unwrap_or(1),
                first_attempt_correct: row.try_get("firstAttemptCorrect").ok().flatten(),
                is_review: true,
            })
        })
        .collect()
}

/// Active catalog phrases at the learner's level that the learner has never
/// been shown, in a bounded candidate window.
async fn unseen_phrases(
    pool: &PgPool,
    learner_id: &str,
    learner_level: &str,
) -> Result<Vec<TierCandidate>, SelectError> {
    let rows = sqlx::query(
        r#"
        SELECT "id", "text", "translation", "explanation", "audioUrl"
        FROM "phrases"
        WHERE "level" = $2
          AND "status" = 'active'
          AND NOT EXISTS (
              SELECT 1 FROM "learning_records" lr
              WHERE lr."learnerId" = $1 AND lr."phraseId" = "phrases"."id"
          )
        ORDER BY "createdAt" ASC
        LIMIT $3
        "#,
    )
    .bind(learner_id)
    .bind(learner_level)
    .bind(NEW_PHRASE_CANDIDATE_WINDOW)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(TierCandidate {
                phrase_id: row.try_get("id")?,
                text: row.try_get("text")?,
                translation: row.try_get("translation")?,
                explanation: row.try_get("explanation").ok().flatten(),
                audio_url: row.try_get("audioUrl").ok().flatten(),
                state: LearningState::New,
                repetitions: 0,
                learning_level: 1,
                first_attempt_correct: None,
                is_review: false,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn candidate(id: &str, state: LearningState) -> TierCandidate {
        TierCandidate {
            phrase_id: id.to_string(),
            text: format!("frase {id}"),
            translation: format!("phrase {id}"),
            explanation: None,
            audio_url: None,
            state,
            repetitions: 0,
            learning_level: 1,
            first_attempt_correct: None,
            is_review: state != LearningState::New,
        }
    }

    #[test]
    fn builder_assigns_stable_one_based_order() {
        let mut builder = BatchBuilder::new(3);
        builder.push(candidate("a", LearningState::Learning));
        builder.push(candidate("b", LearningState::Confirming));
        let batch = builder.finish();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].order, 1);
        assert_eq!(batch[1].order, 2);
    }

    #[test]
    fn builder_skips_phrases_chosen_by_an_earlier_tier() {
        let mut builder = BatchBuilder::new(5);
        builder.push(candidate("a", LearningState::Learning));
        builder.push(candidate("a", LearningState::Maintenance));
        builder.push(candidate("b", LearningState::New));
        let batch = builder.finish();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].state, LearningState::Learning);
    }

    #[test]
    fn builder_truncates_at_quota() {
        let mut builder = BatchBuilder::new(2);
        for id in ["a", "b", "c", "d"] {
            builder.push(candidate(id, LearningState::New));
        }
        let batch = builder.finish();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.last().unwrap().order, 2);
    }

    #[test]
    fn seeded_shuffle_is_deterministic() {
        let ids: Vec<String> = (0..20).map(|i| format!("p{i}")).collect();

        let order = |seed: u64| {
            let mut candidates: Vec<TierCandidate> = ids
                .iter()
                .map(|id| candidate(id, LearningState::New))
                .collect();
            let mut rng = StdRng::seed_from_u64(seed);
            candidates.shuffle(&mut rng);
            candidates
                .into_iter()
                .map(|c| c.phrase_id)
                .collect::<Vec<_>>()
        };

        assert_eq!(order(7), order(7));
        assert_ne!(order(7), order(8));
    }
}
