//! Spaced-repetition interval policy.
//!
//! Pure state machine: given a phrase's current learning snapshot and whether
//! the learner knew it, compute the next state, repetition count, learning
//! level and the interval (whole days) until the phrase is due again.
//! Incorrect answers demote toward `learning` with short intervals; correct
//! answers lengthen intervals, with `confirming` guarding `mastered` against
//! single lucky guesses.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interval after the first correct answer on a brand-new phrase.
const CONFIRM_AFTER_DAYS: u64 = 1;
/// Interval granted when `confirming` is answered correctly.
const MASTERED_AFTER_DAYS: u64 = 7;
/// Long-term retention ladder, indexed by `repetitions - 2`, clamped.
const MAINTENANCE_LADDER_DAYS: [u64; 4] = [14, 30, 60, 90];
/// Correct answer while `learning`, tiered by current repetitions.
const LEARNING_CORRECT_DAYS: (u64, u64, u64) = (2, 3, 5);
/// Incorrect answer while `learning`, tiered by current repetitions.
const LEARNING_INCORRECT_DAYS: (u64, u64, u64) = (2, 3, 1);
/// Any demotion back to `learning` resurfaces the phrase the next day.
const RELEARN_AFTER_DAYS: u64 = 1;

/// Repetitions needed before a `learning` phrase can graduate to `mastered`.
const MASTERY_REPETITIONS: i32 = 3;

pub const MAX_LEARNING_LEVEL: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningState {
    New,
    Confirming,
    Learning,
    Mastered,
    Maintenance,
}

#[derive(Debug, Error)]
#[error("unknown learning state: {0}")]
pub struct UnknownState(pub String);

impl LearningState {
    pub const ALL: [LearningState; 5] = [
        Self::New,
        Self::Confirming,
        Self::Learning,
        Self::Mastered,
        Self::Maintenance,
    ];

    /// Store boundary: unknown strings are rejected, never defaulted.
    pub fn parse(s: &str) -> Result<Self, UnknownState> {
        match s {
            "new" => Ok(Self::New),
            "confirming" => Ok(Self::Confirming),
            "learning" => Ok(Self::Learning),
            "mastered" => Ok(Self::Mastered),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(UnknownState(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Confirming => "confirming",
            Self::Learning => "learning",
            Self::Mastered => "mastered",
            Self::Maintenance => "maintenance",
        }
    }
}

/// The durable scheduling fields of a phrase going into an answer.
#[derive(Debug, Clone, Copy)]
pub struct PolicySnapshot {
    pub state: LearningState,
    pub repetitions: i32,
    pub learning_level: i32,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            state: LearningState::New,
            repetitions: 0,
            learning_level: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: LearningState,
    pub repetitions: i32,
    pub learning_level: i32,
    pub interval_days: u64,
}

/// Apply one answer to a snapshot. Total over state x correctness; intervals
/// are always >= 1 day and repetitions never drop back to 0 (a phrase that
/// has been answered once must never look "never seen" again).
pub fn apply(current: &PolicySnapshot, knows: bool) -> Transition {
    let reps = current.repetitions;
    let level = current.learning_level;

    if knows {
        match current.state {
            LearningState::New => Transition {
                state: LearningState::Confirming,
                repetitions: 1,
                learning_level: 2,
                interval_days: CONFIRM_AFTER_DAYS,
            },
            LearningState::Confirming => Transition {
                state: LearningState::Mastered,
                repetitions: reps + 1,
                learning_level: 3,
                interval_days: MASTERED_AFTER_DAYS,
            },
            LearningState::Learning => {
                let interval = if reps <= 1 {
                    LEARNING_CORRECT_DAYS.0
                } else if reps <= 2 {
                    LEARNING_CORRECT_DAYS.1
                } else {
                    LEARNING_CORRECT_DAYS.2
                };
                let state = if reps >= MASTERY_REPETITIONS {
                    LearningState::Mastered
                } else {
                    LearningState::Learning
                };
                Transition {
                    state,
                    repetitions: reps + 1,
                    learning_level: (level + 1).min(MAX_LEARNING_LEVEL),
                    interval_days: interval,
                }
            }
            LearningState::Mastered | LearningState::Maintenance => {
                // Ladder index is repetitions-2 with ad hoc clamping at both
                // ends; the boundary behavior at low counts is the product
                // policy, reproduced literally.
                let idx = ((reps - 2).max(0) as usize).min(MAINTENANCE_LADDER_DAYS.len() - 1);
                Transition {
                    state: LearningState::Maintenance,
                    repetitions: reps + 1,
                    learning_level: MAX_LEARNING_LEVEL,
                    interval_days: MAINTENANCE_LADDER_DAYS[idx],
                }
            }
        }
    } else {
        match current.state {
            LearningState::New => Transition {
                state: LearningState::Learning,
                repetitions: 1,
                learning_level: 1,
                interval_days: RELEARN_AFTER_DAYS,
            },
            // Regression out of confirming resets repetitions.
            LearningState::Confirming => Transition {
                state: LearningState::Learning,
                repetitions: 1,
                learning_level: 1,
                interval_days: RELEARN_AFTER_DAYS,
            },
            LearningState::Learning => {
                let interval = if reps <= 1 {
                    LEARNING_INCORRECT_DAYS.0
                } else if reps <= 2 {
                    LEARNING_INCORRECT_DAYS.1
                } else {
                    LEARNING_INCORRECT_DAYS.2
                };
                Transition {
                    state: LearningState::Learning,
                    repetitions: reps.max(1),
                    learning_level: 1,
                    interval_days: interval,
                }
            }
            LearningState::Mastered | LearningState::Maintenance => Transition {
                state: LearningState::Learning,
                repetitions: 1,
                learning_level: 2,
                interval_days: RELEARN_AFTER_DAYS,
            },
        }
    }
}

/// `firstAttemptCorrect` is fixed once, when leaving `new`, and never
/// retouched afterwards.
pub fn first_attempt_correct(
    prior_state: LearningState,
    existing: Option<bool>,
    knows: bool,
) -> Option<bool> {
    match prior_state {
        LearningState::New => Some(knows),
        _ => existing,
    }
}

/// Interval arithmetic works on calendar dates, not datetimes.
pub fn next_eligible_date(answered_on: NaiveDate, interval_days: u64) -> NaiveDate {
    answered_on
        .checked_add_days(Days::new(interval_days))
        .unwrap_or(answered_on)
}
