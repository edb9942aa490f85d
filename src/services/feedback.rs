//! Cosmetic per-answer feedback. Deterministic and total over
//! (correct?, prior state); never scheduling-relevant.

use serde::Serialize;

use crate::services::interval_policy::LearningState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Acerto,
    Confirmacao,
    Erro,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feedback {
    pub message: &'static str,
    pub kind: FeedbackKind,
    pub emoji: &'static str,
}

pub fn for_answer(knows: bool, prior_state: LearningState) -> Feedback {
    if knows {
        match prior_state {
            LearningState::New => Feedback {
                message: "Você já conhece essa! Vamos confirmar amanhã.",
                kind: FeedbackKind::Acerto,
                emoji: "✨",
            },
            LearningState::Confirming => Feedback {
                message: "Confirmado! Essa frase está dominada.",
                kind: FeedbackKind::Confirmacao,
                emoji: "🎯",
            },
            LearningState::Learning => Feedback {
                message: "Ótimo progresso! Continue assim.",
                kind: FeedbackKind::Acerto,
                emoji: "📈",
            },
            LearningState::Mastered | LearningState::Maintenance => Feedback {
                message: "Memória afiada! Mantendo o ritmo.",
                kind: FeedbackKind::Acerto,
                emoji: "💪",
            },
        }
    } else {
        match prior_state {
            LearningState::New => Feedback {
                message: "Normal não lembrar! Vamos praticar.",
                kind: FeedbackKind::Erro,
                emoji: "🧠",
            },
            LearningState::Mastered | LearningState::Maintenance => Feedback {
                message: "Acontece! Vamos reforçar essa.",
                kind: FeedbackKind::Erro,
                emoji: "🔄",
            },
            LearningState::Confirming | LearningState::Learning => Feedback {
                message: "Tudo bem! Repetição é o segredo.",
                kind: FeedbackKind::Erro,
                emoji: "💡",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_total() {
        for state in LearningState::ALL {
            for knows in [true, false] {
                let fb = for_answer(knows, state);
                assert!(!fb.message.is_empty());
                assert!(!fb.emoji.is_empty());
            }
        }
    }

    #[test]
    fn kind_tracks_correctness() {
        for state in LearningState::ALL {
            assert_eq!(for_answer(false, state).kind, FeedbackKind::Erro);
            assert_ne!(for_answer(true, state).kind, FeedbackKind::Erro);
        }
    }

    #[test]
    fn confirming_hit_gets_the_confirmation_copy() {
        assert_eq!(
            for_answer(true, LearningState::Confirming).kind,
            FeedbackKind::Confirmacao
        );
    }
}
