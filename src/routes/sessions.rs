use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::response::{json_error, AppError};
use crate::services::answer;
use crate::services::session::{self, SessionError, SessionKind};
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StartSessionRequest {
    learner_id: String,
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AnswerPhraseRequest {
    learner_id: String,
    session_id: String,
    phrase_id: String,
    knows: bool,
}

pub(super) async fn start(
    State(state): State<AppState>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.learner_id.trim().is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "MISSING_LEARNER_ID",
            "learnerId é obrigatório",
        ));
    }
    let proxy = require_db(&state)?;

    let kind = SessionKind::parse(payload.kind.as_deref());
    let today = chrono::Utc::now().date_naive();
    // StdRng rather than ThreadRng: the handle lives across awaits.
    let mut rng = rand::rngs::StdRng::from_os_rng();

    let started = session::start_or_resume(proxy.pool(), &payload.learner_id, kind, today, &mut rng)
        .await
        .map_err(map_session_error)?;

    tracing::info!(
        learner_id = %payload.learner_id,
        session_id = %started.session_id,
        total = started.total_phrases,
        resumed = started.resumed,
        "session started"
    );

    Ok(Json(SuccessResponse {
        success: true,
        data: started,
    }))
}

pub(super) async fn answer(
    State(state): State<AppState>,
    Json(payload): Json<AnswerPhraseRequest>,
) -> Result<impl IntoResponse, AppError> {
    for (value, code, message) in [
        (&payload.learner_id, "MISSING_LEARNER_ID", "learnerId é obrigatório"),
        (&payload.session_id, "MISSING_SESSION_ID", "sessionId é obrigatório"),
        (&payload.phrase_id, "MISSING_PHRASE_ID", "phraseId é obrigatório"),
    ] {
        if value.trim().is_empty() {
            return Err(json_error(StatusCode::BAD_REQUEST, code, message));
        }
    }
    let proxy = require_db(&state)?;

    let today = chrono::Utc::now().date_naive();
    let outcome = answer::answer(
        proxy.pool(),
        &payload.learner_id,
        &payload.session_id,
        &payload.phrase_id,
        payload.knows,
        today,
    )
    .await
    .map_err(map_session_error)?;

    tracing::debug!(
        learner_id = %payload.learner_id,
        session_id = %payload.session_id,
        phrase_id = %payload.phrase_id,
        knows = payload.knows,
        new_state = outcome.new_state.as_str(),
        "answer recorded"
    );

    Ok(Json(SuccessResponse {
        success: true,
        data: outcome,
    }))
}

fn require_db(state: &AppState) -> Result<std::sync::Arc<crate::db::DatabaseProxy>, AppError> {
    state.db_proxy().ok_or_else(|| {
        json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Serviço indisponível",
        )
    })
}

fn map_session_error(err: SessionError) -> AppError {
    match err {
        SessionError::LearnerMissing => json_error(
            StatusCode::NOT_FOUND,
            "LEARNER_NOT_FOUND",
            "Aprendiz não encontrado",
        ),
        // Empty state for the client, not a failure dialog.
        SessionError::NoContent => json_error(
            StatusCode::NOT_FOUND,
            "NO_CONTENT",
            "Nenhuma frase disponível para praticar",
        ),
        SessionError::AlreadyAnswered => json_error(
            StatusCode::CONFLICT,
            "ALREADY_ANSWERED",
            "Frase já foi respondida nesta sessão",
        ),
        SessionError::RecordMissing => json_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Registro não encontrado para esta frase. Inicie uma nova sessão.",
        ),
        SessionError::Contended => {
            tracing::warn!("session start lost the active-slot race on both passes");
            json_error(StatusCode::BAD_GATEWAY, "DB_ERROR", "Falha no banco de dados")
        }
        SessionError::CorruptState(err) => {
            tracing::error!(error = %err, "rejecting corrupt learning state from store");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Erro interno do servidor",
            )
        }
        SessionError::Sql(err) => {
            tracing::error!(error = %err, "database failure in session flow");
            json_error(StatusCode::BAD_GATEWAY, "DB_ERROR", "Falha no banco de dados")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_maps_to_a_retryable_gateway_error() {
        let response = map_session_error(SessionError::Contended).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn duplicate_answer_maps_to_conflict() {
        let response = map_session_error(SessionError::AlreadyAnswered).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn missing_learner_maps_to_not_found() {
        let response = map_session_error(SessionError::LearnerMissing).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
