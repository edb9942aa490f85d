//! Dev convenience: a demo learner and a starter phrase catalog so a fresh
//! database has something to practice against. Gated by SEED_DEMO_DATA.

use sqlx::Row;
use uuid::Uuid;

use crate::db::DatabaseProxy;

const DEMO_LEARNER_ID: &str = "demo-learner";

struct SeedPhrase {
    text: &'static str,
    translation: &'static str,
    explanation: Option<&'static str>,
    level: &'static str,
}

const SEED_PHRASES: &[SeedPhrase] = &[
    SeedPhrase {
        text: "Where is the nearest train station?",
        translation: "Onde fica a estação de trem mais próxima?",
        explanation: Some("Pergunta útil para pedir direções."),
        level: "basico",
    },
    SeedPhrase {
        text: "Could I have the bill, please?",
        translation: "Pode me trazer a conta, por favor?",
        explanation: Some("Forma educada de pedir a conta no restaurante."),
        level: "basico",
    },
    SeedPhrase {
        text: "I'm just browsing, thanks.",
        translation: "Estou só olhando, obrigado.",
        explanation: None,
        level: "basico",
    },
    SeedPhrase {
        text: "It's not my cup of tea.",
        translation: "Não é a minha praia.",
        explanation: Some("Expressão idiomática para algo de que você não gosta."),
        level: "intermediario",
    },
    SeedPhrase {
        text: "Let's play it by ear.",
        translation: "Vamos decidir na hora.",
        explanation: Some("Decidir conforme a situação se desenrola."),
        level: "intermediario",
    },
    SeedPhrase {
        text: "He threw me under the bus.",
        translation: "Ele me deixou na mão para se proteger.",
        explanation: None,
        level: "avancado",
    },
];

pub async fn maybe_seed_demo_data(proxy: &DatabaseProxy) {
    let enabled = std::env::var("SEED_DEMO_DATA")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !enabled {
        return;
    }

    seed_demo_learner(proxy).await;
    seed_phrase_catalog(proxy).await;
}

async fn seed_demo_learner(proxy: &DatabaseProxy) {
    let pool = proxy.pool();

    let existing: Option<String> = sqlx::query(r#"SELECT "id" FROM "learner_profiles" WHERE "id" = $1"#)
        .bind(DEMO_LEARNER_ID)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten()
        .and_then(|row| row.try_get("id").ok());

    if existing.is_some() {
        tracing::debug!("demo learner already exists");
        return;
    }

    if let Err(err) = sqlx::query(
        r#"
        INSERT INTO "learner_profiles" ("id", "displayName", "level", "phrasesPerDay")
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(DEMO_LEARNER_ID)
    .bind("Demo")
    .bind("basico")
    .bind(5)
    .execute(pool)
    .await
    {
        tracing::warn!(error = %err, "failed to seed demo learner");
    } else {
        tracing::info!("seeded demo learner (id={DEMO_LEARNER_ID})");
    }
}

async fn seed_phrase_catalog(proxy: &DatabaseProxy) {
    let pool = proxy.pool();

    let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "phrases""#)
        .fetch_one(pool)
        .await
        .unwrap_or(0);
    if count > 0 {
        tracing::debug!(count, "phrase catalog already populated");
        return;
    }

    for phrase in SEED_PHRASES {
        if let Err(err) = sqlx::query(
            r#"
            INSERT INTO "phrases" ("id", "text", "translation", "explanation", "level", "status")
            VALUES ($1, $2, $3, $4, $5, 'active')
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(phrase.text)
        .bind(phrase.translation)
        .bind(phrase.explanation)
        .bind(phrase.level)
        .execute(pool)
        .await
        {
            tracing::warn!(error = %err, text = phrase.text, "failed to seed phrase");
        }
    }

    tracing::info!(count = SEED_PHRASES.len(), "seeded starter phrase catalog");
}
