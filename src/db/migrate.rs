use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration sql error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    tracing::info!("running database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS "_migrations" (
            "id" SERIAL PRIMARY KEY,
            "name" TEXT NOT NULL UNIQUE,
            "applied_at" TIMESTAMP NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    let applied: Vec<String> =
        sqlx::query_scalar(r#"SELECT "name" FROM "_migrations" ORDER BY "id""#)
            .fetch_all(pool)
            .await?;

    let migrations = [(
        "001_init_schema",
        include_str!("../../sql/001_init_schema.sql"),
    )];

    for (name, sql) in migrations {
        if applied.iter().any(|existing| existing == name) {
            continue;
        }

        tracing::info!(migration = name, "applying migration");
        let mut tx = pool.begin().await?;
        for statement in split_sql_statements(sql) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        sqlx::query(r#"INSERT INTO "_migrations" ("name") VALUES ($1)"#)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    Ok(())
}

/// Naive statement splitter: the schema files only use semicolons as
/// statement terminators outside string literals.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;

    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                current.push(ch);
            }
            ';' if !in_string => {
                let stripped = strip_comment_lines(&current);
                if !stripped.is_empty() {
                    statements.push(stripped);
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let tail = strip_comment_lines(&current);
    if !tail.is_empty() {
        statements.push(tail);
    }

    statements
}

fn strip_comment_lines(statement: &str) -> String {
    statement
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
