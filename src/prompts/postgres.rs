/// Prompt store backed by the `prompts` and `test_results` tables.
///
/// Ownership is part of every `WHERE` clause, so a foreign id never
/// reaches the caller.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewPrompt, NewTestResult, Prompt, PromptStore, PromptUpdate, TestResult};
use crate::error::AppError;

const PROMPT_COLUMNS: &str = "id, owner_id, title, description, content, system_message, \
                              category, tags, is_public, version, created_at, updated_at";

const TEST_RESULT_COLUMNS: &str = "id, prompt_id, owner_id, model_name, temperature, max_tokens, \
                                   top_p, input_tokens, output_tokens, total_tokens, latency_ms, \
                                   test_input, test_output, evaluation_score, created_at";

#[derive(Clone)]
pub struct PgPromptStore {
    pool: PgPool,
}

impl PgPromptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn owns(&self, owner_id: Uuid, prompt_id: Uuid) -> Result<bool, AppError> {
        let found: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM prompts WHERE id = $1 AND owner_id = $2")
                .bind(prompt_id)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl PromptStore for PgPromptStore {
    #[tracing::instrument(name = "create_prompt", skip(self, prompt))]
    async fn create_prompt(&self, owner_id: Uuid, prompt: NewPrompt) -> Result<Prompt, AppError> {
        let query = format!(
            r#"
            INSERT INTO prompts
                (id, owner_id, title, description, content, system_message, category, tags, is_public)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PROMPT_COLUMNS
        );
        let prompt = sqlx::query_as::<_, Prompt>(&query)
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(prompt.title)
            .bind(prompt.description)
            .bind(prompt.content)
            .bind(prompt.system_message)
            .bind(prompt.category)
            .bind(prompt.tags)
            .bind(prompt.is_public)
            .fetch_one(&self.pool)
            .await?;

        Ok(prompt)
    }

    #[tracing::instrument(name = "list_prompts", skip(self))]
    async fn list_prompts(&self, owner_id: Uuid) -> Result<Vec<Prompt>, AppError> {
        let query = format!(
            "SELECT {} FROM prompts WHERE owner_id = $1 ORDER BY updated_at DESC, created_at DESC",
            PROMPT_COLUMNS
        );
        let prompts = sqlx::query_as::<_, Prompt>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(prompts)
    }

    #[tracing::instrument(name = "get_prompt", skip(self))]
    async fn get_prompt(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Prompt>, AppError> {
        let query = format!(
            "SELECT {} FROM prompts WHERE id = $1 AND owner_id = $2",
            PROMPT_COLUMNS
        );
        let prompt = sqlx::query_as::<_, Prompt>(&query)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(prompt)
    }

    #[tracing::instrument(name = "update_prompt", skip(self, update))]
    async fn update_prompt(
        &self,
        owner_id: Uuid,
        id: Uuid,
        update: PromptUpdate,
    ) -> Result<Option<Prompt>, AppError> {
        // Right-hand sides see the row as it was before the update.
        let query = format!(
            r#"
            UPDATE prompts SET
                title = COALESCE($3, title),
                description = COALESCE($4, description),
                content = COALESCE($5, content),
                system_message = COALESCE($6, system_message),
                category = COALESCE($7, category),
                tags = COALESCE($8, tags),
                is_public = COALESCE($9, is_public),
                version = CASE
                    WHEN ($5 IS NOT NULL AND $5 <> content)
                      OR ($6 IS NOT NULL AND $6 IS DISTINCT FROM system_message)
                    THEN version + 1
                    ELSE version
                END,
                updated_at = now()
            WHERE id = $1 AND owner_id = $2
            RETURNING {}
            "#,
            PROMPT_COLUMNS
        );
        let prompt = sqlx::query_as::<_, Prompt>(&query)
            .bind(id)
            .bind(owner_id)
            .bind(update.title)
            .bind(update.description)
            .bind(update.content)
            .bind(update.system_message)
            .bind(update.category)
            .bind(update.tags)
            .bind(update.is_public)
            .fetch_optional(&self.pool)
            .await?;

        Ok(prompt)
    }

    #[tracing::instrument(name = "delete_prompt", skip(self))]
    async fn delete_prompt(&self, owner_id: Uuid, id: Uuid) -> Result<bool, AppError> {
        // test_results rows go with it (ON DELETE CASCADE)
        let deleted = sqlx::query("DELETE FROM prompts WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected() > 0)
    }

    #[tracing::instrument(name = "add_test_result", skip(self, result))]
    async fn add_test_result(
        &self,
        owner_id: Uuid,
        prompt_id: Uuid,
        result: NewTestResult,
    ) -> Result<Option<TestResult>, AppError> {
        let total_tokens = result.total_tokens();
        // The SELECT yields no row unless the prompt is the owner's.
        let query = format!(
            r#"
            INSERT INTO test_results
                (id, prompt_id, owner_id, model_name, temperature, max_tokens, top_p,
                 input_tokens, output_tokens, total_tokens, latency_ms,
                 test_input, test_output, evaluation_score)
            SELECT $1, p.id, p.owner_id, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            FROM prompts p
            WHERE p.id = $2 AND p.owner_id = $3
            RETURNING {}
            "#,
            TEST_RESULT_COLUMNS
        );
        let saved = sqlx::query_as::<_, TestResult>(&query)
            .bind(Uuid::new_v4())
            .bind(prompt_id)
            .bind(owner_id)
            .bind(result.model_name)
            .bind(result.temperature)
            .bind(result.max_tokens)
            .bind(result.top_p)
            .bind(result.input_tokens)
            .bind(result.output_tokens)
            .bind(total_tokens)
            .bind(result.latency_ms)
            .bind(result.test_input)
            .bind(result.test_output)
            .bind(result.evaluation_score)
            .fetch_optional(&self.pool)
            .await?;

        Ok(saved)
    }

    #[tracing::instrument(name = "list_test_results", skip(self))]
    async fn list_test_results(
        &self,
        owner_id: Uuid,
        prompt_id: Uuid,
    ) -> Result<Option<Vec<TestResult>>, AppError> {
        if !self.owns(owner_id, prompt_id).await? {
            return Ok(None);
        }

        let query = format!(
            "SELECT {} FROM test_results WHERE prompt_id = $1 ORDER BY created_at DESC",
            TEST_RESULT_COLUMNS
        );
        let results = sqlx::query_as::<_, TestResult>(&query)
            .bind(prompt_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(results))
    }
}
