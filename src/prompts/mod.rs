/// Prompt library
///
/// Prompts and the recorded results of running them against a model. Every
/// prompt belongs to one account and every store operation is scoped to that
/// owner: another account's prompt behaves exactly like a missing one.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub use memory::InMemoryPromptStore;
pub use postgres::PgPromptStore;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Prompt {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub content: String,
    pub system_message: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub is_public: bool,
    /// Starts at 1; bumped whenever `content` or `system_message` changes
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPrompt {
    pub title: String,
    pub description: Option<String>,
    pub content: String,
    pub system_message: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
}

/// Partial update; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub system_message: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_public: Option<bool>,
}

impl PromptUpdate {
    /// Whether applying this update changes the text sent to a model.
    pub fn changes_text_of(&self, prompt: &Prompt) -> bool {
        let content_changed = self
            .content
            .as_ref()
            .map_or(false, |content| *content != prompt.content);
        let system_changed = self
            .system_message
            .as_ref()
            .map_or(false, |system| prompt.system_message.as_ref() != Some(system));
        content_changed || system_changed
    }

    pub(crate) fn apply(self, prompt: &mut Prompt, now: DateTime<Utc>) {
        if self.changes_text_of(prompt) {
            prompt.version += 1;
        }
        if let Some(title) = self.title {
            prompt.title = title;
        }
        if let Some(description) = self.description {
            prompt.description = Some(description);
        }
        if let Some(content) = self.content {
            prompt.content = content;
        }
        if let Some(system_message) = self.system_message {
            prompt.system_message = Some(system_message);
        }
        if let Some(category) = self.category {
            prompt.category = Some(category);
        }
        if let Some(tags) = self.tags {
            prompt.tags = tags;
        }
        if let Some(is_public) = self.is_public {
            prompt.is_public = is_public;
        }
        prompt.updated_at = now;
    }
}

/// One run of a prompt against a model.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TestResult {
    pub id: Uuid,
    pub prompt_id: Uuid,
    pub owner_id: Uuid,
    pub model_name: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub top_p: Option<f32>,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub total_tokens: i32,
    pub latency_ms: Option<i32>,
    pub test_input: String,
    pub test_output: String,
    pub evaluation_score: Option<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTestResult {
    pub model_name: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub top_p: Option<f32>,
    #[serde(default)]
    pub input_tokens: i32,
    #[serde(default)]
    pub output_tokens: i32,
    pub latency_ms: Option<i32>,
    pub test_input: String,
    pub test_output: String,
    pub evaluation_score: Option<f32>,
}

impl NewTestResult {
    pub fn total_tokens(&self) -> i32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Owner-scoped persistence for prompts and their test results.
///
/// Lookups by id return `Ok(None)` (or `Ok(false)`) when the prompt does not
/// exist or belongs to someone else.
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn create_prompt(&self, owner_id: Uuid, prompt: NewPrompt) -> Result<Prompt, AppError>;

    /// The owner's prompts, most recently updated first.
    async fn list_prompts(&self, owner_id: Uuid) -> Result<Vec<Prompt>, AppError>;

    async fn get_prompt(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Prompt>, AppError>;

    async fn update_prompt(
        &self,
        owner_id: Uuid,
        id: Uuid,
        update: PromptUpdate,
    ) -> Result<Option<Prompt>, AppError>;

    /// Deletes the prompt and its test results.
    async fn delete_prompt(&self, owner_id: Uuid, id: Uuid) -> Result<bool, AppError>;

    async fn add_test_result(
        &self,
        owner_id: Uuid,
        prompt_id: Uuid,
        result: NewTestResult,
    ) -> Result<Option<TestResult>, AppError>;

    /// The prompt's results, newest first; `None` if the prompt is not found.
    async fn list_test_results(
        &self,
        owner_id: Uuid,
        prompt_id: Uuid,
    ) -> Result<Option<Vec<TestResult>>, AppError>;
}
