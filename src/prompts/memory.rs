/// In-memory prompt store, for tests and single-process embedding.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{NewPrompt, NewTestResult, Prompt, PromptStore, PromptUpdate, TestResult};
use crate::error::AppError;

#[derive(Default)]
struct Library {
    prompts: Vec<Prompt>,
    results: Vec<TestResult>,
}

impl Library {
    fn owned_mut(&mut self, owner_id: Uuid, id: Uuid) -> Option<&mut Prompt> {
        self.prompts
            .iter_mut()
            .find(|prompt| prompt.id == id && prompt.owner_id == owner_id)
    }

    fn owned(&self, owner_id: Uuid, id: Uuid) -> Option<&Prompt> {
        self.prompts
            .iter()
            .find(|prompt| prompt.id == id && prompt.owner_id == owner_id)
    }

    fn owns(&self, owner_id: Uuid, id: Uuid) -> bool {
        self.owned(owner_id, id).is_some()
    }
}

#[derive(Default)]
pub struct InMemoryPromptStore {
    library: Mutex<Library>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Library>, AppError> {
        self.library
            .lock()
            .map_err(|_| AppError::Internal("prompt store lock poisoned".to_string()))
    }
}

/// Newest first; later insertions win ties.
fn newest_first<T>(mut items: Vec<T>, key: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    items.reverse();
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    items
}

#[async_trait]
impl PromptStore for InMemoryPromptStore {
    async fn create_prompt(&self, owner_id: Uuid, prompt: NewPrompt) -> Result<Prompt, AppError> {
        let now = Utc::now();
        let prompt = Prompt {
            id: Uuid::new_v4(),
            owner_id,
            title: prompt.title,
            description: prompt.description,
            content: prompt.content,
            system_message: prompt.system_message,
            category: prompt.category,
            tags: prompt.tags,
            is_public: prompt.is_public,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.lock()?.prompts.push(prompt.clone());
        Ok(prompt)
    }

    async fn list_prompts(&self, owner_id: Uuid) -> Result<Vec<Prompt>, AppError> {
        let library = self.lock()?;
        let owned: Vec<Prompt> = library
            .prompts
            .iter()
            .filter(|prompt| prompt.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(newest_first(owned, |p| p.updated_at))
    }

    async fn get_prompt(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Prompt>, AppError> {
        Ok(self.lock()?.owned(owner_id, id).cloned())
    }

    async fn update_prompt(
        &self,
        owner_id: Uuid,
        id: Uuid,
        update: PromptUpdate,
    ) -> Result<Option<Prompt>, AppError> {
        let mut library = self.lock()?;
        Ok(library.owned_mut(owner_id, id).map(|prompt| {
            update.apply(prompt, Utc::now());
            prompt.clone()
        }))
    }

    async fn delete_prompt(&self, owner_id: Uuid, id: Uuid) -> Result<bool, AppError> {
        let mut library = self.lock()?;
        if !library.owns(owner_id, id) {
            return Ok(false);
        }
        library.prompts.retain(|prompt| prompt.id != id);
        library.results.retain(|result| result.prompt_id != id);
        Ok(true)
    }

    async fn add_test_result(
        &self,
        owner_id: Uuid,
        prompt_id: Uuid,
        result: NewTestResult,
    ) -> Result<Option<TestResult>, AppError> {
        let mut library = self.lock()?;
        if !library.owns(owner_id, prompt_id) {
            return Ok(None);
        }

        let total_tokens = result.total_tokens();
        let result = TestResult {
            id: Uuid::new_v4(),
            prompt_id,
            owner_id,
            model_name: result.model_name,
            temperature: result.temperature,
            max_tokens: result.max_tokens,
            top_p: result.top_p,
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            total_tokens,
            latency_ms: result.latency_ms,
            test_input: result.test_input,
            test_output: result.test_output,
            evaluation_score: result.evaluation_score,
            created_at: Utc::now(),
        };
        library.results.push(result.clone());
        Ok(Some(result))
    }

    async fn list_test_results(
        &self,
        owner_id: Uuid,
        prompt_id: Uuid,
    ) -> Result<Option<Vec<TestResult>>, AppError> {
        let library = self.lock()?;
        if !library.owns(owner_id, prompt_id) {
            return Ok(None);
        }
        let results: Vec<TestResult> = library
            .results
            .iter()
            .filter(|result| result.prompt_id == prompt_id)
            .cloned()
            .collect();
        Ok(Some(newest_first(results, |r| r.created_at)))
    }
}
