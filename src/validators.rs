/// Input validators module - rejects malformed login and chat input before
/// it reaches the credential store or the upstream LLM
/// Features:
/// 1. DoS Protection: Input length limits
/// 2. Username format checks
/// 3. Chat request limits (prompt size, token budget, sampling ranges)
/// 4. Prompt library input (field lengths, tags, recorded run parameters)

use lazy_static::lazy_static;
use regex::Regex;

use crate::configuration::LlmSettings;
use crate::error::ValidationError;
use crate::llm_client::ChatMessage;
use crate::prompts::{NewPrompt, NewTestResult, PromptUpdate};

const MAX_USERNAME_LENGTH: usize = 50;
const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_MODEL_ID_LENGTH: usize = 100;
const CHAT_ROLES: [&str; 3] = ["system", "user", "assistant"];

const MAX_TITLE_LENGTH: usize = 200;
const MAX_DESCRIPTION_LENGTH: usize = 2000;
const MAX_CATEGORY_LENGTH: usize = 50;
const MAX_TAGS: usize = 20;
const MAX_TAG_LENGTH: usize = 50;

lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap();

    // Provider-qualified ids such as "openai/gpt-3.5-turbo" or "meta-llama/llama-3:free"
    static ref MODEL_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9._:/-]+$").unwrap();
}

/// Validates a login username and returns it trimmed.
pub fn is_valid_username(username: &str) -> Result<String, ValidationError> {
    let trimmed = username.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("username".to_string()));
    }

    if trimmed.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong("username".to_string(), MAX_USERNAME_LENGTH));
    }

    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("username".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Bounds the password before it is handed to bcrypt.
pub fn is_valid_password_input(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()));
    }

    if password.chars().count() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong("password".to_string(), MAX_PASSWORD_LENGTH));
    }

    if password.contains('\0') {
        return Err(ValidationError::SuspiciousContent("password".to_string()));
    }

    Ok(())
}

pub fn is_valid_model_id(model_id: &str) -> Result<(), ValidationError> {
    if model_id.is_empty() {
        return Err(ValidationError::EmptyField("model".to_string()));
    }

    if model_id.len() > MAX_MODEL_ID_LENGTH {
        return Err(ValidationError::TooLong("model".to_string(), MAX_MODEL_ID_LENGTH));
    }

    if !MODEL_ID_REGEX.is_match(model_id) || model_id.contains("..") {
        return Err(ValidationError::InvalidFormat("model".to_string()));
    }

    Ok(())
}

/// Sampling and budget parameters of a chat request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatParameters {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// Validates a chat request against the configured LLM limits.
pub fn validate_chat_request(
    messages: &[ChatMessage],
    parameters: ChatParameters,
    limits: &LlmSettings,
) -> Result<(), ValidationError> {
    if messages.is_empty() {
        return Err(ValidationError::EmptyField("messages".to_string()));
    }

    for message in messages {
        if !CHAT_ROLES.contains(&message.role.as_str()) {
            return Err(ValidationError::InvalidFormat("messages.role".to_string()));
        }
        if message.content.contains('\0') {
            return Err(ValidationError::SuspiciousContent("messages.content".to_string()));
        }
    }

    let prompt_length: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    if prompt_length > limits.max_prompt_length {
        return Err(ValidationError::TooLong(
            "prompt".to_string(),
            limits.max_prompt_length,
        ));
    }

    if let Some(max_tokens) = parameters.max_tokens {
        if max_tokens == 0 || max_tokens > limits.max_tokens_per_request {
            return Err(ValidationError::OutOfRange("max_tokens".to_string()));
        }
    }

    if let Some(temperature) = parameters.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ValidationError::OutOfRange("temperature".to_string()));
        }
    }

    if let Some(top_p) = parameters.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(ValidationError::OutOfRange("top_p".to_string()));
        }
    }

    Ok(())
}

/// Required text: not blank, at most `max` characters, no NUL bytes.
fn required_text(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field.to_string()));
    }
    optional_text(field, Some(value), max)
}

fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<(), ValidationError> {
    let Some(value) = value else {
        return Ok(());
    };
    if value.chars().count() > max {
        return Err(ValidationError::TooLong(field.to_string(), max));
    }
    if value.contains('\0') {
        return Err(ValidationError::SuspiciousContent(field.to_string()));
    }
    Ok(())
}

fn validate_tags(tags: &[String]) -> Result<(), ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::OutOfRange("tags".to_string()));
    }
    for tag in tags {
        required_text("tags", tag, MAX_TAG_LENGTH)?;
    }
    Ok(())
}

pub fn validate_new_prompt(prompt: &NewPrompt, limits: &LlmSettings) -> Result<(), ValidationError> {
    required_text("title", &prompt.title, MAX_TITLE_LENGTH)?;
    required_text("content", &prompt.content, limits.max_prompt_length)?;
    optional_text("description", prompt.description.as_deref(), MAX_DESCRIPTION_LENGTH)?;
    optional_text("system_message", prompt.system_message.as_deref(), limits.max_prompt_length)?;
    optional_text("category", prompt.category.as_deref(), MAX_CATEGORY_LENGTH)?;
    validate_tags(&prompt.tags)
}

/// Same rules as `validate_new_prompt`, for the fields present.
pub fn validate_prompt_update(update: &PromptUpdate, limits: &LlmSettings) -> Result<(), ValidationError> {
    if let Some(title) = &update.title {
        required_text("title", title, MAX_TITLE_LENGTH)?;
    }
    if let Some(content) = &update.content {
        required_text("content", content, limits.max_prompt_length)?;
    }
    optional_text("description", update.description.as_deref(), MAX_DESCRIPTION_LENGTH)?;
    optional_text("system_message", update.system_message.as_deref(), limits.max_prompt_length)?;
    optional_text("category", update.category.as_deref(), MAX_CATEGORY_LENGTH)?;
    if let Some(tags) = &update.tags {
        validate_tags(tags)?;
    }
    Ok(())
}

pub fn validate_new_test_result(result: &NewTestResult, limits: &LlmSettings) -> Result<(), ValidationError> {
    is_valid_model_id(&result.model_name)?;
    required_text("test_input", &result.test_input, limits.max_prompt_length)?;
    if result.test_output.contains('\0') {
        return Err(ValidationError::SuspiciousContent("test_output".to_string()));
    }

    if let Some(temperature) = result.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ValidationError::OutOfRange("temperature".to_string()));
        }
    }
    if let Some(top_p) = result.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(ValidationError::OutOfRange("top_p".to_string()));
        }
    }
    if result.max_tokens.map_or(false, |max_tokens| max_tokens < 1) {
        return Err(ValidationError::OutOfRange("max_tokens".to_string()));
    }
    if result.input_tokens < 0 || result.output_tokens < 0 {
        return Err(ValidationError::OutOfRange("tokens".to_string()));
    }
    if result.latency_ms.map_or(false, |latency| latency < 0) {
        return Err(ValidationError::OutOfRange("latency_ms".to_string()));
    }
    if result.evaluation_score.map_or(false, |score| !score.is_finite()) {
        return Err(ValidationError::OutOfRange("evaluation_score".to_string()));
    }
    Ok(())
}
