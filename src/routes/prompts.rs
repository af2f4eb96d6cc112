/// Prompt Library Routes
///
/// CRUD for the caller's prompts and the test results recorded against
/// them. A prompt owned by someone else answers 404, never 403.

use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::configuration::LlmSettings;
use crate::credentials::Account;
use crate::error::{AppError, ErrorContext};
use crate::prompts::{NewPrompt, NewTestResult, PromptStore, PromptUpdate};
use crate::security::RateLimiters;
use crate::validators::{validate_new_prompt, validate_new_test_result, validate_prompt_update};

fn prompt_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("prompt {}", id))
}

async fn check_budget(
    limiters: &RateLimiters,
    account: &Account,
    context: &ErrorContext,
) -> Result<(), AppError> {
    limiters.user.check(&account.id.to_string()).await.map_err(|e| {
        context.log_error(&e);
        e
    })
}

/// POST /prompts
///
/// # Errors
/// - 400: Invalid title, content, tags or other field
/// - 401: Missing or invalid token
/// - 429: User request budget exhausted
pub async fn create_prompt(
    account: web::ReqData<Account>,
    body: web::Json<NewPrompt>,
    store: web::Data<dyn PromptStore>,
    limiters: web::Data<RateLimiters>,
    settings: web::Data<LlmSettings>,
) -> Result<HttpResponse, AppError> {
    let account = account.into_inner();
    let context = ErrorContext::new("create_prompt").with_user_id(account.id.to_string());
    check_budget(&limiters, &account, &context).await?;

    let prompt = body.into_inner();
    validate_new_prompt(&prompt, &settings)?;

    let prompt = store.create_prompt(account.id, prompt).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %account.id,
        prompt_id = %prompt.id,
        "Prompt created"
    );

    Ok(HttpResponse::Created().json(prompt))
}

/// GET /prompts
pub async fn list_prompts(
    account: web::ReqData<Account>,
    store: web::Data<dyn PromptStore>,
    limiters: web::Data<RateLimiters>,
) -> Result<HttpResponse, AppError> {
    let account = account.into_inner();
    let context = ErrorContext::new("list_prompts").with_user_id(account.id.to_string());
    check_budget(&limiters, &account, &context).await?;

    let prompts = store.list_prompts(account.id).await?;
    Ok(HttpResponse::Ok().json(prompts))
}

/// GET /prompts/{prompt_id}
pub async fn get_prompt(
    account: web::ReqData<Account>,
    path: web::Path<Uuid>,
    store: web::Data<dyn PromptStore>,
    limiters: web::Data<RateLimiters>,
) -> Result<HttpResponse, AppError> {
    let account = account.into_inner();
    let context = ErrorContext::new("get_prompt").with_user_id(account.id.to_string());
    check_budget(&limiters, &account, &context).await?;

    let id = path.into_inner();
    match store.get_prompt(account.id, id).await? {
        Some(prompt) => Ok(HttpResponse::Ok().json(prompt)),
        None => Err(prompt_not_found(id)),
    }
}

/// PUT /prompts/{prompt_id}
///
/// Partial update. `version` moves only when `content` or
/// `system_message` actually changes.
pub async fn update_prompt(
    account: web::ReqData<Account>,
    path: web::Path<Uuid>,
    body: web::Json<PromptUpdate>,
    store: web::Data<dyn PromptStore>,
    limiters: web::Data<RateLimiters>,
    settings: web::Data<LlmSettings>,
) -> Result<HttpResponse, AppError> {
    let account = account.into_inner();
    let context = ErrorContext::new("update_prompt").with_user_id(account.id.to_string());
    check_budget(&limiters, &account, &context).await?;

    let update = body.into_inner();
    validate_prompt_update(&update, &settings)?;

    let id = path.into_inner();
    match store.update_prompt(account.id, id, update).await? {
        Some(prompt) => {
            tracing::info!(
                request_id = %context.request_id,
                prompt_id = %prompt.id,
                version = prompt.version,
                "Prompt updated"
            );
            Ok(HttpResponse::Ok().json(prompt))
        }
        None => Err(prompt_not_found(id)),
    }
}

/// DELETE /prompts/{prompt_id}
///
/// Removes the prompt together with its test results.
pub async fn delete_prompt(
    account: web::ReqData<Account>,
    path: web::Path<Uuid>,
    store: web::Data<dyn PromptStore>,
    limiters: web::Data<RateLimiters>,
) -> Result<HttpResponse, AppError> {
    let account = account.into_inner();
    let context = ErrorContext::new("delete_prompt").with_user_id(account.id.to_string());
    check_budget(&limiters, &account, &context).await?;

    let id = path.into_inner();
    if !store.delete_prompt(account.id, id).await? {
        return Err(prompt_not_found(id));
    }

    tracing::info!(request_id = %context.request_id, prompt_id = %id, "Prompt deleted");
    Ok(HttpResponse::NoContent().finish())
}

/// POST /prompts/{prompt_id}/test-results
///
/// Records one run of the prompt. `total_tokens` is derived from the
/// input and output counts.
pub async fn create_test_result(
    account: web::ReqData<Account>,
    path: web::Path<Uuid>,
    body: web::Json<NewTestResult>,
    store: web::Data<dyn PromptStore>,
    limiters: web::Data<RateLimiters>,
    settings: web::Data<LlmSettings>,
) -> Result<HttpResponse, AppError> {
    let account = account.into_inner();
    let context = ErrorContext::new("create_test_result").with_user_id(account.id.to_string());
    check_budget(&limiters, &account, &context).await?;

    let result = body.into_inner();
    validate_new_test_result(&result, &settings)?;

    let prompt_id = path.into_inner();
    match store.add_test_result(account.id, prompt_id, result).await? {
        Some(saved) => Ok(HttpResponse::Created().json(saved)),
        None => Err(prompt_not_found(prompt_id)),
    }
}

/// GET /prompts/{prompt_id}/test-results
pub async fn list_test_results(
    account: web::ReqData<Account>,
    path: web::Path<Uuid>,
    store: web::Data<dyn PromptStore>,
    limiters: web::Data<RateLimiters>,
) -> Result<HttpResponse, AppError> {
    let account = account.into_inner();
    let context = ErrorContext::new("list_test_results").with_user_id(account.id.to_string());
    check_budget(&limiters, &account, &context).await?;

    let prompt_id = path.into_inner();
    match store.list_test_results(account.id, prompt_id).await? {
        Some(results) => Ok(HttpResponse::Ok().json(results)),
        None => Err(prompt_not_found(prompt_id)),
    }
}
