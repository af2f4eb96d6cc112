mod auth;
mod health_check;
mod llm;
mod prompts;

pub use auth::{login, me, refresh_token};
pub use health_check::health_check;
pub use llm::{chat_completions, get_model, list_models};
pub use prompts::{
    create_prompt, create_test_result, delete_prompt, get_prompt, list_prompts,
    list_test_results, update_prompt,
};
