use jsonwebtoken::Algorithm;

use crate::error::ConfigError;

/// Shortest signing secret accepted at startup.
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub llm: LlmSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
    pub security_headers: bool,
    pub log_level: String,
    /// Origins allowed to make credentialed cross-origin requests
    pub allowed_origins: Vec<String>,
}

impl ApplicationSettings {
    /// Origins must be explicit `http(s)://` origins; credentialed CORS
    /// cannot use a wildcard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for origin in &self.allowed_origins {
            let explicit = origin.starts_with("http://") || origin.starts_with("https://");
            if !explicit || origin.contains('*') {
                return Err(ConfigError::InvalidValue(format!(
                    "application.allowed_origins entry {} is not an explicit origin",
                    origin
                )));
            }
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT signing settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry: i64,  // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry: i64, // seconds (e.g., 604800 for 7 days)
}

impl JwtSettings {
    /// Checks the secret length, the algorithm and the TTL ordering.
    ///
    /// # Errors
    /// Returns the first violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        let actual = self.secret.chars().count();
        if actual < MIN_SECRET_LENGTH {
            return Err(ConfigError::SecretTooShort {
                min: MIN_SECRET_LENGTH,
                actual,
            });
        }

        self.signing_algorithm()?;

        if self.access_token_expiry <= 0 || self.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "jwt token expiries must be positive".to_string(),
            ));
        }
        if self.access_token_expiry > self.refresh_token_expiry {
            return Err(ConfigError::InvalidValue(
                "jwt.access_token_expiry must not exceed jwt.refresh_token_expiry".to_string(),
            ));
        }

        Ok(())
    }

    /// Parses `algorithm`, accepting only the symmetric HMAC family.
    pub fn signing_algorithm(&self) -> Result<Algorithm, ConfigError> {
        match self.algorithm.to_ascii_uppercase().as_str() {
            "HS256" => Ok(Algorithm::HS256),
            "HS384" => Ok(Algorithm::HS384),
            "HS512" => Ok(Algorithm::HS512),
            _ => Err(ConfigError::UnsupportedAlgorithm(self.algorithm.clone())),
        }
    }
}

/// Upstream LLM API settings
#[derive(serde::Deserialize, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
    pub default_model: String,
    pub max_prompt_length: usize,
    pub max_tokens_per_request: u32,
}

impl LlmSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api_key.starts_with("sk-or-") {
            return Err(ConfigError::InvalidValue(
                "llm.api_key must start with sk-or-".to_string(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "llm.timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct CacheSettings {
    pub default_ttl_seconds: u64,
    /// Redis is used when set; otherwise the cache lives in process memory
    pub redis_url: Option<String>,
    /// How often the in-process cache drops expired entries
    pub purge_interval_seconds: u64,
}

#[derive(serde::Deserialize, Clone)]
pub struct RateLimitSettings {
    /// Per client address, across every route
    pub global_requests: u64,
    pub global_window_seconds: u64,
    pub user_requests: u64,
    pub user_window_seconds: u64,
    pub llm_requests: u64,
    pub llm_window_seconds: u64,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.application.validate()?;
        self.jwt.validate()?;
        self.llm.validate()?;
        let limits = &self.rate_limit;
        if limits.global_window_seconds == 0
            || limits.user_window_seconds == 0
            || limits.llm_window_seconds == 0
        {
            return Err(ConfigError::InvalidValue(
                "rate limit windows must be positive".to_string(),
            ));
        }
        if self.cache.purge_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "cache.purge_interval_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads `configuration.yaml` (optional) and `APP_*` environment overrides,
/// then validates the result. `APP_JWT__SECRET` sets `jwt.secret`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("application.port", 8000)?
        .set_default("application.api_prefix", "/api/v1")?
        .set_default("application.security_headers", true)?
        .set_default("application.log_level", "info")?
        .set_default("application.allowed_origins", Vec::<String>::new())?
        .set_default("database.max_connections", 20)?
        .set_default("jwt.algorithm", "HS256")?
        .set_default("jwt.issuer", "prompt-engineering-app")?
        .set_default("jwt.audience", "prompt-engineering-users")?
        .set_default("jwt.access_token_expiry", 900)?
        .set_default("jwt.refresh_token_expiry", 604800)?
        .set_default("llm.base_url", "https://openrouter.ai/api/v1")?
        .set_default("llm.timeout_seconds", 60)?
        .set_default("llm.default_model", "openai/gpt-3.5-turbo")?
        .set_default("llm.max_prompt_length", 50000)?
        .set_default("llm.max_tokens_per_request", 4000)?
        .set_default("cache.default_ttl_seconds", 300)?
        .set_default("cache.purge_interval_seconds", 60)?
        .set_default("rate_limit.global_requests", 1000)?
        .set_default("rate_limit.global_window_seconds", 3600)?
        .set_default("rate_limit.user_requests", 100)?
        .set_default("rate_limit.user_window_seconds", 3600)?
        .set_default("rate_limit.llm_requests", 30)?
        .set_default("rate_limit.llm_window_seconds", 60)?
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings = settings.try_deserialize::<Settings>()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_settings() -> JwtSettings {
        JwtSettings {
            secret: "x".repeat(32),
            algorithm: "HS256".to_string(),
            issuer: "app".to_string(),
            audience: "users".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
        }
    }

    #[test]
    fn test_valid_jwt_settings() {
        assert!(jwt_settings().validate().is_ok());
    }

    #[test]
    fn test_short_secret_is_rejected() {
        let mut settings = jwt_settings();
        settings.secret = "x".repeat(31);

        match settings.validate() {
            Err(ConfigError::SecretTooShort { min, actual }) => {
                assert_eq!(min, 32);
                assert_eq!(actual, 31);
            }
            _ => panic!("Expected SecretTooShort"),
        }
    }

    #[test]
    fn test_asymmetric_algorithm_is_rejected() {
        let mut settings = jwt_settings();
        settings.algorithm = "RS256".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_algorithm_is_case_insensitive() {
        let mut settings = jwt_settings();
        settings.algorithm = "hs512".to_string();
        assert_eq!(settings.signing_algorithm().unwrap(), Algorithm::HS512);
    }

    #[test]
    fn test_access_ttl_longer_than_refresh_is_rejected() {
        let mut settings = jwt_settings();
        settings.access_token_expiry = settings.refresh_token_expiry + 1;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_wildcard_and_bare_origins_are_rejected() {
        let mut application = ApplicationSettings {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_prefix: "/api/v1".to_string(),
            security_headers: true,
            log_level: "info".to_string(),
            allowed_origins: vec!["https://app.example.com".to_string()],
        };
        assert!(application.validate().is_ok());

        for origin in ["*", "https://*.example.com", "app.example.com"] {
            application.allowed_origins = vec![origin.to_string()];
            assert!(application.validate().is_err(), "{} was accepted", origin);
        }
    }

    #[test]
    fn test_llm_api_key_prefix() {
        let mut llm = LlmSettings {
            base_url: "http://localhost".to_string(),
            api_key: "sk-or-test".to_string(),
            timeout_seconds: 60,
            default_model: "openai/gpt-3.5-turbo".to_string(),
            max_prompt_length: 50000,
            max_tokens_per_request: 4000,
        };
        assert!(llm.validate().is_ok());

        llm.api_key = "sk-test".to_string();
        assert!(llm.validate().is_err());
    }
}
