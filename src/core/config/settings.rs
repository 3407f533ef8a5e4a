use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_concurrency, parse_cors_origins,
    parse_environment, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    AiSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings, EmailSettings,
    RuntimeSettings, SecuritySettings, ServerHost, ServerPort, ServerSettings, Settings,
    TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAMGRADE_HOST", "0.0.0.0");
        let port = env_or_default("EXAMGRADE_PORT", "8000");

        let environment = parse_environment(
            env_optional("EXAMGRADE_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("EXAMGRADE_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Examgrade API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let secret_key = env_or_default("SECRET_KEY", "examgrade-dev-secret");
        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "10080"),
        )?;

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "examgrade");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "examgrade_db");
        let database_url = env_optional("DATABASE_URL");

        let ai_api_key = env_or_default("OPENAI_API_KEY", "");
        let ai_base_url = env_or_default("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let ai_model = env_or_default("OPENAI_MODEL", "gpt-5-mini-2025-08-07");
        let ai_max_tokens =
            parse_u32("OPENAI_MAX_TOKENS", env_or_default("OPENAI_MAX_TOKENS", "1500"))?;
        let ai_request_timeout_seconds = parse_u64(
            "OPENAI_TIMEOUT_SECONDS",
            env_or_default("OPENAI_TIMEOUT_SECONDS", "45"),
        )?;
        let ai_retry_attempts =
            parse_u32("OPENAI_RETRY_ATTEMPTS", env_or_default("OPENAI_RETRY_ATTEMPTS", "1"))?;
        let answer_concurrency = parse_concurrency(
            "AI_ANSWER_CONCURRENCY",
            env_or_default("AI_ANSWER_CONCURRENCY", "8"),
        )?;
        let submission_concurrency = parse_concurrency(
            "AI_SUBMISSION_CONCURRENCY",
            env_or_default("AI_SUBMISSION_CONCURRENCY", "25"),
        )?;

        let email_api_key = env_or_default("RESEND_API_KEY", "");
        let email_base_url = env_or_default("RESEND_BASE_URL", "https://api.resend.com");
        let email_from_address = env_or_default(
            "EMAIL_FROM_ADDRESS",
            "Examgrade <noreply@examgrade.app>",
        );
        let email_send_concurrency = parse_concurrency(
            "EMAIL_SEND_CONCURRENCY",
            env_or_default("EMAIL_SEND_CONCURRENCY", "4"),
        )?;

        let log_level = env_or_default("EXAMGRADE_LOG_LEVEL", "info");
        let json = env_optional("EXAMGRADE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, access_token_expire_minutes },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            ai: AiSettings {
                api_key: ai_api_key,
                base_url: ai_base_url,
                model: ai_model,
                max_tokens: ai_max_tokens,
                request_timeout_seconds: ai_request_timeout_seconds,
                retry_attempts: ai_retry_attempts,
                answer_concurrency,
                submission_concurrency,
            },
            email: EmailSettings {
                api_key: email_api_key,
                base_url: email_base_url,
                from_address: email_from_address,
                send_concurrency: email_send_concurrency,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn ai(&self) -> &AiSettings {
        &self.ai
    }

    pub(crate) fn email(&self) -> &EmailSettings {
        &self.email
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.security.secret_key == "examgrade-dev-secret" {
            return Err(ConfigError::MissingSecret("SECRET_KEY"));
        }
        if self.email.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("RESEND_API_KEY"));
        }

        // OPENAI_API_KEY is deliberately not required here: grading jobs
        // prefer the exam owner's stored key and fail the job with a
        // MISSING_API_KEY code when neither is configured.
        Ok(())
    }
}
