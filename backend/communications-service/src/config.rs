use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// What to do with a send whose trimmed text is empty and that has no files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyMessagePolicy {
    /// Drop silently: no row, no broadcast, no error
    #[default]
    Ignore,
    /// Fail the send with a validation error
    Reject,
}

impl FromStr for EmptyMessagePolicy {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "ignore" => Ok(Self::Ignore),
            "reject" => Ok(Self::Reject),
            other => Err(AppError::Config(format!(
                "EMPTY_MESSAGE_POLICY must be ignore or reject, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    /// Empty host puts the notifier in no-op mode
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from: "School Portal <no-reply@school.local>".to_string(),
            use_starttls: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub media_root: PathBuf,
    pub max_upload_bytes: usize,
    pub empty_message_policy: EmptyMessagePolicy,
    /// Base URL used for links in notification emails
    pub site_url: String,
    pub email: EmailSettings,
    pub log_json: bool,
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.len() < 32 {
            return Err(AppError::Config(
                "JWT_SECRET must be at least 32 bytes".into(),
            ));
        }

        let empty_message_policy = env::var("EMPTY_MESSAGE_POLICY")
            .unwrap_or_default()
            .parse()?;

        let email = EmailSettings {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: parsed("SMTP_PORT", 587),
            smtp_username: non_empty("SMTP_USERNAME"),
            smtp_password: non_empty("SMTP_PASSWORD"),
            smtp_from: non_empty("SMTP_FROM")
                .unwrap_or_else(|| EmailSettings::default().smtp_from),
            use_starttls: flag("SMTP_STARTTLS", true),
        };

        Ok(Self {
            database_url,
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 10),
            jwt_secret,
            port: parsed("PORT", 3000),
            redis_url: non_empty("REDIS_URL"),
            media_root: PathBuf::from(
                non_empty("MEDIA_ROOT").unwrap_or_else(|| "./media".to_string()),
            ),
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            empty_message_policy,
            site_url: non_empty("SITE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8000".to_string())
                .trim_end_matches('/')
                .to_string(),
            email,
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    /// Configuration for tests and local tooling; never reads the environment.
    pub fn test_defaults(media_root: PathBuf) -> Self {
        Self {
            database_url: String::new(),
            db_max_connections: 1,
            jwt_secret: "test-secret-key-min-32-chars-long!!!".to_string(),
            port: 0,
            redis_url: None,
            media_root,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            empty_message_policy: EmptyMessagePolicy::Ignore,
            site_url: "http://127.0.0.1:8000".to_string(),
            email: EmailSettings::default(),
            log_json: false,
        }
    }
}
