use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
    pub cookie_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub from_address: String,
    pub from_name: String,
    /// No host means emails are only logged.
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    /// Without a database url the in-memory document store is used.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
    pub stripe: StripeConfig,
    pub public_dir: PathBuf,
    /// Requests per hour and client on `/api`; zero disables the limiter.
    pub rate_limit_per_hour: u32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::parse(&env_or("APP_ENV", "development"));
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60 * 24 * 90),
            cookie_ttl_days: env_parse("JWT_COOKIE_EXPIRES_IN_DAYS", 90),
        };
        let mail = MailConfig {
            from_address: env_or("EMAIL_FROM", "hello@natours.io"),
            from_name: env_or("EMAIL_FROM_NAME", "Natours"),
            host: std::env::var("EMAIL_HOST").ok().filter(|v| !v.is_empty()),
            port: env_parse("EMAIL_PORT", 587),
            username: std::env::var("EMAIL_USERNAME").ok(),
            password: std::env::var("EMAIL_PASSWORD").ok(),
        };
        let stripe = StripeConfig {
            secret_key: std::env::var("STRIPE_SECRET_KEY").ok().filter(|v| !v.is_empty()),
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
        };
        Ok(Self {
            environment,
            host: env_or("APP_HOST", "0.0.0.0"),
            port: env_parse("APP_PORT", 8080),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            jwt,
            mail,
            stripe,
            public_dir: PathBuf::from(env_or("PUBLIC_DIR", "public")),
            rate_limit_per_hour: env_parse("RATE_LIMIT_PER_HOUR", 100),
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
