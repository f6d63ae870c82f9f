//! Process configuration loaded from the environment
//!
//! `.env` is loaded by `main` through dotenvy before `Config::from_env()` runs.

use std::path::PathBuf;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Deployment flavour, selected by `APP_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Testing,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "default" => Some(Environment::Development),
            "production" => Some(Environment::Production),
            "testing" => Some(Environment::Testing),
            _ => None,
        }
    }

    /// Allowed CORS origins; `None` means any origin
    pub fn cors_origins(&self) -> Option<Vec<String>> {
        match self {
            Environment::Development | Environment::Testing => None,
            Environment::Production => Some(vec![
                "http://clearcall-frontend.s3-website.us-east-2.amazonaws.com".to_string(),
                "https://clearcall-frontend.s3-website.us-east-2.amazonaws.com".to_string(),
            ]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// Full `DATABASE_URL`, overrides the individual parts when set
    pub url: Option<String>,
    /// Force a `_test` database name, including one taken from `url`
    pub test_database: bool,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let Some(url) = &self.url else {
            let options = PgConnectOptions::new()
                .host(&self.host)
                .port(self.port)
                .username(&self.user)
                .database(&self.name);
            return Ok(match self.password.as_str() {
                "" => options,
                password => options.password(password),
            });
        };

        // The URL may carry a password, keep it out of the error
        let options: PgConnectOptions = url.parse().map_err(|_| ConfigError::Invalid {
            name: "DATABASE_URL",
            value: "unparseable connection string".to_string(),
        })?;

        let name = options.get_database().map(str::to_string);
        Ok(match name {
            Some(name) if self.test_database && !name.ends_with("_test") => {
                options.database(&format!("{}_test", name))
            }
            _ => options,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
    pub sync_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub port: u16,
    pub database: DatabaseConfig,
    pub jwt_secret: String,
    pub aws: AwsConfig,
    pub openai_api_key: String,
    pub openai_chat_model: String,
    pub anthropic_api_key: String,
    pub twilio: TwilioConfig,
    pub retry_max_attempts: u32,
    pub retry_initial_delay: Duration,
    pub scratch_dir: PathBuf,
}

/// Variables the service cannot run correctly without, by category
const REQUIRED_VARS: &[(&str, &[&str])] = &[
    ("JWT", &["JWT_SECRET_KEY"]),
    ("Database", &["DB_HOST", "DB_USER", "DB_PASSWORD", "DB_NAME", "DB_PORT"]),
    ("AWS", &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_BUCKET_NAME", "AWS_REGION"]),
    ("OpenAI", &["OPENAI_API_KEY"]),
    ("Twilio", &["TWILIO_ACCOUNT_SID", "TWILIO_AUTH_TOKEN", "TWILIO_PHONE_NUMBER"]),
];

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let environment = match lookup("APP_ENV") {
            Some(value) => Environment::parse(&value).ok_or(ConfigError::Invalid {
                name: "APP_ENV",
                value,
            })?,
            None => Environment::Development,
        };

        let port = parse_var(&lookup, "PORT", 5000u16)?;
        let db_port = parse_var(&lookup, "DB_PORT", 5432u16)?;

        let mut db_name = var("DB_NAME", "clearcall");
        if environment == Environment::Testing && !db_name.ends_with("_test") {
            db_name.push_str("_test");
        }

        let jwt_secret = match lookup("JWT_SECRET_KEY") {
            Some(secret) => secret,
            None if environment == Environment::Production => {
                return Err(ConfigError::Missing("JWT_SECRET_KEY"));
            }
            None => "default_secret_key".to_string(),
        };

        let sync_secs: u64 = parse_var(&lookup, "TWILIO_SYNC_INTERVAL_SECS", 0u64)?;
        let retry_delay_ms: u64 = parse_var(&lookup, "RETRY_INITIAL_DELAY_MS", 1000u64)?;

        Ok(Self {
            environment,
            port,
            database: DatabaseConfig {
                host: var("DB_HOST", "localhost"),
                port: db_port,
                user: var("DB_USER", "postgres"),
                password: var("DB_PASSWORD", ""),
                name: db_name,
                url: lookup("DATABASE_URL"),
                test_database: environment == Environment::Testing,
            },
            jwt_secret,
            aws: AwsConfig {
                access_key_id: var("AWS_ACCESS_KEY_ID", ""),
                secret_access_key: var("AWS_SECRET_ACCESS_KEY", ""),
                bucket: var("AWS_BUCKET_NAME", "one-piece-store"),
                region: var("AWS_REGION", "us-east-2"),
                endpoint_url: lookup("AWS_ENDPOINT_URL"),
            },
            openai_api_key: var("OPENAI_API_KEY", ""),
            openai_chat_model: var("OPENAI_CHAT_MODEL", "gpt-4o-mini"),
            anthropic_api_key: var("ANTHROPIC_API_KEY", ""),
            twilio: TwilioConfig {
                account_sid: var("TWILIO_ACCOUNT_SID", ""),
                auth_token: var("TWILIO_AUTH_TOKEN", ""),
                phone_number: var("TWILIO_PHONE_NUMBER", ""),
                sync_interval: (sync_secs > 0).then(|| Duration::from_secs(sync_secs)),
            },
            retry_max_attempts: parse_var(&lookup, "RETRY_MAX_ATTEMPTS", 3u32)?,
            retry_initial_delay: Duration::from_millis(retry_delay_ms),
            scratch_dir: lookup("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        })
    }

    /// Required variables that are unset, grouped by category
    pub fn missing_vars<F>(lookup: F) -> Vec<(&'static str, Vec<&'static str>)>
    where
        F: Fn(&str) -> Option<String>,
    {
        REQUIRED_VARS
            .iter()
            .filter_map(|(category, names)| {
                let missing: Vec<&'static str> = names
                    .iter()
                    .copied()
                    .filter(|name| lookup(name).map_or(true, |v| v.is_empty()))
                    .collect();
                (!missing.is_empty()).then_some((*category, missing))
            })
            .collect()
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.port, 5000);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_initial_delay, Duration::from_secs(1));
        assert_eq!(config.aws.bucket, "one-piece-store");
        assert_eq!(config.aws.region, "us-east-2");
        assert!(config.twilio.sync_interval.is_none());

        let options = config.database.connect_options().unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "postgres");
        assert_eq!(options.get_database(), Some("clearcall"));
    }

    #[test]
    fn test_testing_env_uses_test_database() {
        let config = Config::from_lookup(lookup_from(&[("APP_ENV", "testing")])).unwrap();
        assert_eq!(config.database.name, "clearcall_test");

        let config = Config::from_lookup(lookup_from(&[
            ("APP_ENV", "testing"),
            ("DATABASE_URL", "postgres://x@db/y"),
        ]))
        .unwrap();
        let options = config.database.connect_options().unwrap();
        assert_eq!(options.get_database(), Some("y_test"));
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        let result = Config::from_lookup(lookup_from(&[("APP_ENV", "production")]));
        assert!(matches!(result, Err(ConfigError::Missing("JWT_SECRET_KEY"))));

        let config = Config::from_lookup(lookup_from(&[
            ("APP_ENV", "production"),
            ("JWT_SECRET_KEY", "s3cret"),
        ]))
        .unwrap();
        assert!(config.environment.cors_origins().is_some());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let result = Config::from_lookup(lookup_from(&[("RETRY_MAX_ATTEMPTS", "many")]));
        assert!(matches!(result, Err(ConfigError::Invalid { name: "RETRY_MAX_ATTEMPTS", .. })));
    }

    #[test]
    fn test_database_url_overrides_parts() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://app:p%40ss%2Fw%3Ard@db:5433/y"),
            ("DB_HOST", "ignored"),
        ]))
        .unwrap();
        let options = config.database.connect_options().unwrap();
        assert_eq!(options.get_host(), "db");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("y"));
    }

    #[test]
    fn test_password_with_url_delimiters_is_accepted() {
        let config = Config::from_lookup(lookup_from(&[
            ("DB_HOST", "db.internal"),
            ("DB_USER", "app"),
            ("DB_PASSWORD", "p@ss/w:rd"),
        ]))
        .unwrap();
        let options = config.database.connect_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_username(), "app");
    }

    #[test]
    fn test_unparseable_database_url_hides_value() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://u:secret@[bad/d")])).unwrap();
        let err = config.database.connect_options().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DATABASE_URL", .. }));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn test_missing_vars_grouped() {
        let missing = Config::missing_vars(lookup_from(&[
            ("JWT_SECRET_KEY", "s"),
            ("OPENAI_API_KEY", "k"),
            ("TWILIO_ACCOUNT_SID", ""),
        ]));

        let categories: Vec<&str> = missing.iter().map(|(c, _)| *c).collect();
        assert_eq!(categories, vec!["Database", "AWS", "Twilio"]);

        let twilio = &missing[2].1;
        assert!(twilio.contains(&"TWILIO_ACCOUNT_SID"));
        assert_eq!(twilio.len(), 3);
    }
}
