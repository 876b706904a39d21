use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{Context, bail};
use tracing::{info, warn};

const DEV_SECRET_KEY: &str = "folio-dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub secret_key: String,
    pub bind_addr: String,
    pub upload_dir: PathBuf,
    pub token_ttl_hours: i64,
    pub admin_username: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let secret_key = resolve_secret(&environment, env::var("SECRET_KEY").ok())?;

        Ok(Self {
            database_url: try_load("DATABASE_URL", "sqlite://folio.db")?,
            secret_key,
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:8000")?,
            upload_dir: PathBuf::from(try_load::<String>("UPLOAD_DIR", "uploads")?),
            token_ttl_hours: try_load("TOKEN_TTL_HOURS", "24")?,
            admin_username: env::var("ADMIN_USERNAME")
                .ok()
                .filter(|name| !name.trim().is_empty()),
            environment,
        })
    }

    /// Configuration for in-process tests: in-memory database, temp uploads.
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            secret_key: "test-secret".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            upload_dir: env::temp_dir().join(format!("folio-uploads-{}", uuid::Uuid::new_v4())),
            token_ttl_hours: 1,
            admin_username: None,
            environment: "test".to_string(),
        }
    }
}

/// Production refuses to start without a real signing secret.
fn resolve_secret(environment: &str, secret: Option<String>) -> anyhow::Result<String> {
    match secret {
        Some(secret) if !secret.trim().is_empty() => Ok(secret),
        _ if environment == "production" => {
            bail!("SECRET_KEY must be set when APP_ENV=production")
        }
        _ => {
            warn!("SECRET_KEY not set, using the development default");
            Ok(DEV_SECRET_KEY.to_string())
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    match raw.parse() {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Invalid {key} value ({e}), using default: {default}");
            default
                .parse()
                .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
                .with_context(|| format!("default for {key} does not parse"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_load_falls_back_on_unparsable_value() {
        // SAFETY: the key is unique to this test.
        unsafe { env::set_var("FOLIO_TEST_TTL", "not-a-number") };
        let ttl: i64 = try_load("FOLIO_TEST_TTL", "24").unwrap();
        assert_eq!(ttl, 24);
    }

    #[test]
    fn try_load_uses_default_when_missing() {
        let addr: String = try_load("FOLIO_TEST_MISSING_ADDR", "0.0.0.0:8000").unwrap();
        assert_eq!(addr, "0.0.0.0:8000");
    }

    #[test]
    fn try_load_reports_unparsable_default() {
        let err = try_load::<i64>("FOLIO_TEST_MISSING_PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("FOLIO_TEST_MISSING_PORT"));
    }

    #[test]
    fn production_requires_a_secret() {
        let err = resolve_secret("production", None).unwrap_err();
        assert!(err.to_string().contains("SECRET_KEY"));
        assert!(resolve_secret("production", Some("   ".into())).is_err());

        assert_eq!(resolve_secret("production", Some("s3cret".into())).unwrap(), "s3cret");
        assert_eq!(resolve_secret("development", None).unwrap(), DEV_SECRET_KEY);
    }
}
