use std::str::FromStr;

use anyhow::Context;
use jsonwebtoken::Algorithm;

/// Upper bound on any configured token lifetime (ten years).
const MAX_TTL_MINUTES: i64 = 10 * 366 * 24 * 60;

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    /// TTL used when a caller does not pick one.
    pub ttl_minutes: i64,
    /// TTL of tokens handed out by login/register.
    pub session_ttl_minutes: i64,
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => database_url_from_parts()?,
        };

        let algorithm = parse_algorithm(
            &std::env::var("JWT_ALGORITHM").unwrap_or_else(|_| "HS256".into()),
        )?;

        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        anyhow::ensure!(!secret.trim().is_empty(), "JWT_SECRET must not be empty");

        let jwt = JwtConfig {
            secret,
            algorithm,
            ttl_minutes: env_minutes("JWT_TTL_MINUTES", 15)?,
            session_ttl_minutes: env_minutes("JWT_SESSION_TTL_MINUTES", 300)?,
        };
        Ok(Self { database_url, jwt })
    }
}

fn database_url_from_parts() -> anyhow::Result<String> {
    let user = std::env::var("POSTGRES_USER").context("DATABASE_URL or POSTGRES_USER must be set")?;
    let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();
    let host = std::env::var("POSTGRES_SERVER").unwrap_or_else(|_| "localhost".into());
    let port = std::env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".into());
    let db = std::env::var("POSTGRES_DB").context("POSTGRES_DB must be set")?;
    Ok(format!("postgres://{user}:{password}@{host}:{port}/{db}"))
}

fn env_minutes(key: &str, default: i64) -> anyhow::Result<i64> {
    parse_minutes(key, std::env::var(key).ok().as_deref(), default)
}

fn parse_minutes(key: &str, raw: Option<&str>, default: i64) -> anyhow::Result<i64> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let minutes: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of minutes, got {raw:?}"))?;
    anyhow::ensure!(
        (1..=MAX_TTL_MINUTES).contains(&minutes),
        "{key} must be between 1 and {MAX_TTL_MINUTES} minutes, got {minutes}"
    );
    Ok(minutes)
}

/// Tokens are signed with a shared secret, so only the HMAC family makes sense.
pub(crate) fn parse_algorithm(name: &str) -> anyhow::Result<Algorithm> {
    let alg = Algorithm::from_str(name.trim())
        .map_err(|e| anyhow::anyhow!("unknown JWT algorithm {name:?}: {e}"))?;
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(alg),
        other => anyhow::bail!("JWT algorithm {other:?} needs a key pair; use HS256, HS384 or HS512"),
    }
}
