// Environment configuration.
//
// `validate_env` works on a plain map so it can be tested without touching the
// process environment. `AppConfig::from_env` is the thin wrapper main uses.

use std::collections::HashMap;
use std::env;

use crate::core::errors::{BotError, BotResult};

const DEFAULT_PORT: u16 = 3000;
const MIN_ENCRYPTION_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubAppConfig {
    pub app_id: u64,
    /// PEM encoded RSA key.
    pub private_key: String,
    pub installation_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistConfig {
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub branch: String,
    pub public_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudflareConfig {
    pub zone_id: String,
    pub api_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrchatConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiShockConfig {
    pub username: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub database_url: String,
    pub port: u16,
    pub bot_owner_id: Option<u64>,
    pub encryption_key: Option<String>,
    pub dev_guild_id: Option<u64>,
    pub github_app: Option<GithubAppConfig>,
    pub whitelist: Option<WhitelistConfig>,
    pub cloudflare: Option<CloudflareConfig>,
    pub vrchat: Option<VrchatConfig>,
    pub pishock: Option<PiShockConfig>,
}

impl AppConfig {
    pub fn from_env() -> BotResult<Self> {
        dotenv::dotenv().ok();
        let vars: HashMap<String, String> = env::vars().collect();
        validate_env(&vars)
    }
}

/// Validate and parse the bot configuration.
pub fn validate_env(vars: &HashMap<String, String>) -> BotResult<AppConfig> {
    let get = |key: &str| {
        vars.get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let bot_token = get("BOT_TOKEN").ok_or_else(|| missing("BOT_TOKEN"))?;
    let database_url = get("DATABASE_URL").ok_or_else(|| missing("DATABASE_URL"))?;
    check_database_url(&database_url)?;

    let port = match get("PORT") {
        Some(raw) => raw
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| invalid("INVALID_PORT", "PORT", &raw))?,
        None => DEFAULT_PORT,
    };

    let bot_owner_id = parse_id(get("BOT_OWNER_ID"), "BOT_OWNER_ID")?;
    let dev_guild_id = parse_id(get("DEV_GUILD_ID"), "DEV_GUILD_ID")?;

    let encryption_key = get("ENCRYPTION_KEY");
    if let Some(key) = &encryption_key {
        if key.len() < MIN_ENCRYPTION_KEY_LEN {
            return Err(BotError::config(
                "WEAK_ENCRYPTION_KEY",
                format!(
                    "ENCRYPTION_KEY must be at least {} characters",
                    MIN_ENCRYPTION_KEY_LEN
                ),
            ));
        }
    }

    let github_app = match group(
        &get,
        &[
            "GITHUB_APP_ID",
            "GITHUB_APP_PRIVATE_KEY",
            "GITHUB_APP_INSTALLATION_ID",
        ],
    )? {
        Some(v) => Some(GithubAppConfig {
            app_id: parse_number(&v[0], "GITHUB_APP_ID")?,
            // Keys pasted into .env files usually carry escaped newlines
            private_key: v[1].replace("\\n", "\n"),
            installation_id: parse_number(&v[2], "GITHUB_APP_INSTALLATION_ID")?,
        }),
        None => None,
    };

    let whitelist = match group(
        &get,
        &[
            "WHITELIST_REPO",
            "WHITELIST_PATH",
            "WHITELIST_BRANCH",
            "WHITELIST_PUBLIC_URL",
        ],
    )? {
        Some(v) => {
            let (owner, repo) = v[0]
                .split_once('/')
                .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
                .ok_or_else(|| invalid("INVALID_WHITELIST_REPO", "WHITELIST_REPO", &v[0]))?;
            url::Url::parse(&v[3])
                .map_err(|_| invalid("INVALID_WHITELIST_URL", "WHITELIST_PUBLIC_URL", &v[3]))?;
            Some(WhitelistConfig {
                owner: owner.to_string(),
                repo: repo.to_string(),
                path: v[1].trim_start_matches('/').to_string(),
                branch: v[2].clone(),
                public_url: v[3].clone(),
            })
        }
        None => None,
    };

    if whitelist.is_some() && github_app.is_none() {
        return Err(BotError::config(
            "INCOMPLETE_GROUP",
            "WHITELIST_* needs the GITHUB_APP_* variables to publish",
        ));
    }

    let cloudflare = group(&get, &["CLOUDFLARE_ZONE_ID", "CLOUDFLARE_API_TOKEN"])?.map(|v| {
        CloudflareConfig {
            zone_id: v[0].clone(),
            api_token: v[1].clone(),
        }
    });

    let vrchat = group(&get, &["VRCHAT_USERNAME", "VRCHAT_PASSWORD"])?.map(|v| VrchatConfig {
        username: v[0].clone(),
        password: v[1].clone(),
    });

    let pishock = group(&get, &["PISHOCK_USERNAME", "PISHOCK_API_KEY"])?.map(|v| PiShockConfig {
        username: v[0].clone(),
        api_key: v[1].clone(),
    });

    Ok(AppConfig {
        bot_token,
        database_url,
        port,
        bot_owner_id,
        encryption_key,
        dev_guild_id,
        github_app,
        whitelist,
        cloudflare,
        vrchat,
        pishock,
    })
}

/// All of `keys` or none of them.
fn group<F>(get: &F, keys: &[&str]) -> BotResult<Option<Vec<String>>>
where
    F: Fn(&str) -> Option<String>,
{
    let values: Vec<Option<String>> = keys.iter().map(|k| get(k)).collect();
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    let missing: Vec<&str> = keys
        .iter()
        .zip(&values)
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| *k)
        .collect();
    if !missing.is_empty() {
        return Err(BotError::config(
            "INCOMPLETE_GROUP",
            format!("Set all of {} or none of them", keys.join(", ")),
        )
        .with_context("missing", missing.join(",")));
    }
    Ok(Some(values.into_iter().flatten().collect()))
}

fn check_database_url(raw: &str) -> BotResult<()> {
    let parsed = url::Url::parse(raw).map_err(|e| {
        BotError::config("INVALID_DATABASE_URL", "DATABASE_URL is not a valid URL")
            .with_context("reason", e)
    })?;
    if parsed.scheme() != "sqlite" {
        return Err(BotError::config(
            "INVALID_DATABASE_URL",
            format!(
                "DATABASE_URL must use the sqlite scheme, got `{}`",
                parsed.scheme()
            ),
        ));
    }
    Ok(())
}

fn parse_id(value: Option<String>, key: &'static str) -> BotResult<Option<u64>> {
    value.map(|v| parse_number(&v, key)).transpose()
}

fn parse_number(value: &str, key: &'static str) -> BotResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| invalid("INVALID_NUMBER", key, value))
}

fn missing(key: &str) -> BotError {
    BotError::config("MISSING_ENV", format!("{} must be set", key))
}

fn invalid(code: &'static str, key: &str, value: &str) -> BotError {
    BotError::config(code, format!("{} has an invalid value", key)).with_context("value", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;

    fn base() -> HashMap<String, String> {
        HashMap::from([
            ("BOT_TOKEN".to_string(), "token".to_string()),
            ("DATABASE_URL".to_string(), "sqlite://data/shield.db".to_string()),
        ])
    }

    fn with(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut vars = base();
        for (k, v) in pairs {
            vars.insert(k.to_string(), v.to_string());
        }
        vars
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = validate_env(&base()).unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.github_app.is_none());
        assert!(config.vrchat.is_none());
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn test_missing_bot_token() {
        let mut vars = base();
        vars.remove("BOT_TOKEN");
        let err = validate_env(&vars).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
        assert_eq!(err.code, "MISSING_ENV");

        let err = validate_env(&with(&[("BOT_TOKEN", "   ")])).unwrap_err();
        assert_eq!(err.code, "MISSING_ENV");
    }

    #[test]
    fn test_malformed_database_url() {
        for bad in ["not a url", "postgres://localhost/db"] {
            let err = validate_env(&with(&[("DATABASE_URL", bad)])).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Config);
            assert_eq!(err.code, "INVALID_DATABASE_URL", "{}", bad);
        }
        assert!(validate_env(&with(&[("DATABASE_URL", "sqlite::memory:")])).is_ok());
    }

    #[test]
    fn test_port_and_ids() {
        assert_eq!(validate_env(&with(&[("PORT", "8080")])).unwrap().port, 8080);
        assert_eq!(
            validate_env(&with(&[("PORT", "eighty")])).unwrap_err().code,
            "INVALID_PORT"
        );
        assert_eq!(
            validate_env(&with(&[("BOT_OWNER_ID", "123")]))
                .unwrap()
                .bot_owner_id,
            Some(123)
        );
    }

    #[test]
    fn test_partial_group_is_rejected() {
        let err = validate_env(&with(&[("VRCHAT_USERNAME", "bot")])).unwrap_err();
        assert_eq!(err.code, "INCOMPLETE_GROUP");
        assert!(err
            .context
            .iter()
            .any(|(k, v)| *k == "missing" && v == "VRCHAT_PASSWORD"));
    }

    #[test]
    fn test_whitelist_group() {
        let vars = with(&[
            ("GITHUB_APP_ID", "42"),
            ("GITHUB_APP_PRIVATE_KEY", "-----BEGIN-----\\nabc"),
            ("GITHUB_APP_INSTALLATION_ID", "7"),
            ("WHITELIST_REPO", "shield/whitelist"),
            ("WHITELIST_PATH", "/lists/agents.txt"),
            ("WHITELIST_BRANCH", "main"),
            ("WHITELIST_PUBLIC_URL", "https://cdn.example.com/agents.txt"),
        ]);
        let config = validate_env(&vars).unwrap();
        let whitelist = config.whitelist.unwrap();
        assert_eq!(whitelist.owner, "shield");
        assert_eq!(whitelist.path, "lists/agents.txt");
        assert!(config.github_app.unwrap().private_key.contains('\n'));

        let mut bad = vars.clone();
        bad.insert("WHITELIST_REPO".into(), "no-slash".into());
        assert_eq!(validate_env(&bad).unwrap_err().code, "INVALID_WHITELIST_REPO");
    }

    #[test]
    fn test_short_encryption_key() {
        let err = validate_env(&with(&[("ENCRYPTION_KEY", "short")])).unwrap_err();
        assert_eq!(err.code, "WEAK_ENCRYPTION_KEY");
    }
}
