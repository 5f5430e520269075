use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;

fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/tether.db?mode=rwc".into(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_random_hex(64),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatConfig {
    /// Identity prefix reserved for synthetic (simulated) accounts.
    #[serde(default = "default_synthetic_prefix")]
    pub synthetic_prefix: String,
    #[serde(default = "default_cache_max_conversations")]
    pub cache_max_conversations: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            synthetic_prefix: default_synthetic_prefix(),
            cache_max_conversations: default_cache_max_conversations(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            let template = generate_config_template(&config);
            fs::write(path, &template)?;
            let _ = harden_secret_file_permissions(path);
            tracing::info!("Generated default config at '{}'", path);
            config
        };
        let _ = harden_secret_file_permissions(path);

        // Environment variable overrides
        if let Ok(value) = std::env::var("TETHER_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("TETHER_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("TETHER_DATABASE_MAX_CONNECTIONS") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.database.max_connections = parsed;
            }
        }
        if let Ok(value) = std::env::var("TETHER_JWT_SECRET") {
            config.auth.jwt_secret = value;
        }
        if let Ok(value) = std::env::var("TETHER_SYNTHETIC_PREFIX") {
            if !value.trim().is_empty() {
                config.chat.synthetic_prefix = value;
            }
        }
        if let Ok(value) = std::env::var("TETHER_CACHE_TTL_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.chat.cache_ttl_secs = parsed.max(1);
            }
        }

        validate_secret_configuration(&config)?;
        Ok(config)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Generate a cryptographically random hex string of the given length.
fn generate_random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..16u8);
            char::from(if idx < 10 {
                b'0' + idx
            } else {
                b'a' + idx - 10
            })
        })
        .collect()
}

fn default_max_connections() -> u32 {
    20
}
fn default_synthetic_prefix() -> String {
    "sim_".into()
}
fn default_cache_max_conversations() -> u64 {
    10_000
}
fn default_cache_ttl_secs() -> u64 {
    3_600
}

fn looks_like_placeholder_secret(secret: &str) -> bool {
    let normalized = secret.to_ascii_lowercase();
    if normalized.is_empty() {
        return true;
    }
    normalized.contains("change_me")
        || normalized.contains("replace_me")
        || normalized.contains("replace_with")
        || normalized.starts_with("example")
        || normalized == "devkey"
        || normalized == "devsecret"
        || normalized == "secret"
}

fn validate_secret_configuration(config: &Config) -> Result<()> {
    let jwt_secret = config.auth.jwt_secret.trim();
    if jwt_secret.len() < 32 || looks_like_placeholder_secret(jwt_secret) {
        anyhow::bail!(
            "Invalid auth.jwt_secret: use a strong random secret (at least 32 characters) and never leave placeholder values"
        );
    }
    Ok(())
}

/// Generate a commented config file template with the given values filled in.
fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Tether Server Configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"

[database]
# sqlite (default) or postgres, selected by URL scheme.
url = "{db_url}"
max_connections = {max_connections}

[auth]
jwt_secret = "{jwt_secret}"

[chat]
# Identity prefix reserved for synthetic accounts that auto-reply.
synthetic_prefix = "{synthetic_prefix}"
# Recent-message cache sizing.
cache_max_conversations = {cache_max_conversations}
cache_ttl_secs = {cache_ttl_secs}
"#,
        bind_address = config.server.bind_address,
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        jwt_secret = config.auth.jwt_secret,
        synthetic_prefix = config.chat.synthetic_prefix,
        cache_max_conversations = config.chat.cache_max_conversations,
        cache_ttl_secs = config.chat.cache_ttl_secs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_defaults_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("tether-test.toml");
        let path = config_path.to_str().expect("config path utf8");

        let first = Config::load(path).expect("generate config");
        assert_eq!(first.auth.jwt_secret.len(), 64);
        assert_eq!(first.chat.synthetic_prefix, "sim_");

        // Second load reads the file written by the first.
        let second = Config::load(path).expect("reload config");
        assert_eq!(second.auth.jwt_secret, first.auth.jwt_secret);
        assert_eq!(second.server.bind_address, first.server.bind_address);
    }

    #[test]
    fn short_secret_is_rejected() {
        let config = Config {
            auth: AuthConfig {
                jwt_secret: "tooshort".into(),
            },
            ..Config::default()
        };
        assert!(validate_secret_configuration(&config).is_err());
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        let config = Config {
            auth: AuthConfig {
                jwt_secret: "change_me_change_me_change_me_change_me".into(),
            },
            ..Config::default()
        };
        assert!(validate_secret_configuration(&config).is_err());
    }
}
