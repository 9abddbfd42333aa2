//! Configuration for the authentication core.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Password hashing configuration.
    #[serde(default)]
    pub password: PasswordConfig,
    /// One-time token configuration.
    #[serde(default)]
    pub tokens: TokenConfig,
    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// Outbound mail configuration.
    #[serde(default)]
    pub mail: MailConfig,
}

/// Password hashing configuration.
///
/// The defaults are the production parameters; they are deliberately heavy.
/// Changing them only affects digests created afterwards: verification
/// always replays the parameters recorded in the stored digest.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    /// Argon2 time cost (iterations).
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
    /// Argon2 memory cost in KiB.
    #[serde(default = "default_memory_cost")]
    pub memory_cost: u32,
    /// Argon2 parallelism factor.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Digest length in bytes, both algorithms.
    #[serde(default = "default_output_len")]
    pub output_len: usize,
    /// PBKDF2-SHA256 iteration count, legacy digests only.
    #[serde(default = "default_pbkdf2_rounds")]
    pub pbkdf2_rounds: u32,
    /// Upper bound on concurrently running hash computations.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

/// One-time token configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Random bytes per token; tokens render as twice as many hex chars.
    #[serde(default = "default_token_bytes")]
    pub token_bytes: usize,
    /// TTL for email-verification tokens in seconds.
    #[serde(default = "default_link_ttl")]
    pub verify_ttl_seconds: u64,
    /// TTL for password-reset tokens in seconds.
    #[serde(default = "default_link_ttl")]
    pub reset_ttl_seconds: u64,
    /// TTL for the reset-pending ticket between redeeming a reset link and
    /// submitting the new password, in seconds.
    #[serde(default = "default_reset_window")]
    pub reset_window_seconds: u64,
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session (and cookie) lifetime in seconds.
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: u64,
}

/// Outbound mail configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// SMTP relay host.
    #[serde(default = "default_mail_host")]
    pub host: String,
    /// SMTP relay port.
    #[serde(default = "default_mail_port")]
    pub port: u16,
    /// SMTP username, if the relay requires authentication.
    #[serde(default)]
    pub username: Option<String>,
    /// SMTP password, if the relay requires authentication.
    #[serde(default)]
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS.
    #[serde(default)]
    pub starttls: bool,
    /// Sender address for all outbound mail.
    #[serde(default = "default_mail_from")]
    pub from: String,
    /// Application name rendered into mail bodies.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Base URL that verification and reset links are built under.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

// Default value functions
const fn default_time_cost() -> u32 {
    40
}

const fn default_memory_cost() -> u32 {
    128_000
}

const fn default_parallelism() -> u32 {
    4
}

const fn default_output_len() -> usize {
    32
}

const fn default_pbkdf2_rounds() -> u32 {
    40_000
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_token_bytes() -> usize {
    20
}

const fn default_link_ttl() -> u64 {
    8 * 60 * 60
}

const fn default_reset_window() -> u64 {
    15 * 60
}

const fn default_session_ttl() -> u64 {
    86400 // 24 hours
}

fn default_mail_host() -> String {
    "localhost".to_string()
}

const fn default_mail_port() -> u16 {
    25
}

fn default_mail_from() -> String {
    "no-reply@localhost".to_string()
}

fn default_app_name() -> String {
    "Keygate".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080/auth".to_string()
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            time_cost: default_time_cost(),
            memory_cost: default_memory_cost(),
            parallelism: default_parallelism(),
            output_len: default_output_len(),
            pbkdf2_rounds: default_pbkdf2_rounds(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl PasswordConfig {
    /// Parameters light enough for unit tests and local tooling.
    #[must_use]
    pub fn insecure_fast() -> Self {
        Self {
            time_cost: 1,
            memory_cost: 1024,
            parallelism: 1,
            output_len: 32,
            pbkdf2_rounds: 1000,
            max_concurrency: 4,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            token_bytes: default_token_bytes(),
            verify_ttl_seconds: default_link_ttl(),
            reset_ttl_seconds: default_link_ttl(),
            reset_window_seconds: default_reset_window(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: default_mail_host(),
            port: default_mail_port(),
            username: None,
            password: None,
            starttls: false,
            from: default_mail_from(),
            app_name: default_app_name(),
            base_url: default_base_url(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from files and environment.
    ///
    /// `config/default.toml` and `config/local.toml` are merged first, then
    /// `KEYGATE_`-prefixed environment variables (`__` separates nesting,
    /// e.g. `KEYGATE_TOKENS__VERIFY_TTL_SECONDS=3600`).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"))
            .merge(Env::prefixed("KEYGATE_").split("__"))
            .extract()
            .map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.password.time_cost, 40);
        assert_eq!(config.password.memory_cost, 128_000);
        assert_eq!(config.password.parallelism, 4);
        assert_eq!(config.password.pbkdf2_rounds, 40_000);
        assert_eq!(config.tokens.token_bytes, 20);
        assert_eq!(config.tokens.verify_ttl_seconds, 8 * 60 * 60);
        assert_eq!(config.session.ttl_seconds, 86400);
        assert_eq!(config.mail.port, 25);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AuthConfig = Figment::new()
            .merge(Toml::string("[tokens]\nverify_ttl_seconds = 600\n"))
            .extract()
            .expect("valid config");
        assert_eq!(config.tokens.verify_ttl_seconds, 600);
        assert_eq!(config.tokens.reset_ttl_seconds, 8 * 60 * 60);
        assert_eq!(config.password.time_cost, 40);
    }
}
