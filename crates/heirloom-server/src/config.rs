//! Server configuration — parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use heirloom_core::CipherKey;
use heirloom_notify::SmtpConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// General server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Claim-code cipher key material
    pub security: SecuritySection,

    /// Escrow ledger bridge
    #[serde(default)]
    pub ledger: LedgerSection,

    /// Scheduler tuning
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Proof-of-life cadence
    #[serde(default)]
    pub proof_of_life: ProofOfLifeSection,

    /// Notification settings
    #[serde(default)]
    pub notifications: NotificationSection,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Data directory (SQLite DB)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Seconds between scheduling ticks (default: 5 minutes)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Worker identity written into plan lock rows
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            tick_interval_secs: default_tick_interval(),
            log_level: default_log_level(),
            worker_id: default_worker_id(),
        }
    }
}

/// Cipher key material. Either a raw 32-byte hex key or a passphrase
/// plus salt for Argon2id derivation; the hex key wins if both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecuritySection {
    pub cipher_key_hex: Option<String>,
    pub cipher_passphrase: Option<String>,
    pub cipher_salt: Option<String>,
}

/// Escrow ledger bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// "http" calls the bridge service; "dry_run" logs instead of calling
    #[serde(default = "default_ledger_mode")]
    pub mode: String,

    /// Bridge base URL (required in http mode)
    #[serde(default)]
    pub endpoint: String,

    /// Optional bearer token
    pub auth_token: Option<String>,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            mode: default_ledger_mode(),
            endpoint: String::new(),
            auth_token: None,
        }
    }
}

/// Scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_pass_deadline")]
    pub pass_deadline_secs: u64,

    #[serde(default = "default_notice_window")]
    pub notice_window_secs: i64,

    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: i64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            call_timeout_secs: default_call_timeout(),
            pass_deadline_secs: default_pass_deadline(),
            notice_window_secs: default_notice_window(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

/// Proof-of-life cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfLifeSection {
    /// Days between check-in prompts
    #[serde(default = "default_prompt_interval_days")]
    pub prompt_interval_days: u32,

    /// Missed check-ins before the failsafe engages
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
}

impl Default for ProofOfLifeSection {
    fn default() -> Self {
        Self {
            prompt_interval_days: default_prompt_interval_days(),
            fail_threshold: default_fail_threshold(),
        }
    }
}

/// Notification channel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSection {
    /// Email settings; without them the engine runs with a log-only
    /// notifier
    pub email: Option<SmtpConfig>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_tick_interval() -> u64 {
    300 // 5 minutes
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_id() -> String {
    "heirloom-worker-1".to_string()
}

fn default_ledger_mode() -> String {
    "dry_run".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_call_timeout() -> u64 {
    30
}

fn default_pass_deadline() -> u64 {
    300
}

fn default_notice_window() -> i64 {
    86_400
}

fn default_lock_ttl() -> i64 {
    300
}

fn default_prompt_interval_days() -> u32 {
    30
}

fn default_fail_threshold() -> u32 {
    3
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `HEIRLOOM_DATA_DIR`
    /// - `HEIRLOOM_TICK_INTERVAL`
    /// - `HEIRLOOM_LOG_LEVEL`
    /// - `HEIRLOOM_WORKER_ID`
    /// - `HEIRLOOM_CIPHER_KEY` (raw hex key)
    /// - `HEIRLOOM_LEDGER_MODE`
    /// - `HEIRLOOM_LEDGER_ENDPOINT`
    /// - `HEIRLOOM_LEDGER_TOKEN`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HEIRLOOM_DATA_DIR") {
            self.server.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HEIRLOOM_TICK_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                self.server.tick_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("HEIRLOOM_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("HEIRLOOM_WORKER_ID") {
            self.server.worker_id = v;
        }
        if let Ok(v) = std::env::var("HEIRLOOM_CIPHER_KEY") {
            self.security.cipher_key_hex = Some(v);
        }
        if let Ok(v) = std::env::var("HEIRLOOM_LEDGER_MODE") {
            self.ledger.mode = v;
        }
        if let Ok(v) = std::env::var("HEIRLOOM_LEDGER_ENDPOINT") {
            self.ledger.endpoint = v;
        }
        if let Ok(v) = std::env::var("HEIRLOOM_LEDGER_TOKEN") {
            self.ledger.auth_token = Some(v);
        }
    }

    /// Build the process-wide claim-code cipher key.
    pub fn cipher_key(&self) -> Result<CipherKey> {
        if let Some(ref hex_key) = self.security.cipher_key_hex {
            return CipherKey::from_hex(hex_key).context("invalid security.cipher_key_hex");
        }
        match (&self.security.cipher_passphrase, &self.security.cipher_salt) {
            (Some(passphrase), Some(salt)) => {
                CipherKey::from_passphrase(passphrase, salt.as_bytes())
                    .context("invalid passphrase/salt")
            }
            _ => anyhow::bail!(
                "security requires cipher_key_hex or cipher_passphrase + cipher_salt"
            ),
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.server.tick_interval_secs >= 60,
            "server.tick_interval_secs must be >= 60"
        );
        anyhow::ensure!(
            !self.server.worker_id.is_empty(),
            "server.worker_id must not be empty"
        );

        self.cipher_key().map(|_| ()).context("security section")?;

        match self.ledger.mode.as_str() {
            "dry_run" => {}
            "http" => {
                anyhow::ensure!(
                    !self.ledger.endpoint.is_empty(),
                    "ledger.endpoint is required in http mode"
                );
            }
            other => anyhow::bail!("ledger.mode must be \"http\" or \"dry_run\", got {other:?}"),
        }

        anyhow::ensure!(
            self.scheduler.max_attempts > 0,
            "scheduler.max_attempts must be > 0"
        );
        anyhow::ensure!(
            self.scheduler.lock_ttl_secs > self.scheduler.call_timeout_secs as i64,
            "scheduler.lock_ttl_secs must exceed scheduler.call_timeout_secs"
        );
        anyhow::ensure!(
            self.proof_of_life.prompt_interval_days > 0,
            "proof_of_life.prompt_interval_days must be > 0"
        );
        anyhow::ensure!(
            self.proof_of_life.fail_threshold > 0,
            "proof_of_life.fail_threshold must be > 0"
        );

        if let Some(ref email) = self.notifications.email {
            anyhow::ensure!(
                !email.smtp_host.is_empty(),
                "notifications.email.smtp_host must not be empty"
            );
            anyhow::ensure!(
                !email.from_address.is_empty(),
                "notifications.email.from_address must not be empty"
            );
            anyhow::ensure!(
                !email.operator_address.is_empty(),
                "notifications.email.operator_address must not be empty"
            );
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn minimal_toml() -> String {
        format!(
            r#"
[security]
cipher_key_hex = "{}"
"#,
            "ab".repeat(32)
        )
    }

    fn full_toml() -> String {
        format!(
            r#"
[server]
data_dir = "/custom/data"
tick_interval_secs = 120
log_level = "debug"
worker_id = "worker-7"

[security]
cipher_key_hex = "{}"

[ledger]
mode = "http"
endpoint = "https://bridge.example.com"
auth_token = "secret"

[scheduler]
max_attempts = 7
call_timeout_secs = 10
pass_deadline_secs = 60
notice_window_secs = 43200
lock_ttl_secs = 120

[proof_of_life]
prompt_interval_days = 14
fail_threshold = 2

[notifications.email]
enabled = true
smtp_host = "smtp.example.com"
smtp_port = 587
smtp_user = "user@example.com"
smtp_password = "secret"
from_address = "noreply@heirloom.dev"
operator_address = "ops@heirloom.dev"
check_in_url_base = "https://app.heirloom.dev/check-in"
"#,
            "ab".repeat(32)
        )
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn test_parse_minimal_config() {
        let file = write_config(&minimal_toml());
        let config = ServerConfig::from_file(file.path()).unwrap();

        assert_eq!(config.server.tick_interval_secs, 300); // default
        assert_eq!(config.ledger.mode, "dry_run"); // default
        assert!(config.notifications.email.is_none());
        assert!(config.validate().is_ok());
        assert!(config.cipher_key().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let file = write_config(&full_toml());
        let config = ServerConfig::from_file(file.path()).unwrap();

        assert_eq!(config.server.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.server.tick_interval_secs, 120);
        assert_eq!(config.server.worker_id, "worker-7");
        assert_eq!(config.ledger.mode, "http");
        assert_eq!(config.ledger.endpoint, "https://bridge.example.com");
        assert_eq!(config.scheduler.max_attempts, 7);
        assert_eq!(config.proof_of_life.fail_threshold, 2);

        let email = config.notifications.email.as_ref().unwrap();
        assert_eq!(email.smtp_host, "smtp.example.com");

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let file = write_config(&minimal_toml());
        let mut config = ServerConfig::from_file(file.path()).unwrap();

        std::env::set_var("HEIRLOOM_DATA_DIR", "/env/data");
        std::env::set_var("HEIRLOOM_TICK_INTERVAL", "900");
        std::env::set_var("HEIRLOOM_LEDGER_MODE", "http");
        std::env::set_var("HEIRLOOM_LEDGER_ENDPOINT", "https://env.example.com");

        config.apply_env_overrides();

        assert_eq!(config.server.data_dir, PathBuf::from("/env/data"));
        assert_eq!(config.server.tick_interval_secs, 900);
        assert_eq!(config.ledger.mode, "http");
        assert_eq!(config.ledger.endpoint, "https://env.example.com");

        std::env::remove_var("HEIRLOOM_DATA_DIR");
        std::env::remove_var("HEIRLOOM_TICK_INTERVAL");
        std::env::remove_var("HEIRLOOM_LEDGER_MODE");
        std::env::remove_var("HEIRLOOM_LEDGER_ENDPOINT");
    }

    #[test]
    fn test_validation_requires_key_material() {
        let file = write_config("[security]\n");
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_passphrase_key() {
        let file = write_config(
            r#"
[security]
cipher_passphrase = "correct horse"
cipher_salt = "heirloom-prod-salt"
"#,
        );
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.cipher_key().is_ok());
    }

    #[test]
    fn test_validation_http_mode_needs_endpoint() {
        let toml = format!("{}\n[ledger]\nmode = \"http\"\n", minimal_toml());
        let file = write_config(&toml);
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_tick_interval_too_low() {
        let toml = format!("[server]\ntick_interval_secs = 30\n{}", minimal_toml());
        let file = write_config(&toml);
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_lock_ttl_vs_timeout() {
        let toml = format!(
            "{}\n[scheduler]\ncall_timeout_secs = 120\nlock_ttl_secs = 60\n",
            minimal_toml()
        );
        let file = write_config(&toml);
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_ledger_mode_rejected() {
        let toml = format!("{}\n[ledger]\nmode = \"carrier-pigeon\"\n", minimal_toml());
        let file = write_config(&toml);
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let file = write_config(&full_toml());
        let config = ServerConfig::from_file(file.path()).unwrap();

        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: ServerConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.server.worker_id, config.server.worker_id);
        assert_eq!(reparsed.ledger.endpoint, config.ledger.endpoint);
    }
}
