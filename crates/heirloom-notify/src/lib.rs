//! Heirloom notification channel.
//!
//! Implements the engine's [`Notifier`] trait over SMTP: claim-code
//! delivery when a claim window opens, owner check-in prompts, upcoming
//! and executed distribution notices, and operator alerts. Deployments
//! without SMTP configured fall back to [`LogNotifier`], which records
//! everything to the log and delivers nothing.

mod config;
pub mod smtp;
pub mod templates;

pub use config::SmtpConfig;
pub use templates::NotificationMessage;

use async_trait::async_trait;
use heirloom_engine::{ExternalError, Notifier};
use thiserror::Error;

/// Errors from notification operations
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("email send failed: {0}")]
    EmailFailed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<NotifyError> for ExternalError {
    fn from(e: NotifyError) -> Self {
        ExternalError::Unavailable(e.to_string())
    }
}

/// SMTP-backed notifier.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        if !config.enabled {
            return Err(NotifyError::Config("email channel is disabled".into()));
        }
        if config.from_address.is_empty() || config.smtp_host.is_empty() {
            return Err(NotifyError::Config(
                "smtp_host and from_address are required".into(),
            ));
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_claim_code(
        &self,
        email: &str,
        plan_name: &str,
        code: &str,
    ) -> Result<(), ExternalError> {
        let message = templates::claim_code_message(plan_name, code);
        smtp::send_to_recipient(&self.config, email, &message)
            .await
            .map_err(Into::into)
    }

    async fn send_check_in_prompt(
        &self,
        email: &str,
        plan_name: &str,
        token: &str,
    ) -> Result<(), ExternalError> {
        let message =
            templates::check_in_prompt_message(plan_name, &self.config.check_in_url_base, token);
        smtp::send_to_recipient(&self.config, email, &message)
            .await
            .map_err(Into::into)
    }

    async fn send_distribution_notice(
        &self,
        email: &str,
        plan_name: &str,
        period_number: u32,
        units: u64,
    ) -> Result<(), ExternalError> {
        let message = templates::distribution_notice_message(plan_name, period_number, units);
        smtp::send_to_recipient(&self.config, email, &message)
            .await
            .map_err(Into::into)
    }

    async fn send_operator_alert(&self, detail: &str) -> Result<(), ExternalError> {
        let message = templates::operator_alert_message(detail);
        smtp::send_to_recipient(&self.config, &self.config.operator_address, &message)
            .await
            .map_err(Into::into)
    }
}

/// Log-only notifier for deployments without an email channel and for
/// dry runs. Always succeeds.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_claim_code(
        &self,
        email: &str,
        plan_name: &str,
        _code: &str,
    ) -> Result<(), ExternalError> {
        log::info!("[dry-run] claim code for plan {plan_name:?} to {email} (code withheld)");
        Ok(())
    }

    async fn send_check_in_prompt(
        &self,
        email: &str,
        plan_name: &str,
        _token: &str,
    ) -> Result<(), ExternalError> {
        log::info!("[dry-run] check-in prompt for plan {plan_name:?} to {email}");
        Ok(())
    }

    async fn send_distribution_notice(
        &self,
        email: &str,
        plan_name: &str,
        period_number: u32,
        units: u64,
    ) -> Result<(), ExternalError> {
        log::info!(
            "[dry-run] distribution notice for plan {plan_name:?} period {period_number} \
             ({units} units) to {email}"
        );
        Ok(())
    }

    async fn send_operator_alert(&self, detail: &str) -> Result<(), ExternalError> {
        log::warn!("[dry-run] operator alert: {detail}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SmtpConfig {
        SmtpConfig::new(
            "smtp.example.com",
            "user@example.com",
            "password",
            "noreply@heirloom.dev",
            "ops@heirloom.dev",
        )
    }

    #[test]
    fn test_smtp_notifier_requires_enabled_config() {
        assert!(SmtpNotifier::new(test_config()).is_ok());

        let mut disabled = test_config();
        disabled.enabled = false;
        assert!(SmtpNotifier::new(disabled).is_err());

        let mut no_host = test_config();
        no_host.smtp_host = String::new();
        assert!(SmtpNotifier::new(no_host).is_err());
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        assert!(notifier
            .send_claim_code("a@example.com", "Plan", "AB12CD")
            .await
            .is_ok());
        assert!(notifier
            .send_check_in_prompt("a@example.com", "Plan", "tok")
            .await
            .is_ok());
        assert!(notifier
            .send_distribution_notice("a@example.com", "Plan", 1, 100)
            .await
            .is_ok());
        assert!(notifier.send_operator_alert("detail").await.is_ok());
    }
}
