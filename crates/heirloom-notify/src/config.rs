//! Notification configuration

use serde::{Deserialize, Serialize};

/// Email (SMTP) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Enable email notifications
    pub enabled: bool,
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP port (typically 587 for TLS)
    pub smtp_port: u16,
    /// SMTP username
    pub smtp_user: String,
    /// SMTP password
    pub smtp_password: String,
    /// Sender email address
    pub from_address: String,
    /// Operator address for failure alerts
    pub operator_address: String,
    /// Base URL for check-in confirmation links; the single-use token is
    /// appended as a query parameter
    pub check_in_url_base: String,
}

impl SmtpConfig {
    /// Create a new config with the common defaults filled in
    pub fn new(
        smtp_host: impl Into<String>,
        smtp_user: impl Into<String>,
        smtp_password: impl Into<String>,
        from_address: impl Into<String>,
        operator_address: impl Into<String>,
    ) -> Self {
        Self {
            enabled: true,
            smtp_host: smtp_host.into(),
            smtp_port: 587,
            smtp_user: smtp_user.into(),
            smtp_password: smtp_password.into(),
            from_address: from_address.into(),
            operator_address: operator_address.into(),
            check_in_url_base: "https://app.heirloom.dev/check-in".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SmtpConfig::new(
            "smtp.example.com",
            "user@example.com",
            "password",
            "noreply@heirloom.dev",
            "ops@heirloom.dev",
        );
        assert!(config.enabled);
        assert_eq!(config.smtp_port, 587);
        assert!(config.check_in_url_base.starts_with("https://"));
    }
}
