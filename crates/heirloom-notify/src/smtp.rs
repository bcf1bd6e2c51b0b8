//! SMTP email sending

use crate::config::SmtpConfig;
use crate::templates::NotificationMessage;
use crate::NotifyError;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Send a notification to a recipient (async, safe for tokio runtimes).
pub async fn send_to_recipient(
    config: &SmtpConfig,
    recipient: &str,
    notification: &NotificationMessage,
) -> Result<(), NotifyError> {
    let email = build_message(&config.from_address, recipient, notification)?;
    let mailer = build_async_transport(config)?;

    mailer
        .send(email)
        .await
        .map_err(|e| NotifyError::EmailFailed(format!("SMTP send failed: {e}")))?;

    log::info!("email sent to {recipient}: {}", notification.subject);
    Ok(())
}

/// Build a `lettre::Message` from addresses and notification content.
fn build_message(
    from: &str,
    to: &str,
    notification: &NotificationMessage,
) -> Result<Message, NotifyError> {
    Message::builder()
        .from(
            from.parse()
                .map_err(|e| NotifyError::EmailFailed(format!("invalid from address: {e}")))?,
        )
        .to(to
            .parse()
            .map_err(|e| NotifyError::EmailFailed(format!("invalid to address: {e}")))?)
        .subject(&notification.subject)
        .body(notification.body.clone())
        .map_err(|e| NotifyError::EmailFailed(format!("failed to build email: {e}")))
}

/// Build an async SMTP transport from config.
fn build_async_transport(
    config: &SmtpConfig,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let creds = Credentials::new(config.smtp_user.clone(), config.smtp_password.clone());
    let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        .map_err(|e| NotifyError::EmailFailed(format!("SMTP transport setup failed: {e}")))?
        .port(config.smtp_port)
        .credentials(creds)
        .build();
    Ok(transport)
}
