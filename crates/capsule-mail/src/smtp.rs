//! SMTP transport: async lettre over plaintext, STARTTLS or implicit TLS.

use async_trait::async_trait;
use capsule_core::config::MailConfig;
use capsule_core::error::TransportError;
use capsule_core::traits::MailTransport;
use capsule_core::types::OutgoingMail;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// Delivers capsules through an external SMTP relay.
pub struct SmtpTransport {
    config: MailConfig,
}

impl SmtpTransport {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// Credentials, or the names of the options that are missing.
    fn credentials(&self) -> Result<Credentials, TransportError> {
        if let Some(missing) = missing_credentials(&self.config) {
            return Err(TransportError::NotConfigured(missing.into()));
        }
        Ok(Credentials::new(
            self.config.username.clone().unwrap_or_default(),
            self.config.password.clone().unwrap_or_default(),
        ))
    }

    fn mailer(
        &self,
        creds: Credentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let host = self.config.host.as_str();
        let builder = if self.config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| TransportError::Send(format!("SMTP relay {host}: {e}")))?
        } else if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| TransportError::Send(format!("SMTP relay {host}: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };

        Ok(builder
            .port(self.config.port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(self.config.timeout_secs)))
            .build())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, mail: OutgoingMail) -> Result<(), TransportError> {
        let creds = self.credentials()?;
        if mail.from.trim().is_empty() {
            return Err(TransportError::NotConfigured(
                "default sender address is not set".into(),
            ));
        }

        let to = mail.to.clone();
        let message = build_message(mail)?;
        let mailer = self.mailer(creds)?;

        mailer
            .send(message)
            .await
            .map_err(|e| TransportError::Send(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {to}");
        Ok(())
    }
}

/// Describes the unset credential options, if any. Empty strings count as
/// unset.
pub fn missing_credentials(config: &MailConfig) -> Option<&'static str> {
    let username = config.username.as_deref().is_some_and(|s| !s.is_empty());
    let password = config.password.as_deref().is_some_and(|s| !s.is_empty());
    match (username, password) {
        (true, true) => None,
        (false, false) => Some("mail username and password are not set"),
        (false, true) => Some("mail username is not set"),
        (true, false) => Some("mail password is not set"),
    }
}

/// Build the MIME message: plain text, or multipart/mixed when an attachment
/// is present.
pub fn build_message(mail: OutgoingMail) -> Result<Message, TransportError> {
    let from: Mailbox = mail
        .from
        .parse()
        .map_err(|e| TransportError::Send(format!("Invalid from '{}': {e}", mail.from)))?;
    let to: Mailbox = mail
        .to
        .parse()
        .map_err(|e| TransportError::Send(format!("Invalid to '{}': {e}", mail.to)))?;

    let builder = Message::builder().from(from).to(to).subject(mail.subject);

    let built = match mail.attachment {
        Some(attachment) => {
            let content_type = ContentType::parse("application/octet-stream")
                .map_err(|e| TransportError::Send(format!("Attachment content type: {e}")))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(mail.body))
                    .singlepart(
                        Attachment::new(attachment.filename).body(attachment.bytes, content_type),
                    ),
            )
        }
        None => builder.header(ContentType::TEXT_PLAIN).body(mail.body),
    };

    built.map_err(|e| TransportError::Send(format!("Build email: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::types::MailAttachment;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            from: "capsule@example.com".into(),
            to: "future-me@example.com".into(),
            subject: "Open me in 2030".into(),
            body: "Hello from the past".into(),
            attachment: None,
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_deterministically() {
        let transport = SmtpTransport::new(MailConfig::default());
        let err = transport.send(mail()).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::NotConfigured("mail username and password are not set".into())
        );
        // same answer on every attempt
        assert_eq!(transport.send(mail()).await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_missing_password_is_named() {
        let transport = SmtpTransport::new(MailConfig {
            username: Some("robot@example.com".into()),
            ..Default::default()
        });
        let err = transport.send(mail()).await.unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[tokio::test]
    async fn test_missing_sender_is_not_configured() {
        let transport = SmtpTransport::new(MailConfig {
            username: Some("robot".into()),
            password: Some("pw".into()),
            ..Default::default()
        });
        let mut m = mail();
        m.from = String::new();
        let err = transport.send(m).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_empty_credentials_count_as_missing() {
        let config = MailConfig {
            username: Some(String::new()),
            password: Some("pw".into()),
            ..Default::default()
        };
        assert_eq!(missing_credentials(&config), Some("mail username is not set"));

        let err = SmtpTransport::new(config).send(mail()).await.unwrap_err();
        assert_eq!(err, TransportError::NotConfigured("mail username is not set".into()));
    }

    #[test]
    fn test_complete_credentials_are_not_missing() {
        let config = MailConfig {
            username: Some("robot@example.com".into()),
            password: Some("pw".into()),
            ..Default::default()
        };
        assert_eq!(missing_credentials(&config), None);
        assert_eq!(
            missing_credentials(&MailConfig::default()),
            Some("mail username and password are not set")
        );
    }

    #[test]
    fn test_build_plain_message() {
        let formatted = String::from_utf8(build_message(mail()).unwrap().formatted()).unwrap();
        assert!(formatted.contains("Subject: Open me in 2030"));
        assert!(formatted.contains("To: future-me@example.com"));
        assert!(formatted.contains("Hello from the past"));
    }

    #[test]
    fn test_build_message_with_attachment() {
        let mut m = mail();
        m.attachment = Some(MailAttachment {
            filename: "letter.txt".into(),
            bytes: b"dear future".to_vec(),
        });
        let formatted = String::from_utf8(build_message(m).unwrap().formatted()).unwrap();
        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("letter.txt"));
        assert!(formatted.contains("Hello from the past"));
    }

    #[test]
    fn test_invalid_recipient_is_send_error() {
        let mut m = mail();
        m.to = "not an address".into();
        assert!(matches!(build_message(m), Err(TransportError::Send(_))));
    }
}
