use std::time::Duration;

use lettre::transport::smtp::authentication::{Credentials as SmtpCredentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::Message;
use log::{info, warn};

use crate::credentials::Credentials;
use crate::error::{MailError, Result};
use crate::mail_session::MailTransport;

const AUTH_MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

/// One STARTTLS-upgraded, authenticated SMTP connection, held for the whole
/// session. `quit` sends QUIT and waits for the reply.
pub struct SmtpRelay {
    host: String,
    connection: Option<AsyncSmtpConnection>,
}

impl SmtpRelay {
    /// Connects, upgrades with STARTTLS and authenticates right away so bad
    /// credentials surface at session open rather than at first send.
    pub async fn connect(host: &str, port: u16, credentials: &Credentials, timeout: Duration) -> Result<Self> {
        let auth_error = |stage: &str, e: lettre::transport::smtp::Error| {
            MailError::Authentication(format!("SMTP {} with {}:{} failed: {}", stage, host, port, e))
        };
        let hello = ClientId::default();

        let mut connection = AsyncSmtpConnection::connect_tokio1((host, port), Some(timeout), &hello, None, None)
            .await
            .map_err(|e| auth_error("connect", e))?;

        if !connection.can_starttls() {
            connection.abort().await;
            return Err(MailError::Authentication(format!("{}:{} does not offer STARTTLS", host, port)));
        }
        let tls = TlsParameters::new(host.to_string()).map_err(|e| auth_error("TLS setup", e))?;
        connection.starttls(tls, &hello).await.map_err(|e| auth_error("STARTTLS", e))?;

        let smtp_credentials = SmtpCredentials::new(credentials.username.clone(), credentials.secret().to_string());
        if let Err(e) = connection.auth(AUTH_MECHANISMS, &smtp_credentials).await {
            connection.abort().await;
            return Err(auth_error("login", e));
        }

        info!("-- SMTP authenticated as {} on {}:{}", credentials.username, host, port);
        Ok(SmtpRelay { host: host.to_string(), connection: Some(connection) })
    }
}

impl MailTransport for SmtpRelay {
    async fn send(&mut self, message: Message) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .filter(|connection| !connection.has_broken())
            .ok_or_else(|| MailError::Transport(format!("SMTP connection to {} is closed", self.host)))?;

        let response = connection
            .send(message.envelope(), &message.formatted())
            .await
            .map_err(|e| {
                if e.is_permanent() || e.is_transient() {
                    MailError::Delivery(e.to_string())
                } else {
                    MailError::Transport(e.to_string())
                }
            })?;
        info!("-- message accepted: {}", response.code());
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };
        if connection.has_broken() {
            warn!("-- SMTP connection to {} already broken, not sending QUIT", self.host);
            return Ok(());
        }
        connection
            .quit()
            .await
            .map(|response| info!("-- SMTP QUIT: {}", response.code()))
            .map_err(|e| MailError::Transport(format!("QUIT to {} failed: {}", self.host, e)))
    }
}
