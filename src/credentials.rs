use anyhow::Result;
use std::fmt;

/// Identity and secret shared by the IMAP and SMTP logins.
///
/// Only ever held in memory. `Debug` redacts the secret so the struct can
/// travel through log statements.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials { username: username.into(), secret: secret.into() }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Asks for the password once; the same secret authenticates both protocols.
pub fn prompt_credentials(login: &str) -> Result<Credentials> {
    let password = rpassword::prompt_password(format!("Password for {}: ", login))?;
    Ok(Credentials::new(login, password))
}
