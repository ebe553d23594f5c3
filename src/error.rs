use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the mail session and the compose/view helpers.
///
/// Everything except `Authentication` is recoverable: the driver reports it
/// and the session stays open.
#[derive(Debug, Error)]
pub enum MailError {
    /// Bad credentials or unreachable host while opening the session.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A round trip on an open IMAP or SMTP connection failed or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// The SMTP server refused the message.
    #[error("delivery rejected: {0}")]
    Delivery(String),

    #[error("cannot read attachment {}: {source}", path.display())]
    AttachmentRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("signing failed: {0}")]
    Signing(String),

    /// The draft could not be turned into a wire message (bad address, ...).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A compose step was called in the wrong stage.
    #[error("compose step not allowed: {0}")]
    Workflow(String),
}

pub type Result<T> = std::result::Result<T, MailError>;
